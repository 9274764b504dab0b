//! BLE adapter seam
//!
//! The link state machine only talks to the radio through [`BleAdapter`].
//! Production uses [`BtleAdapter`](super::btle::BtleAdapter); tests use a
//! scripted in-memory adapter.

use super::error::AdapterError;
use async_trait::async_trait;
use btleplug::api::BDAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Called with the payload of every notification from a subscribed characteristic
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Adapter-level events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterEvent {
    Discovered(BDAddr),
    Connected(BDAddr),
    Disconnected(BDAddr),
}

/// Whether a write waits for the peripheral's link-layer acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;
    type Service: Send + Sync + 'static;
    type Characteristic: Send + Sync + 'static;

    /// Power up / verify the adapter
    async fn enable(&self) -> Result<(), AdapterError>;

    /// Stream of discovery and connection events
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<AdapterEvent>, AdapterError>;

    async fn start_scan(&self) -> Result<(), AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    async fn connect(&self, address: BDAddr) -> Result<Self::Connection, AdapterError>;

    /// Services of the connected device matching `filter`
    async fn discover_services(
        &self,
        connection: &Self::Connection,
        filter: &[Uuid],
    ) -> Result<Vec<Self::Service>, AdapterError>;

    async fn discover_characteristics(
        &self,
        connection: &Self::Connection,
        service: &Self::Service,
    ) -> Result<Vec<Self::Characteristic>, AdapterError>;

    async fn write(
        &self,
        connection: &Self::Connection,
        characteristic: &Self::Characteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), AdapterError>;

    async fn subscribe(
        &self,
        connection: &Self::Connection,
        characteristic: &Self::Characteristic,
        handler: NotificationHandler,
    ) -> Result<(), AdapterError>;

    async fn unsubscribe(
        &self,
        connection: &Self::Connection,
        characteristic: &Self::Characteristic,
    ) -> Result<(), AdapterError>;

    async fn disconnect(&self, connection: &Self::Connection) -> Result<(), AdapterError>;
}
