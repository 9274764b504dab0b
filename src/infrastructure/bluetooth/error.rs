//! Error types for the Bluetooth layer

use btleplug::api::BDAddr;
use thiserror::Error;

/// Failures reported by a [`BleAdapter`](super::adapter::BleAdapter)
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Peripheral {0} has not been discovered")]
    PeripheralNotFound(BDAddr),

    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Scan error: {0}")]
    ScanFailed(String),

    #[error("{0}")]
    Other(String),
}

impl From<btleplug::Error> for AdapterError {
    fn from(err: btleplug::Error) -> Self {
        AdapterError::Other(err.to_string())
    }
}

/// Why a link could not be acquired
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed connecting to {address} after {tries} tries")]
    ConnectFailed { address: BDAddr, tries: u32 },

    #[error("Failed discovering services on {address} after {tries} tries")]
    ServiceDiscoveryFailed { address: BDAddr, tries: u32 },

    #[error("Failed discovering characteristics on {address} after {tries} tries")]
    CharacteristicDiscoveryFailed { address: BDAddr, tries: u32 },

    #[error("Failed arming notifications on {address}: {source}")]
    SubscriptionFailed {
        address: BDAddr,
        source: AdapterError,
    },
}
