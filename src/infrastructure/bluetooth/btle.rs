//! btleplug-backed adapter

use super::adapter::{AdapterEvent, BleAdapter, NotificationHandler, WriteMode};
use super::error::AdapterError;
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// First adapter of the platform BLE manager
pub struct BtleAdapter {
    adapter: Adapter,
    notification_tasks: Mutex<HashMap<BDAddr, JoinHandle<()>>>,
}

impl BtleAdapter {
    pub async fn new() -> Result<Self, AdapterError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(AdapterError::AdapterNotAvailable)?;

        Ok(Self {
            adapter,
            notification_tasks: Mutex::new(HashMap::new()),
        })
    }

    fn forget_notification_task(&self, address: BDAddr) {
        let task = match self.notification_tasks.lock() {
            Ok(mut tasks) => tasks.remove(&address),
            Err(_) => None,
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

async fn address_of(adapter: &Adapter, id: &PeripheralId) -> Option<BDAddr> {
    match adapter.peripheral(id).await {
        Ok(peripheral) => Some(peripheral.address()),
        Err(e) => {
            debug!("Event for unknown peripheral {:?}: {}", id, e);
            None
        }
    }
}

#[async_trait]
impl BleAdapter for BtleAdapter {
    type Connection = Peripheral;
    type Service = Service;
    type Characteristic = Characteristic;

    async fn enable(&self) -> Result<(), AdapterError> {
        let info = self.adapter.adapter_info().await?;
        info!("BLE adapter ready: {}", info);
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<AdapterEvent>, AdapterError> {
        let mut events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        address_of(&adapter, &id).await.map(AdapterEvent::Discovered)
                    }
                    CentralEvent::DeviceConnected(id) => {
                        address_of(&adapter, &id).await.map(AdapterEvent::Connected)
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        address_of(&adapter, &id).await.map(AdapterEvent::Disconnected)
                    }
                    _ => None,
                };
                if let Some(event) = event {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
            debug!("BLE event stream ended");
        });

        Ok(rx)
    }

    async fn start_scan(&self) -> Result<(), AdapterError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| AdapterError::ScanFailed(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| AdapterError::ScanFailed(e.to_string()))
    }

    async fn connect(&self, address: BDAddr) -> Result<Peripheral, AdapterError> {
        let peripheral = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == address)
            .ok_or(AdapterError::PeripheralNotFound(address))?;

        peripheral
            .connect()
            .await
            .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;
        Ok(peripheral)
    }

    async fn discover_services(
        &self,
        connection: &Peripheral,
        filter: &[Uuid],
    ) -> Result<Vec<Service>, AdapterError> {
        connection
            .discover_services()
            .await
            .map_err(|e| AdapterError::ServiceDiscoveryFailed(e.to_string()))?;

        Ok(connection
            .services()
            .into_iter()
            .filter(|s| filter.is_empty() || filter.contains(&s.uuid))
            .collect())
    }

    async fn discover_characteristics(
        &self,
        _connection: &Peripheral,
        service: &Service,
    ) -> Result<Vec<Characteristic>, AdapterError> {
        // The bot exposes its notify source ahead of the write target
        let (mut notify, write): (Vec<_>, Vec<_>) = service
            .characteristics
            .iter()
            .cloned()
            .partition(|c| c.properties.contains(CharPropFlags::NOTIFY));
        notify.extend(write);
        Ok(notify)
    }

    async fn write(
        &self,
        connection: &Peripheral,
        characteristic: &Characteristic,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), AdapterError> {
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        connection
            .write(characteristic, data, write_type)
            .await
            .map_err(|e| AdapterError::WriteFailed(e.to_string()))
    }

    async fn subscribe(
        &self,
        connection: &Peripheral,
        characteristic: &Characteristic,
        handler: NotificationHandler,
    ) -> Result<(), AdapterError> {
        connection
            .subscribe(characteristic)
            .await
            .map_err(|e| AdapterError::SubscriptionFailed(e.to_string()))?;
        let mut notifications = connection
            .notifications()
            .await
            .map_err(|e| AdapterError::SubscriptionFailed(e.to_string()))?;

        let address = connection.address();
        let uuid = characteristic.uuid;
        let task = tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if data.uuid == uuid {
                    handler(&data.value);
                }
            }
            debug!("Notification stream for {} ended", address);
        });

        self.forget_notification_task(address);
        if let Ok(mut tasks) = self.notification_tasks.lock() {
            tasks.insert(address, task);
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        connection: &Peripheral,
        characteristic: &Characteristic,
    ) -> Result<(), AdapterError> {
        self.forget_notification_task(connection.address());
        connection
            .unsubscribe(characteristic)
            .await
            .map_err(|e| AdapterError::SubscriptionFailed(e.to_string()))
    }

    async fn disconnect(&self, connection: &Peripheral) -> Result<(), AdapterError> {
        self.forget_notification_task(connection.address());
        if let Err(e) = connection.disconnect().await {
            warn!("Disconnect from {} failed: {}", connection.address(), e);
            return Err(e.into());
        }
        Ok(())
    }
}
