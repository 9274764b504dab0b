//! BLE Connection Module
//!
//! The individual steps of bringing a bot online: connect, find the bot
//! service, bind its two characteristics, arm notifications. Each step has
//! its own retry budget.

use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::adapter::{BleAdapter, NotificationHandler};
use crate::infrastructure::bluetooth::error::LinkError;
use crate::infrastructure::bluetooth::protocol;
use btleplug::api::BDAddr;
use tracing::{info, warn};

pub const DEFAULT_CONNECT_TRIES: u32 = 3;
pub const DEFAULT_DISCOVER_SERVICE_TRIES: u32 = 3;
pub const DEFAULT_DISCOVER_CHARACTERISTICS_TRIES: u32 = 3;

/// Retry budgets for connection establishment. Zero means "use default".
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub connect_tries: u32,
    pub discover_service_tries: u32,
    pub discover_characteristics_tries: u32,
}

impl ConnectionConfig {
    pub fn connect_tries(&self) -> u32 {
        or_default(self.connect_tries, DEFAULT_CONNECT_TRIES)
    }

    pub fn discover_service_tries(&self) -> u32 {
        or_default(self.discover_service_tries, DEFAULT_DISCOVER_SERVICE_TRIES)
    }

    pub fn discover_characteristics_tries(&self) -> u32 {
        or_default(
            self.discover_characteristics_tries,
            DEFAULT_DISCOVER_CHARACTERISTICS_TRIES,
        )
    }
}

impl From<&LinkSettings> for ConnectionConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            connect_tries: settings.connect_tries,
            discover_service_tries: settings.discover_service_tries,
            discover_characteristics_tries: settings.discover_characteristics_tries,
        }
    }
}

fn or_default(value: u32, default: u32) -> u32 {
    if value > 0 {
        value
    } else {
        default
    }
}

/// Transport resources of a fully connected bot. They only ever exist together.
pub struct Connected<A: BleAdapter> {
    pub connection: A::Connection,
    pub service: A::Service,
    pub notify: A::Characteristic,
    pub write: A::Characteristic,
}

/// Connection steps against one bot address
pub struct BleConnection<'a, A: BleAdapter> {
    adapter: &'a A,
    address: BDAddr,
    config: &'a ConnectionConfig,
}

impl<'a, A: BleAdapter> BleConnection<'a, A> {
    pub fn new(adapter: &'a A, address: BDAddr, config: &'a ConnectionConfig) -> Self {
        Self {
            adapter,
            address,
            config,
        }
    }

    /// Connect to the device, retrying independently up to the budget
    pub async fn connect(&self) -> Result<A::Connection, LinkError> {
        let tries = self.config.connect_tries();
        for attempt in 1..=tries {
            info!("Trying to connect {} (attempt {})", self.address, attempt);
            match self.adapter.connect(self.address).await {
                Ok(connection) => {
                    info!("Connected {}", self.address);
                    return Ok(connection);
                }
                Err(e) => warn!("Connecting error {}: {}", self.address, e),
            }
        }
        warn!("Failed connecting {}", self.address);
        Err(LinkError::ConnectFailed {
            address: self.address,
            tries,
        })
    }

    /// Locate the bot service; first match wins
    pub async fn discover_service(
        &self,
        connection: &A::Connection,
    ) -> Result<A::Service, LinkError> {
        let tries = self.config.discover_service_tries();
        for attempt in 1..=tries {
            info!("Trying to discover services {} (attempt {})", self.address, attempt);
            match self
                .adapter
                .discover_services(connection, &[protocol::SERVICE_UUID])
                .await
            {
                Ok(services) => match services.into_iter().next() {
                    Some(service) => {
                        info!("Service discovered {}", self.address);
                        return Ok(service);
                    }
                    None => warn!("Bot service not found on {}", self.address),
                },
                Err(e) => warn!("Service discovering error {}: {}", self.address, e),
            }
        }
        warn!("Failed discovering services {}", self.address);
        Err(LinkError::ServiceDiscoveryFailed {
            address: self.address,
            tries,
        })
    }

    /// Bind the service's characteristics as `(notify, write)`.
    ///
    /// Exactly two are expected: index 0 is the notification source, index 1
    /// the write target.
    pub async fn discover_characteristics(
        &self,
        service: &A::Service,
        connection: &A::Connection,
    ) -> Result<(A::Characteristic, A::Characteristic), LinkError> {
        let tries = self.config.discover_characteristics_tries();
        for attempt in 1..=tries {
            info!(
                "Trying to discover characteristics {} (attempt {})",
                self.address, attempt
            );
            match self
                .adapter
                .discover_characteristics(connection, service)
                .await
            {
                Ok(chars) if chars.len() == 2 => {
                    let mut chars = chars.into_iter();
                    if let (Some(notify), Some(write)) = (chars.next(), chars.next()) {
                        info!("Characteristics discovered {}", self.address);
                        return Ok((notify, write));
                    }
                }
                Ok(chars) => warn!(
                    "Got {} characteristics from {}, expected 2",
                    chars.len(),
                    self.address
                ),
                Err(e) => warn!("Characteristics discovering error {}: {}", self.address, e),
            }
        }
        warn!("Failed discovering characteristics {}", self.address);
        Err(LinkError::CharacteristicDiscoveryFailed {
            address: self.address,
            tries,
        })
    }

    /// Route every notification of `notify` to `handler`
    pub async fn arm_notifications(
        &self,
        connection: &A::Connection,
        notify: &A::Characteristic,
        handler: NotificationHandler,
    ) -> Result<(), LinkError> {
        self.adapter
            .subscribe(connection, notify, handler)
            .await
            .map_err(|source| {
                warn!("Failed enabling notifications {}: {}", self.address, source);
                LinkError::SubscriptionFailed {
                    address: self.address,
                    source,
                }
            })?;
        info!("Notifications enabled {}", self.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budgets_fall_back_to_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_tries(), DEFAULT_CONNECT_TRIES);
        assert_eq!(config.discover_service_tries(), DEFAULT_DISCOVER_SERVICE_TRIES);
        assert_eq!(
            config.discover_characteristics_tries(),
            DEFAULT_DISCOVER_CHARACTERISTICS_TRIES
        );
    }

    #[test]
    fn test_budgets_from_settings() {
        let settings = LinkSettings {
            connect_tries: 5,
            discover_service_tries: 1,
            ..LinkSettings::default()
        };
        let config = ConnectionConfig::from(&settings);
        assert_eq!(config.connect_tries(), 5);
        assert_eq!(config.discover_service_tries(), 1);
        assert_eq!(config.discover_characteristics_tries(), 3);
    }
}
