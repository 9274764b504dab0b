//! Device registry
//!
//! Process-wide context holding the adapter and the one [`Link`] per bot.
//! Built once at startup and handed to the server by reference.

use crate::domain::models::ActuatorKind;
use crate::domain::settings::{ConfigError, Settings};
use crate::infrastructure::bluetooth::adapter::BleAdapter;
use crate::infrastructure::bluetooth::error::AdapterError;
use crate::infrastructure::bluetooth::link::{Link, LinkOptions};
use crate::infrastructure::bluetooth::scanner::{self, DiscoveryTracker};
use btleplug::api::BDAddr;
use std::sync::Arc;
use tracing::info;

pub struct DeviceRegistry<A: BleAdapter> {
    adapter: Arc<A>,
    gate: Arc<Link<A>>,
    garage: Arc<Link<A>>,
}

impl<A: BleAdapter> DeviceRegistry<A> {
    pub fn new(adapter: Arc<A>, gate: BDAddr, garage: BDAddr, options: LinkOptions) -> Self {
        Self {
            gate: Arc::new(Link::new(
                ActuatorKind::Gate,
                gate,
                Arc::clone(&adapter),
                options.clone(),
            )),
            garage: Arc::new(Link::new(
                ActuatorKind::Garage,
                garage,
                Arc::clone(&adapter),
                options,
            )),
            adapter,
        }
    }

    /// Resolve both configured addresses and build the links
    pub fn from_settings(adapter: Arc<A>, settings: &Settings) -> Result<Self, ConfigError> {
        let gate = settings.address(ActuatorKind::Gate)?;
        let garage = settings.address(ActuatorKind::Garage)?;
        Ok(Self::new(
            adapter,
            gate,
            garage,
            LinkOptions::from(&settings.link),
        ))
    }

    pub fn link(&self, kind: ActuatorKind) -> &Arc<Link<A>> {
        match kind {
            ActuatorKind::Gate => &self.gate,
            ActuatorKind::Garage => &self.garage,
        }
    }

    pub fn addresses(&self) -> [BDAddr; 2] {
        [self.gate.address(), self.garage.address()]
    }

    /// Enable the adapter, attach the connection observer and start the
    /// discovery sweep in the background.
    pub async fn start(&self) -> Result<(), AdapterError> {
        self.adapter.enable().await?;
        let events = self.adapter.events().await?;
        self.adapter.start_scan().await?;
        info!(
            "Scanning for gate {} and garage {}",
            self.gate.address(),
            self.garage.address()
        );

        let tracker = DiscoveryTracker::new(self.addresses());
        tokio::spawn(scanner::run_discovery(
            Arc::clone(&self.adapter),
            events,
            tracker,
        ));
        Ok(())
    }

    /// Close both links immediately
    pub async fn shutdown(&self) {
        for link in [&self.gate, &self.garage] {
            let snapshot = link.snapshot().await;
            info!(
                "{} at shutdown: {}, users {}, close pending {}",
                link.kind(),
                snapshot.phase,
                snapshot.ref_count,
                snapshot.close_pending
            );
        }
        tokio::join!(self.gate.shutdown(), self.garage.shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LinkPhase;
    use crate::domain::settings::BotsConfig;
    use crate::infrastructure::bluetooth::adapter::AdapterEvent;
    use crate::infrastructure::bluetooth::testing::MockAdapter;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn settings() -> Settings {
        Settings {
            bots: BotsConfig {
                gate: "AA:BB:CC:DD:EE:01".to_string(),
                garage: "AA:BB:CC:DD:EE:02".to_string(),
            },
            ..Settings::default()
        }
    }

    #[test]
    fn test_links_bound_to_configured_addresses() {
        let registry =
            DeviceRegistry::from_settings(Arc::new(MockAdapter::new()), &settings()).unwrap();

        let gate = registry.link(ActuatorKind::Gate);
        assert_eq!(gate.kind(), ActuatorKind::Gate);
        assert_eq!(gate.address(), BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]));
        assert_eq!(
            registry.link(ActuatorKind::Garage).address(),
            BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x02])
        );
    }

    #[test]
    fn test_bad_address_rejected() {
        let mut settings = settings();
        settings.bots.garage = "garage".to_string();
        assert!(DeviceRegistry::from_settings(Arc::new(MockAdapter::new()), &settings).is_err());
    }

    #[tokio::test]
    async fn test_start_scans_until_both_found() {
        let adapter = Arc::new(MockAdapter::new());
        let registry = DeviceRegistry::from_settings(Arc::clone(&adapter), &settings()).unwrap();

        registry.start().await.unwrap();
        assert!(adapter.scanning.load(Ordering::SeqCst));

        for address in registry.addresses() {
            adapter.emit(AdapterEvent::Discovered(address));
        }
        for _ in 0..50 {
            if !adapter.scanning.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!adapter.scanning.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_links_are_independent() {
        let adapter = Arc::new(MockAdapter::new());
        let registry = DeviceRegistry::from_settings(Arc::clone(&adapter), &settings()).unwrap();
        let gate = registry.link(ActuatorKind::Gate);
        let garage = registry.link(ActuatorKind::Garage);

        let (a, b) = tokio::join!(gate.acquire(), garage.acquire());
        a.unwrap();
        b.unwrap();

        assert_eq!(adapter.connects.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.overlaps.load(Ordering::SeqCst), 0);

        registry.shutdown().await;
        assert_eq!(gate.snapshot().await.phase, LinkPhase::Closed);
        assert_eq!(garage.snapshot().await.phase, LinkPhase::Closed);
    }
}
