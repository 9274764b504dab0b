//! BLE Scanner Module
//!
//! One discovery sweep at startup so the adapter knows every configured bot
//! before the first connection attempt. Scanning stops once each address has
//! been seen; if one never shows up the scan simply keeps running.

use crate::infrastructure::bluetooth::adapter::{AdapterEvent, BleAdapter};
use btleplug::api::BDAddr;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of feeding one discovered address to a [`DiscoveryTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Not a configured bot, already seen, or the sweep is over
    Ignored,
    Saved,
    /// Last missing bot found
    Complete,
}

/// Tracks which configured addresses have been seen at least once
#[derive(Debug)]
pub struct DiscoveryTracker {
    found: HashMap<BDAddr, bool>,
    missing: usize,
}

impl DiscoveryTracker {
    pub fn new(addresses: impl IntoIterator<Item = BDAddr>) -> Self {
        let found: HashMap<BDAddr, bool> = addresses.into_iter().map(|a| (a, false)).collect();
        let missing = found.len();
        Self { found, missing }
    }

    pub fn observe(&mut self, address: BDAddr) -> Observation {
        if self.missing == 0 {
            return Observation::Ignored;
        }
        match self.found.get_mut(&address) {
            Some(seen) if !*seen => {
                *seen = true;
                self.missing -= 1;
                if self.missing == 0 {
                    Observation::Complete
                } else {
                    Observation::Saved
                }
            }
            _ => Observation::Ignored,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

/// Consume adapter events: log connection changes and stop scanning once
/// every bot has been discovered. Runs until the event stream ends.
pub async fn run_discovery<A: BleAdapter>(
    adapter: Arc<A>,
    mut events: mpsc::UnboundedReceiver<AdapterEvent>,
    mut tracker: DiscoveryTracker,
) {
    while let Some(event) = events.recv().await {
        match event {
            AdapterEvent::Discovered(address) => {
                if tracker.is_complete() {
                    continue;
                }
                debug!("Found device {}", address);
                match tracker.observe(address) {
                    Observation::Ignored => debug!("Discarded {}", address),
                    Observation::Saved => info!("Saved {}", address),
                    Observation::Complete => {
                        info!("Saved {}", address);
                        if let Err(e) = adapter.stop_scan().await {
                            warn!("Failed stopping scan: {}", e);
                        }
                        info!("Found all devices");
                    }
                }
            }
            AdapterEvent::Connected(address) => info!("Device {} connected", address),
            AdapterEvent::Disconnected(address) => info!("Device {} disconnected", address),
        }
    }
    debug!("Adapter event stream closed");
}
