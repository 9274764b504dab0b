//! Bluetooth Module
//!
//! Drives the two bots (gate and garage) over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    DeviceRegistry                        │
//! │  (Owns the adapter and one Link per bot)                 │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │    Link    │  │ Protocol │
//! │           │  │            │  │          │
//! │ - startup │  │ - refcount │  │ - UUID   │
//! │   sweep   │  │ - grace    │  │ - opcodes│
//! │           │  │ - press    │  │ - status │
//! └───────────┘  └─────┬──────┘  └──────────┘
//!                      │
//!                      ▼
//!               ┌────────────┐
//!               │ Connection │  retries connect / discovery
//!               └─────┬──────┘
//!                     ▼
//!               ┌────────────┐
//!               │ BleAdapter │  btleplug in production
//!               └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`adapter`] - Transport trait the rest of the stack is generic over
//! - [`btle`] - `btleplug` implementation of the adapter
//! - [`protocol`] - Service UUID, commands and status decoding
//! - [`connection`] - Connect and discovery steps with bounded retries
//! - [`link`] - Shared, reference-counted bot link
//! - [`scanner`] - Startup discovery sweep
//! - [`registry`] - Process-wide set of links

pub mod adapter;
pub mod btle;
pub mod connection;
pub mod error;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod response_slot;
pub mod scanner;

#[cfg(test)]
pub mod testing;

pub use adapter::BleAdapter;
pub use btle::BtleAdapter;
pub use error::{AdapterError, LinkError};
pub use link::{Link, LinkOptions};
pub use registry::DeviceRegistry;
