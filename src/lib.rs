//! A hardware-abstraction layer between BLE client/server logic and the radio.
//!
//! The `api` module defines the capability traits (`CentralManager`,
//! `PeripheralRemote`, `PeripheralManager`) and the GATT data they exchange.
//! Two backends implement them: `simulated`, a deterministic in-memory test
//! double, and `corebluetooth` on macOS.

pub mod api;
pub mod error;
pub mod simulated;
pub mod uuid;

#[cfg(target_os = "macos")]
pub mod corebluetooth;

pub use error::{Error, ErrorType, Result};

/// Channel capacity that comfortably covers bursts of driver events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
