//! CoreBluetooth backend.
//!
//! Each manager owns a worker thread that holds the Objective-C objects and
//! the delegate; handles talk to it over a command channel and read state
//! from a shared cache the worker keeps current.

pub mod central_manager;
mod objc_bindings;
pub mod peripheral_manager;

pub use central_manager::{CoreBluetoothCentral, CoreBluetoothPeripheral};
pub use objc_bindings::is_authorized;
pub use peripheral_manager::CoreBluetoothPeripheralManager;
