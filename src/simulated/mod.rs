//! Deterministic in-memory backend.
//!
//! Each manager comes paired with a driver handle. Consumer requests and
//! radio stimuli injected through the driver share one FIFO queue, and nothing
//! happens until the driver processes it with `step` or `run_until_idle`.

pub mod central;
pub mod device;
pub mod peripheral_manager;

pub use central::{SimulatedCentral, SimulatedCentralDriver, SimulatedPeripheral};
pub use device::SimulatedDevice;
pub use peripheral_manager::{
    IncomingWrite, RecordedResponse, SentNotification, SimulatedPeripheralDriver,
    SimulatedPeripheralManager,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimulatedConfig {
    /// Pending updates the peripheral manager accepts before `update_value`
    /// starts returning `false`. One update takes one slot however many
    /// centrals it addresses.
    pub notification_queue_capacity: usize,
    /// Signal strength reported for devices that do not set their own.
    pub default_rssi: i16,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        SimulatedConfig {
            notification_queue_capacity: 16,
            default_rssi: -60,
        }
    }
}
