use std::fmt;

use uuid::Uuid;

use crate::Result;
use crate::api::advertisement::AdvertisementData;
use crate::api::central::PeripheralId;
use crate::api::characteristic::CharacteristicId;
use crate::api::state::ManagerState;
use crate::error::Error;

/// Everything the client side driver reports, in driver order.
#[derive(Debug, Clone)]
pub enum CentralEvent {
    StateUpdate {
        state: ManagerState,
    },
    DeviceDiscovered {
        peripheral: PeripheralId,
        name: Option<String>,
        rssi: i16,
        advertisement: AdvertisementData,
    },
    DeviceConnected {
        peripheral: PeripheralId,
    },
    DeviceConnectionFailed {
        peripheral: PeripheralId,
        error: Error,
    },
    /// `error` is `None` for a disconnect the consumer asked for.
    DeviceDisconnected {
        peripheral: PeripheralId,
        error: Option<Error>,
    },
    RssiRead {
        peripheral: PeripheralId,
        result: Result<i16>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: Result<()>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: Result<()>,
    },
    /// Acknowledgement of `set_notify`; `Ok` carries the new notifying flag.
    NotificationStateUpdate {
        characteristic: CharacteristicId,
        result: Result<bool>,
    },
    /// A read result or a notification.
    CharacteristicValueUpdate {
        characteristic: CharacteristicId,
        result: Result<Vec<u8>>,
    },
    CharacteristicWritten {
        characteristic: CharacteristicId,
        result: Result<()>,
    },
    /// Failure of a request that has no completion event of its own.
    OperationFailed {
        operation: CentralOperation,
        error: Error,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CentralOperation {
    Scan,
    CancelConnection { peripheral: PeripheralId },
    WriteWithoutResponse { characteristic: CharacteristicId },
}

impl fmt::Display for CentralOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentralOperation::Scan => write!(f, "scan"),
            CentralOperation::CancelConnection { peripheral } => {
                write!(f, "cancel connection to {peripheral}")
            }
            CentralOperation::WriteWithoutResponse { characteristic } => write!(
                f,
                "write without response to {}",
                characteristic.characteristic
            ),
        }
    }
}

impl CentralEvent {
    /// The peripheral an event is scoped to, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            CentralEvent::StateUpdate { .. } => None,
            CentralEvent::DeviceDiscovered { peripheral, .. }
            | CentralEvent::DeviceConnected { peripheral }
            | CentralEvent::DeviceConnectionFailed { peripheral, .. }
            | CentralEvent::DeviceDisconnected { peripheral, .. }
            | CentralEvent::RssiRead { peripheral, .. }
            | CentralEvent::ServicesDiscovered { peripheral, .. }
            | CentralEvent::CharacteristicsDiscovered { peripheral, .. } => Some(peripheral),
            CentralEvent::NotificationStateUpdate { characteristic, .. }
            | CentralEvent::CharacteristicValueUpdate { characteristic, .. }
            | CentralEvent::CharacteristicWritten { characteristic, .. } => {
                Some(&characteristic.peripheral)
            }
            CentralEvent::OperationFailed { operation, .. } => match operation {
                CentralOperation::CancelConnection { peripheral } => Some(peripheral),
                CentralOperation::WriteWithoutResponse { characteristic } => {
                    Some(&characteristic.peripheral)
                }
                CentralOperation::Scan => None,
            },
        }
    }
}
