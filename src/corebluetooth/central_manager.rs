use std::collections::BTreeSet;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, Sender};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::api::central::{
    CentralManager, ConnectOptions, PeripheralId, PeripheralRemote, ScanOptions,
};
use crate::api::central_event::{CentralEvent, CentralOperation};
use crate::api::characteristic::{Characteristic, CharacteristicWriteType};
use crate::api::service::Service;
use crate::api::state::{ConnectionState, ManagerState};
use crate::corebluetooth::objc_bindings::central_manager_cb::{
    CentralCache, CentralCommand, SharedCentralCache, lock, run_central_thread,
};
use crate::{DEFAULT_EVENT_CAPACITY, Error, ErrorType, Result};

/// `CentralManager` backed by `CBCentralManager`.
///
/// All CoreBluetooth calls happen on a worker thread owned by this manager;
/// it shuts down once the manager and every peripheral handle are dropped.
#[derive(Clone)]
pub struct CoreBluetoothCentral {
    shared: Arc<Shared>,
}

struct Shared {
    commands: Sender<CentralCommand>,
    cache: SharedCentralCache,
}

impl Shared {
    async fn send(&self, command: CentralCommand) -> Result<()> {
        self.commands.send(command).await?;
        Ok(())
    }
}

impl CoreBluetoothCentral {
    pub fn new(sender: Sender<CentralEvent>) -> Result<Self> {
        let (commands, listener) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        let cache: SharedCentralCache = Arc::new(Mutex::new(CentralCache::default()));
        run_central_thread(sender, listener, cache.clone())?;
        Ok(Self {
            shared: Arc::new(Shared { commands, cache }),
        })
    }

    fn handle(&self, id: PeripheralId) -> CoreBluetoothPeripheral {
        CoreBluetoothPeripheral {
            id,
            shared: self.shared.clone(),
        }
    }

    /// Handle for a peripheral this manager discovered or retrieved.
    pub fn peripheral(&self, id: &PeripheralId) -> Option<CoreBluetoothPeripheral> {
        let known = lock(&self.shared.cache).peripherals.contains_key(id);
        known.then(|| self.handle(id.clone()))
    }
}

fn foreign_peripheral(id: &PeripheralId) -> Error {
    Error::from_string(
        format!("peripheral {id} belongs to another central manager"),
        ErrorType::UnknownEntity,
    )
}

#[async_trait]
impl CentralManager for CoreBluetoothCentral {
    type Peripheral = CoreBluetoothPeripheral;

    fn state(&self) -> ManagerState {
        lock(&self.shared.cache).state
    }

    fn is_scanning(&self) -> bool {
        lock(&self.shared.cache).scanning
    }

    async fn scan(&self, services: Option<BTreeSet<Uuid>>, options: ScanOptions) -> Result<()> {
        self.shared
            .send(CentralCommand::Scan { services, options })
            .await
    }

    async fn stop_scan(&self) -> Result<()> {
        self.shared.send(CentralCommand::StopScan).await
    }

    async fn connect(&self, peripheral: &Self::Peripheral, options: ConnectOptions) -> Result<()> {
        let command = if Arc::ptr_eq(&self.shared, &peripheral.shared) {
            CentralCommand::Connect {
                peripheral: peripheral.id.clone(),
                options,
            }
        } else {
            CentralCommand::Reject(CentralEvent::DeviceConnectionFailed {
                peripheral: peripheral.id.clone(),
                error: foreign_peripheral(&peripheral.id),
            })
        };
        self.shared.send(command).await
    }

    async fn cancel_connection(&self, peripheral: &Self::Peripheral) -> Result<()> {
        let command = if Arc::ptr_eq(&self.shared, &peripheral.shared) {
            CentralCommand::CancelConnection {
                peripheral: peripheral.id.clone(),
            }
        } else {
            CentralCommand::Reject(CentralEvent::OperationFailed {
                operation: CentralOperation::CancelConnection {
                    peripheral: peripheral.id.clone(),
                },
                error: foreign_peripheral(&peripheral.id),
            })
        };
        self.shared.send(command).await
    }

    async fn connected_peripherals(
        &self,
        services: &BTreeSet<Uuid>,
    ) -> Result<Vec<Self::Peripheral>> {
        let (responder, response) = oneshot::channel();
        self.shared
            .send(CentralCommand::RetrieveConnected {
                services: services.clone(),
                responder,
            })
            .await?;
        let ids = response.await?;
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }

    async fn known_peripherals(
        &self,
        identifiers: &[PeripheralId],
    ) -> Result<Vec<Self::Peripheral>> {
        let (responder, response) = oneshot::channel();
        self.shared
            .send(CentralCommand::RetrieveKnown {
                identifiers: identifiers.to_vec(),
                responder,
            })
            .await?;
        let ids = response.await?;
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }
}

#[derive(Clone)]
pub struct CoreBluetoothPeripheral {
    id: PeripheralId,
    shared: Arc<Shared>,
}

impl Debug for CoreBluetoothPeripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBluetoothPeripheral")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait]
impl PeripheralRemote for CoreBluetoothPeripheral {
    fn id(&self) -> PeripheralId {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        lock(&self.shared.cache)
            .peripherals
            .get(&self.id)
            .and_then(|peripheral| peripheral.name.clone())
    }

    fn connection_state(&self) -> ConnectionState {
        lock(&self.shared.cache)
            .peripherals
            .get(&self.id)
            .map(|peripheral| peripheral.connection)
            .unwrap_or_default()
    }

    async fn read_rssi(&self) -> Result<()> {
        self.shared
            .send(CentralCommand::ReadRssi {
                peripheral: self.id.clone(),
            })
            .await
    }

    async fn discover_services(&self, services: Option<BTreeSet<Uuid>>) -> Result<()> {
        self.shared
            .send(CentralCommand::DiscoverServices {
                peripheral: self.id.clone(),
                services,
            })
            .await
    }

    async fn discover_characteristics(
        &self,
        characteristics: Option<BTreeSet<Uuid>>,
        service: &Service,
    ) -> Result<()> {
        let command = if service.peripheral_id() == &self.id {
            CentralCommand::DiscoverCharacteristics {
                peripheral: self.id.clone(),
                service: service.uuid(),
                characteristics,
            }
        } else {
            CentralCommand::Reject(CentralEvent::CharacteristicsDiscovered {
                peripheral: self.id.clone(),
                service: service.uuid(),
                result: Err(Error::unknown(format!(
                    "service {} on {}",
                    service.uuid(),
                    self.id
                ))),
            })
        };
        self.shared.send(command).await
    }

    async fn set_notify(&self, enabled: bool, characteristic: &Characteristic) -> Result<()> {
        let id = characteristic.id().clone();
        let command = if id.peripheral == self.id {
            CentralCommand::SetNotify {
                characteristic: id,
                enabled,
            }
        } else {
            CentralCommand::Reject(CentralEvent::NotificationStateUpdate {
                result: Err(Error::unknown(format!("characteristic {}", id.characteristic))),
                characteristic: id,
            })
        };
        self.shared.send(command).await
    }

    async fn read_value(&self, characteristic: &Characteristic) -> Result<()> {
        let id = characteristic.id().clone();
        let command = if id.peripheral == self.id {
            CentralCommand::ReadValue { characteristic: id }
        } else {
            CentralCommand::Reject(CentralEvent::CharacteristicValueUpdate {
                result: Err(Error::unknown(format!("characteristic {}", id.characteristic))),
                characteristic: id,
            })
        };
        self.shared.send(command).await
    }

    async fn write_value(
        &self,
        data: &[u8],
        characteristic: &Characteristic,
        write_type: CharacteristicWriteType,
    ) -> Result<()> {
        let id = characteristic.id().clone();
        let command = if id.peripheral == self.id {
            CentralCommand::WriteValue {
                characteristic: id,
                data: data.to_vec(),
                write_type,
            }
        } else {
            let error = Error::unknown(format!("characteristic {}", id.characteristic));
            CentralCommand::Reject(match write_type {
                CharacteristicWriteType::WriteWithResponse => CentralEvent::CharacteristicWritten {
                    characteristic: id,
                    result: Err(error),
                },
                CharacteristicWriteType::WriteWithoutResponse => CentralEvent::OperationFailed {
                    operation: CentralOperation::WriteWithoutResponse { characteristic: id },
                    error,
                },
            })
        };
        self.shared.send(command).await
    }

    fn services(&self) -> Option<Vec<Service>> {
        lock(&self.shared.cache)
            .peripherals
            .get(&self.id)
            .and_then(|peripheral| peripheral.services.clone())
    }
}
