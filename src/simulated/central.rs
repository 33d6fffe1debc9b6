use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::api::central::{
    CentralManager, ConnectOptions, PeripheralId, PeripheralRemote, ScanOptions,
};
use crate::api::central_event::{CentralEvent, CentralOperation};
use crate::api::attribute::RequestResponse;
use crate::api::characteristic::{
    Characteristic, CharacteristicId, CharacteristicProperties, CharacteristicWriteType,
};
use crate::api::service::Service;
use crate::api::state::{ConnectionState, ManagerState};
use crate::simulated::SimulatedConfig;
use crate::simulated::device::SimulatedDevice;
use crate::{Error, ErrorType, Result};

/// In-memory `CentralManager`.
///
/// Requests are queued and only take effect when the paired
/// `SimulatedCentralDriver` processes them, so tests control exactly when
/// each completion event is delivered.
#[derive(Clone)]
pub struct SimulatedCentral {
    radio: Arc<Radio>,
}

/// Test-side control of the simulated radio: power state, devices in range,
/// remote activity and the processing of queued requests.
#[derive(Clone)]
pub struct SimulatedCentralDriver {
    radio: Arc<Radio>,
}

#[derive(Clone)]
pub struct SimulatedPeripheral {
    id: PeripheralId,
    radio: Arc<Radio>,
}

struct Radio {
    inner: Mutex<RadioInner>,
    events: Sender<CentralEvent>,
}

struct RadioInner {
    config: SimulatedConfig,
    state: ManagerState,
    scan: Option<ScanSession>,
    devices: BTreeMap<PeripheralId, DeviceEntry>,
    commands: VecDeque<CentralCommand>,
}

struct ScanSession {
    services: Option<BTreeSet<Uuid>>,
    options: ScanOptions,
    reported: HashSet<PeripheralId>,
}

struct DeviceEntry {
    device: SimulatedDevice,
    known: bool,
    connection: ConnectionState,
    services: Option<Vec<Service>>,
}

#[derive(Debug)]
enum CentralCommand {
    Scan {
        services: Option<BTreeSet<Uuid>>,
        options: ScanOptions,
    },
    StopScan,
    Connect {
        peripheral: PeripheralId,
    },
    ConnectionComplete {
        peripheral: PeripheralId,
    },
    CancelConnection {
        peripheral: PeripheralId,
    },
    DisconnectionComplete {
        peripheral: PeripheralId,
    },
    ReadRssi {
        peripheral: PeripheralId,
    },
    DiscoverServices {
        peripheral: PeripheralId,
        services: Option<BTreeSet<Uuid>>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Option<BTreeSet<Uuid>>,
    },
    SetNotify {
        characteristic: CharacteristicId,
        enabled: bool,
    },
    ReadValue {
        characteristic: CharacteristicId,
    },
    WriteValue {
        characteristic: CharacteristicId,
        data: Vec<u8>,
        write_type: CharacteristicWriteType,
    },
    Advertise {
        peripheral: PeripheralId,
    },
    Notify {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    LinkLoss {
        peripheral: PeripheralId,
    },
    /// A request rejected when it was issued, delivered in queue order.
    Reject(CentralEvent),
}

impl Radio {
    fn lock(&self) -> MutexGuard<'_, RadioInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, command: CentralCommand) {
        trace!("enqueue {command:?}");
        self.lock().commands.push_back(command);
    }

    async fn deliver(&self, events: Vec<CentralEvent>) {
        for event in events {
            if let Err(e) = self.events.send(event).await {
                warn!("Error sending central event: {}", e);
            }
        }
    }
}

impl SimulatedCentral {
    pub fn new(sender: Sender<CentralEvent>) -> (SimulatedCentral, SimulatedCentralDriver) {
        Self::with_config(sender, SimulatedConfig::default())
    }

    pub fn with_config(
        sender: Sender<CentralEvent>,
        config: SimulatedConfig,
    ) -> (SimulatedCentral, SimulatedCentralDriver) {
        let radio = Arc::new(Radio {
            inner: Mutex::new(RadioInner {
                config,
                state: ManagerState::Unknown,
                scan: None,
                devices: BTreeMap::new(),
                commands: VecDeque::new(),
            }),
            events: sender,
        });
        (
            SimulatedCentral {
                radio: radio.clone(),
            },
            SimulatedCentralDriver { radio },
        )
    }

    /// Handle for a peripheral the radio knows about.
    pub fn peripheral(&self, id: &PeripheralId) -> Option<SimulatedPeripheral> {
        let inner = self.radio.lock();
        inner
            .devices
            .get(id)
            .filter(|entry| entry.known)
            .map(|_| SimulatedPeripheral {
                id: id.clone(),
                radio: self.radio.clone(),
            })
    }
}

#[async_trait]
impl CentralManager for SimulatedCentral {
    type Peripheral = SimulatedPeripheral;

    fn state(&self) -> ManagerState {
        self.radio.lock().state
    }

    fn is_scanning(&self) -> bool {
        self.radio.lock().scan.is_some()
    }

    async fn scan(&self, services: Option<BTreeSet<Uuid>>, options: ScanOptions) -> Result<()> {
        self.radio
            .enqueue(CentralCommand::Scan { services, options });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.radio.enqueue(CentralCommand::StopScan);
        Ok(())
    }

    async fn connect(&self, peripheral: &Self::Peripheral, options: ConnectOptions) -> Result<()> {
        debug!("connect {} with {options:?}", peripheral.id);
        let command = if Arc::ptr_eq(&self.radio, &peripheral.radio) {
            CentralCommand::Connect {
                peripheral: peripheral.id.clone(),
            }
        } else {
            CentralCommand::Reject(CentralEvent::DeviceConnectionFailed {
                peripheral: peripheral.id.clone(),
                error: foreign_peripheral(&peripheral.id),
            })
        };
        self.radio.enqueue(command);
        Ok(())
    }

    async fn cancel_connection(&self, peripheral: &Self::Peripheral) -> Result<()> {
        let command = if Arc::ptr_eq(&self.radio, &peripheral.radio) {
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
        self.radio.enqueue(command);
        Ok(())
    }

    async fn connected_peripherals(
        &self,
        services: &BTreeSet<Uuid>,
    ) -> Result<Vec<Self::Peripheral>> {
        let inner = self.radio.lock();
        Ok(inner
            .devices
            .values()
            .filter(|entry| entry.connection == ConnectionState::Connected)
            .filter(|entry| entry.device.exposes_any(services))
            .map(|entry| SimulatedPeripheral {
                id: entry.device.id.clone(),
                radio: self.radio.clone(),
            })
            .collect())
    }

    async fn known_peripherals(
        &self,
        identifiers: &[PeripheralId],
    ) -> Result<Vec<Self::Peripheral>> {
        let inner = self.radio.lock();
        Ok(identifiers
            .iter()
            .filter(|id| inner.devices.get(*id).is_some_and(|entry| entry.known))
            .map(|id| SimulatedPeripheral {
                id: id.clone(),
                radio: self.radio.clone(),
            })
            .collect())
    }
}

fn foreign_peripheral(id: &PeripheralId) -> Error {
    Error::from_string(
        format!("peripheral {id} belongs to another central manager"),
        ErrorType::UnknownEntity,
    )
}

impl Debug for SimulatedPeripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedPeripheral")
            .field("id", &self.id)
            .finish()
    }
}

impl SimulatedPeripheral {
    fn enqueue_for(&self, owner: &PeripheralId, command: CentralCommand, rejected: CentralEvent) {
        if owner == &self.id {
            self.radio.enqueue(command);
        } else {
            self.radio.enqueue(CentralCommand::Reject(rejected));
        }
    }
}

#[async_trait]
impl PeripheralRemote for SimulatedPeripheral {
    fn id(&self) -> PeripheralId {
        self.id.clone()
    }

    fn name(&self) -> Option<String> {
        self.radio
            .lock()
            .devices
            .get(&self.id)
            .and_then(|entry| entry.device.display_name())
    }

    fn connection_state(&self) -> ConnectionState {
        self.radio
            .lock()
            .devices
            .get(&self.id)
            .map(|entry| entry.connection)
            .unwrap_or_default()
    }

    async fn read_rssi(&self) -> Result<()> {
        self.radio.enqueue(CentralCommand::ReadRssi {
            peripheral: self.id.clone(),
        });
        Ok(())
    }

    async fn discover_services(&self, services: Option<BTreeSet<Uuid>>) -> Result<()> {
        self.radio.enqueue(CentralCommand::DiscoverServices {
            peripheral: self.id.clone(),
            services,
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        characteristics: Option<BTreeSet<Uuid>>,
        service: &Service,
    ) -> Result<()> {
        self.enqueue_for(
            service.peripheral_id(),
            CentralCommand::DiscoverCharacteristics {
                peripheral: self.id.clone(),
                service: service.uuid(),
                characteristics,
            },
            CentralEvent::CharacteristicsDiscovered {
                peripheral: self.id.clone(),
                service: service.uuid(),
                result: Err(Error::unknown(format!(
                    "service {} on {}",
                    service.uuid(),
                    self.id
                ))),
            },
        );
        Ok(())
    }

    async fn set_notify(&self, enabled: bool, characteristic: &Characteristic) -> Result<()> {
        let id = characteristic.id().clone();
        self.enqueue_for(
            &id.peripheral,
            CentralCommand::SetNotify {
                characteristic: id.clone(),
                enabled,
            },
            CentralEvent::NotificationStateUpdate {
                result: Err(unknown_characteristic(&id)),
                characteristic: id.clone(),
            },
        );
        Ok(())
    }

    async fn read_value(&self, characteristic: &Characteristic) -> Result<()> {
        let id = characteristic.id().clone();
        self.enqueue_for(
            &id.peripheral,
            CentralCommand::ReadValue {
                characteristic: id.clone(),
            },
            CentralEvent::CharacteristicValueUpdate {
                result: Err(unknown_characteristic(&id)),
                characteristic: id.clone(),
            },
        );
        Ok(())
    }

    async fn write_value(
        &self,
        data: &[u8],
        characteristic: &Characteristic,
        write_type: CharacteristicWriteType,
    ) -> Result<()> {
        let id = characteristic.id().clone();
        self.enqueue_for(
            &id.peripheral,
            CentralCommand::WriteValue {
                characteristic: id.clone(),
                data: data.to_vec(),
                write_type,
            },
            write_failure(id.clone(), write_type, unknown_characteristic(&id)),
        );
        Ok(())
    }

    fn services(&self) -> Option<Vec<Service>> {
        self.radio
            .lock()
            .devices
            .get(&self.id)
            .and_then(|entry| entry.services.clone())
    }
}

fn unknown_characteristic(id: &CharacteristicId) -> Error {
    Error::unknown(format!(
        "characteristic {} of service {} on {}",
        id.characteristic, id.service, id.peripheral
    ))
}

fn write_failure(
    characteristic: CharacteristicId,
    write_type: CharacteristicWriteType,
    error: Error,
) -> CentralEvent {
    match write_type {
        CharacteristicWriteType::WriteWithResponse => CentralEvent::CharacteristicWritten {
            characteristic,
            result: Err(error),
        },
        CharacteristicWriteType::WriteWithoutResponse => CentralEvent::OperationFailed {
            operation: CentralOperation::WriteWithoutResponse { characteristic },
            error,
        },
    }
}

impl SimulatedCentralDriver {
    pub fn add_device(&self, device: SimulatedDevice) {
        let mut inner = self.radio.lock();
        let known = device.known;
        inner.devices.insert(
            device.id.clone(),
            DeviceEntry {
                device,
                known,
                connection: ConnectionState::Disconnected,
                services: None,
            },
        );
    }

    /// Moves the radio to `state`, rejecting transitions the platform never
    /// makes. Leaving `PoweredOn` ends the scan and drops every connection.
    pub async fn set_state(&self, state: ManagerState) -> Result<()> {
        let events = {
            let mut inner = self.radio.lock();
            if !inner.state.can_transition_to(state) {
                return Err(Error::from_string(
                    format!("radio cannot go from {:?} to {:?}", inner.state, state),
                    ErrorType::InvalidState,
                ));
            }
            let was_powered = inner.state.is_powered_on();
            inner.state = state;
            let mut events = vec![CentralEvent::StateUpdate { state }];
            if was_powered && !state.is_powered_on() {
                inner.scan = None;
                for entry in inner.devices.values_mut() {
                    if entry.connection != ConnectionState::Disconnected {
                        entry.connection = ConnectionState::Disconnected;
                        entry.services = None;
                        events.push(CentralEvent::DeviceDisconnected {
                            peripheral: entry.device.id.clone(),
                            error: Some(Error::not_powered_on("connection")),
                        });
                    }
                }
            }
            events
        };
        self.radio.deliver(events).await;
        Ok(())
    }

    /// Walks the radio through `Resetting` to `PoweredOn`.
    pub async fn power_on(&self) -> Result<()> {
        let state = self.radio.lock().state;
        match state {
            ManagerState::PoweredOn => Ok(()),
            ManagerState::PoweredOff | ManagerState::Resetting => {
                self.set_state(ManagerState::PoweredOn).await
            }
            _ => {
                self.set_state(ManagerState::Resetting).await?;
                self.set_state(ManagerState::PoweredOn).await
            }
        }
    }

    /// The device broadcasts one advertisement.
    pub fn advertise(&self, peripheral: &PeripheralId) {
        self.radio.enqueue(CentralCommand::Advertise {
            peripheral: peripheral.clone(),
        });
    }

    /// The remote side pushes a notification or indication.
    pub fn notify(&self, characteristic: &CharacteristicId, value: Vec<u8>) {
        self.radio.enqueue(CentralCommand::Notify {
            characteristic: characteristic.clone(),
            value,
        });
    }

    pub fn lose_link(&self, peripheral: &PeripheralId) {
        self.radio.enqueue(CentralCommand::LinkLoss {
            peripheral: peripheral.clone(),
        });
    }

    /// Changes the value stored by the remote device without notifying.
    pub fn set_remote_value(&self, characteristic: &CharacteristicId, value: Vec<u8>) {
        let mut inner = self.radio.lock();
        if let Some(entry) = inner.devices.get_mut(&characteristic.peripheral) {
            entry.device.values.insert(
                (characteristic.service, characteristic.characteristic),
                value,
            );
        }
    }

    /// Value the remote device currently stores, e.g. after a write.
    pub fn remote_value(&self, characteristic: &CharacteristicId) -> Option<Vec<u8>> {
        let inner = self.radio.lock();
        inner
            .devices
            .get(&characteristic.peripheral)?
            .device
            .values
            .get(&(characteristic.service, characteristic.characteristic))
            .cloned()
    }

    pub fn pending(&self) -> usize {
        self.radio.lock().commands.len()
    }

    /// Processes the oldest queued command. Returns `false` when idle.
    pub async fn step(&self) -> bool {
        let events = {
            let mut inner = self.radio.lock();
            match inner.commands.pop_front() {
                Some(command) => inner.process(command),
                None => return false,
            }
        };
        self.radio.deliver(events).await;
        true
    }

    /// Processes commands, including follow-ups they schedule, until the
    /// queue is empty. Returns how many were processed.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.step().await {
            processed += 1;
        }
        processed
    }
}

impl RadioInner {
    fn process(&mut self, command: CentralCommand) -> Vec<CentralEvent> {
        debug!("process {command:?}");
        let powered = self.state.is_powered_on();
        match command {
            CentralCommand::Reject(event) => vec![event],
            CentralCommand::Scan { services, options } => {
                if !powered {
                    return vec![CentralEvent::OperationFailed {
                        operation: CentralOperation::Scan,
                        error: Error::not_powered_on(CentralOperation::Scan),
                    }];
                }
                self.scan = Some(ScanSession {
                    services,
                    options,
                    reported: HashSet::new(),
                });
                Vec::new()
            }
            // a radio that is not powered on has no scan to stop
            CentralCommand::StopScan => {
                self.scan = None;
                Vec::new()
            }
            CentralCommand::Advertise { peripheral } => self.advertisement(peripheral),
            CentralCommand::Connect { peripheral } => self.connect(peripheral, powered),
            CentralCommand::ConnectionComplete { peripheral } => {
                self.connection_complete(peripheral, powered)
            }
            CentralCommand::CancelConnection { peripheral } => {
                self.cancel_connection(peripheral, powered)
            }
            CentralCommand::DisconnectionComplete { peripheral } => {
                match self.devices.get_mut(&peripheral) {
                    Some(entry) if entry.connection == ConnectionState::Disconnecting => {
                        entry.connection = ConnectionState::Disconnected;
                        entry.services = None;
                        vec![CentralEvent::DeviceDisconnected {
                            peripheral,
                            error: None,
                        }]
                    }
                    _ => Vec::new(),
                }
            }
            CentralCommand::LinkLoss { peripheral } => match self.devices.get_mut(&peripheral) {
                Some(entry) if entry.connection == ConnectionState::Connected => {
                    entry.connection = ConnectionState::Disconnected;
                    entry.services = None;
                    vec![CentralEvent::DeviceDisconnected {
                        peripheral,
                        error: Some(Error::new(ErrorType::LinkLost, "link supervision timeout")),
                    }]
                }
                _ => Vec::new(),
            },
            CentralCommand::ReadRssi { peripheral } => {
                let default_rssi = self.config.default_rssi;
                let result = self
                    .connected_entry(&peripheral, powered, "read rssi")
                    .map(|entry| entry.device.rssi.unwrap_or(default_rssi));
                vec![CentralEvent::RssiRead { peripheral, result }]
            }
            CentralCommand::DiscoverServices {
                peripheral,
                services,
            } => {
                let result = self
                    .connected_entry(&peripheral, powered, "discover services")
                    .map(|entry| {
                        let previous = entry.services.take().unwrap_or_default();
                        let discovered = entry
                            .device
                            .services
                            .iter()
                            .filter(|service| {
                                services
                                    .as_ref()
                                    .is_none_or(|filter| filter.contains(&service.uuid()))
                            })
                            .map(|service| {
                                previous
                                    .iter()
                                    .find(|cached| cached.uuid() == service.uuid())
                                    .cloned()
                                    .unwrap_or_else(|| {
                                        Service::new(
                                            peripheral.clone(),
                                            service.uuid(),
                                            service.is_primary(),
                                        )
                                    })
                            })
                            .collect();
                        entry.services = Some(discovered);
                    });
                vec![CentralEvent::ServicesDiscovered { peripheral, result }]
            }
            CentralCommand::DiscoverCharacteristics {
                peripheral,
                service,
                characteristics,
            } => {
                let result = self
                    .connected_entry(&peripheral, powered, "discover characteristics")
                    .and_then(|entry| {
                        let table = entry
                            .device
                            .services
                            .iter()
                            .find(|candidate| candidate.uuid() == service);
                        let cached = entry
                            .services
                            .as_mut()
                            .and_then(|services| {
                                services.iter_mut().find(|cached| cached.uuid() == service)
                            });
                        match (table, cached) {
                            (Some(table), Some(cached)) => {
                                let discovered = table
                                    .characteristics()
                                    .unwrap_or_default()
                                    .iter()
                                    .filter(|characteristic| {
                                        characteristics.as_ref().is_none_or(|filter| {
                                            filter.contains(&characteristic.uuid())
                                        })
                                    })
                                    .map(|characteristic| {
                                        let mut fresh = Characteristic::new(
                                            peripheral.clone(),
                                            service,
                                            characteristic.uuid(),
                                            characteristic.properties(),
                                        );
                                        if let Some(previous) =
                                            cached.characteristic(characteristic.uuid())
                                        {
                                            fresh.carry_state_from(previous);
                                        }
                                        fresh
                                    })
                                    .collect();
                                cached.set_characteristics(discovered);
                                Ok(())
                            }
                            _ => Err(Error::unknown(format!("service {service} on {peripheral}"))),
                        }
                    });
                vec![CentralEvent::CharacteristicsDiscovered {
                    peripheral,
                    service,
                    result,
                }]
            }
            CentralCommand::SetNotify {
                characteristic,
                enabled,
            } => {
                let result = self
                    .characteristic(&characteristic, powered, "set notify")
                    .and_then(|(_, cached)| {
                        if !cached.properties().can_subscribe() {
                            return Err(Error::new(
                                ErrorType::NotSupported,
                                "characteristic supports neither notify nor indicate",
                            ));
                        }
                        cached.set_notifying(enabled);
                        Ok(enabled)
                    });
                vec![CentralEvent::NotificationStateUpdate {
                    characteristic,
                    result,
                }]
            }
            CentralCommand::ReadValue { characteristic } => {
                let key = (characteristic.service, characteristic.characteristic);
                let result = self
                    .characteristic(&characteristic, powered, "read value")
                    .and_then(|(device, cached)| {
                        if !cached.properties().contains(CharacteristicProperties::READ) {
                            return Err(Error::new(
                                ErrorType::Att(RequestResponse::ReadNotPermitted),
                                "characteristic is not readable",
                            ));
                        }
                        let value = device.values.get(&key).cloned().unwrap_or_default();
                        cached.set_value(Some(value.clone()));
                        Ok(value)
                    });
                vec![CentralEvent::CharacteristicValueUpdate {
                    characteristic,
                    result,
                }]
            }
            CentralCommand::WriteValue {
                characteristic,
                data,
                write_type,
            } => {
                let key = (characteristic.service, characteristic.characteristic);
                let result = self
                    .characteristic(&characteristic, powered, "write value")
                    .and_then(|(device, cached)| {
                        if !cached.properties().supports(write_type) {
                            return Err(Error::new(
                                ErrorType::Att(RequestResponse::WriteNotPermitted),
                                format!("characteristic does not support {write_type:?}"),
                            ));
                        }
                        device.values.insert(key, data);
                        Ok(())
                    });
                match (result, write_type) {
                    (Ok(()), CharacteristicWriteType::WriteWithResponse) => {
                        vec![CentralEvent::CharacteristicWritten {
                            characteristic,
                            result: Ok(()),
                        }]
                    }
                    (Ok(()), CharacteristicWriteType::WriteWithoutResponse) => Vec::new(),
                    (Err(error), write_type) => {
                        vec![write_failure(characteristic, write_type, error)]
                    }
                }
            }
            CentralCommand::Notify {
                characteristic,
                value,
            } => {
                let key = (characteristic.service, characteristic.characteristic);
                match self.characteristic(&characteristic, powered, "notify") {
                    Ok((device, cached)) => {
                        device.values.insert(key, value.clone());
                        if cached.is_notifying() {
                            cached.set_value(Some(value.clone()));
                            vec![CentralEvent::CharacteristicValueUpdate {
                                characteristic,
                                result: Ok(value),
                            }]
                        } else {
                            debug!("dropping notification, not subscribed: {characteristic:?}");
                            Vec::new()
                        }
                    }
                    Err(error) => {
                        debug!("dropping notification: {error}");
                        if let Some(entry) = self.devices.get_mut(&characteristic.peripheral) {
                            entry.device.values.insert(key, value);
                        }
                        Vec::new()
                    }
                }
            }
        }
    }

    fn advertisement(&mut self, peripheral: PeripheralId) -> Vec<CentralEvent> {
        if !self.state.is_powered_on() {
            return Vec::new();
        }
        let (Some(scan), Some(entry)) = (self.scan.as_mut(), self.devices.get_mut(&peripheral))
        else {
            return Vec::new();
        };
        if !entry.device.advertisement.matches(scan.services.as_ref()) {
            return Vec::new();
        }
        if !scan.reported.insert(peripheral.clone()) && !scan.options.allow_duplicates {
            return Vec::new();
        }
        entry.known = true;
        vec![CentralEvent::DeviceDiscovered {
            peripheral,
            name: entry.device.display_name(),
            rssi: entry.device.rssi.unwrap_or(self.config.default_rssi),
            advertisement: entry.device.advertisement.clone(),
        }]
    }

    fn connect(&mut self, peripheral: PeripheralId, powered: bool) -> Vec<CentralEvent> {
        if !powered {
            return vec![CentralEvent::DeviceConnectionFailed {
                peripheral,
                error: Error::not_powered_on("connect"),
            }];
        }
        let Some(entry) = self.devices.get_mut(&peripheral) else {
            return vec![CentralEvent::DeviceConnectionFailed {
                error: Error::unknown(format!("peripheral {peripheral}")),
                peripheral,
            }];
        };
        if entry.connection != ConnectionState::Disconnected {
            debug!("connect to {peripheral} ignored, already {:?}", entry.connection);
            return Vec::new();
        }
        entry.connection = ConnectionState::Connecting;
        self.commands
            .push_back(CentralCommand::ConnectionComplete { peripheral });
        Vec::new()
    }

    fn connection_complete(&mut self, peripheral: PeripheralId, powered: bool) -> Vec<CentralEvent> {
        let Some(entry) = self.devices.get_mut(&peripheral) else {
            return Vec::new();
        };
        if entry.connection != ConnectionState::Connecting {
            return Vec::new();
        }
        if !powered || !entry.device.connectable {
            entry.connection = ConnectionState::Disconnected;
            let error = if powered {
                Error::new(ErrorType::CoreBluetooth, "peripheral did not accept the connection")
            } else {
                Error::not_powered_on("connect")
            };
            return vec![CentralEvent::DeviceConnectionFailed { peripheral, error }];
        }
        entry.connection = ConnectionState::Connected;
        entry.known = true;
        entry.services = None;
        vec![CentralEvent::DeviceConnected { peripheral }]
    }

    fn cancel_connection(&mut self, peripheral: PeripheralId, powered: bool) -> Vec<CentralEvent> {
        let operation = CentralOperation::CancelConnection {
            peripheral: peripheral.clone(),
        };
        if !powered {
            return vec![CentralEvent::OperationFailed {
                error: Error::not_powered_on(&operation),
                operation,
            }];
        }
        let Some(entry) = self.devices.get_mut(&peripheral) else {
            return vec![CentralEvent::OperationFailed {
                operation,
                error: Error::unknown(format!("peripheral {peripheral}")),
            }];
        };
        match entry.connection {
            ConnectionState::Connecting => {
                entry.connection = ConnectionState::Disconnected;
                vec![CentralEvent::DeviceDisconnected {
                    peripheral,
                    error: None,
                }]
            }
            ConnectionState::Connected => {
                entry.connection = ConnectionState::Disconnecting;
                self.commands
                    .push_back(CentralCommand::DisconnectionComplete { peripheral });
                Vec::new()
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => Vec::new(),
        }
    }

    fn connected_entry(
        &mut self,
        peripheral: &PeripheralId,
        powered: bool,
        operation: &str,
    ) -> Result<&mut DeviceEntry> {
        if !powered {
            return Err(Error::not_powered_on(operation));
        }
        let entry = self
            .devices
            .get_mut(peripheral)
            .ok_or_else(|| Error::unknown(format!("peripheral {peripheral}")))?;
        if entry.connection != ConnectionState::Connected {
            return Err(Error::from_string(
                format!("{operation}: peripheral {peripheral} is not connected"),
                ErrorType::NotConnected,
            ));
        }
        Ok(entry)
    }

    /// The remote device and the cached characteristic behind `id`.
    fn characteristic(
        &mut self,
        id: &CharacteristicId,
        powered: bool,
        operation: &str,
    ) -> Result<(&mut SimulatedDevice, &mut Characteristic)> {
        let entry = self.connected_entry(&id.peripheral, powered, operation)?;
        let DeviceEntry {
            device, services, ..
        } = entry;
        let cached = services
            .as_mut()
            .and_then(|services| services.iter_mut().find(|service| service.uuid() == id.service))
            .and_then(|service| service.characteristic_mut(id.characteristic))
            .ok_or_else(|| unknown_characteristic(id))?;
        Ok((device, cached))
    }
}
