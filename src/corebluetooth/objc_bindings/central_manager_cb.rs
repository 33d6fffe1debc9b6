use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error, warn};
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, ProtocolObject};
use objc2::{AnyThread, msg_send};
use objc2_core_bluetooth::{
    CBCentralManager, CBCentralManagerScanOptionAllowDuplicatesKey,
    CBCentralManagerScanOptionSolicitedServiceUUIDsKey, CBCharacteristic,
    CBCharacteristicWriteType, CBConnectPeripheralOptionNotifyOnConnectionKey,
    CBConnectPeripheralOptionNotifyOnDisconnectionKey,
    CBConnectPeripheralOptionNotifyOnNotificationKey, CBPeripheral, CBPeripheralState,
};
use objc2_foundation::{NSArray, NSData, NSDictionary, NSNumber, NSString};
use tokio::runtime;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::SendRetained;
use super::central_delegate_cb::{CentralDelegate, CentralDelegateEvent, convert_state};
use super::characteristic_utils_cb::properties_from_cb;
use super::mac_extensions_cb::{UuidExtension, peripheral_id, uuid_to_cbuuid, uuid_to_nsuuid};
use super::mac_utils_cb;
use crate::DEFAULT_EVENT_CAPACITY;
use crate::api::central::{ConnectOptions, PeripheralId, ScanOptions};
use crate::api::central_event::{CentralEvent, CentralOperation};
use crate::api::characteristic::{Characteristic, CharacteristicId, CharacteristicWriteType};
use crate::api::service::Service;
use crate::api::state::{ConnectionState, ManagerState};
use crate::{Error, ErrorType, Result};

/// Requests from the handles to the worker thread.
#[derive(Debug)]
pub(crate) enum CentralCommand {
    Scan {
        services: Option<BTreeSet<Uuid>>,
        options: ScanOptions,
    },
    StopScan,
    Connect {
        peripheral: PeripheralId,
        options: ConnectOptions,
    },
    CancelConnection {
        peripheral: PeripheralId,
    },
    RetrieveConnected {
        services: BTreeSet<Uuid>,
        responder: oneshot::Sender<Vec<PeripheralId>>,
    },
    RetrieveKnown {
        identifiers: Vec<PeripheralId>,
        responder: oneshot::Sender<Vec<PeripheralId>>,
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
    /// A request rejected by a handle, delivered in order with the rest.
    Reject(CentralEvent),
}

/// State the handles read without a round trip to the worker. Only the
/// worker writes it, right before emitting the matching event.
#[derive(Debug, Default)]
pub(crate) struct CentralCache {
    pub state: ManagerState,
    pub scanning: bool,
    pub peripherals: HashMap<PeripheralId, PeripheralCache>,
}

#[derive(Debug, Default)]
pub(crate) struct PeripheralCache {
    pub name: Option<String>,
    pub connection: ConnectionState,
    pub services: Option<Vec<Service>>,
}

pub(crate) type SharedCentralCache = Arc<Mutex<CentralCache>>;

pub(crate) fn lock(cache: &SharedCentralCache) -> MutexGuard<'_, CentralCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

// Each central manager owns a worker thread for all CoreBluetooth traffic.
pub(crate) fn run_central_thread(
    sender: Sender<CentralEvent>,
    listener: Receiver<CentralCommand>,
    cache: SharedCentralCache,
) -> Result<()> {
    let runtime = runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| {
            Error::from_string(
                format!("Failed to create runtime: {e}"),
                ErrorType::CoreBluetooth,
            )
        })?;
    thread::Builder::new()
        .name("blehal-central".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let mut central_manager = CentralManager::new(sender, listener, cache);
                central_manager.run().await;
            })
        })
        .map_err(|e| {
            Error::from_string(
                format!("Failed to spawn central thread: {e}"),
                ErrorType::CoreBluetooth,
            )
        })?;
    Ok(())
}

struct CentralManager {
    manager: Retained<CBCentralManager>,
    delegate: Retained<CentralDelegate>,
    peripherals: HashMap<PeripheralId, Retained<CBPeripheral>>,
    reported: HashSet<PeripheralId>,
    allow_duplicates: bool,
    cache: SharedCentralCache,
    commands: Receiver<CentralCommand>,
    delegate_events: Receiver<CentralDelegateEvent>,
    events: Sender<CentralEvent>,
}

impl CentralManager {
    fn new(
        events: Sender<CentralEvent>,
        commands: Receiver<CentralCommand>,
        cache: SharedCentralCache,
    ) -> Self {
        let (delegate_tx, delegate_events) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        let delegate: Retained<CentralDelegate> = CentralDelegate::new(delegate_tx);
        let queue = mac_utils_cb::serial_queue("blehal.central");
        let manager: Retained<CBCentralManager> = unsafe {
            msg_send![CBCentralManager::alloc(), initWithDelegate: &*delegate, queue: queue]
        };

        Self {
            manager,
            delegate,
            peripherals: HashMap::new(),
            reported: HashSet::new(),
            allow_duplicates: false,
            cache,
            commands,
            delegate_events,
            events,
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // every handle is gone
                    None => break,
                },
                Some(event) = self.delegate_events.recv() => self.handle_delegate_event(event).await,
            }
        }
        debug!("central manager handles dropped, shutting down");
        unsafe {
            if self.manager.isScanning() {
                self.manager.stopScan();
            }
            for peripheral in self.peripherals.values() {
                if peripheral.state() != CBPeripheralState::Disconnected {
                    self.manager.cancelPeripheralConnection(peripheral);
                }
            }
        }
    }

    async fn send(&self, event: CentralEvent) {
        if let Err(e) = self.events.send(event).await {
            warn!("Error sending central event: {}", e);
        }
    }

    fn is_powered_on(&self) -> bool {
        convert_state(unsafe { self.manager.state() }).is_powered_on()
    }

    fn register(&mut self, peripheral: Retained<CBPeripheral>, name: Option<String>) -> PeripheralId {
        let id = peripheral_id(&peripheral);
        unsafe { peripheral.setDelegate(Some(ProtocolObject::from_ref(&*self.delegate))) };
        let name = name.or_else(|| unsafe { peripheral.name() }.map(|name| name.to_string()));
        let mut cache = lock(&self.cache);
        let entry = cache.peripherals.entry(id.clone()).or_default();
        if name.is_some() {
            entry.name = name;
        }
        if unsafe { peripheral.state() } == CBPeripheralState::Connected {
            entry.connection = ConnectionState::Connected;
        }
        self.peripherals.insert(id.clone(), peripheral);
        id
    }

    fn set_connection(&self, peripheral: &PeripheralId, connection: ConnectionState) {
        let mut cache = lock(&self.cache);
        let entry = cache.peripherals.entry(peripheral.clone()).or_default();
        entry.connection = connection;
        if connection == ConnectionState::Disconnected {
            entry.services = None;
        }
    }

    async fn handle_command(&mut self, command: CentralCommand) {
        debug!("central command {command:?}");
        match command {
            CentralCommand::Reject(event) => self.send(event).await,
            CentralCommand::Scan { services, options } => {
                if !self.is_powered_on() {
                    return self
                        .send(CentralEvent::OperationFailed {
                            operation: CentralOperation::Scan,
                            error: Error::not_powered_on(CentralOperation::Scan),
                        })
                        .await;
                }
                self.start_scan(services, options);
                lock(&self.cache).scanning = true;
            }
            // a radio that is not powered on has no scan to stop
            CentralCommand::StopScan => {
                if self.is_powered_on() {
                    unsafe { self.manager.stopScan() };
                }
                lock(&self.cache).scanning = false;
            }
            CentralCommand::Connect {
                peripheral,
                options,
            } => self.connect(peripheral, options).await,
            CentralCommand::CancelConnection { peripheral } => {
                let operation = CentralOperation::CancelConnection {
                    peripheral: peripheral.clone(),
                };
                if !self.is_powered_on() {
                    return self
                        .send(CentralEvent::OperationFailed {
                            error: Error::not_powered_on(&operation),
                            operation,
                        })
                        .await;
                }
                let Some(cb_peripheral) = self.peripherals.get(&peripheral) else {
                    return self
                        .send(CentralEvent::OperationFailed {
                            operation,
                            error: Error::unknown(format!("peripheral {peripheral}")),
                        })
                        .await;
                };
                let cancels_attempt = unsafe { cb_peripheral.state() } == CBPeripheralState::Connecting;
                unsafe { self.manager.cancelPeripheralConnection(cb_peripheral) };
                if cancels_attempt {
                    // CoreBluetooth does not call back for a cancelled attempt
                    self.set_connection(&peripheral, ConnectionState::Disconnected);
                    self.send(CentralEvent::DeviceDisconnected {
                        peripheral,
                        error: None,
                    })
                    .await;
                } else {
                    self.set_connection(&peripheral, ConnectionState::Disconnecting);
                }
            }
            CentralCommand::RetrieveConnected {
                services,
                responder,
            } => {
                let uuids: Vec<_> = services.iter().map(|uuid| uuid_to_cbuuid(*uuid)).collect();
                let uuids = NSArray::from_retained_slice(&uuids);
                let found = unsafe { self.manager.retrieveConnectedPeripheralsWithServices(&uuids) };
                let ids = found
                    .iter()
                    .map(|peripheral| self.register(peripheral, None))
                    .collect();
                let _ = responder.send(ids);
            }
            CentralCommand::RetrieveKnown {
                identifiers,
                responder,
            } => {
                let uuids: Vec<_> = identifiers
                    .iter()
                    .map(|id| uuid_to_nsuuid(id.uuid()))
                    .collect();
                let uuids = NSArray::from_retained_slice(&uuids);
                let found = unsafe { self.manager.retrievePeripheralsWithIdentifiers(&uuids) };
                let mut found: HashMap<PeripheralId, Retained<CBPeripheral>> = found
                    .iter()
                    .map(|peripheral| (peripheral_id(&peripheral), peripheral))
                    .collect();
                // keep the caller's order
                let ids = identifiers
                    .into_iter()
                    .filter_map(|id| found.remove(&id))
                    .map(|peripheral| self.register(peripheral, None))
                    .collect();
                let _ = responder.send(ids);
            }
            CentralCommand::ReadRssi { peripheral } => {
                match self.connected(&peripheral, "read rssi") {
                    Ok(cb_peripheral) => unsafe { cb_peripheral.readRSSI() },
                    Err(error) => {
                        self.send(CentralEvent::RssiRead {
                            peripheral,
                            result: Err(error),
                        })
                        .await
                    }
                }
            }
            CentralCommand::DiscoverServices {
                peripheral,
                services,
            } => match self.connected(&peripheral, "discover services") {
                Ok(cb_peripheral) => {
                    let filter = services.map(|services| {
                        let uuids: Vec<_> =
                            services.iter().map(|uuid| uuid_to_cbuuid(*uuid)).collect();
                        NSArray::from_retained_slice(&uuids)
                    });
                    unsafe { cb_peripheral.discoverServices(filter.as_deref()) };
                }
                Err(error) => {
                    self.send(CentralEvent::ServicesDiscovered {
                        peripheral,
                        result: Err(error),
                    })
                    .await
                }
            },
            CentralCommand::DiscoverCharacteristics {
                peripheral,
                service,
                characteristics,
            } => {
                let found = self
                    .connected(&peripheral, "discover characteristics")
                    .and_then(|cb_peripheral| {
                        let cb_service = unsafe { cb_peripheral.services() }
                            .and_then(|services| {
                                services.iter().find(|candidate| candidate.get_uuid() == service)
                            })
                            .ok_or_else(|| {
                                Error::unknown(format!("service {service} on {peripheral}"))
                            })?;
                        Ok((cb_peripheral, cb_service))
                    });
                match found {
                    Ok((cb_peripheral, cb_service)) => {
                        let filter = characteristics.map(|characteristics| {
                            let uuids: Vec<_> = characteristics
                                .iter()
                                .map(|uuid| uuid_to_cbuuid(*uuid))
                                .collect();
                            NSArray::from_retained_slice(&uuids)
                        });
                        unsafe {
                            cb_peripheral
                                .discoverCharacteristics_forService(filter.as_deref(), &cb_service)
                        };
                    }
                    Err(error) => {
                        self.send(CentralEvent::CharacteristicsDiscovered {
                            peripheral,
                            service,
                            result: Err(error),
                        })
                        .await
                    }
                }
            }
            CentralCommand::SetNotify {
                characteristic,
                enabled,
            } => match self.characteristic(&characteristic, "set notify") {
                Ok((cb_peripheral, cb_characteristic)) => {
                    if properties_from_cb(&cb_characteristic).can_subscribe() {
                        unsafe {
                            cb_peripheral.setNotifyValue_forCharacteristic(enabled, &cb_characteristic)
                        };
                    } else {
                        self.send(CentralEvent::NotificationStateUpdate {
                            characteristic,
                            result: Err(Error::new(
                                ErrorType::NotSupported,
                                "characteristic supports neither notify nor indicate",
                            )),
                        })
                        .await;
                    }
                }
                Err(error) => {
                    self.send(CentralEvent::NotificationStateUpdate {
                        characteristic,
                        result: Err(error),
                    })
                    .await
                }
            },
            CentralCommand::ReadValue { characteristic } => {
                match self.characteristic(&characteristic, "read value") {
                    Ok((cb_peripheral, cb_characteristic)) => unsafe {
                        cb_peripheral.readValueForCharacteristic(&cb_characteristic)
                    },
                    Err(error) => {
                        self.send(CentralEvent::CharacteristicValueUpdate {
                            characteristic,
                            result: Err(error),
                        })
                        .await
                    }
                }
            }
            CentralCommand::WriteValue {
                characteristic,
                data,
                write_type,
            } => match self.characteristic(&characteristic, "write value") {
                Ok((cb_peripheral, cb_characteristic)) => {
                    let cb_write_type = match write_type {
                        CharacteristicWriteType::WriteWithResponse => {
                            CBCharacteristicWriteType::WithResponse
                        }
                        CharacteristicWriteType::WriteWithoutResponse => {
                            CBCharacteristicWriteType::WithoutResponse
                        }
                    };
                    unsafe {
                        cb_peripheral.writeValue_forCharacteristic_type(
                            &NSData::from_vec(data),
                            &cb_characteristic,
                            cb_write_type,
                        )
                    };
                }
                Err(error) => {
                    let event = match write_type {
                        CharacteristicWriteType::WriteWithResponse => {
                            CentralEvent::CharacteristicWritten {
                                characteristic,
                                result: Err(error),
                            }
                        }
                        CharacteristicWriteType::WriteWithoutResponse => {
                            CentralEvent::OperationFailed {
                                operation: CentralOperation::WriteWithoutResponse {
                                    characteristic,
                                },
                                error,
                            }
                        }
                    };
                    self.send(event).await;
                }
            },
        }
    }

    fn start_scan(&mut self, services: Option<BTreeSet<Uuid>>, options: ScanOptions) {
        self.reported.clear();
        self.allow_duplicates = options.allow_duplicates;

        let mut keys: Vec<&NSString> = vec![];
        let mut objects: Vec<Retained<AnyObject>> = vec![];
        unsafe {
            keys.push(CBCentralManagerScanOptionAllowDuplicatesKey);
            objects.push(Retained::cast_unchecked(NSNumber::new_bool(
                options.allow_duplicates,
            )));
            if !options.solicited_service_uuids.is_empty() {
                let solicited: Vec<_> = options
                    .solicited_service_uuids
                    .iter()
                    .map(|uuid| uuid_to_cbuuid(*uuid))
                    .collect();
                keys.push(CBCentralManagerScanOptionSolicitedServiceUUIDsKey);
                objects.push(Retained::cast_unchecked(NSArray::from_retained_slice(
                    &solicited,
                )));
            }
        }
        let scan_options: Retained<NSDictionary<NSString, AnyObject>> =
            NSDictionary::from_retained_objects(&keys, &objects);

        let filter = services.map(|services| {
            let uuids: Vec<_> = services.iter().map(|uuid| uuid_to_cbuuid(*uuid)).collect();
            NSArray::from_retained_slice(&uuids)
        });
        unsafe {
            self.manager
                .scanForPeripheralsWithServices_options(filter.as_deref(), Some(&scan_options))
        };
    }

    async fn connect(&mut self, peripheral: PeripheralId, options: ConnectOptions) {
        if !self.is_powered_on() {
            return self
                .send(CentralEvent::DeviceConnectionFailed {
                    peripheral,
                    error: Error::not_powered_on("connect"),
                })
                .await;
        }
        let Some(cb_peripheral) = self.peripherals.get(&peripheral) else {
            return self
                .send(CentralEvent::DeviceConnectionFailed {
                    error: Error::unknown(format!("peripheral {peripheral}")),
                    peripheral,
                })
                .await;
        };
        if unsafe { cb_peripheral.state() } != CBPeripheralState::Disconnected {
            debug!("connect to {peripheral} ignored, link already active");
            return;
        }

        let mut keys: Vec<&NSString> = vec![];
        let mut objects: Vec<Retained<AnyObject>> = vec![];
        unsafe {
            for (key, enabled) in [
                (
                    CBConnectPeripheralOptionNotifyOnConnectionKey,
                    options.notify_on_connection,
                ),
                (
                    CBConnectPeripheralOptionNotifyOnDisconnectionKey,
                    options.notify_on_disconnection,
                ),
                (
                    CBConnectPeripheralOptionNotifyOnNotificationKey,
                    options.notify_on_notification,
                ),
            ] {
                keys.push(key);
                objects.push(Retained::cast_unchecked(NSNumber::new_bool(enabled)));
            }
        }
        let connect_options: Retained<NSDictionary<NSString, AnyObject>> =
            NSDictionary::from_retained_objects(&keys, &objects);
        unsafe {
            self.manager
                .connectPeripheral_options(cb_peripheral, Some(&connect_options))
        };
        self.set_connection(&peripheral, ConnectionState::Connecting);
    }

    fn connected(&self, peripheral: &PeripheralId, operation: &str) -> Result<Retained<CBPeripheral>> {
        if !self.is_powered_on() {
            return Err(Error::not_powered_on(operation));
        }
        let cb_peripheral = self
            .peripherals
            .get(peripheral)
            .ok_or_else(|| Error::unknown(format!("peripheral {peripheral}")))?;
        if unsafe { cb_peripheral.state() } != CBPeripheralState::Connected {
            return Err(Error::from_string(
                format!("{operation}: peripheral {peripheral} is not connected"),
                ErrorType::NotConnected,
            ));
        }
        Ok(cb_peripheral.clone())
    }

    fn characteristic(
        &self,
        id: &CharacteristicId,
        operation: &str,
    ) -> Result<(Retained<CBPeripheral>, Retained<CBCharacteristic>)> {
        let cb_peripheral = self.connected(&id.peripheral, operation)?;
        let cb_characteristic = unsafe { cb_peripheral.services() }
            .and_then(|services| {
                services
                    .iter()
                    .find(|service| service.get_uuid() == id.service)
            })
            .and_then(|service| unsafe { service.characteristics() })
            .and_then(|characteristics| {
                characteristics
                    .iter()
                    .find(|characteristic| characteristic.get_uuid() == id.characteristic)
            })
            .ok_or_else(|| {
                Error::unknown(format!(
                    "characteristic {} of service {} on {}",
                    id.characteristic, id.service, id.peripheral
                ))
            })?;
        Ok((cb_peripheral, cb_characteristic))
    }

    async fn handle_delegate_event(&mut self, event: CentralDelegateEvent) {
        let event = match event {
            CentralDelegateEvent::StateUpdate { state } => {
                let mut cache = lock(&self.cache);
                cache.state = state;
                if !state.is_powered_on() {
                    cache.scanning = false;
                }
                CentralEvent::StateUpdate { state }
            }
            CentralDelegateEvent::DiscoveredPeripheral {
                peripheral,
                name,
                rssi,
                advertisement,
            } => {
                let id = self.register(peripheral.0, name.clone());
                if !self.reported.insert(id.clone()) && !self.allow_duplicates {
                    return;
                }
                CentralEvent::DeviceDiscovered {
                    peripheral: id,
                    name,
                    rssi,
                    advertisement,
                }
            }
            CentralDelegateEvent::Connected { peripheral } => {
                self.set_connection(&peripheral, ConnectionState::Connected);
                CentralEvent::DeviceConnected { peripheral }
            }
            CentralDelegateEvent::ConnectionFailed { peripheral, error } => {
                self.set_connection(&peripheral, ConnectionState::Disconnected);
                CentralEvent::DeviceConnectionFailed { peripheral, error }
            }
            CentralDelegateEvent::Disconnected { peripheral, error } => {
                self.set_connection(&peripheral, ConnectionState::Disconnected);
                CentralEvent::DeviceDisconnected { peripheral, error }
            }
            CentralDelegateEvent::RssiRead { peripheral, result } => {
                CentralEvent::RssiRead { peripheral, result }
            }
            CentralDelegateEvent::ServicesDiscovered { peripheral, result } => {
                let result = result.map(|services| {
                    let mut cache = lock(&self.cache);
                    let entry = cache.peripherals.entry(peripheral.clone()).or_default();
                    let previous = entry.services.take().unwrap_or_default();
                    let services = services
                        .into_iter()
                        .map(|service| {
                            previous
                                .iter()
                                .find(|cached| cached.uuid() == service.uuid())
                                .cloned()
                                .unwrap_or(service)
                        })
                        .collect();
                    entry.services = Some(services);
                });
                CentralEvent::ServicesDiscovered { peripheral, result }
            }
            CentralDelegateEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => {
                let result = result.and_then(|characteristics| {
                    let mut cache = lock(&self.cache);
                    let cached = cache
                        .peripherals
                        .get_mut(&peripheral)
                        .and_then(|entry| entry.services.as_mut())
                        .and_then(|services| services.iter_mut().find(|s| s.uuid() == service))
                        .ok_or_else(|| Error::unknown(format!("service {service} on {peripheral}")))?;
                    let characteristics = characteristics
                        .into_iter()
                        .map(|mut fresh| {
                            if let Some(previous) = cached.characteristic(fresh.uuid()) {
                                fresh.carry_state_from(previous);
                            }
                            fresh
                        })
                        .collect();
                    cached.set_characteristics(characteristics);
                    Ok(())
                });
                CentralEvent::CharacteristicsDiscovered {
                    peripheral,
                    service,
                    result,
                }
            }
            CentralDelegateEvent::NotificationStateUpdate {
                characteristic,
                result,
            } => {
                if let Ok(notifying) = result {
                    self.update_characteristic(&characteristic, |cached| {
                        cached.set_notifying(notifying)
                    });
                }
                CentralEvent::NotificationStateUpdate {
                    characteristic,
                    result,
                }
            }
            CentralDelegateEvent::ValueUpdate {
                characteristic,
                result,
            } => {
                if let Ok(value) = &result {
                    self.update_characteristic(&characteristic, |cached| {
                        cached.set_value(Some(value.clone()))
                    });
                }
                CentralEvent::CharacteristicValueUpdate {
                    characteristic,
                    result,
                }
            }
            CentralDelegateEvent::Written {
                characteristic,
                result,
            } => CentralEvent::CharacteristicWritten {
                characteristic,
                result,
            },
        };
        self.send(event).await;
    }

    fn update_characteristic(
        &self,
        id: &CharacteristicId,
        update: impl FnOnce(&mut Characteristic),
    ) {
        let mut cache = lock(&self.cache);
        let cached = cache
            .peripherals
            .get_mut(&id.peripheral)
            .and_then(|entry| entry.services.as_mut())
            .and_then(|services| services.iter_mut().find(|s| s.uuid() == id.service))
            .and_then(|service| service.characteristic_mut(id.characteristic));
        match cached {
            Some(cached) => update(cached),
            None => error!("update for undiscovered characteristic {id:?}"),
        }
    }
}
