use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, warn};
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{AnyThread, msg_send};
use objc2_core_bluetooth::{
    CBATTRequest, CBAdvertisementDataLocalNameKey, CBAdvertisementDataServiceUUIDsKey, CBCentral,
    CBManager, CBManagerAuthorization, CBMutableCharacteristic, CBMutableService,
    CBPeripheralManager,
};
use objc2_foundation::{NSArray, NSData, NSDictionary, NSString};
use tokio::runtime;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::characteristic_utils_cb::{parse_service, to_cb_error};
use super::mac_extensions_cb::{UuidExtension, nsuuid_to_uuid, uuid_to_cbuuid};
use super::mac_utils_cb;
use super::peripheral_manager_delegate_cb::{PeripheralDelegateEvent, PeripheralManagerDelegate};
use crate::DEFAULT_EVENT_CAPACITY;
use crate::api::advertisement::AdvertisementData;
use crate::api::attribute::{AttributeRequest, RemoteCentral, RequestId, RequestResponse};
use crate::api::peripheral_event::{
    PeripheralEvent, PeripheralManagerOperation, PeripheralRequest,
};
use crate::api::characteristic::MutableCharacteristic;
use crate::api::service::{MutableService, owning_service};
use crate::api::state::ManagerState;
use crate::{Error, ErrorType, Result};

#[derive(Debug)]
pub(crate) enum PeripheralManagerCommand {
    StartAdvertising(AdvertisementData),
    StopAdvertising,
    AddService(MutableService),
    RemoveService(Uuid),
    RemoveAllServices,
    Respond {
        request: AttributeRequest,
        result: RequestResponse,
    },
    UpdateValue {
        value: Vec<u8>,
        characteristic: MutableCharacteristic,
        centrals: Option<Vec<RemoteCentral>>,
        responder: oneshot::Sender<Result<bool>>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct PeripheralManagerCache {
    pub state: ManagerState,
    pub advertising: bool,
    pub services: Vec<MutableService>,
}

pub(crate) type SharedPeripheralCache = Arc<Mutex<PeripheralManagerCache>>;

pub(crate) fn lock(cache: &SharedPeripheralCache) -> MutexGuard<'_, PeripheralManagerCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

// Each peripheral manager owns a worker thread for all CoreBluetooth traffic.
pub(crate) fn run_peripheral_thread(
    sender: Sender<PeripheralEvent>,
    listener: Receiver<PeripheralManagerCommand>,
    cache: SharedPeripheralCache,
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
        .name("blehal-peripheral".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let mut peripheral_manager = PeripheralManager::new(sender, listener, cache);
                peripheral_manager.run().await;
            })
        })
        .map_err(|e| {
            Error::from_string(
                format!("Failed to spawn peripheral thread: {e}"),
                ErrorType::CoreBluetooth,
            )
        })?;
    Ok(())
}

struct Published {
    service: Retained<CBMutableService>,
    characteristics: HashMap<Uuid, Retained<CBMutableCharacteristic>>,
}

struct Subscriber {
    central: RemoteCentral,
    cb_central: Retained<CBCentral>,
    service: Uuid,
    characteristic: Uuid,
}

struct PeripheralManager {
    cb_peripheral_manager: Retained<CBPeripheralManager>,
    // keeps the delegate alive, CoreBluetooth only holds a weak reference
    _delegate: Retained<PeripheralManagerDelegate>,
    published: HashMap<Uuid, Published>,
    pending_services: HashMap<Uuid, (MutableService, Published)>,
    subscribers: Vec<Subscriber>,
    outstanding: HashMap<RequestId, Retained<CBATTRequest>>,
    issuer: u64,
    next_request: u64,
    cache: SharedPeripheralCache,
    commands: Receiver<PeripheralManagerCommand>,
    delegate_events: Receiver<PeripheralDelegateEvent>,
    events: Sender<PeripheralEvent>,
}

impl PeripheralManager {
    fn new(
        events: Sender<PeripheralEvent>,
        commands: Receiver<PeripheralManagerCommand>,
        cache: SharedPeripheralCache,
    ) -> Self {
        let (delegate_tx, delegate_events) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        let delegate: Retained<PeripheralManagerDelegate> =
            PeripheralManagerDelegate::new(delegate_tx);
        let queue = mac_utils_cb::serial_queue("blehal.peripheral");
        let cb_peripheral_manager: Retained<CBPeripheralManager> = unsafe {
            msg_send![CBPeripheralManager::alloc(), initWithDelegate: &*delegate, queue: queue]
        };

        Self {
            cb_peripheral_manager,
            _delegate: delegate,
            published: HashMap::new(),
            pending_services: HashMap::new(),
            subscribers: Vec::new(),
            outstanding: HashMap::new(),
            issuer: RequestId::next_issuer(),
            next_request: 0,
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
        debug!("peripheral manager handle dropped, shutting down");
        unsafe {
            self.cb_peripheral_manager.stopAdvertising();
            self.cb_peripheral_manager.removeAllServices();
        }
    }

    async fn send(&self, event: PeripheralEvent) {
        if let Err(e) = self.events.send(event).await {
            warn!("Error sending peripheral event: {}", e);
        }
    }

    fn is_powered_on(&self) -> bool {
        lock(&self.cache).state.is_powered_on()
    }

    fn next_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId::new(self.issuer, self.next_request)
    }

    async fn handle_command(&mut self, command: PeripheralManagerCommand) {
        debug!("peripheral manager command {command:?}");
        match command {
            PeripheralManagerCommand::StartAdvertising(advertisement) => {
                if !self.is_powered_on() {
                    return self
                        .send(PeripheralEvent::AdvertisingStarted {
                            result: Err(Error::not_powered_on("start advertising")),
                        })
                        .await;
                }
                self.start_advertising(&advertisement);
            }
            PeripheralManagerCommand::StopAdvertising => {
                if !self.is_powered_on() {
                    let operation = PeripheralManagerOperation::StopAdvertising;
                    return self
                        .send(PeripheralEvent::OperationFailed {
                            error: Error::not_powered_on(&operation),
                            operation,
                        })
                        .await;
                }
                unsafe { self.cb_peripheral_manager.stopAdvertising() };
                lock(&self.cache).advertising = false;
            }
            PeripheralManagerCommand::AddService(service) => {
                let uuid = service.uuid();
                let rejected = if !self.is_powered_on() {
                    Some(Error::not_powered_on("add service"))
                } else if self.published.contains_key(&uuid)
                    || self.pending_services.contains_key(&uuid)
                {
                    Some(Error::from_string(
                        format!("service {uuid} is already published"),
                        ErrorType::ProtocolMisuse,
                    ))
                } else {
                    None
                };
                if let Some(error) = rejected {
                    return self
                        .send(PeripheralEvent::ServiceAdded {
                            service: uuid,
                            result: Err(error),
                        })
                        .await;
                }
                let cb_service = parse_service(&service);
                let characteristics: HashMap<Uuid, Retained<CBMutableCharacteristic>> =
                    unsafe { cb_service.characteristics() }
                    .map(|characteristics| {
                        characteristics
                            .iter()
                            .map(|characteristic| {
                                // SAFETY: built from `CBMutableCharacteristic`s by `parse_service`
                                let mutable: Retained<CBMutableCharacteristic> =
                                    unsafe { Retained::cast_unchecked(characteristic) };
                                (mutable.get_uuid(), mutable)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                unsafe { self.cb_peripheral_manager.addService(&cb_service) };
                self.pending_services.insert(
                    uuid,
                    (
                        service,
                        Published {
                            service: cb_service,
                            characteristics,
                        },
                    ),
                );
            }
            PeripheralManagerCommand::RemoveService(uuid) => {
                let result = if !self.is_powered_on() {
                    Err(Error::not_powered_on("remove service"))
                } else {
                    self.remove_service(uuid)
                };
                self.send(PeripheralEvent::ServiceRemoved {
                    service: uuid,
                    result,
                })
                .await;
            }
            PeripheralManagerCommand::RemoveAllServices => {
                if !self.is_powered_on() {
                    let operation = PeripheralManagerOperation::RemoveAllServices;
                    return self
                        .send(PeripheralEvent::OperationFailed {
                            error: Error::not_powered_on(&operation),
                            operation,
                        })
                        .await;
                }
                unsafe { self.cb_peripheral_manager.removeAllServices() };
                let removed: Vec<Uuid> = self.published.drain().map(|(uuid, _)| uuid).collect();
                self.subscribers.clear();
                lock(&self.cache).services.clear();
                for service in removed {
                    self.send(PeripheralEvent::ServiceRemoved {
                        service,
                        result: Ok(()),
                    })
                    .await;
                }
            }
            PeripheralManagerCommand::Respond {
                mut request,
                result,
            } => {
                let operation = PeripheralManagerOperation::Respond {
                    request: request.id(),
                };
                if !self.is_powered_on() {
                    return self
                        .send(PeripheralEvent::OperationFailed {
                            error: Error::not_powered_on(&operation),
                            operation,
                        })
                        .await;
                }
                if request.id().issuer() != self.issuer {
                    return self
                        .send(PeripheralEvent::OperationFailed {
                            error: Error::unknown(format!(
                                "request {} issued by another peripheral manager",
                                request.id()
                            )),
                            operation,
                        })
                        .await;
                }
                let Some(cb_request) = self.outstanding.remove(&request.id()) else {
                    return self
                        .send(PeripheralEvent::OperationFailed {
                            error: Error::from_string(
                                format!("request {} is not awaiting a response", request.id()),
                                ErrorType::ProtocolMisuse,
                            ),
                            operation,
                        })
                        .await;
                };
                unsafe {
                    if result.is_success() {
                        if let Some(value) = request.take_value() {
                            cb_request.setValue(Some(&NSData::from_vec(value)));
                        }
                    }
                    self.cb_peripheral_manager
                        .respondToRequest_withResult(&cb_request, to_cb_error(result));
                }
            }
            PeripheralManagerCommand::UpdateValue {
                value,
                characteristic,
                centrals,
                responder,
            } => {
                let result = self.update_value(&value, &characteristic, centrals);
                let _ = responder.send(result);
            }
        }
    }

    fn start_advertising(&self, advertisement: &AdvertisementData) {
        let mut keys: Vec<&NSString> = vec![];
        let mut objects: Vec<Retained<AnyObject>> = vec![];

        unsafe {
            if let Some(name) = &advertisement.local_name {
                keys.push(CBAdvertisementDataLocalNameKey);
                objects.push(Retained::cast_unchecked(NSString::from_str(name)));
            }
            if !advertisement.service_uuids.is_empty() {
                keys.push(CBAdvertisementDataServiceUUIDsKey);
                objects.push(Retained::cast_unchecked(NSArray::from_retained_slice(
                    &advertisement
                        .service_uuids
                        .iter()
                        .map(|uuid| uuid_to_cbuuid(*uuid))
                        .collect::<Vec<_>>(),
                )));
            }
        }

        let advertising_data: Retained<NSDictionary<NSString, AnyObject>> =
            NSDictionary::from_retained_objects(&keys, &objects);

        unsafe {
            self.cb_peripheral_manager
                .startAdvertising(Some(&advertising_data));
        }
    }

    fn remove_service(&mut self, uuid: Uuid) -> Result<()> {
        let published = self
            .published
            .remove(&uuid)
            .ok_or_else(|| Error::unknown(format!("service {uuid}")))?;
        unsafe { self.cb_peripheral_manager.removeService(&published.service) };
        self.subscribers.retain(|subscriber| subscriber.service != uuid);
        lock(&self.cache)
            .services
            .retain(|service| service.uuid() != uuid);
        Ok(())
    }

    fn update_value(
        &self,
        value: &[u8],
        characteristic: &MutableCharacteristic,
        centrals: Option<Vec<RemoteCentral>>,
    ) -> Result<bool> {
        if !self.is_powered_on() {
            return Err(Error::not_powered_on("update value"));
        }
        let uuid = characteristic.uuid();
        let service = owning_service(&lock(&self.cache).services, characteristic)?.uuid();
        let cb_characteristic = self
            .published
            .get(&service)
            .and_then(|published| published.characteristics.get(&uuid))
            .ok_or_else(|| Error::unknown(format!("characteristic {uuid}")))?;

        let subscribers: Vec<&Subscriber> = self
            .subscribers
            .iter()
            .filter(|s| s.service == service && s.characteristic == uuid)
            .collect();
        let targets: Vec<(&RemoteCentral, Retained<CBCentral>)> = match &centrals {
            None => subscribers
                .iter()
                .map(|s| (&s.central, s.cb_central.clone()))
                .collect(),
            Some(centrals) => centrals
                .iter()
                .map(|central| {
                    subscribers
                        .iter()
                        .find(|s| s.central.identifier() == central.identifier())
                        .map(|s| (central, s.cb_central.clone()))
                        .ok_or_else(|| {
                            Error::unknown(format!(
                                "subscriber {} of {uuid}",
                                central.identifier()
                            ))
                        })
                })
                .collect::<Result<_>>()?,
        };
        if let Some((central, _)) = targets
            .iter()
            .find(|(central, _)| value.len() > central.maximum_update_value_length())
        {
            return Err(Error::from_string(
                format!(
                    "{} bytes exceed the maximum update length {} of central {}",
                    value.len(),
                    central.maximum_update_value_length(),
                    central.identifier()
                ),
                ErrorType::InvalidLength,
            ));
        }
        if targets.is_empty() {
            return Ok(true);
        }
        let cb_centrals: Vec<Retained<CBCentral>> =
            targets.into_iter().map(|(_, cb_central)| cb_central).collect();
        let cb_centrals = NSArray::from_retained_slice(&cb_centrals);
        let accepted = unsafe {
            self.cb_peripheral_manager
                .updateValue_forCharacteristic_onSubscribedCentrals(
                    &NSData::with_bytes(value),
                    cb_characteristic,
                    Some(&cb_centrals),
                )
        };
        Ok(accepted)
    }

    fn remote_central(cb_central: &CBCentral) -> RemoteCentral {
        let identifier = nsuuid_to_uuid(&unsafe { cb_central.identifier() });
        let maximum = unsafe { cb_central.maximumUpdateValueLength() };
        RemoteCentral::new(identifier, maximum)
    }

    /// The published characteristic a CoreBluetooth request targets.
    fn attribute_request(
        &mut self,
        cb_request: &CBATTRequest,
        value: Option<Vec<u8>>,
    ) -> Option<AttributeRequest> {
        let cb_characteristic = unsafe { cb_request.characteristic() };
        let service = unsafe { cb_characteristic.service() }?.get_uuid();
        let characteristic = lock(&self.cache)
            .services
            .iter()
            .find(|published| published.uuid() == service)?
            .characteristic(cb_characteristic.get_uuid())?
            .clone();
        let central = Self::remote_central(&unsafe { cb_request.central() });
        let offset = unsafe { cb_request.offset() };
        let id = self.next_id();
        Some(AttributeRequest::new(
            id,
            central,
            service,
            characteristic,
            offset,
            value,
        ))
    }

    fn reject_request(&self, cb_request: &CBATTRequest) {
        warn!("request for an unpublished characteristic");
        unsafe {
            self.cb_peripheral_manager.respondToRequest_withResult(
                cb_request,
                to_cb_error(RequestResponse::InvalidHandle),
            )
        };
    }

    async fn handle_delegate_event(&mut self, event: PeripheralDelegateEvent) {
        let event = match event {
            PeripheralDelegateEvent::StateUpdate { state } => {
                {
                    let mut cache = lock(&self.cache);
                    if cache.state.is_powered_on() && !state.is_powered_on() {
                        cache.advertising = false;
                        cache.services.clear();
                    }
                    cache.state = state;
                }
                if !state.is_powered_on() {
                    self.published.clear();
                    self.pending_services.clear();
                    self.subscribers.clear();
                    self.outstanding.clear();
                }
                PeripheralEvent::StateUpdate { state }
            }
            PeripheralDelegateEvent::AdvertisingStarted { result } => {
                if result.is_ok() {
                    lock(&self.cache).advertising = true;
                }
                PeripheralEvent::AdvertisingStarted { result }
            }
            PeripheralDelegateEvent::ServiceAdded { service, result } => {
                let Some((mutable, published)) = self.pending_services.remove(&service) else {
                    warn!("unexpected service addition {service}");
                    return;
                };
                if result.is_ok() {
                    self.published.insert(service, published);
                    lock(&self.cache).services.push(mutable);
                }
                PeripheralEvent::ServiceAdded { service, result }
            }
            PeripheralDelegateEvent::SubscriptionUpdate {
                central,
                service,
                characteristic,
                subscribed,
            } => {
                let client = Self::remote_central(&central.0);
                self.subscribers.retain(|s| {
                    !(s.central.identifier() == client.identifier()
                        && s.service == service
                        && s.characteristic == characteristic)
                });
                if subscribed {
                    self.subscribers.push(Subscriber {
                        central: client.clone(),
                        cb_central: central.0,
                        service,
                        characteristic,
                    });
                }
                PeripheralEvent::CharacteristicSubscriptionUpdate {
                    request: PeripheralRequest {
                        client,
                        service,
                        characteristic,
                    },
                    subscribed,
                }
            }
            PeripheralDelegateEvent::ReadRequest { request } => {
                let Some(attribute_request) = self.attribute_request(&request.0, None) else {
                    return self.reject_request(&request.0);
                };
                self.outstanding.insert(attribute_request.id(), request.0);
                PeripheralEvent::ReadRequest {
                    request: attribute_request,
                }
            }
            PeripheralDelegateEvent::WriteRequests { requests } => {
                let Some(first) = requests.first().map(|request| request.0.clone()) else {
                    return;
                };
                let mut batch = Vec::with_capacity(requests.len());
                for request in &requests {
                    let value = unsafe { request.0.value() }.map(|value| value.to_vec());
                    match self.attribute_request(&request.0, value) {
                        Some(attribute_request) => batch.push(attribute_request),
                        None => return self.reject_request(&first),
                    }
                }
                // CoreBluetooth answers the whole batch through its first request
                if let Some(head) = batch.first() {
                    self.outstanding.insert(head.id(), first);
                }
                PeripheralEvent::WriteRequests { requests: batch }
            }
            PeripheralDelegateEvent::ReadyToUpdateSubscribers => {
                PeripheralEvent::ReadyToUpdateSubscribers
            }
        };
        self.send(event).await;
    }
}

pub fn is_authorized() -> bool {
    let authorization = unsafe { CBManager::authorization_class() };
    authorization != CBManagerAuthorization::Restricted
        && authorization != CBManagerAuthorization::Denied
}
