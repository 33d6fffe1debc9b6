use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::api::advertisement::AdvertisementData;
use crate::api::attribute::{AttributeRequest, RemoteCentral, RequestId, RequestResponse};
use crate::api::characteristic::{CharacteristicProperties, MutableCharacteristic};
use crate::api::peripheral::PeripheralManager;
use crate::api::peripheral_event::{
    PeripheralEvent, PeripheralManagerOperation, PeripheralRequest,
};
use crate::api::service::{MutableService, owning_service};
use crate::api::state::ManagerState;
use crate::simulated::SimulatedConfig;
use crate::{Error, ErrorType, Result};

/// In-memory `PeripheralManager` paired with a `SimulatedPeripheralDriver`
/// that plays the remote centrals.
#[derive(Clone)]
pub struct SimulatedPeripheralManager {
    server: Arc<Server>,
}

#[derive(Clone)]
pub struct SimulatedPeripheralDriver {
    server: Arc<Server>,
}

/// One write of an incoming batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncomingWrite {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub offset: usize,
    pub value: Vec<u8>,
}

/// A notification or indication that left the transmit queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentNotification {
    pub central: RemoteCentral,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// An answer sent to a remote central, either by the consumer through
/// `respond` or by the driver for static and refused requests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedResponse {
    pub central: RemoteCentral,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub result: RequestResponse,
    pub value: Option<Vec<u8>>,
}

struct Server {
    inner: Mutex<ServerInner>,
    events: Sender<PeripheralEvent>,
}

struct ServerInner {
    config: SimulatedConfig,
    state: ManagerState,
    advertisement: Option<AdvertisementData>,
    services: Vec<MutableService>,
    subscriptions: Vec<PeripheralRequest>,
    outstanding: HashMap<RequestId, Outstanding>,
    issuer: u64,
    next_request: u64,
    // one entry per accepted update
    transmit: VecDeque<Vec<SentNotification>>,
    update_refused: bool,
    responses: Vec<RecordedResponse>,
    commands: VecDeque<PeripheralCommand>,
}

/// A request handed to the consumer and not answered yet.
#[derive(Debug)]
struct Outstanding {
    central: RemoteCentral,
    service: Uuid,
    characteristic: Uuid,
    read: bool,
}

#[derive(Debug)]
enum PeripheralCommand {
    StartAdvertising(AdvertisementData),
    StopAdvertising,
    AddService(MutableService),
    RemoveService(Uuid),
    RemoveAllServices,
    Respond {
        request: AttributeRequest,
        result: RequestResponse,
    },
    Read {
        central: RemoteCentral,
        service: Uuid,
        characteristic: Uuid,
        offset: usize,
    },
    Write {
        central: RemoteCentral,
        writes: Vec<IncomingWrite>,
    },
    Subscribe {
        request: PeripheralRequest,
        subscribed: bool,
    },
}

impl Server {
    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, command: PeripheralCommand) {
        trace!("enqueue {command:?}");
        self.lock().commands.push_back(command);
    }

    async fn deliver(&self, events: Vec<PeripheralEvent>) {
        for event in events {
            if let Err(e) = self.events.send(event).await {
                warn!("Error sending peripheral event: {}", e);
            }
        }
    }
}

impl SimulatedPeripheralManager {
    pub fn new(
        sender: Sender<PeripheralEvent>,
    ) -> (SimulatedPeripheralManager, SimulatedPeripheralDriver) {
        Self::with_config(sender, SimulatedConfig::default())
    }

    pub fn with_config(
        sender: Sender<PeripheralEvent>,
        config: SimulatedConfig,
    ) -> (SimulatedPeripheralManager, SimulatedPeripheralDriver) {
        let server = Arc::new(Server {
            inner: Mutex::new(ServerInner {
                config,
                state: ManagerState::Unknown,
                advertisement: None,
                services: Vec::new(),
                subscriptions: Vec::new(),
                outstanding: HashMap::new(),
                issuer: RequestId::next_issuer(),
                next_request: 0,
                transmit: VecDeque::new(),
                update_refused: false,
                responses: Vec::new(),
                commands: VecDeque::new(),
            }),
            events: sender,
        });
        (
            SimulatedPeripheralManager {
                server: server.clone(),
            },
            SimulatedPeripheralDriver { server },
        )
    }
}

#[async_trait]
impl PeripheralManager for SimulatedPeripheralManager {
    fn state(&self) -> ManagerState {
        self.server.lock().state
    }

    fn is_advertising(&self) -> bool {
        self.server.lock().advertisement.is_some()
    }

    fn services(&self) -> Vec<MutableService> {
        self.server.lock().services.clone()
    }

    async fn start_advertising(&self, advertisement: AdvertisementData) -> Result<()> {
        self.server
            .enqueue(PeripheralCommand::StartAdvertising(advertisement));
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.server.enqueue(PeripheralCommand::StopAdvertising);
        Ok(())
    }

    async fn add_service(&self, service: MutableService) -> Result<()> {
        self.server.enqueue(PeripheralCommand::AddService(service));
        Ok(())
    }

    async fn remove_service(&self, service: Uuid) -> Result<()> {
        self.server.enqueue(PeripheralCommand::RemoveService(service));
        Ok(())
    }

    async fn remove_all_services(&self) -> Result<()> {
        self.server.enqueue(PeripheralCommand::RemoveAllServices);
        Ok(())
    }

    async fn respond(&self, request: AttributeRequest, result: RequestResponse) -> Result<()> {
        self.server
            .enqueue(PeripheralCommand::Respond { request, result });
        Ok(())
    }

    async fn update_value(
        &self,
        value: &[u8],
        characteristic: &MutableCharacteristic,
        centrals: Option<&[RemoteCentral]>,
    ) -> Result<bool> {
        let mut inner = self.server.lock();
        if !inner.state.is_powered_on() {
            return Err(Error::not_powered_on("update value"));
        }
        let service = owning_service(&inner.services, characteristic)?.uuid();
        let subscribers: Vec<&RemoteCentral> = inner
            .subscriptions
            .iter()
            .filter(|s| s.service == service && s.characteristic == characteristic.uuid())
            .map(|s| &s.client)
            .collect();
        let targets: Vec<RemoteCentral> = match centrals {
            None => subscribers.into_iter().cloned().collect(),
            Some(centrals) => centrals
                .iter()
                .map(|central| {
                    subscribers
                        .iter()
                        .any(|s| s.identifier() == central.identifier())
                        .then(|| central.clone())
                        .ok_or_else(|| {
                            Error::unknown(format!(
                                "subscriber {} of {}",
                                central.identifier(),
                                characteristic.uuid()
                            ))
                        })
                })
                .collect::<Result<_>>()?,
        };
        if let Some(central) = targets
            .iter()
            .find(|central| value.len() > central.maximum_update_value_length())
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
        if inner.transmit.len() >= inner.config.notification_queue_capacity {
            debug!(
                "transmit queue full, refusing update of {}",
                characteristic.uuid()
            );
            inner.update_refused = true;
            return Ok(false);
        }
        let update = targets
            .into_iter()
            .map(|central| SentNotification {
                central,
                service,
                characteristic: characteristic.uuid(),
                value: value.to_vec(),
            })
            .collect();
        inner.transmit.push_back(update);
        Ok(true)
    }
}

impl SimulatedPeripheralDriver {
    /// Moves the radio to `state`. Leaving `PoweredOn` stops advertising and
    /// drops the attribute table, subscriptions, outstanding requests and
    /// queued notifications.
    pub async fn set_state(&self, state: ManagerState) -> Result<()> {
        {
            let mut inner = self.server.lock();
            if !inner.state.can_transition_to(state) {
                return Err(Error::from_string(
                    format!("radio cannot go from {:?} to {:?}", inner.state, state),
                    ErrorType::InvalidState,
                ));
            }
            if inner.state.is_powered_on() && !state.is_powered_on() {
                inner.advertisement = None;
                inner.services.clear();
                inner.subscriptions.clear();
                inner.outstanding.clear();
                inner.transmit.clear();
                inner.update_refused = false;
            }
            inner.state = state;
        }
        self.server
            .deliver(vec![PeripheralEvent::StateUpdate { state }])
            .await;
        Ok(())
    }

    pub async fn power_on(&self) -> Result<()> {
        let state = self.server.lock().state;
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

    /// `central` reads a published characteristic.
    pub fn read_request(
        &self,
        central: &RemoteCentral,
        service: Uuid,
        characteristic: Uuid,
        offset: usize,
    ) {
        self.server.enqueue(PeripheralCommand::Read {
            central: central.clone(),
            service,
            characteristic,
            offset,
        });
    }

    /// `central` sends a batch of writes, answered as a whole.
    pub fn write_requests(&self, central: &RemoteCentral, writes: Vec<IncomingWrite>) {
        self.server.enqueue(PeripheralCommand::Write {
            central: central.clone(),
            writes,
        });
    }

    pub fn subscribe(&self, central: &RemoteCentral, service: Uuid, characteristic: Uuid) {
        self.server.enqueue(PeripheralCommand::Subscribe {
            request: PeripheralRequest {
                client: central.clone(),
                service,
                characteristic,
            },
            subscribed: true,
        });
    }

    pub fn unsubscribe(&self, central: &RemoteCentral, service: Uuid, characteristic: Uuid) {
        self.server.enqueue(PeripheralCommand::Subscribe {
            request: PeripheralRequest {
                client: central.clone(),
                service,
                characteristic,
            },
            subscribed: false,
        });
    }

    /// Sends everything in the transmit queue. If an update was refused
    /// since the last transmit, signals `ReadyToUpdateSubscribers`.
    pub async fn transmit(&self) -> Vec<SentNotification> {
        let (sent, ready) = {
            let mut inner = self.server.lock();
            let sent: Vec<SentNotification> = inner.transmit.drain(..).flatten().collect();
            let ready = std::mem::take(&mut inner.update_refused);
            (sent, ready)
        };
        if ready {
            self.server
                .deliver(vec![PeripheralEvent::ReadyToUpdateSubscribers])
                .await;
        }
        sent
    }

    /// Answers sent so far, oldest first.
    pub fn responses(&self) -> Vec<RecordedResponse> {
        self.server.lock().responses.clone()
    }

    pub fn advertisement(&self) -> Option<AdvertisementData> {
        self.server.lock().advertisement.clone()
    }

    pub fn pending(&self) -> usize {
        self.server.lock().commands.len()
    }

    pub async fn step(&self) -> bool {
        let events = {
            let mut inner = self.server.lock();
            match inner.commands.pop_front() {
                Some(command) => inner.process(command),
                None => return false,
            }
        };
        self.server.deliver(events).await;
        true
    }

    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.step().await {
            processed += 1;
        }
        processed
    }
}

impl ServerInner {
    fn process(&mut self, command: PeripheralCommand) -> Vec<PeripheralEvent> {
        debug!("process {command:?}");
        let powered = self.state.is_powered_on();
        match command {
            PeripheralCommand::StartAdvertising(advertisement) => {
                let result = if !powered {
                    Err(Error::not_powered_on("start advertising"))
                } else if self.advertisement.is_some() {
                    Err(Error::new(ErrorType::InvalidState, "already advertising"))
                } else {
                    self.advertisement = Some(advertisement);
                    Ok(())
                };
                vec![PeripheralEvent::AdvertisingStarted { result }]
            }
            PeripheralCommand::StopAdvertising => {
                if !powered {
                    let operation = PeripheralManagerOperation::StopAdvertising;
                    return vec![PeripheralEvent::OperationFailed {
                        error: Error::not_powered_on(&operation),
                        operation,
                    }];
                }
                self.advertisement = None;
                Vec::new()
            }
            PeripheralCommand::AddService(service) => {
                let uuid = service.uuid();
                let result = if !powered {
                    Err(Error::not_powered_on("add service"))
                } else if self.services.iter().any(|s| s.uuid() == uuid) {
                    Err(Error::from_string(
                        format!("service {uuid} is already published"),
                        ErrorType::ProtocolMisuse,
                    ))
                } else {
                    self.services.push(service);
                    Ok(())
                };
                vec![PeripheralEvent::ServiceAdded {
                    service: uuid,
                    result,
                }]
            }
            PeripheralCommand::RemoveService(uuid) => {
                let result = if !powered {
                    Err(Error::not_powered_on("remove service"))
                } else {
                    match self.services.iter().position(|s| s.uuid() == uuid) {
                        Some(index) => {
                            self.services.remove(index);
                            self.subscriptions.retain(|s| s.service != uuid);
                            Ok(())
                        }
                        None => Err(Error::unknown(format!("service {uuid}"))),
                    }
                };
                vec![PeripheralEvent::ServiceRemoved {
                    service: uuid,
                    result,
                }]
            }
            PeripheralCommand::RemoveAllServices => {
                if !powered {
                    let operation = PeripheralManagerOperation::RemoveAllServices;
                    return vec![PeripheralEvent::OperationFailed {
                        error: Error::not_powered_on(&operation),
                        operation,
                    }];
                }
                self.subscriptions.clear();
                self.services
                    .drain(..)
                    .map(|service| PeripheralEvent::ServiceRemoved {
                        service: service.uuid(),
                        result: Ok(()),
                    })
                    .collect()
            }
            PeripheralCommand::Respond {
                mut request,
                result,
            } => {
                let operation = PeripheralManagerOperation::Respond {
                    request: request.id(),
                };
                if !powered {
                    return vec![PeripheralEvent::OperationFailed {
                        error: Error::not_powered_on(&operation),
                        operation,
                    }];
                }
                if request.id().issuer() != self.issuer {
                    return vec![PeripheralEvent::OperationFailed {
                        error: Error::unknown(format!(
                            "request {} issued by another peripheral manager",
                            request.id()
                        )),
                        operation,
                    }];
                }
                let Some(outstanding) = self.outstanding.remove(&request.id()) else {
                    return vec![PeripheralEvent::OperationFailed {
                        error: Error::from_string(
                            format!("request {} is not awaiting a response", request.id()),
                            ErrorType::ProtocolMisuse,
                        ),
                        operation,
                    }];
                };
                let value = if outstanding.read && result.is_success() {
                    Some(request.take_value().unwrap_or_default())
                } else {
                    None
                };
                self.responses.push(RecordedResponse {
                    central: outstanding.central,
                    service: outstanding.service,
                    characteristic: outstanding.characteristic,
                    result,
                    value,
                });
                Vec::new()
            }
            PeripheralCommand::Read {
                central,
                service,
                characteristic,
                offset,
            } => self.read(central, service, characteristic, offset, powered),
            PeripheralCommand::Write { central, writes } => self.write(central, writes, powered),
            PeripheralCommand::Subscribe {
                request,
                subscribed,
            } => {
                if !powered {
                    return Vec::new();
                }
                let subscribable = self
                    .published(request.service, request.characteristic)
                    .is_some_and(|c| c.properties().can_subscribe());
                if !subscribable {
                    debug!("ignoring subscription to {}", request.characteristic);
                    return Vec::new();
                }
                let existing = self.subscriptions.iter().position(|s| {
                    s.client.identifier() == request.client.identifier()
                        && s.service == request.service
                        && s.characteristic == request.characteristic
                });
                match (existing, subscribed) {
                    (None, true) => self.subscriptions.push(request.clone()),
                    (Some(index), false) => {
                        self.subscriptions.remove(index);
                    }
                    _ => return Vec::new(),
                }
                vec![PeripheralEvent::CharacteristicSubscriptionUpdate {
                    request,
                    subscribed,
                }]
            }
        }
    }

    fn published(&self, service: Uuid, characteristic: Uuid) -> Option<&MutableCharacteristic> {
        self.services
            .iter()
            .find(|s| s.uuid() == service)?
            .characteristic(characteristic)
    }

    fn next_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId::new(self.issuer, self.next_request)
    }

    fn answer(
        &mut self,
        central: RemoteCentral,
        service: Uuid,
        characteristic: Uuid,
        result: RequestResponse,
        value: Option<Vec<u8>>,
    ) -> Vec<PeripheralEvent> {
        debug!("answering {characteristic} for {} with {result:?}", central.identifier());
        self.responses.push(RecordedResponse {
            central,
            service,
            characteristic,
            result,
            value,
        });
        Vec::new()
    }

    fn read(
        &mut self,
        central: RemoteCentral,
        service: Uuid,
        characteristic: Uuid,
        offset: usize,
        powered: bool,
    ) -> Vec<PeripheralEvent> {
        if !powered {
            return Vec::new();
        }
        let Some(published) = self.published(service, characteristic).cloned() else {
            return self.answer(central, service, characteristic, RequestResponse::InvalidHandle, None);
        };
        if !published.permissions().allows_read()
            || !published.properties().contains(CharacteristicProperties::READ)
        {
            return self.answer(
                central,
                service,
                characteristic,
                RequestResponse::ReadNotPermitted,
                None,
            );
        }
        if let Some(value) = published.value() {
            return match value.get(offset..) {
                Some(rest) => {
                    let rest = rest.to_vec();
                    self.answer(central, service, characteristic, RequestResponse::Success, Some(rest))
                }
                None => self.answer(
                    central,
                    service,
                    characteristic,
                    RequestResponse::InvalidOffset,
                    None,
                ),
            };
        }
        let id = self.next_id();
        self.outstanding.insert(
            id,
            Outstanding {
                central: central.clone(),
                service,
                characteristic,
                read: true,
            },
        );
        vec![PeripheralEvent::ReadRequest {
            request: AttributeRequest::new(id, central, service, published, offset, None),
        }]
    }

    fn write(
        &mut self,
        central: RemoteCentral,
        writes: Vec<IncomingWrite>,
        powered: bool,
    ) -> Vec<PeripheralEvent> {
        let Some(first) = writes.first() else {
            return Vec::new();
        };
        if !powered {
            return Vec::new();
        }
        let (first_service, first_characteristic) = (first.service, first.characteristic);
        let mut requests = Vec::with_capacity(writes.len());
        for write in writes {
            let Some(published) = self.published(write.service, write.characteristic).cloned()
            else {
                return self.answer(
                    central,
                    first_service,
                    first_characteristic,
                    RequestResponse::InvalidHandle,
                    None,
                );
            };
            if !published.permissions().allows_write() {
                return self.answer(
                    central,
                    first_service,
                    first_characteristic,
                    RequestResponse::WriteNotPermitted,
                    None,
                );
            }
            requests.push((write, published));
        }
        // The whole batch is answered through its first request.
        let id = self.next_id();
        self.outstanding.insert(
            id,
            Outstanding {
                central: central.clone(),
                service: first_service,
                characteristic: first_characteristic,
                read: false,
            },
        );
        let mut batch_id = Some(id);
        let requests = requests
            .into_iter()
            .map(|(write, published)| {
                let id = batch_id.take().unwrap_or_else(|| self.next_id());
                AttributeRequest::new(
                    id,
                    central.clone(),
                    write.service,
                    published,
                    write.offset,
                    Some(write.value),
                )
            })
            .collect();
        vec![PeripheralEvent::WriteRequests { requests }]
    }
}
