use std::fmt;

use uuid::Uuid;

use crate::Result;
use crate::api::attribute::{AttributeRequest, RemoteCentral, RequestId};
use crate::api::state::ManagerState;
use crate::error::Error;

#[derive(Debug)]
pub enum PeripheralEvent {
    StateUpdate {
        state: ManagerState,
    },
    AdvertisingStarted {
        result: Result<()>,
    },
    ServiceAdded {
        service: Uuid,
        result: Result<()>,
    },
    ServiceRemoved {
        service: Uuid,
        result: Result<()>,
    },
    CharacteristicSubscriptionUpdate {
        request: PeripheralRequest,
        subscribed: bool,
    },
    ReadRequest {
        request: AttributeRequest,
    },
    WriteRequests {
        requests: Vec<AttributeRequest>,
    },
    /// Room is available again in the transmit queue after `update_value`
    /// returned `false`.
    ReadyToUpdateSubscribers,
    /// Failure of a request that has no completion event of its own.
    OperationFailed {
        operation: PeripheralManagerOperation,
        error: Error,
    },
}

/// Which central a subscription change concerns, and on what.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeripheralRequest {
    pub client: RemoteCentral,
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeripheralManagerOperation {
    StopAdvertising,
    RemoveAllServices,
    Respond { request: RequestId },
}

impl fmt::Display for PeripheralManagerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeripheralManagerOperation::StopAdvertising => write!(f, "stop advertising"),
            PeripheralManagerOperation::RemoveAllServices => write!(f, "remove all services"),
            PeripheralManagerOperation::Respond { request } => {
                write!(f, "respond to request {request}")
            }
        }
    }
}
