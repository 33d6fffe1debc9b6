use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::api::characteristic::MutableCharacteristic;

static ISSUERS: AtomicU64 = AtomicU64::new(1);

/// A client connected to the local peripheral manager.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RemoteCentral {
    identifier: Uuid,
    maximum_update_value_length: usize,
}

impl RemoteCentral {
    pub fn new(identifier: Uuid, maximum_update_value_length: usize) -> Self {
        RemoteCentral {
            identifier,
            maximum_update_value_length,
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    /// Largest value that fits a single notification or indication on this
    /// connection.
    pub fn maximum_update_value_length(&self) -> usize {
        self.maximum_update_value_length
    }
}

/// Driver-assigned handle tying an `AttributeRequest` to the pending
/// platform request it answers. The issuer token names the peripheral manager
/// that produced the request, so another manager never mistakes it for one of
/// its own.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId {
    issuer: u64,
    sequence: u64,
}

impl RequestId {
    pub(crate) fn new(issuer: u64, sequence: u64) -> Self {
        RequestId { issuer, sequence }
    }

    /// A token no other manager in this process holds.
    pub(crate) fn next_issuer() -> u64 {
        ISSUERS.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn issuer(self) -> u64 {
        self.issuer
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.issuer, self.sequence)
    }
}

/// One incoming read or write from a remote central.
///
/// For writes `value` holds the incoming bytes; for reads the consumer places
/// the response in it before calling `PeripheralManager::respond`. The request
/// is not `Clone` and `respond` consumes it, so each request is answered at
/// most once.
#[derive(Debug)]
pub struct AttributeRequest {
    id: RequestId,
    central: RemoteCentral,
    service: Uuid,
    characteristic: MutableCharacteristic,
    offset: usize,
    value: Option<Vec<u8>>,
}

impl AttributeRequest {
    pub(crate) fn new(
        id: RequestId,
        central: RemoteCentral,
        service: Uuid,
        characteristic: MutableCharacteristic,
        offset: usize,
        value: Option<Vec<u8>>,
    ) -> Self {
        AttributeRequest {
            id,
            central,
            service,
            characteristic,
            offset,
            value,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn central(&self) -> &RemoteCentral {
        &self.central
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service
    }

    pub fn characteristic(&self) -> &MutableCharacteristic {
        &self.characteristic
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: Option<Vec<u8>>) {
        self.value = value;
    }

    pub(crate) fn take_value(&mut self) -> Option<Vec<u8>> {
        self.value.take()
    }
}

/// Result of an attribute request (the ATT error codes).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequestResponse {
    Success,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
}

impl RequestResponse {
    pub fn code(self) -> u8 {
        match self {
            RequestResponse::Success => 0x00,
            RequestResponse::InvalidHandle => 0x01,
            RequestResponse::ReadNotPermitted => 0x02,
            RequestResponse::WriteNotPermitted => 0x03,
            RequestResponse::InvalidPdu => 0x04,
            RequestResponse::InsufficientAuthentication => 0x05,
            RequestResponse::RequestNotSupported => 0x06,
            RequestResponse::InvalidOffset => 0x07,
            RequestResponse::InsufficientAuthorization => 0x08,
            RequestResponse::PrepareQueueFull => 0x09,
            RequestResponse::AttributeNotFound => 0x0A,
            RequestResponse::AttributeNotLong => 0x0B,
            RequestResponse::InsufficientEncryptionKeySize => 0x0C,
            RequestResponse::InvalidAttributeValueLength => 0x0D,
            RequestResponse::UnlikelyError => 0x0E,
            RequestResponse::InsufficientEncryption => 0x0F,
            RequestResponse::UnsupportedGroupType => 0x10,
            RequestResponse::InsufficientResources => 0x11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let response = match code {
            0x00 => RequestResponse::Success,
            0x01 => RequestResponse::InvalidHandle,
            0x02 => RequestResponse::ReadNotPermitted,
            0x03 => RequestResponse::WriteNotPermitted,
            0x04 => RequestResponse::InvalidPdu,
            0x05 => RequestResponse::InsufficientAuthentication,
            0x06 => RequestResponse::RequestNotSupported,
            0x07 => RequestResponse::InvalidOffset,
            0x08 => RequestResponse::InsufficientAuthorization,
            0x09 => RequestResponse::PrepareQueueFull,
            0x0A => RequestResponse::AttributeNotFound,
            0x0B => RequestResponse::AttributeNotLong,
            0x0C => RequestResponse::InsufficientEncryptionKeySize,
            0x0D => RequestResponse::InvalidAttributeValueLength,
            0x0E => RequestResponse::UnlikelyError,
            0x0F => RequestResponse::InsufficientEncryption,
            0x10 => RequestResponse::UnsupportedGroupType,
            0x11 => RequestResponse::InsufficientResources,
            _ => return None,
        };
        Some(response)
    }

    pub fn is_success(self) -> bool {
        self == RequestResponse::Success
    }
}
