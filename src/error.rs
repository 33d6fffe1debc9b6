use thiserror::Error as ThisError;

use crate::api::attribute::RequestResponse;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of a failure, used by consumers to decide how to react.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorType {
    /// The manager was not `PoweredOn` when the driver handled the request.
    NotPoweredOn,
    /// The request referenced a peripheral, service, characteristic or
    /// attribute request the driver does not know (or no longer knows).
    UnknownEntity,
    NotConnected,
    /// The characteristic properties or permissions forbid the operation.
    NotSupported,
    /// The remote side answered with an ATT error.
    Att(RequestResponse),
    ResourceExhausted,
    /// Payload longer than a subscriber's negotiated maximum update length.
    InvalidLength,
    ProtocolMisuse,
    InvalidState,
    LinkLost,
    CoreBluetooth,
    /// The driver worker behind a handle has shut down.
    ChannelClosed,
}

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{message} ({kind:?})")]
pub struct Error {
    kind: ErrorType,
    message: String,
}

impl Error {
    pub fn from_string(message: String, kind: ErrorType) -> Self {
        Self { kind, message }
    }

    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorType {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn not_powered_on(operation: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorType::NotPoweredOn,
            format!("{operation} requires the radio to be powered on"),
        )
    }

    pub(crate) fn unknown(entity: impl std::fmt::Display) -> Self {
        Self::new(ErrorType::UnknownEntity, format!("unknown {entity}"))
    }

    pub(crate) fn channel_closed() -> Self {
        Self::new(ErrorType::ChannelClosed, "driver worker is no longer running")
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::channel_closed()
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::channel_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_message_and_kind() {
        let error = Error::not_powered_on("scan");
        assert_eq!(error.kind(), ErrorType::NotPoweredOn);
        assert_eq!(
            error.to_string(),
            "scan requires the radio to be powered on (NotPoweredOn)"
        );
    }

    #[test]
    fn att_errors_keep_their_code() {
        let error = Error::new(
            ErrorType::Att(RequestResponse::ReadNotPermitted),
            "read refused",
        );
        match error.kind() {
            ErrorType::Att(response) => assert_eq!(response.code(), 0x02),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
