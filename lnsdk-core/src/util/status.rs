use core::fmt;

#[cfg(feature = "use_backtrace")]
use backtrace::Backtrace;
use log::error;
use serde_json::json;

use crate::error::{ErrorKind, SdkError};

/// gRPC compatible error status, as handed to the transport layer
#[derive(Clone)]
pub struct Status {
    /// The gRPC status code
    code: Code,
    /// The SDK error kind
    kind: ErrorKind,
    /// A relevant error message
    message: String,
}

/// gRPC compatible error status code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,

    /// Client specified an invalid argument.
    InvalidArgument = 3,

    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,

    /// Some requested entity was not found.
    NotFound = 5,

    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,

    /// Some resource has been exhausted.
    ResourceExhausted = 8,

    /// The system is not in a state required for the operation’s execution.
    FailedPrecondition = 9,

    /// Operation was attempted past the valid range.
    OutOfRange = 11,

    /// Internal error.
    Internal = 13,

    /// The service is currently unavailable.
    Unavailable = 14,
}

impl Status {
    /// Create a new `Status` with the associated code and message.
    pub fn new(code: Code, kind: ErrorKind, message: impl Into<String>) -> Self {
        Status { code, kind, message: message.into() }
    }

    /// Get the gRPC `Code` of this `Status`.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the SDK error kind of this `Status`.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the text error message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Construct an invalid argument status
    pub fn invalid_argument(message: impl Into<String>) -> Status {
        Self::new(Code::InvalidArgument, ErrorKind::InvalidInput, message)
    }

    /// Construct an internal error status
    pub fn internal(message: impl Into<String>) -> Status {
        Self::new(Code::Internal, ErrorKind::Generic, message)
    }

    /// The `{code, message}` structure the transport forwards
    pub fn to_json(&self) -> serde_json::Value {
        json!({ "code": self.kind.to_string(), "message": self.message })
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A manual impl to reduce the noise of frequently empty fields.
        let mut builder = f.debug_struct("Status");

        builder.field("code", &self.code);
        builder.field("kind", &self.kind);

        if !self.message.is_empty() {
            builder.field("message", &self.message);
        }

        builder.finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status: {:?}, kind: {}, message: {:?}", self.code(), self.kind, self.message())
    }
}

impl std::error::Error for Status {}

fn code_for(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::InvalidInput
        | ErrorKind::InvalidMnemonic
        | ErrorKind::UnsupportedNodeConfig
        | ErrorKind::AmbiguousAmount
        | ErrorKind::InvoiceMismatch => Code::InvalidArgument,
        ErrorKind::NetworkTimeout => Code::DeadlineExceeded,
        ErrorKind::UnknownLsp | ErrorKind::RouteNotFound => Code::NotFound,
        ErrorKind::AlreadyConnected | ErrorKind::SwapInProgress => Code::AlreadyExists,
        ErrorKind::InsufficientFunds | ErrorKind::ChannelCapacityExceeded => {
            Code::ResourceExhausted
        }
        ErrorKind::NotConnected | ErrorKind::StaleFeeQuote | ErrorKind::SwapNotRefundable => {
            Code::FailedPrecondition
        }
        ErrorKind::AmountOutOfRange | ErrorKind::SwapLimitExceeded => Code::OutOfRange,
        ErrorKind::StorageUnavailable | ErrorKind::ConnectError => Code::Unavailable,
        ErrorKind::LnurlAuthError | ErrorKind::BackupFailed | ErrorKind::Generic => Code::Internal,
    }
}

impl From<SdkError> for Status {
    fn from(e: SdkError) -> Self {
        let kind = e.kind();
        let code = code_for(kind);
        let s = e.to_string();
        match code {
            Code::Internal | Code::Unavailable => {
                error!("INTERNAL ERROR: {}", &s);
                #[cfg(feature = "use_backtrace")]
                error!("BACKTRACE:\n{:?}", Backtrace::new());
            }
            Code::InvalidArgument => error!("INVALID ARGUMENT: {}", &s),
            _ => error!("FAILED: {}", &s),
        }
        Status::new(code, kind, s)
    }
}

/// An invalid argument was detected in the transport layer
pub fn invalid_argument(msg: impl Into<String>) -> Status {
    let s = msg.into();
    error!("INVALID ARGUMENT: {}", &s);
    Status::invalid_argument(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_sdk_error_test() {
        let status: Status = SdkError::AlreadyConnected.into();
        assert_eq!(status.code(), Code::AlreadyExists);
        assert_eq!(status.kind(), ErrorKind::AlreadyConnected);
        assert_eq!(status.message(), "already initialized");
        assert_eq!(status.to_json()["code"], "AlreadyConnected");

        let status: Status = SdkError::NetworkTimeout("lsp".into()).into();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }

    #[test]
    fn debug_test() {
        let status = Status::invalid_argument("");
        assert_eq!(format!("{:?}", status), "Status { code: InvalidArgument, kind: InvalidInput }");
    }
}
