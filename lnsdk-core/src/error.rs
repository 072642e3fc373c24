use core::fmt;

use crate::persist;

/// Result type of all SDK operations
pub type SdkResult<T, E = SdkError> = Result<T, E>;

/// SDK error
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SdkError {
    /// Malformed caller input (invoice, address, config, amount)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The mnemonic failed wordlist or checksum validation
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    /// The node backend variant is not one we can drive
    #[error("unsupported node config: {0}")]
    UnsupportedNodeConfig(String),
    /// Local storage could not be created or accessed
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    /// There is no connected session
    #[error("not connected")]
    NotConnected,
    /// A session is already connected or connecting
    #[error("already initialized")]
    AlreadyConnected,
    /// Backend handshake failed
    #[error("connect error: {0}")]
    ConnectError(String),
    /// Local balance cannot cover the requested amount
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    /// No payment path to the destination
    #[error("route not found: {0}")]
    RouteNotFound(String),
    /// Caller supplied an amount inconsistent with the invoice amount
    #[error("ambiguous amount: {0}")]
    AmbiguousAmount(String),
    /// Amount outside the allowed bounds
    #[error("amount out of range: {0}")]
    AmountOutOfRange(String),
    /// No inbound liquidity to receive the amount
    #[error("channel capacity exceeded: {0}")]
    ChannelCapacityExceeded(String),
    /// LNURL-auth failed
    #[error("lnurl auth error: {0}")]
    LnurlAuthError(String),
    /// An invoice returned by a remote service does not match the request
    #[error("invoice mismatch: {0}")]
    InvoiceMismatch(String),
    /// Swap deposit bounds cannot be satisfied
    #[error("swap limit exceeded: {0}")]
    SwapLimitExceeded(String),
    /// There is already a swap in progress
    #[error("swap in progress: {0}")]
    SwapInProgress(String),
    /// Fee quote no longer current
    #[error("stale fee quote: {0}")]
    StaleFeeQuote(String),
    /// The swap is not in a refundable state
    #[error("swap not refundable: {0}")]
    SwapNotRefundable(String),
    /// The LSP is not in the discovered set
    #[error("unknown lsp: {0}")]
    UnknownLsp(String),
    /// A network call exceeded its bound
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    /// Backup could not be completed
    #[error("backup failed: {0}")]
    BackupFailed(String),
    /// Unclassified backend failure
    #[error("{0}")]
    Generic(String),
}

/// Error kind, for callers that branch on the class of failure
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    InvalidMnemonic,
    UnsupportedNodeConfig,
    StorageUnavailable,
    NotConnected,
    AlreadyConnected,
    ConnectError,
    InsufficientFunds,
    RouteNotFound,
    AmbiguousAmount,
    AmountOutOfRange,
    ChannelCapacityExceeded,
    LnurlAuthError,
    InvoiceMismatch,
    SwapLimitExceeded,
    SwapInProgress,
    StaleFeeQuote,
    SwapNotRefundable,
    UnknownLsp,
    NetworkTimeout,
    BackupFailed,
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl SdkError {
    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SdkError::InvalidInput(_) => ErrorKind::InvalidInput,
            SdkError::InvalidMnemonic(_) => ErrorKind::InvalidMnemonic,
            SdkError::UnsupportedNodeConfig(_) => ErrorKind::UnsupportedNodeConfig,
            SdkError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            SdkError::NotConnected => ErrorKind::NotConnected,
            SdkError::AlreadyConnected => ErrorKind::AlreadyConnected,
            SdkError::ConnectError(_) => ErrorKind::ConnectError,
            SdkError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            SdkError::RouteNotFound(_) => ErrorKind::RouteNotFound,
            SdkError::AmbiguousAmount(_) => ErrorKind::AmbiguousAmount,
            SdkError::AmountOutOfRange(_) => ErrorKind::AmountOutOfRange,
            SdkError::ChannelCapacityExceeded(_) => ErrorKind::ChannelCapacityExceeded,
            SdkError::LnurlAuthError(_) => ErrorKind::LnurlAuthError,
            SdkError::InvoiceMismatch(_) => ErrorKind::InvoiceMismatch,
            SdkError::SwapLimitExceeded(_) => ErrorKind::SwapLimitExceeded,
            SdkError::SwapInProgress(_) => ErrorKind::SwapInProgress,
            SdkError::StaleFeeQuote(_) => ErrorKind::StaleFeeQuote,
            SdkError::SwapNotRefundable(_) => ErrorKind::SwapNotRefundable,
            SdkError::UnknownLsp(_) => ErrorKind::UnknownLsp,
            SdkError::NetworkTimeout(_) => ErrorKind::NetworkTimeout,
            SdkError::BackupFailed(_) => ErrorKind::BackupFailed,
            SdkError::Generic(_) => ErrorKind::Generic,
        }
    }

    /// Construct an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SdkError::InvalidInput(msg.into())
    }

    /// Construct a generic error
    pub fn generic(msg: impl Into<String>) -> Self {
        SdkError::Generic(msg.into())
    }
}

impl From<persist::Error> for SdkError {
    fn from(e: persist::Error) -> Self {
        match e {
            persist::Error::Unavailable(s) => SdkError::StorageUnavailable(s),
            e => SdkError::Generic(format!("persist: {:?}", e)),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(e: serde_json::Error) -> Self {
        SdkError::Generic(format!("serialization: {}", e))
    }
}

impl From<bitcoin::secp256k1::Error> for SdkError {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        SdkError::Generic(format!("secp256k1: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for SdkError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        SdkError::NetworkTimeout(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_test() {
        assert_eq!(SdkError::AlreadyConnected.kind(), ErrorKind::AlreadyConnected);
        assert_eq!(SdkError::AlreadyConnected.to_string(), "already initialized");
        assert_eq!(SdkError::generic("boom").kind(), ErrorKind::Generic);
        assert_eq!(ErrorKind::StaleFeeQuote.to_string(), "StaleFeeQuote");
    }

    #[test]
    fn persist_error_test() {
        let e: SdkError = persist::Error::Unavailable("disk".into()).into();
        assert_eq!(e.kind(), ErrorKind::StorageUnavailable);
        let e: SdkError = persist::Error::VersionMismatch.into();
        assert_eq!(e.kind(), ErrorKind::Generic);
    }
}
