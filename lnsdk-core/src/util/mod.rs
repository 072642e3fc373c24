/// Clock provider
pub mod clock;
/// Cryptographic utilities
pub mod crypto_utils;
/// Error status for the transport shim
pub mod status;
/// Transaction building
pub mod transaction_utils;
/// Utilities for testing
#[cfg(feature = "test_utils")]
pub mod test_utils;

use core::future::Future;
use core::time::Duration;

use crate::error::{SdkError, SdkResult};

/// Run a future against a bound, reporting [`SdkError::NetworkTimeout`] on expiry.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> SdkResult<T>
where
    F: Future<Output = SdkResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            log::warn!("{} timed out after {:?}", what, limit);
            Err(SdkError::NetworkTimeout(format!("{} after {}s", what, limit.as_secs())))
        }
    }
}
