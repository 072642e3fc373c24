use async_trait::async_trait;

use crate::error::SdkResult;
use crate::model::{FiatCurrency, Rate};
use crate::SendSync;

/// Fiat price source
#[async_trait]
pub trait FiatAPI: SendSync {
    /// Supported currencies
    async fn list_fiat_currencies(&self) -> SdkResult<Vec<FiatCurrency>>;
    /// Current BTC prices
    async fn fetch_fiat_rates(&self) -> SdkResult<Vec<Rate>>;
}
