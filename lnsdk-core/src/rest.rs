use core::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::error::{SdkError, SdkResult};
use crate::SendSync;

/// Minimal HTTP client
#[async_trait]
pub trait RestClient: SendSync {
    /// GET `url`, returning the status code and body
    async fn get(&self, url: &str) -> SdkResult<(u16, String)>;
    /// POST a text body to `url`, returning the status code and body
    async fn post(&self, url: &str, body: String) -> SdkResult<(u16, String)>;
}

/// GET `url` and decode a JSON body
pub async fn get_json<T: DeserializeOwned>(client: &dyn RestClient, url: &str) -> SdkResult<T> {
    let (status, body) = client.get(url).await?;
    if !(200..300).contains(&status) {
        warn!("GET {} returned {}", url, status);
        return Err(SdkError::generic(format!("GET {} returned {}: {}", url, status, body)));
    }
    serde_json::from_str(&body)
        .map_err(|e| SdkError::generic(format!("bad response from {}: {}", url, e)))
}

/// [`RestClient`] on top of `reqwest`
pub struct ReqwestRestClient {
    client: reqwest::Client,
}

impl ReqwestRestClient {
    /// Create a client whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> SdkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SdkError::generic(format!("http client: {}", e)))?;
        Ok(ReqwestRestClient { client })
    }
}

impl SendSync for ReqwestRestClient {}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> SdkError {
    if e.is_timeout() {
        SdkError::NetworkTimeout(url.to_string())
    } else {
        SdkError::generic(format!("{}: {}", url, e))
    }
}

#[async_trait]
impl RestClient for ReqwestRestClient {
    async fn get(&self, url: &str) -> SdkResult<(u16, String)> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|e| map_reqwest_error(url, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| map_reqwest_error(url, e))?;
        Ok((status, body))
    }

    async fn post(&self, url: &str, body: String) -> SdkResult<(u16, String)> {
        debug!("POST {}", url);
        let response =
            self.client.post(url).body(body).send().await.map_err(|e| map_reqwest_error(url, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| map_reqwest_error(url, e))?;
        Ok((status, body))
    }
}
