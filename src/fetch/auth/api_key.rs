use crate::error::{Result, TrackerError};
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// Header De Lijn's API gateway reads the subscription key from.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header is parsed once at construction, so a malformed key surfaces as
/// [`TrackerError::InvalidHeader`] before any request goes out.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self> {
        let header_name =
            HeaderName::from_bytes(header_name.as_bytes()).map_err(|e| {
                TrackerError::InvalidHeader {
                    message: format!("{header_name}: {e}"),
                }
            })?;
        let mut key = HeaderValue::from_str(key.trim()).map_err(|e| TrackerError::InvalidHeader {
            message: format!("{header_name}: {e}"),
        })?;
        key.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            key,
        })
    }

    /// Uses the `Ocp-Apim-Subscription-Key` header expected by the De Lijn
    /// Open Data gateway.
    pub fn subscription_key(inner: C, key: &str) -> Result<Self> {
        Self::new(inner, SUBSCRIPTION_KEY_HEADER, key)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}
