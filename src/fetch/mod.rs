//! HTTP plumbing for the De Lijn client.
//!
//! [`HttpClient`] is the seam every request goes through; [`BasicClient`] is
//! the production implementation and [`auth::ApiKey`] adds the subscription
//! key header.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use crate::error::{Result, TrackerError};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Parses `url`, mapping failures into [`TrackerError::InvalidUrl`].
pub fn parse_url(url: &str) -> Result<reqwest::Url> {
    url.parse::<reqwest::Url>()
        .map_err(|e| TrackerError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })
}

/// GETs `url` and decodes the JSON body.
///
/// 401 and 403 map to [`TrackerError::InvalidAuth`], 404 to
/// [`TrackerError::NotFound`].
pub async fn fetch_json<C: HttpClient, T: DeserializeOwned>(client: &C, url: &str) -> Result<T> {
    let req = reqwest::Request::new(reqwest::Method::GET, parse_url(url)?);

    debug!(url, "Making request");
    let resp = client.execute(req).await?;

    match resp.status() {
        s if s.is_success() => {}
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(TrackerError::InvalidAuth),
        StatusCode::NOT_FOUND => {
            return Err(TrackerError::NotFound {
                url: url.to_string(),
            });
        }
        status => {
            return Err(TrackerError::Status {
                status,
                url: url.to_string(),
            });
        }
    }

    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
