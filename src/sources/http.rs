//! HTTP plumbing shared by the remote adapters

use crate::{constants::USER_AGENT, error::SourceError};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Builds a client with the request timeout and user agent every remote
/// source uses
pub fn build_client(source_name: &str, timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SourceError::from_transport(source_name, e))
}

/// Sends a request and returns the response body
///
/// HTTP 429 becomes `Throttled`, any other non-success status or transport
/// failure becomes `Unavailable`.
pub async fn fetch_text(source_name: &str, request: RequestBuilder) -> Result<String, SourceError> {
    let response = request
        .send()
        .await
        .map_err(|e| SourceError::from_transport(source_name, e))?;

    let status = response.status();

    // Check for rate limiting
    if status.as_u16() == 429 {
        return Err(SourceError::throttled(source_name));
    }

    if !status.is_success() {
        return Err(SourceError::unavailable(
            source_name,
            format!("HTTP {}: {}", status, response.text().await.unwrap_or_default()),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| SourceError::from_transport(source_name, e))
}

/// Like [`fetch_text`], decoding the body as JSON
pub async fn fetch_json<T: DeserializeOwned>(
    source_name: &str,
    request: RequestBuilder,
) -> Result<T, SourceError> {
    let body = fetch_text(source_name, request).await?;
    serde_json::from_str(&body).map_err(|e| {
        SourceError::unavailable(
            source_name,
            format!("Failed to parse response: {}. Response: {}", e, body),
        )
    })
}
