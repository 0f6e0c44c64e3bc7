//! Shared HTTP plumbing for model providers.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use graphrag_core::{GraphRagError, GraphRagResult};

pub(crate) fn client(timeout_secs: u64) -> GraphRagResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| GraphRagError::config(format!("failed to build HTTP client: {e}")))
}

/// Rate limits and server errors are worth retrying; other client errors are not.
pub(crate) fn status_is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT || status.is_server_error()
}

pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> GraphRagError {
    let message = format!("{} API error ({}): {}", service, status, body.trim());
    if status_is_transient(status) {
        GraphRagError::transient(service, message)
    } else {
        GraphRagError::permanent(service, message)
    }
}

/// Transport failures (connect, timeout, reset) are transient.
pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> GraphRagError {
    if err.is_builder() {
        GraphRagError::permanent(service, format!("invalid request: {err}"))
    } else {
        GraphRagError::transient(service, format!("failed to reach {service}: {err}"))
    }
}

/// Send a prepared request and decode a JSON body, classifying failures.
pub(crate) async fn send_json<T: DeserializeOwned>(service: &str, request: reqwest::RequestBuilder) -> GraphRagResult<T> {
    let response = request.send().await.map_err(|e| transport_error(service, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(service, status, &body));
    }

    let body = response.text().await.map_err(|e| transport_error(service, e))?;
    serde_json::from_str(&body)
        .map_err(|e| GraphRagError::permanent(service, format!("failed to parse {service} response: {e}")))
}
