//! Unary JSON request/response helper (spec.md §4.2 "Unary").

use reqwest::{Client, Method};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::sse::UpstreamError;

/// Builds a request with a JSON body (when present), default
/// `Content-Type: application/json`, and the caller's headers overlaid.
/// Non-2xx becomes an `UpstreamError`; on 2xx the body decodes as `R`.
pub async fn send_unary<B, R>(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<&B>,
    headers: &[(&str, &str)],
) -> Result<R, UpstreamError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut request = client.request(method, url);
    if let Some(b) = body {
        request = request.json(b);
    }
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| UpstreamError::network(url, e.to_string()))?;

    let status = response.status();
    let url_string = url.to_string();

    if !status.is_success() {
        let raw_body = response.text().await.unwrap_or_default();
        return Err(UpstreamError {
            status: status.as_u16(),
            body: raw_body,
            url: url_string,
        });
    }

    let raw_body = response
        .text()
        .await
        .map_err(|e| UpstreamError::network(&url_string, e.to_string()))?;

    serde_json::from_str(&raw_body).map_err(|e| UpstreamError {
        status: status.as_u16(),
        body: format!("decode-failure: {e}; raw body: {raw_body}"),
        url: url_string,
    })
}

/// Parses an arbitrary JSON body without a typed target, for callers that
/// need to inspect vendor-specific error shapes before mapping them.
pub fn parse_value(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}
