//! Line-oriented SSE body reader (spec.md §4.2 "Streaming").
//!
//! Scans an upstream response body line-by-line, tolerating lines up to
//! 1 MiB, and guarantees the body is dropped (closing the connection) on
//! every exit path — including when the caller drops the reader early for
//! cancellation (spec.md §4.7 "Cancellation of the caller's context must
//! propagate to the adapter's HTTP read").

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use reqwest::{Client, Method};

/// Upstream HTTP/network failure, carrying enough context to build a
/// problem response (spec.md §7 `upstream-failure`).
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: u16,
    pub body: String,
    pub url: String,
}

impl UpstreamError {
    pub fn network(url: &str, message: String) -> Self {
        Self {
            status: 0,
            body: message,
            url: url.to_string(),
        }
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream error ({}) from {}: {}", self.status, self.url, self.body)
    }
}

impl std::error::Error for UpstreamError {}

/// Maximum tolerated SSE line length, per spec.md §4.2.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A connected SSE body, ready to be scanned line-by-line.
pub struct SseLineReader {
    stream: reqwest::Response,
    buffer: BytesMut,
    body_exhausted: bool,
}

impl SseLineReader {
    /// Opens the streaming request. Non-2xx responses are read fully and
    /// returned as an `UpstreamError`; on 2xx, returns a reader positioned
    /// at the start of the body.
    pub async fn connect<B: serde::Serialize + ?Sized>(
        client: &Client,
        method: Method,
        url: &str,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> Result<Self, UpstreamError> {
        let mut request = client.request(method, url).header("Accept", "text/event-stream");
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
        if !status.is_success() {
            let raw_body = response.text().await.unwrap_or_default();
            return Err(UpstreamError {
                status: status.as_u16(),
                body: raw_body,
                url: url.to_string(),
            });
        }

        Ok(Self {
            stream: response,
            buffer: BytesMut::new(),
            body_exhausted: false,
        })
    }

    /// Returns the next non-empty line, or `None` once the body and any
    /// trailing partial line have been fully consumed. Lines without
    /// trailing `\n` at end-of-stream are still returned (final flush).
    pub async fn next_line(&mut self) -> Result<Option<String>, UpstreamError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line_bytes = self.buffer.split_to(pos + 1);
                line_bytes.truncate(pos); // drop the '\n'
                let line = strip_cr(&line_bytes);
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.buffer.len() > MAX_LINE_BYTES {
                return Err(UpstreamError {
                    status: 0,
                    body: "SSE line exceeded 1 MiB without a newline".to_string(),
                    url: String::new(),
                });
            }

            if self.body_exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let remaining = std::mem::take(&mut self.buffer);
                let line = strip_cr(&remaining);
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(line));
            }

            match self.stream.chunk().await {
                Ok(Some(chunk)) => self.buffer.extend_from_slice(&chunk),
                Ok(None) => self.body_exhausted = true,
                Err(e) => {
                    return Err(UpstreamError::network("", e.to_string()));
                }
            }
        }
    }
}

fn strip_cr(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}

/// Alternate construction for tests: drive the scanner directly off a byte
/// stream instead of a live `reqwest::Response`.
#[cfg(test)]
pub(crate) async fn collect_lines_from_bytes(chunks: Vec<&'static [u8]>) -> Vec<String> {
    use futures::stream;

    let mut buffer = BytesMut::new();
    let mut lines = Vec::new();
    let mut body = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    while let Some(Ok(chunk)) = body.next().await {
        buffer.extend_from_slice(chunk);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let mut line_bytes = buffer.split_to(pos + 1);
            line_bytes.truncate(pos);
            let line = strip_cr(&line_bytes);
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }
    if !buffer.is_empty() {
        let line = strip_cr(&buffer);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_on_newlines_and_skips_blanks() {
        let lines = collect_lines_from_bytes(vec![
            b"data: {\"a\":1}\n\n",
            b"data: [DONE]\n",
        ])
        .await;
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn handles_line_split_across_chunks() {
        let lines = collect_lines_from_bytes(vec![b"data: {\"a\"", b":1}\n"]).await;
        assert_eq!(lines, vec!["data: {\"a\":1}"]);
    }
}
