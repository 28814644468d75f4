//! Media retrieval over HTTP.
//!
//! Downloads image and video bodies with bounded retry, a content-type
//! check, and hard caps on body size. Videos past the size ceiling are
//! not read to completion; the sampling planner rejects them by length.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use crate::config::{backoff_delay, RetryPolicy};
use crate::error::EvalError;
use crate::sampling::SIZE_CEILING_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// A downloaded media body and the content type it was served with.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    max_image_bytes: u64,
}

impl ResourceFetcher {
    pub fn new(
        timeout: Duration,
        retry: RetryPolicy,
        max_image_bytes: u64,
    ) -> Result<Self, EvalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| EvalError::config(format!("failed to build fetch client: {e}")))?;

        Ok(Self {
            client,
            retry,
            max_image_bytes,
        })
    }

    /// Download one media body, retrying transient failures with backoff.
    pub async fn fetch(&self, url: &str, kind: MediaKind) -> Result<FetchedMedia, EvalError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, kind).await {
                Ok(media) => return Ok(media),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.retry.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.retry.base_delay, attempt);
                    tracing::warn!(
                        "{} fetch attempt {} failed ({}), retrying in {:?}",
                        kind.as_str(),
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str, kind: MediaKind) -> Result<FetchedMedia, EvalError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err(EvalError::fetch(url, format!("status {status}"), retryable));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match &content_type {
            Some(value) if value.contains(kind.as_str()) => {}
            Some(value) => {
                return Err(EvalError::fetch(
                    url,
                    format!("unexpected content-type {value:?} for a {} fetch", kind.as_str()),
                    false,
                ));
            }
            None => {
                return Err(EvalError::fetch(url, "missing content-type header", false));
            }
        }

        // Reject by declared length before reading anything, when the
        // server declares one.
        if let Some(declared) = response.content_length() {
            match kind {
                MediaKind::Video if declared > SIZE_CEILING_BYTES => {
                    return Err(EvalError::size_rejected(declared, SIZE_CEILING_BYTES));
                }
                MediaKind::Image if declared > self.max_image_bytes => {
                    return Err(EvalError::fetch(
                        url,
                        format!("image body exceeds {} bytes", self.max_image_bytes),
                        false,
                    ));
                }
                _ => {}
            }
        }

        let cap = match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Video => SIZE_CEILING_BYTES,
        };

        let mut bytes: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(url, &e))? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > cap {
                match kind {
                    // Past the ceiling the planner rejects by length no
                    // matter how much more arrives; stop reading.
                    MediaKind::Video => break,
                    MediaKind::Image => {
                        return Err(EvalError::fetch(
                            url,
                            format!("image body exceeds {} bytes", self.max_image_bytes),
                            false,
                        ));
                    }
                }
            }
        }

        Ok(FetchedMedia {
            bytes,
            content_type,
        })
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> EvalError {
    if err.is_timeout() {
        EvalError::fetch(url, "request timed out", true)
    } else if err.is_connect() {
        EvalError::fetch(url, "connection failed", true)
    } else {
        EvalError::fetch(url, format!("request failed: {err}"), false)
    }
}
