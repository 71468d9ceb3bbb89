//! Bounded, deadline-protected remote fetches.
//!
//! [`BoundedFetcher::fetch`] performs exactly one request. It fails fast on a
//! declared size above the cap, refuses bodies of unknown size unless told to
//! trust the host, and never hands back a partial payload. Retrying is the
//! caller's business; [`BoundedFetcher::post_first_reachable`] is the one
//! built-in retry pattern, and it reports "nothing worked" as `None`.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::consts::{FETCH_MAX_SIZE, FETCH_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("response too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("response size unknown")]
    UnknownSize,
    /// Non-success status, or a body that could not be decoded as asked.
    #[error("remote error (HTTP {status}): {reason}")]
    Remote { status: u16, reason: String },
    #[error("response truncated ({received} of {expected} bytes)")]
    Truncated { expected: u64, received: u64 },
    #[error("transport error: {0}")]
    Transport(String),
}

/// How the response body should be returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    /// The raw payload.
    Bytes,
    /// One top-level field of a JSON object body.
    JsonField(String),
    /// The payload behind a seekable reader.
    Buffer,
}

/// A complete payload, shaped by the requested [`FetchMode`].
#[derive(Debug)]
pub enum FetchResult {
    Bytes(Bytes),
    Field(serde_json::Value),
    Buffer(Cursor<Bytes>),
}

impl FetchResult {
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            FetchResult::Bytes(bytes) => Some(bytes),
            FetchResult::Buffer(cursor) => Some(cursor.into_inner()),
            FetchResult::Field(_) => None,
        }
    }

    pub fn into_field(self) -> Option<serde_json::Value> {
        match self {
            FetchResult::Field(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> Option<Cursor<Bytes>> {
        match self {
            FetchResult::Buffer(cursor) => Some(cursor),
            FetchResult::Bytes(bytes) => Some(Cursor::new(bytes)),
            FetchResult::Field(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Wall-clock limit for the whole exchange, body included.
    pub timeout: Duration,
    /// Largest body accepted, checked against the declared length.
    pub max_size: u64,
    /// Read bodies with no declared length anyway.
    pub trust_missing_size: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: FETCH_TIMEOUT,
            max_size: FETCH_MAX_SIZE,
            trust_missing_size: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// A response whose headers have arrived and whose body has not been read.
#[async_trait]
pub trait Response: Send {
    fn status(&self) -> u16;

    /// The declared body length, if the server sent one.
    fn content_length(&self) -> Option<u64>;

    /// The next piece of the body, or `None` once it is exhausted.
    async fn chunk(&mut self) -> Result<Option<Bytes>, FetchError>;
}

/// Sends one request and returns as soon as response headers are in.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Box<dyn Response>, FetchError>;
}

#[derive(Deserialize)]
struct PasteKey {
    key: String,
}

pub struct BoundedFetcher {
    transport: Arc<dyn Transport>,
    policy: FetchPolicy,
}

impl BoundedFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: FetchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch `url` under the fetcher's default policy.
    pub async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchResult, FetchError> {
        self.fetch_with(url, mode, &self.policy).await
    }

    /// Fetch `url` under an explicit policy.
    pub async fn fetch_with(
        &self,
        url: &str,
        mode: FetchMode,
        policy: &FetchPolicy,
    ) -> Result<FetchResult, FetchError> {
        let exchange = self.exchange(Request::get(url), policy);
        let (status, body) = match tokio::time::timeout(policy.timeout, exchange).await {
            Ok(result) => result.inspect_err(|error| debug!(url, %error, "fetch failed"))?,
            Err(_) => {
                debug!(url, timeout = ?policy.timeout, "fetch timed out");
                return Err(FetchError::Timeout);
            }
        };
        debug!(url, status, bytes = body.len(), "fetch complete");

        match mode {
            FetchMode::Bytes => Ok(FetchResult::Bytes(body)),
            FetchMode::Buffer => Ok(FetchResult::Buffer(Cursor::new(body))),
            FetchMode::JsonField(field) => {
                let value: serde_json::Value =
                    serde_json::from_slice(&body).map_err(|e| FetchError::Remote {
                        status,
                        reason: format!("invalid JSON body: {e}"),
                    })?;
                value
                    .get(&field)
                    .cloned()
                    .map(FetchResult::Field)
                    .ok_or_else(|| FetchError::Remote {
                        status,
                        reason: format!("missing field `{field}`"),
                    })
            }
        }
    }

    /// Post `content` to each mirror in turn and return the first paste URL.
    ///
    /// A mirror counts as reachable if it answers `{mirror}documents` with
    /// HTTP 200 and a JSON `key`. Returns `None` when every mirror fails or
    /// times out.
    pub async fn post_first_reachable(
        &self,
        mirrors: &[&str],
        content: &str,
        attempt_timeout: Duration,
    ) -> Option<String> {
        let body = Bytes::from(content.to_owned());
        let policy = FetchPolicy {
            timeout: attempt_timeout,
            max_size: self.policy.max_size,
            trust_missing_size: true,
        };

        for mirror in mirrors {
            let request = Request::post(format!("{mirror}documents"), body.clone());
            match tokio::time::timeout(attempt_timeout, self.exchange(request, &policy)).await {
                Ok(Ok((200, reply))) => match serde_json::from_slice::<PasteKey>(&reply) {
                    Ok(paste) => return Some(format!("{mirror}{}", paste.key)),
                    Err(e) => debug!(mirror, error = %e, "mirror reply had no key"),
                },
                Ok(Ok((status, _))) => debug!(mirror, status, "mirror refused paste"),
                Ok(Err(error)) => debug!(mirror, %error, "mirror unreachable"),
                Err(_) => debug!(mirror, "mirror timed out"),
            }
        }

        warn!(mirrors = mirrors.len(), "no paste mirror was reachable");
        None
    }

    /// Send `request` and read its body under `policy`'s size rules.
    async fn exchange(
        &self,
        request: Request,
        policy: &FetchPolicy,
    ) -> Result<(u16, Bytes), FetchError> {
        let mut response = self.transport.send(request).await?;

        let declared = response.content_length();
        match declared {
            Some(size) if size > policy.max_size => {
                return Err(FetchError::TooLarge {
                    size,
                    limit: policy.max_size,
                });
            }
            None if !policy.trust_missing_size => return Err(FetchError::UnknownSize),
            _ => {}
        }

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(FetchError::Remote {
                status,
                reason: "unsuccessful status".to_string(),
            });
        }

        let capacity = declared.unwrap_or(0).min(policy.max_size);
        let mut body = BytesMut::with_capacity(usize::try_from(capacity).unwrap_or(0));
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
        }

        let received = body.len() as u64;
        if let Some(expected) = declared
            && received < expected
        {
            return Err(FetchError::Truncated { expected, received });
        }

        Ok((status, body.freeze()))
    }
}
