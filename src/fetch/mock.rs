//! Scripted transport for tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{FetchError, Method, Request, Response, Transport};

/// One canned response.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub content_length: Option<u64>,
    pub chunks: Vec<Bytes>,
    /// Delay before headers arrive.
    pub delay: Duration,
    /// Delay before each body chunk.
    pub chunk_delay: Duration,
}

impl MockReply {
    /// A 200 response declaring its true length.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status: 200,
            content_length: Some(body.len() as u64),
            chunks: vec![body],
            delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok(Bytes::new())
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn declared_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Split the body into `size`-byte chunks, each arriving after `delay`.
    pub fn trickled(mut self, size: usize, delay: Duration) -> Self {
        let body: Vec<u8> = self.chunks.iter().flat_map(|c| c.iter().copied()).collect();
        self.chunks = body
            .chunks(size.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        self.chunk_delay = delay;
        self
    }
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, MockReply>>,
    requests: Mutex<Vec<(Method, String)>>,
    bytes_read: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request for `url` with `reply`.
    pub fn route(self, url: impl Into<String>, reply: MockReply) -> Self {
        self.routes.lock().insert(url.into(), reply);
        self
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.requests.lock().clone()
    }

    /// Body bytes handed to callers across all responses.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }
}

struct MockResponse {
    status: u16,
    content_length: Option<u64>,
    chunks: VecDeque<Bytes>,
    chunk_delay: Duration,
    bytes_read: Arc<AtomicU64>,
}

#[async_trait]
impl Response for MockResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        let Some(chunk) = self.chunks.pop_front() else {
            return Ok(None);
        };
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
        self.bytes_read
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(Some(chunk))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Box<dyn Response>, FetchError> {
        self.requests
            .lock()
            .push((request.method, request.url.clone()));

        let reply = self.routes.lock().get(&request.url).cloned();
        let Some(reply) = reply else {
            return Err(FetchError::Transport(format!(
                "connection refused: {}",
                request.url
            )));
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        Ok(Box::new(MockResponse {
            status: reply.status,
            content_length: reply.content_length,
            chunks: reply.chunks.into(),
            chunk_delay: reply.chunk_delay,
            bytes_read: Arc::clone(&self.bytes_read),
        }))
    }
}
