use std::io;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::{Bytes, BytesMut};

/// Destination of a streamed response body.
#[async_trait]
pub trait BodySink: Send {
    /// Write one chunk of the body. Headers are committed by the first call.
    async fn send(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Whether the peer is still there to receive the body.
    fn is_connected(&self) -> bool;
}

/// The host transport as seen by a [`RangeEngine`](crate::RangeEngine):
/// request method and headers in, status, headers and body out.
///
/// Status and headers must be set before the first [`BodySink::send`].
pub trait RequestContext: BodySink {
    fn method(&self) -> &Method;

    /// Request headers.
    fn headers(&self) -> &HeaderMap;

    fn set_status(&mut self, status: StatusCode);

    fn response_headers_mut(&mut self) -> &mut HeaderMap;
}

/// Poll-based peer liveness check, run once every `interval` buffer iterations.
///
/// Once a disconnect has been seen it sticks, so every later check fails
/// without probing again.
#[derive(Debug, Clone)]
pub struct Liveness {
    interval: u32,
    calls: u32,
    disconnected: bool,
}

impl Liveness {
    pub fn new(interval: u32) -> Self {
        Liveness {
            interval: interval.max(1),
            calls: 0,
            disconnected: false,
        }
    }

    /// Counts one iteration and returns whether streaming should continue.
    pub fn check<S: BodySink + ?Sized>(&mut self, sink: &S) -> bool {
        if self.disconnected {
            return false;
        }
        self.calls += 1;
        if self.calls >= self.interval {
            self.calls = 0;
            if !sink.is_connected() {
                tracing::debug!("peer disconnected, stopping body");
                self.disconnected = true;
            }
        }
        !self.disconnected
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Sends `chunk` and returns whether streaming should continue.
    ///
    /// A failed send to a peer that is no longer connected marks the
    /// disconnect and returns `Ok(false)`. Other send failures are errors.
    pub async fn deliver<S: BodySink + ?Sized>(&mut self, sink: &mut S, chunk: Bytes) -> io::Result<bool> {
        match sink.send(chunk).await {
            Ok(()) => Ok(true),
            Err(_) if !sink.is_connected() => {
                tracing::debug!("peer disconnected during write, stopping body");
                self.disconnected = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// A [`RequestContext`] that records the response in memory.
///
/// Useful to drive a [`RangeEngine`](crate::RangeEngine) without a socket.
/// [`MemoryContext::disconnect_after`] simulates a peer that goes away
/// after a number of body chunks.
#[derive(Debug)]
pub struct MemoryContext {
    method: Method,
    request_headers: HeaderMap,
    status: StatusCode,
    response_headers: HeaderMap,
    body: BytesMut,
    chunks: usize,
    disconnect_after: Option<usize>,
}

impl MemoryContext {
    pub fn new(method: Method) -> Self {
        MemoryContext {
            method,
            request_headers: HeaderMap::new(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            body: BytesMut::new(),
            chunks: 0,
            disconnect_after: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn head() -> Self {
        Self::new(Method::HEAD)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.request_headers.append(name, value);
        self
    }

    /// Report the peer as gone once `chunks` body chunks were received.
    pub fn disconnect_after(mut self, chunks: usize) -> Self {
        self.disconnect_after = Some(chunks);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// A response header as a string, if present and valid UTF-8.
    pub fn response_header(&self, name: &HeaderName) -> Option<&str> {
        self.response_headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of body chunks received.
    pub fn chunks(&self) -> usize {
        self.chunks
    }
}

#[async_trait]
impl BodySink for MemoryContext {
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer disconnected"));
        }
        self.body.extend_from_slice(&chunk);
        self.chunks += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.disconnect_after.map_or(true, |limit| self.chunks < limit)
    }
}

impl RequestContext for MemoryContext {
    fn method(&self) -> &Method {
        &self.method
    }

    fn headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }
}
