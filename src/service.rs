//! axum integration.
//!
//! [`serve_key`] is a ready made handler for routes with a single wildcard
//! parameter naming the resource. [`respond`] is the same thing for callers
//! that extract the key some other way.
//!
//! The engine runs in its own task and writes into a channel backed context.
//! The status line and headers are handed back to the handler as soon as
//! the first body chunk is sent (or the engine finishes), and the rest of
//! the body is streamed out of a bounded channel. A client that goes away
//! drops the response body, which closes the channel. The engine then stops
//! at its next liveness probe or failed write, without reporting an error.

use std::io;
use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{BodySink, ContentSource, RangeEngine, RequestContext};

/// Body chunks buffered between the engine task and the response body.
const BODY_CHANNEL_DEPTH: usize = 4;

/// Handler answering `GET` and `HEAD` for the resource named by the path
/// parameter, e.g. `/files/{*key}`.
pub async fn serve_key<S>(
    State(engine): State<Arc<RangeEngine<S>>>,
    Path(key): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response
where
    S: ContentSource + 'static,
    S::Handle: 'static,
{
    respond(engine, key, method, headers).await
}

/// Run `engine` for one request and turn the result into a streamed
/// [`Response`].
pub async fn respond<S>(engine: Arc<RangeEngine<S>>, key: String, method: Method, headers: HeaderMap) -> Response
where
    S: ContentSource + 'static,
    S::Handle: 'static,
{
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, mut body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    let mut ctx = ChannelContext::new(method, headers, head_tx, body_tx);

    tokio::spawn(async move {
        match engine.handle(&key, &mut ctx).await {
            Ok(outcome) => {
                tracing::debug!(key, status = %outcome.status, bytes = outcome.bytes_written, "request served");
            }
            Err(e) => {
                tracing::error!(key, error = %e, "failed to serve request");
                ctx.fail(e.to_string()).await;
            }
        }
        ctx.commit();
    });

    let Ok(head) = head_rx.await else {
        tracing::error!("range engine task ended without a response");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let body = async_stream::stream! {
        while let Some(chunk) = body_rx.recv().await {
            yield chunk;
        }
    };

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers;
    response
}

#[derive(Debug)]
struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

/// [`RequestContext`] whose body is the sending half of a channel.
#[derive(Debug)]
struct ChannelContext {
    method: Method,
    headers: HeaderMap,
    status: StatusCode,
    response_headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelContext {
    fn new(
        method: Method,
        headers: HeaderMap,
        head: oneshot::Sender<Head>,
        body: mpsc::Sender<io::Result<Bytes>>,
    ) -> Self {
        ChannelContext {
            method,
            headers,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            head: Some(head),
            body,
        }
    }

    /// Hand status and headers to the waiting handler. Only the first call
    /// has any effect.
    fn commit(&mut self) {
        if let Some(tx) = self.head.take() {
            let head = Head {
                status: self.status,
                headers: mem::take(&mut self.response_headers),
            };
            // the handler is gone if this fails
            let _ = tx.send(head);
        }
    }

    /// Report a failure: a bare 500 if nothing was committed yet, otherwise
    /// a body error so the transport aborts the response.
    async fn fail(&mut self, message: String) {
        if self.head.is_some() {
            self.status = StatusCode::INTERNAL_SERVER_ERROR;
            self.response_headers.clear();
        } else {
            let _ = self.body.send(Err(io::Error::other(message))).await;
        }
    }
}

#[async_trait]
impl BodySink for ChannelContext {
    async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        self.commit();
        self.body
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }

    fn is_connected(&self) -> bool {
        !self.body.is_closed()
    }
}

impl RequestContext for ChannelContext {
    fn method(&self) -> &Method {
        &self.method
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }
}
