use std::io;

use async_trait::async_trait;

use crate::{BodySink, ContentDescriptor, Liveness, SourceError};

/// A resource resolved for one request: its metadata plus whatever the
/// source needs to read it again later in the same request.
#[derive(Debug, Clone)]
pub struct Resolved<H> {
    pub descriptor: ContentDescriptor,
    pub handle: H,
}

/// Backing store for the content served by a [`RangeEngine`](crate::RangeEngine).
///
/// Implementations are shared by every request, so they must support
/// concurrent, independent reads. Per-request state lives in the
/// [`Resolved::handle`] returned by [`ContentSource::resolve`].
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Per-request reference to a resolved resource, e.g. a path or a row id.
    type Handle: Send + Sync;

    /// Look up a resource by key. A missing resource is [`SourceError::NotFound`].
    async fn resolve(&self, key: &str) -> Result<Resolved<Self::Handle>, SourceError>;

    /// Stream the window `[offset, offset + length)` of a resolved resource
    /// into `sink`, `buffer_size` bytes at a time. A `length` of zero means
    /// "until the end of the resource".
    ///
    /// Returns the number of bytes written, which is short when the resource
    /// ends first or `liveness` reports the peer gone.
    async fn write_window(
        &self,
        handle: &Self::Handle,
        offset: u64,
        length: u64,
        buffer_size: usize,
        sink: &mut dyn BodySink,
        liveness: &mut Liveness,
    ) -> io::Result<u64>;
}
