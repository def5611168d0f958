//! # axum-partial
//!
//! Partial content for large downloadable resources over [`axum`][1]:
//! byte ranges, conditional requests and `multipart/byteranges` responses.
//!
//! Content is served from any [`ContentSource`]. Two are provided: a
//! [`FileSource`] rooted at a directory, and a [`PartitionedSource`] over
//! any [`PartitionStore`] that keeps a resource as an ordered sequence of
//! independently sized partitions. The [`RangeEngine`] runs the whole
//! request lifecycle against a [`RequestContext`], which the [`service`]
//! module implements on top of axum.
//!
//! ```
//! use std::sync::Arc;
//!
//! use axum::Router;
//! use axum::routing::any;
//!
//! use axum_partial::{FileSource, RangeConfig, RangeEngine};
//! use axum_partial::service::serve_key;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = FileSource::new("test");
//!     let engine = Arc::new(RangeEngine::new(source, RangeConfig::default()));
//!
//!     let _app: Router = Router::new()
//!         .route("/files/{*key}", any(serve_key::<FileSource>))
//!         .with_state(engine);
//!
//!     #[cfg(feature = "run_server_in_example")]
//!     {
//!         let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!         axum::serve(listener, _app).await.unwrap();
//!     }
//! }
//! ```
//!
//! [1]: https://docs.rs/axum

mod conditional;
mod config;
mod context;
mod descriptor;
mod engine;
mod error;
mod file;
mod partition;
mod range;
mod response;
mod source;
mod stream;

pub mod service;

pub use conditional::{Evaluation, Preconditions};
pub use config::RangeConfig;
pub use context::{BodySink, Liveness, MemoryContext, RequestContext};
pub use descriptor::{ContentDescriptor, EntityTag};
pub use engine::{Outcome, RangeEngine};
pub use error::{ConfigError, EngineError, RangeError, SourceError};
pub use file::FileSource;
pub use partition::{
    read_window, MemoryCursor, MemoryPartitionStore, PartitionCursor, PartitionStore,
    PartitionedResource, PartitionedSource,
};
pub use range::RangeSet;
pub use source::{ContentSource, Resolved};
pub use stream::copy_window;

/// An inclusive span of bytes `[offset, end]` within a resource.
///
/// Always satisfies `offset <= end`. Whether it fits a particular resource
/// is checked when a [`RangeSet`] is parsed against that resource's length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    offset: u64,
    end: u64,
}

impl ByteRange {
    /// Construct a range from an offset and an inclusive end.
    /// Returns `None` when `end < offset`.
    pub fn new(offset: u64, end: u64) -> Option<Self> {
        (offset <= end).then_some(ByteRange { offset, end })
    }

    /// First byte of the range.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Last byte of the range, inclusive.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered. Never zero.
    pub fn len(&self) -> u64 {
        self.end - self.offset + 1
    }

    /// `Content-Range` value for this range within a resource of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.offset, self.end, total)
    }
}
