use std::time::SystemTime;

use axum::http::StatusCode;

use crate::conditional::{Evaluation, Preconditions};
use crate::response::{self, Composer};
use crate::stream::{closing_boundary, multipart_length, part_header, part_trailer};
use crate::{
    ContentSource, EngineError, Liveness, RangeConfig, RangeError, RangeSet, RequestContext, Resolved, SourceError,
};

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: StatusCode,
    /// Content bytes streamed from the source, excluding multipart framing.
    /// Short when the peer went away mid-body.
    pub bytes_written: u64,
}

impl Outcome {
    fn headers_only(status: StatusCode) -> Self {
        Outcome { status, bytes_written: 0 }
    }
}

/// Runs the request lifecycle: preconditions, range parsing, response
/// headers and the streamed body.
///
/// The engine holds no per-request state and can serve any number of
/// requests concurrently.
#[derive(Debug)]
pub struct RangeEngine<S> {
    source: S,
    config: RangeConfig,
}

impl<S: ContentSource> RangeEngine<S> {
    /// A zero `buffer_size` is raised to one byte, the same way
    /// [`Liveness`] raises a zero interval.
    pub fn new(source: S, mut config: RangeConfig) -> Self {
        config.buffer_size = config.buffer_size.max(1);
        RangeEngine { source, config }
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    /// Answer the request in `ctx` for the resource named `key`.
    pub async fn handle<C: RequestContext>(&self, key: &str, ctx: &mut C) -> Result<Outcome, EngineError> {
        self.handle_at(key, ctx, SystemTime::now()).await
    }

    /// Like [`RangeEngine::handle`], evaluating entity tags and expiry at `now`.
    ///
    /// Validation failures are answered through `ctx` and reported as an
    /// [`Outcome`]. Only storage and transport failures are errors; by then
    /// part of the body may already have been sent.
    pub async fn handle_at<C: RequestContext>(
        &self,
        key: &str,
        ctx: &mut C,
        now: SystemTime,
    ) -> Result<Outcome, EngineError> {
        let method = ctx.method().clone();

        if !Preconditions::new(&method, ctx.headers()).method_allowed() {
            tracing::debug!(%method, key, "method not allowed");
            return self.stop(ctx, StatusCode::NOT_IMPLEMENTED);
        }

        let resolved = match self.source.resolve(key).await {
            Ok(resolved) => resolved,
            Err(SourceError::NotFound(_)) => {
                tracing::debug!(key, "resource not found");
                return self.stop(ctx, StatusCode::NOT_FOUND);
            }
            Err(SourceError::Io(e)) => return Err(EngineError::Source(e)),
        };

        let descriptor = &resolved.descriptor;
        let etag = descriptor.entity_tag(now);

        let (evaluation, range, is_get) = {
            let preconditions = Preconditions::new(&method, ctx.headers());
            (
                preconditions.evaluate(descriptor, &etag),
                preconditions.range().map(str::to_owned),
                preconditions.is_get(),
            )
        };

        let range_applies = match evaluation {
            Evaluation::Continue { range_applies } => range_applies,
            Evaluation::Stop { status, echo_etag } => {
                tracing::debug!(key, %status, "precondition stopped request");
                response::terminal(ctx, status, echo_etag.then_some(&etag))?;
                return Ok(Outcome::headers_only(status));
            }
        };

        if range.is_some() && !range_applies {
            tracing::debug!(key, "If-Range does not match, sending full content");
        }

        let composer = Composer {
            descriptor,
            etag: &etag,
            config: &self.config,
            now,
        };

        let range = range.filter(|_| self.config.accept_ranges && range_applies);
        let Some(range) = range else {
            composer.full(ctx)?;
            let bytes_written = if is_get && descriptor.length() > 0 {
                self.write(&resolved, 0, descriptor.length(), ctx, &mut self.liveness()).await?
            } else {
                0
            };
            return Ok(Outcome { status: StatusCode::OK, bytes_written });
        };

        let ranges = match self.parse_ranges(&range, descriptor.length()) {
            Ok(ranges) => ranges,
            Err(e) => {
                tracing::debug!(key, range = %range, error = %e, "range not satisfiable");
                response::unsatisfiable(ctx, descriptor.length());
                return Ok(Outcome::headers_only(StatusCode::RANGE_NOT_SATISFIABLE));
            }
        };

        let bytes_written = match ranges.single() {
            Some(single) => {
                composer.single(ctx, &single)?;
                if is_get {
                    self.write(&resolved, single.offset(), single.len(), ctx, &mut self.liveness()).await?
                } else {
                    0
                }
            }
            None => {
                let content_type = descriptor.content_type().to_string();
                let length = multipart_length(&self.config.boundary, &content_type, ranges.as_slice(), descriptor.length());
                composer.multipart(ctx, length)?;
                if is_get {
                    self.write_multipart(&resolved, &ranges, &content_type, ctx).await?
                } else {
                    0
                }
            }
        };

        Ok(Outcome { status: StatusCode::PARTIAL_CONTENT, bytes_written })
    }

    fn parse_ranges(&self, header: &str, total: u64) -> Result<RangeSet, RangeError> {
        let ranges = RangeSet::parse(header, total)?;
        match self.config.max_ranges {
            Some(max) if ranges.len() > max => Err(RangeError::TooManyRanges { count: ranges.len(), max }),
            _ => Ok(ranges),
        }
    }

    async fn write_multipart<C: RequestContext>(
        &self,
        resolved: &Resolved<S::Handle>,
        ranges: &RangeSet,
        content_type: &str,
        ctx: &mut C,
    ) -> Result<u64, EngineError> {
        let total = resolved.descriptor.length();
        let boundary = &self.config.boundary;
        let mut liveness = self.liveness();
        let mut written = 0;

        for range in ranges {
            tracing::trace!(offset = range.offset(), end = range.end(), "writing part");
            if !liveness.deliver(&mut *ctx, part_header(boundary, content_type, range, total)).await? {
                return Ok(written);
            }
            written += self.write(resolved, range.offset(), range.len(), ctx, &mut liveness).await?;
            if liveness.is_disconnected() || !liveness.deliver(&mut *ctx, part_trailer()).await? {
                return Ok(written);
            }
        }
        liveness.deliver(&mut *ctx, closing_boundary(boundary)).await?;

        Ok(written)
    }

    async fn write<C: RequestContext>(
        &self,
        resolved: &Resolved<S::Handle>,
        offset: u64,
        length: u64,
        ctx: &mut C,
        liveness: &mut Liveness,
    ) -> Result<u64, EngineError> {
        let written = self
            .source
            .write_window(&resolved.handle, offset, length, self.config.buffer_size, ctx, liveness)
            .await?;
        if written < length {
            tracing::debug!(offset, length, written, "body cut short");
        }
        Ok(written)
    }

    fn liveness(&self) -> Liveness {
        Liveness::new(self.config.check_interval)
    }

    fn stop<C: RequestContext>(&self, ctx: &mut C, status: StatusCode) -> Result<Outcome, EngineError> {
        response::terminal(ctx, status, None)?;
        Ok(Outcome::headers_only(status))
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::{Duration, UNIX_EPOCH};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use axum::http::header::{self, HeaderName, HeaderValue};
    use axum::http::{HeaderMap, Method};
    use axum_extra::headers::{HeaderMapExt, IfModifiedSince};

    use super::*;
    use crate::{BodySink, ContentDescriptor, FileSource, MemoryContext, MemoryPartitionStore, PartitionedSource};

    const MODIFIED: u64 = 1_700_000_000;
    const BOUNDARY: &str = "q1w2e3r4t5y6u7i8o9p0zaxscdvfbgnhmjklkl";

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn now() -> SystemTime {
        at(MODIFIED + 3600)
    }

    fn data() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    fn engine_with(config: RangeConfig) -> RangeEngine<PartitionedSource<MemoryPartitionStore>> {
        let store = MemoryPartitionStore::new();
        store.ingest("data.bin", data(), 300, at(MODIFIED));
        store.ingest("empty.bin", Vec::new(), 300, at(MODIFIED));
        RangeEngine::new(PartitionedSource::new(store), config)
    }

    fn engine() -> RangeEngine<PartitionedSource<MemoryPartitionStore>> {
        engine_with(RangeConfig::default())
    }

    fn get(pairs: &[(HeaderName, &str)]) -> MemoryContext {
        pairs.iter().fold(MemoryContext::get(), |ctx, (name, value)| {
            ctx.with_header(name.clone(), HeaderValue::from_str(value).unwrap())
        })
    }

    async fn run(ctx: &mut MemoryContext) -> Outcome {
        engine().handle_at("data.bin", ctx, now()).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_response() {
        let mut ctx = MemoryContext::get();
        let outcome = run(&mut ctx).await;

        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 1000 }, outcome);
        assert_eq!(StatusCode::OK, ctx.status());
        assert_eq!(Some("bytes"), ctx.response_header(&header::ACCEPT_RANGES));
        assert_eq!(Some("1000"), ctx.response_header(&header::CONTENT_LENGTH));
        assert_eq!(Some("\"6553F100\""), ctx.response_header(&header::ETAG));
        assert_eq!(Some("public"), ctx.response_header(&header::CACHE_CONTROL));
        assert_eq!(Some("application/octet-stream"), ctx.response_header(&header::CONTENT_TYPE));
        assert_eq!(
            Some("attachment; filename=\"data.bin\""),
            ctx.response_header(&header::CONTENT_DISPOSITION)
        );
        assert!(ctx.response_header(&header::LAST_MODIFIED).is_some());
        assert!(ctx.response_header(&header::EXPIRES).is_some());
        assert_eq!(data(), ctx.body());
    }

    #[tokio::test]
    async fn test_head_sends_headers_only() {
        let mut ctx = MemoryContext::head();
        let outcome = run(&mut ctx).await;

        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 0 }, outcome);
        assert_eq!(Some("1000"), ctx.response_header(&header::CONTENT_LENGTH));
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_single_range() {
        let mut ctx = get(&[(header::RANGE, "bytes=0-499")]);
        let outcome = run(&mut ctx).await;

        assert_eq!(Outcome { status: StatusCode::PARTIAL_CONTENT, bytes_written: 500 }, outcome);
        assert_eq!(Some("bytes 0-499/1000"), ctx.response_header(&header::CONTENT_RANGE));
        assert_eq!(Some("500"), ctx.response_header(&header::CONTENT_LENGTH));
        assert_eq!(Some("\"6553F100\""), ctx.response_header(&header::ETAG));
        assert_eq!(&data()[..500], ctx.body());
    }

    #[tokio::test]
    async fn test_suffix_and_open_ranges() {
        for value in ["bytes=-500", "bytes=500-"] {
            let mut ctx = get(&[(header::RANGE, value)]);
            run(&mut ctx).await;
            assert_eq!(StatusCode::PARTIAL_CONTENT, ctx.status());
            assert_eq!(Some("bytes 500-999/1000"), ctx.response_header(&header::CONTENT_RANGE));
            assert_eq!(&data()[500..], ctx.body());
        }
    }

    #[tokio::test]
    async fn test_multiple_ranges() {
        let mut ctx = get(&[(header::RANGE, "bytes=200-299,0-99")]);
        let outcome = run(&mut ctx).await;

        assert_eq!(Outcome { status: StatusCode::PARTIAL_CONTENT, bytes_written: 200 }, outcome);
        assert_eq!(
            Some(format!("multipart/byteranges; boundary={BOUNDARY}").as_str()),
            ctx.response_header(&header::CONTENT_TYPE)
        );
        assert_eq!(None, ctx.response_header(&header::CONTENT_RANGE));

        let mut expected = Vec::new();
        for (start, end) in [(200usize, 299usize), (0, 99)] {
            expected.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Type: application/octet-stream\r\nContent-Range: bytes {start}-{end}/1000\r\n\r\n"
                )
                .as_bytes(),
            );
            expected.extend_from_slice(&data()[start..=end]);
            expected.extend_from_slice(b"\r\n");
        }
        expected.extend_from_slice(format!("--{BOUNDARY}--").as_bytes());

        assert_eq!(expected, ctx.body());
        assert_eq!(
            Some(expected.len().to_string().as_str()),
            ctx.response_header(&header::CONTENT_LENGTH)
        );
    }

    #[tokio::test]
    async fn test_multiple_ranges_head() {
        let mut ctx = MemoryContext::head().with_header(header::RANGE, HeaderValue::from_static("bytes=0-1,5-6"));
        run(&mut ctx).await;
        assert_eq!(StatusCode::PARTIAL_CONTENT, ctx.status());
        assert!(ctx.response_header(&header::CONTENT_LENGTH).is_some());
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        for value in ["bytes=0-1000", "bytes=0-99,1000-", "bytes=30-29", "bytes=x-1"] {
            let mut ctx = get(&[(header::RANGE, value)]);
            let outcome = run(&mut ctx).await;

            assert_eq!(Outcome { status: StatusCode::RANGE_NOT_SATISFIABLE, bytes_written: 0 }, outcome);
            assert_eq!(Some("bytes */1000"), ctx.response_header(&header::CONTENT_RANGE), "{value}");
            assert!(ctx.body().is_empty());
        }
    }

    #[tokio::test]
    async fn test_range_on_empty_resource() {
        let mut ctx = get(&[(header::RANGE, "bytes=0-")]);
        engine().handle_at("empty.bin", &mut ctx, now()).await.unwrap();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, ctx.status());
        assert_eq!(Some("bytes */0"), ctx.response_header(&header::CONTENT_RANGE));
    }

    #[tokio::test]
    async fn test_empty_resource_full() {
        let mut ctx = MemoryContext::get();
        let outcome = engine().handle_at("empty.bin", &mut ctx, now()).await.unwrap();
        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 0 }, outcome);
        assert_eq!(Some("0"), ctx.response_header(&header::CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn test_other_units_get_full_content() {
        let mut ctx = get(&[(header::RANGE, "items=0-1")]);
        run(&mut ctx).await;
        assert_eq!(StatusCode::OK, ctx.status());
        assert_eq!(1000, ctx.body().len());
    }

    #[tokio::test]
    async fn test_disallowed_method() {
        let mut ctx = MemoryContext::new(Method::POST);
        let outcome = run(&mut ctx).await;
        assert_eq!(StatusCode::NOT_IMPLEMENTED, outcome.status);
        assert!(ctx.response_headers().is_empty());
    }

    #[tokio::test]
    async fn test_not_found() {
        let mut ctx = MemoryContext::get();
        let outcome = engine().handle_at("missing.bin", &mut ctx, now()).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, outcome.status);
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_if_modified_since_equal() {
        let mut headers = HeaderMap::new();
        headers.typed_insert(IfModifiedSince::from(at(MODIFIED)));
        let value = headers.remove(header::IF_MODIFIED_SINCE).unwrap();

        let mut ctx = MemoryContext::get().with_header(header::IF_MODIFIED_SINCE, value);
        let outcome = run(&mut ctx).await;
        assert_eq!(Outcome { status: StatusCode::NOT_MODIFIED, bytes_written: 0 }, outcome);
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_if_none_match_echoes_etag() {
        let mut ctx = get(&[(header::IF_NONE_MATCH, "\"0\"")]);
        let outcome = run(&mut ctx).await;
        assert_eq!(StatusCode::NOT_MODIFIED, outcome.status);
        assert_eq!(Some("\"6553F100\""), ctx.response_header(&header::ETAG));
    }

    #[tokio::test]
    async fn test_if_none_match_star() {
        let mut ctx = get(&[(header::IF_NONE_MATCH, "*")]);
        let outcome = run(&mut ctx).await;
        assert_eq!(StatusCode::PRECONDITION_FAILED, outcome.status);
    }

    #[tokio::test]
    async fn test_if_match_failure() {
        let mut ctx = get(&[(header::IF_MATCH, "\"0\""), (header::RANGE, "bytes=0-1")]);
        let outcome = run(&mut ctx).await;
        assert_eq!(StatusCode::PRECONDITION_FAILED, outcome.status);
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_stale_if_range_sends_full_content() {
        let mut ctx = get(&[(header::RANGE, "bytes=0-9"), (header::IF_RANGE, "\"0\"")]);
        let outcome = run(&mut ctx).await;
        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 1000 }, outcome);
        assert_eq!(None, ctx.response_header(&header::CONTENT_RANGE));
    }

    #[tokio::test]
    async fn test_matching_if_range_sends_range() {
        let mut ctx = get(&[(header::RANGE, "bytes=0-9"), (header::IF_RANGE, "\"6553F100\"")]);
        let outcome = run(&mut ctx).await;
        assert_eq!(Outcome { status: StatusCode::PARTIAL_CONTENT, bytes_written: 10 }, outcome);
    }

    #[tokio::test]
    async fn test_recently_modified_resource_has_weak_etag() {
        let mut ctx = MemoryContext::head();
        engine().handle_at("data.bin", &mut ctx, at(MODIFIED)).await.unwrap();
        assert_eq!(Some("W/\"6553F100\""), ctx.response_header(&header::ETAG));
    }

    #[tokio::test]
    async fn test_ranges_disabled() {
        let config = RangeConfig { accept_ranges: false, ..RangeConfig::default() };
        let mut ctx = get(&[(header::RANGE, "bytes=0-9")]);
        let outcome = engine_with(config).handle_at("data.bin", &mut ctx, now()).await.unwrap();

        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 1000 }, outcome);
        assert_eq!(Some("none"), ctx.response_header(&header::ACCEPT_RANGES));
    }

    #[tokio::test]
    async fn test_too_many_ranges() {
        let config = RangeConfig { max_ranges: Some(2), ..RangeConfig::default() };
        let mut ctx = get(&[(header::RANGE, "bytes=0-1,3-4,6-7")]);
        let outcome = engine_with(config).handle_at("data.bin", &mut ctx, now()).await.unwrap();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, outcome.status);
    }

    #[tokio::test]
    async fn test_disconnect_ends_body_early() {
        let config = RangeConfig { buffer_size: 100, check_interval: 1, ..RangeConfig::default() };
        let mut ctx = MemoryContext::get().disconnect_after(3);
        let outcome = engine_with(config).handle_at("data.bin", &mut ctx, now()).await.unwrap();

        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 300 }, outcome);
        assert_eq!(&data()[..300], ctx.body());
    }

    #[tokio::test]
    async fn test_disconnect_during_multipart_skips_closing_boundary() {
        let config = RangeConfig { buffer_size: 10, check_interval: 1, ..RangeConfig::default() };
        let mut ctx = get(&[(header::RANGE, "bytes=0-99,200-299")]).disconnect_after(4);
        let outcome = engine_with(config).handle_at("data.bin", &mut ctx, now()).await.unwrap();

        // part header plus three buffers
        assert_eq!(30, outcome.bytes_written);
        assert!(!ctx.body().ends_with(b"--"));
    }

    #[tokio::test]
    async fn test_disconnect_between_probes_is_not_an_error() {
        let config = RangeConfig { buffer_size: 100, ..RangeConfig::default() };
        let engine = engine_with(config);

        let mut ctx = MemoryContext::get().disconnect_after(3);
        let outcome = engine.handle_at("data.bin", &mut ctx, now()).await.unwrap();
        assert_eq!(Outcome { status: StatusCode::OK, bytes_written: 300 }, outcome);
        assert_eq!(&data()[..300], ctx.body());

        let mut ctx = get(&[(header::RANGE, "bytes=0-299,500-599")]).disconnect_after(3);
        let outcome = engine.handle_at("data.bin", &mut ctx, now()).await.unwrap();
        // part header plus two buffers
        assert_eq!(Outcome { status: StatusCode::PARTIAL_CONTENT, bytes_written: 200 }, outcome);
    }

    #[tokio::test]
    async fn test_disconnect_on_multipart_framing_is_not_an_error() {
        let mut ctx = get(&[(header::RANGE, "bytes=0-9,20-29")]).disconnect_after(2);
        let outcome = run(&mut ctx).await;

        // the trailer after the first part is the failed write
        assert_eq!(Outcome { status: StatusCode::PARTIAL_CONTENT, bytes_written: 10 }, outcome);
        assert!(ctx.body().ends_with(&data()[..10]));

        let mut ctx = get(&[(header::RANGE, "bytes=0-9,20-29")]).disconnect_after(0);
        let outcome = run(&mut ctx).await;
        assert_eq!(0, outcome.bytes_written);
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_zero_buffer_size_still_streams() {
        let config = RangeConfig { buffer_size: 0, ..RangeConfig::default() };
        let engine = engine_with(config);
        assert_eq!(1, engine.config().buffer_size);

        let mut ctx = get(&[(header::RANGE, "bytes=0-4")]);
        let outcome = engine.handle_at("data.bin", &mut ctx, now()).await.unwrap();
        assert_eq!(5, outcome.bytes_written);
        assert_eq!(&data()[..5], ctx.body());
    }

    #[tokio::test]
    async fn test_file_source() {
        let engine = RangeEngine::new(FileSource::new("test"), RangeConfig::default());
        let mut ctx = get(&[(header::RANGE, "bytes=-20")]);
        engine.handle("fixture.txt", &mut ctx).await.unwrap();

        assert_eq!(StatusCode::PARTIAL_CONTENT, ctx.status());
        assert_eq!(Some("text/plain"), ctx.response_header(&header::CONTENT_TYPE));
        assert_eq!(Some("bytes 34-53/54"), ctx.response_header(&header::CONTENT_RANGE));
        assert_eq!(b" range requests on!\n", ctx.body());
    }

    struct BrokenSource;

    #[async_trait]
    impl ContentSource for BrokenSource {
        type Handle = ();

        async fn resolve(&self, key: &str) -> Result<Resolved<()>, SourceError> {
            match key {
                "offline" => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "offline").into()),
                _ => Ok(Resolved { descriptor: ContentDescriptor::new(key, 10, at(MODIFIED)), handle: () }),
            }
        }

        async fn write_window(
            &self,
            _handle: &(),
            _offset: u64,
            _length: u64,
            _buffer_size: usize,
            _sink: &mut dyn BodySink,
            _liveness: &mut Liveness,
        ) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "partition missing"))
        }
    }

    #[tokio::test]
    async fn test_storage_failures_are_errors() {
        let engine = RangeEngine::new(BrokenSource, RangeConfig::default());

        let mut ctx = MemoryContext::get();
        assert_matches!(engine.handle("offline", &mut ctx).await, Err(EngineError::Source(_)));

        let mut ctx = MemoryContext::get();
        assert_matches!(engine.handle("file.bin", &mut ctx).await, Err(EngineError::Io(_)));
        // headers were already set when the read failed
        assert_eq!(StatusCode::OK, ctx.status());
    }
}
