use std::time::{Duration, SystemTime};

use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum_extra::headers::{AcceptRanges, CacheControl, ContentLength, ContentRange, Expires, HeaderMapExt, LastModified};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::{ByteRange, ContentDescriptor, EngineError, EntityTag, RangeConfig, RequestContext};

/// Writes status lines and headers for every kind of response.
pub(crate) struct Composer<'a> {
    pub descriptor: &'a ContentDescriptor,
    pub etag: &'a EntityTag,
    pub config: &'a RangeConfig,
    pub now: SystemTime,
}

impl Composer<'_> {
    /// 200 with the whole resource.
    pub fn full<C: RequestContext + ?Sized>(&self, ctx: &mut C) -> Result<(), EngineError> {
        ctx.set_status(StatusCode::OK);
        self.content_type(ctx, self.descriptor.content_type().as_ref())?;
        self.accept_ranges(ctx);

        let expires = self.now + Duration::from_secs(self.config.expires_after_secs);
        let disposition = content_disposition(self.descriptor.name())?;
        let headers = ctx.response_headers_mut();
        headers.typed_insert(ContentLength(self.descriptor.length()));
        headers.typed_insert(LastModified::from(self.descriptor.last_modified()));
        headers.insert(header::ETAG, HeaderValue::from_str(&self.etag.to_string())?);
        headers.typed_insert(Expires::from(expires));
        headers.typed_insert(CacheControl::new().with_public());
        headers.insert(header::CONTENT_DISPOSITION, disposition);
        Ok(())
    }

    /// 206 with one range.
    pub fn single<C: RequestContext + ?Sized>(&self, ctx: &mut C, range: &ByteRange) -> Result<(), EngineError> {
        self.partial(ctx)?;
        self.content_type(ctx, self.descriptor.content_type().as_ref())?;

        let content_range = HeaderValue::from_str(&range.content_range(self.descriptor.length()))?;
        let headers = ctx.response_headers_mut();
        headers.typed_insert(ContentLength(range.len()));
        headers.insert(header::CONTENT_RANGE, content_range);
        Ok(())
    }

    /// 206 with a `multipart/byteranges` body of `length` bytes.
    pub fn multipart<C: RequestContext + ?Sized>(&self, ctx: &mut C, length: u64) -> Result<(), EngineError> {
        self.partial(ctx)?;
        let content_type = format!("multipart/byteranges; boundary={}", self.config.boundary);
        self.content_type(ctx, &content_type)?;
        ctx.response_headers_mut().typed_insert(ContentLength(length));
        Ok(())
    }

    fn partial<C: RequestContext + ?Sized>(&self, ctx: &mut C) -> Result<(), EngineError> {
        ctx.set_status(StatusCode::PARTIAL_CONTENT);
        self.accept_ranges(ctx);

        let headers = ctx.response_headers_mut();
        headers.typed_insert(LastModified::from(self.descriptor.last_modified()));
        headers.typed_insert(CacheControl::new().with_public());
        headers.insert(header::ETAG, HeaderValue::from_str(&self.etag.to_string())?);
        Ok(())
    }

    fn accept_ranges<C: RequestContext + ?Sized>(&self, ctx: &mut C) {
        let headers = ctx.response_headers_mut();
        if self.config.accept_ranges {
            headers.typed_insert(AcceptRanges::bytes());
        } else {
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
        }
    }

    fn content_type<C: RequestContext + ?Sized>(&self, ctx: &mut C, value: &str) -> Result<(), EngineError> {
        ctx.response_headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_str(value)?);
        Ok(())
    }
}

/// 416 with `Content-Range: bytes */{total}` and no body.
pub(crate) fn unsatisfiable<C: RequestContext + ?Sized>(ctx: &mut C, total: u64) {
    ctx.set_status(StatusCode::RANGE_NOT_SATISFIABLE);
    ctx.response_headers_mut()
        .typed_insert(ContentRange::unsatisfied_bytes(total));
}

/// A status-only response, optionally carrying the current entity tag.
pub(crate) fn terminal<C: RequestContext + ?Sized>(
    ctx: &mut C,
    status: StatusCode,
    etag: Option<&EntityTag>,
) -> Result<(), EngineError> {
    ctx.set_status(status);
    if let Some(etag) = etag {
        ctx.response_headers_mut()
            .insert(header::ETAG, HeaderValue::from_str(&etag.to_string())?);
    }
    Ok(())
}

/// `attachment` disposition carrying the resource name. Names that are not
/// plain ASCII also get an RFC 5987 `filename*` parameter.
fn content_disposition(name: &str) -> Result<HeaderValue, EngineError> {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    let value = if fallback == name {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        let encoded = utf8_percent_encode(name, NON_ALPHANUMERIC);
        format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
    };
    Ok(HeaderValue::from_str(&value)?)
}
