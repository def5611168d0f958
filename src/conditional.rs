use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum_extra::headers::{Header, HeaderMapExt, IfModifiedSince, IfUnmodifiedSince};

use crate::range::is_bytes_range;
use crate::{ContentDescriptor, EntityTag};

/// Outcome of the precondition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Serve the request. When `range_applies` is false, `If-Range` did not
    /// match the current representation and the full content must be sent.
    Continue { range_applies: bool },
    /// Answer with `status` and no body.
    Stop { status: StatusCode, echo_etag: bool },
}

impl Evaluation {
    fn stop(status: StatusCode) -> Self {
        Evaluation::Stop { status, echo_etag: false }
    }
}

/// Conditional request checks, evaluated in a fixed order where the first
/// failing check decides the response:
///
/// 1. method (GET or HEAD), see [`Preconditions::method_allowed`]
/// 2. existence, decided by resolving the resource
/// 3. `If-Modified-Since`
/// 4. `If-Unmodified-Since`
/// 5. `If-Match`
/// 6. `If-None-Match`
/// 7. `If-Range`, only for byte range requests
///
/// Steps 3 to 7 run in [`Preconditions::evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct Preconditions<'a> {
    method: &'a Method,
    headers: &'a HeaderMap,
}

impl<'a> Preconditions<'a> {
    pub fn new(method: &'a Method, headers: &'a HeaderMap) -> Self {
        Preconditions { method, headers }
    }

    pub fn method_allowed(&self) -> bool {
        self.is_get() || self.method == Method::HEAD
    }

    /// Whether a body should be written at all.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// The raw `Range` header, if it asks for byte ranges.
    pub fn range(&self) -> Option<&'a str> {
        self.headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| is_bytes_range(v))
    }

    pub fn evaluate(&self, descriptor: &ContentDescriptor, etag: &EntityTag) -> Evaluation {
        let last_modified = descriptor.last_modified();

        if let Some(since) = self.headers.typed_get::<IfModifiedSince>() {
            if !since.is_modified(last_modified) {
                return Evaluation::stop(StatusCode::NOT_MODIFIED);
            }
        }

        if let Some(since) = self.headers.typed_get::<IfUnmodifiedSince>() {
            if !since.precondition_passes(last_modified) {
                return Evaluation::stop(StatusCode::PRECONDITION_FAILED);
            }
        }

        let etag = etag.to_string();

        let if_match = tag_list(self.headers, &header::IF_MATCH);
        if !if_match.is_empty() && !if_match.contains(&"*") && !if_match.contains(&etag.as_str()) {
            return Evaluation::stop(StatusCode::PRECONDITION_FAILED);
        }

        let if_none_match = tag_list(self.headers, &header::IF_NONE_MATCH);
        // only a bare `*` is a wildcard, a `*` inside a list is just a tag
        let wildcard = self
            .headers
            .get_all(header::IF_NONE_MATCH)
            .iter()
            .any(|v| matches!(v.to_str(), Ok(v) if v.trim() == "*"));
        if wildcard {
            return Evaluation::stop(StatusCode::PRECONDITION_FAILED);
        }
        if !if_none_match.is_empty() && !if_none_match.contains(&etag.as_str()) {
            return Evaluation::Stop {
                status: StatusCode::NOT_MODIFIED,
                echo_etag: true,
            };
        }

        let range_applies = match self.range() {
            Some(_) => self.if_range_matches(&etag, descriptor),
            None => true,
        };
        Evaluation::Continue { range_applies }
    }

    /// A strong tag must equal the current tag, a date must not predate the
    /// last modification. Weak tags and unreadable values never match.
    fn if_range_matches(&self, etag: &str, descriptor: &ContentDescriptor) -> bool {
        let Some(value) = self.headers.get(header::IF_RANGE) else {
            return true;
        };
        let Ok(raw) = value.to_str() else {
            return false;
        };
        let raw = raw.trim();

        if raw.starts_with('"') {
            raw == etag
        } else if raw.starts_with("W/") {
            false
        } else {
            let value = HeaderValue::from_str(raw).unwrap_or_else(|_| value.clone());
            match IfModifiedSince::decode(&mut std::iter::once(&value)) {
                Ok(date) => !date.is_modified(descriptor.last_modified()),
                Err(_) => false,
            }
        }
    }
}

/// Comma separated entity tags from every value of `name`.
fn tag_list<'h>(headers: &'h HeaderMap, name: &HeaderName) -> Vec<&'h str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .collect()
}
