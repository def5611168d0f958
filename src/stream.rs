use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{BodySink, ByteRange, Liveness};

const CRLF: &str = "\r\n";

/// Streams up to `length` bytes from `reader` into `sink`, one buffer at a time.
///
/// A `length` of zero copies until the reader is exhausted. Stops early,
/// without error, when the reader runs dry or `liveness` reports the peer
/// gone. Returns the number of bytes written.
pub async fn copy_window<R, S>(
    reader: &mut R,
    length: u64,
    buffer_size: usize,
    sink: &mut S,
    liveness: &mut Liveness,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    S: BodySink + ?Sized,
{
    let mut remaining = (length > 0).then_some(length);
    let mut written = 0u64;

    loop {
        // the smaller of the buffer size and the number of bytes remaining
        let nbytes = match remaining {
            Some(0) => break,
            Some(remaining) => buffer_size.min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => buffer_size,
        };

        if !liveness.check(&*sink) {
            break;
        }

        let mut buffer = BytesMut::zeroed(nbytes);
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        buffer.truncate(n);
        if !liveness.deliver(&mut *sink, buffer.freeze()).await? {
            break;
        }

        written += n as u64;
        if let Some(remaining) = remaining.as_mut() {
            *remaining -= n as u64;
        }
    }

    Ok(written)
}

/// Boundary line and headers opening one part of a `multipart/byteranges` body.
pub(crate) fn part_header(boundary: &str, content_type: &str, range: &ByteRange, total: u64) -> Bytes {
    Bytes::from(format!(
        "--{boundary}{CRLF}Content-Type: {content_type}{CRLF}Content-Range: {}{CRLF}{CRLF}",
        range.content_range(total)
    ))
}

/// Line break closing the payload of a part.
pub(crate) fn part_trailer() -> Bytes {
    Bytes::from_static(CRLF.as_bytes())
}

pub(crate) fn closing_boundary(boundary: &str) -> Bytes {
    Bytes::from(format!("--{boundary}--"))
}

/// Exact size of the multipart body for `ranges`.
pub(crate) fn multipart_length(boundary: &str, content_type: &str, ranges: &[ByteRange], total: u64) -> u64 {
    let parts: u64 = ranges
        .iter()
        .map(|range| {
            part_header(boundary, content_type, range, total).len() as u64
                + range.len()
                + part_trailer().len() as u64
        })
        .sum();
    parts + closing_boundary(boundary).len() as u64
}
