use std::slice;

use crate::{ByteRange, RangeError};

const BYTES_UNIT: &str = "bytes=";

/// Ordered, validated byte ranges taken from a `Range` header.
///
/// Ranges keep the order the client sent them in. Overlapping or repeated
/// ranges are kept as they are, since each one becomes its own multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    /// Parse a raw `Range` header value against a resource of `total` bytes.
    ///
    /// Accepts `start-end`, open-ended `start-` and suffix `-N` items separated
    /// by commas. A single bad item rejects the whole header: nothing is
    /// silently dropped, clamped or merged.
    pub fn parse(header: &str, total: u64) -> Result<Self, RangeError> {
        let spec = strip_unit(header).ok_or_else(|| RangeError::Malformed(header.to_string()))?;

        // signed, so that a suffix longer than the resource shows up as a
        // negative offset and fails validation below
        let total = i128::from(total);
        let last = total - 1;

        let mut raw = Vec::new();
        for item in spec.split(',') {
            let parts: Vec<&str> = item.split('-').collect();
            let [start, end] = parts[..] else {
                return Err(RangeError::Malformed(item.to_string()));
            };
            let (start, end) = (start.trim(), end.trim());

            let pair = match (start.is_empty(), end.is_empty()) {
                (true, true) => return Err(RangeError::Malformed(item.to_string())),
                (false, true) => (parse_position(start, item)?, last),
                (true, false) => (total - parse_position(end, item)?, last),
                (false, false) => (parse_position(start, item)?, parse_position(end, item)?),
            };
            raw.push(pair);
        }

        if raw.is_empty() {
            return Err(RangeError::Malformed(header.to_string()));
        }

        let ranges = raw
            .into_iter()
            .map(|(offset, end)| {
                let satisfiable = offset >= 0 && end >= offset && offset <= last && end <= last;
                if !satisfiable {
                    return None;
                }
                let offset = u64::try_from(offset).ok()?;
                let end = u64::try_from(end).ok()?;
                ByteRange::new(offset, end)
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(RangeError::Unsatisfiable { total: u64::try_from(total).unwrap_or(0) })?;

        Ok(RangeSet { ranges })
    }

    /// Number of ranges. A parsed set is never empty.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The single range of a one-range set.
    pub fn single(&self) -> Option<ByteRange> {
        match self.ranges[..] {
            [range] => Some(range),
            _ => None,
        }
    }

    pub fn iter(&self) -> slice::Iter<'_, ByteRange> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[ByteRange] {
        &self.ranges
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = &'a ByteRange;
    type IntoIter = slice::Iter<'a, ByteRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Whether a `Range` header uses the bytes unit, compared case-insensitively.
pub(crate) fn is_bytes_range(header: &str) -> bool {
    strip_unit(header).is_some()
}

fn strip_unit(header: &str) -> Option<&str> {
    let header = header.trim_start();
    let prefix = header.get(..BYTES_UNIT.len())?;
    prefix
        .eq_ignore_ascii_case(BYTES_UNIT)
        .then(|| &header[BYTES_UNIT.len()..])
}

fn parse_position(s: &str, item: &str) -> Result<i128, RangeError> {
    s.parse::<u64>()
        .map(i128::from)
        .map_err(|_| RangeError::Malformed(item.to_string()))
}
