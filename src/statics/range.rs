//! `Range: bytes=…` parsing.

/// A satisfiable byte window, `start..end` (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// `content-range` value for a 206 response.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, size)
    }
}

/// `content-range` value for a 416 response.
pub fn unsatisfiable(size: u64) -> String {
    format!("bytes */{size}")
}

/// Parses a single-range `Range` header against a representation of `size`
/// bytes.
///
/// Accepted forms are `bytes=<first>-<last>`, `bytes=<first>-` and
/// `bytes=-<suffix>`. Returns `None` for anything malformed, multi-range, or
/// not satisfiable: an empty window, a window reaching past the end, or a
/// suffix longer than the file.
///
/// # Examples
///
/// ```
/// use procweb::statics::range::{parse, ByteRange};
///
/// assert_eq!(parse("bytes=0-4", 10), Some(ByteRange { start: 0, end: 5 }));
/// assert_eq!(parse("bytes=-3", 10), Some(ByteRange { start: 7, end: 10 }));
/// assert_eq!(parse("bytes=20-30", 10), None);
/// ```
pub fn parse(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        let suffix: u64 = last.parse().ok()?;
        (size.checked_sub(suffix)?, size)
    } else {
        let start: u64 = first.parse().ok()?;
        let end = if last.is_empty() {
            size
        } else {
            last.parse::<u64>().ok()?.checked_add(1)?
        };
        (start, end)
    };

    if end <= start || end > size {
        return None;
    }
    Some(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_range() {
        let r = parse("bytes=0-4", 10).unwrap();
        assert_eq!(r.len(), 5);
        assert_eq!(r.content_range(10), "bytes 0-4/10");
    }

    #[test]
    fn whole_file_as_closed_range() {
        assert_eq!(parse("bytes=0-9", 10), Some(ByteRange { start: 0, end: 10 }));
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        let r = parse("bytes=6-", 10).unwrap();
        assert_eq!(r.content_range(10), "bytes 6-9/10");
    }

    #[test]
    fn suffix_range() {
        let r = parse("bytes=-3", 10).unwrap();
        assert_eq!(r.content_range(10), "bytes 7-9/10");
        assert_eq!(parse("bytes=-10", 10), Some(ByteRange { start: 0, end: 10 }));
    }

    #[test]
    fn unsatisfiable_ranges() {
        // past the end
        assert_eq!(parse("bytes=20-30", 10), None);
        assert_eq!(parse("bytes=5-10", 10), None);
        assert_eq!(parse("bytes=10-", 10), None);
        // suffix longer than the file: the start would be negative
        assert_eq!(parse("bytes=-11", 10), None);
        // empty windows
        assert_eq!(parse("bytes=-0", 10), None);
        assert_eq!(parse("bytes=5-3", 10), None);
        assert_eq!(parse("bytes=0-", 0), None);
    }

    #[test]
    fn malformed_ranges() {
        assert_eq!(parse("bytes=-", 10), None);
        assert_eq!(parse("bytes=a-b", 10), None);
        assert_eq!(parse("items=0-4", 10), None);
        assert_eq!(parse("bytes=0-1,3-4", 10), None);
        assert_eq!(parse("bytes=0-18446744073709551615", 10), None);
    }

    #[test]
    fn unsatisfiable_header_value() {
        assert_eq!(unsatisfiable(10), "bytes */10");
    }
}
