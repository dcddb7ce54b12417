//! Byte range parsing
//!
//! Parses `Range: bytes=...` request headers against a representation of
//! known length.

/// Ranges separated by fewer than this many bytes are merged
pub const RANGE_COALESCE_GAP: u64 = 80;

/// An inclusive byte range of a representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
    /// Total length of the representation
    pub len: u64,
}

impl ByteRange {
    /// Number of bytes covered
    pub fn size(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Value for a `Content-Range` header
    ///
    /// The zero span used for 416 renders as `bytes */len`.
    pub fn content_range(&self, unsatisfiable: bool) -> String {
        if unsatisfiable {
            format!("bytes */{}", self.len)
        } else {
            format!("bytes {}-{}/{}", self.first, self.last, self.len)
        }
    }
}

/// Result of evaluating a `Range` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve the full representation
    Full,
    /// Serve these ranges, sorted and coalesced
    Partial(Vec<ByteRange>),
    /// Nothing requested is satisfiable; carries the zero span with the length
    Unsatisfiable(ByteRange),
}

/// Parse a `Range` header value for a representation of `len` bytes
///
/// Headers that are not `bytes=` ranges, and any header when the length is
/// unknown (0), are ignored. Syntactically invalid sub-ranges and sub-ranges
/// starting past the end are dropped. If no sub-range parses at all the
/// header is ignored; if some parse but none is satisfiable the outcome is
/// `Unsatisfiable`.
pub fn parse_ranges(hdr: &str, len: u64) -> RangeOutcome {
    if len == 0 {
        return RangeOutcome::Full;
    }
    let specs = match hdr.trim().strip_prefix("bytes=") {
        Some(specs) => specs,
        None => return RangeOutcome::Full,
    };

    let mut well_formed = false;
    let mut ranges: Vec<ByteRange> = Vec::new();

    for spec in specs.split(',') {
        let spec = spec.trim();
        let (start, end) = match spec.split_once('-') {
            Some(parts) => parts,
            None => continue,
        };
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix range: the last N bytes
            let suffix = match parse_digits(end) {
                Some(n) => n,
                None => continue,
            };
            well_formed = true;
            if suffix == 0 {
                continue;
            }
            ranges.push(ByteRange {
                first: len.saturating_sub(suffix),
                last: len - 1,
                len,
            });
            continue;
        }

        let first = match parse_digits(start) {
            Some(n) => n,
            None => continue,
        };
        let last = if end.is_empty() {
            len - 1
        } else {
            match parse_digits(end) {
                Some(n) if n >= first => n.min(len - 1),
                _ => continue,
            }
        };
        well_formed = true;
        if first >= len {
            continue;
        }
        ranges.push(ByteRange { first, last, len });
    }

    if ranges.is_empty() {
        if well_formed {
            return RangeOutcome::Unsatisfiable(ByteRange {
                first: 0,
                last: 0,
                len,
            });
        }
        return RangeOutcome::Full;
    }

    RangeOutcome::Partial(coalesce(ranges))
}

/// Sort ranges and merge those that overlap or are closer than the gap limit
fn coalesce(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    ranges.sort_by_key(|r| r.first);

    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(tail) if range.first <= tail.last.saturating_add(RANGE_COALESCE_GAP) => {
                tail.last = tail.last.max(range.last);
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(hdr: &str, len: u64) -> Vec<(u64, u64)> {
        match parse_ranges(hdr, len) {
            RangeOutcome::Partial(ranges) => ranges.iter().map(|r| (r.first, r.last)).collect(),
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[test]
    fn test_single_range() {
        assert_eq!(partial("bytes=0-99", 1000), vec![(0, 99)]);
        assert_eq!(partial("bytes=900-", 1000), vec![(900, 999)]);
        assert_eq!(partial("bytes=990-2000", 1000), vec![(990, 999)]);
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(partial("bytes=-100", 1000), vec![(900, 999)]);
        assert_eq!(partial("bytes=-5000", 1000), vec![(0, 999)]);
    }

    #[test]
    fn test_coalesce_small_gap() {
        assert_eq!(partial("bytes=0-9,15-19", 100), vec![(0, 19)]);
        assert_eq!(partial("bytes=15-19,0-9", 100), vec![(0, 19)]);
        assert_eq!(partial("bytes=0-50,10-20", 100), vec![(0, 50)]);
    }

    #[test]
    fn test_large_gap_stays_separate() {
        assert_eq!(partial("bytes=500-599,0-9", 1000), vec![(0, 9), (500, 599)]);
        // gap of exactly 80 bytes (10..=89)
        assert_eq!(partial("bytes=0-9,90-99", 1000), vec![(0, 9), (90, 99)]);
        // gap of 79 bytes (10..=88)
        assert_eq!(partial("bytes=0-9,89-99", 1000), vec![(0, 99)]);
    }

    #[test]
    fn test_unsatisfiable() {
        let outcome = parse_ranges("bytes=2000-3000", 1000);
        assert_eq!(
            outcome,
            RangeOutcome::Unsatisfiable(ByteRange {
                first: 0,
                last: 0,
                len: 1000
            })
        );
        assert!(matches!(parse_ranges("bytes=-0", 10), RangeOutcome::Unsatisfiable(_)));
    }

    #[test]
    fn test_invalid_subranges_dropped() {
        assert_eq!(partial("bytes=abc,5-3,0-4", 10), vec![(0, 4)]);
    }

    #[test]
    fn test_ignored_headers() {
        assert_eq!(parse_ranges("bytes=0-99", 0), RangeOutcome::Full);
        assert_eq!(parse_ranges("items=0-9", 100), RangeOutcome::Full);
        assert_eq!(parse_ranges("bytes=garbage", 100), RangeOutcome::Full);
    }

    #[test]
    fn test_content_range() {
        let range = ByteRange {
            first: 0,
            last: 99,
            len: 1000,
        };
        assert_eq!(range.size(), 100);
        assert_eq!(range.content_range(false), "bytes 0-99/1000");
        assert_eq!(range.content_range(true), "bytes */1000");
    }
}
