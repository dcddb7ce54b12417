//! Accept-style header parsing
//!
//! Parses `Accept`, `Accept-Encoding`, `Accept-Language` and similar
//! headers into a list of tokens ordered by descending quality.

/// One entry of an Accept-style header
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEntry {
    pub token: String,
    pub qual: f32,
}

/// Parse every value of an Accept-style header
///
/// Each comma-separated element is a token optionally followed by
/// `;`-separated parameters. The `q` parameter sets the quality (default
/// 1.0, clamped to [0, 1], unparseable values count as 0); other parameters
/// are ignored. The result is stable-sorted by descending quality so that
/// equally preferred tokens keep the order in which they were listed.
pub fn parse_accept(values: &[&str]) -> Vec<AcceptEntry> {
    let mut entries = Vec::new();

    for element in values.iter().flat_map(|v| v.split(',')) {
        let mut parts = element.split(';');
        let token = parts.next().unwrap_or("").trim();
        if token.is_empty() {
            continue;
        }

        let mut qual = 1.0f32;
        for param in parts {
            let param = param.trim();
            if let Some(q) = param
                .strip_prefix("q=")
                .or_else(|| param.strip_prefix("Q="))
            {
                qual = q.trim().parse::<f32>().unwrap_or(0.0).clamp(0.0, 1.0);
            }
        }

        entries.push(AcceptEntry {
            token: token.to_string(),
            qual,
        });
    }

    entries.sort_by(|a, b| b.qual.total_cmp(&a.qual));
    entries
}

/// Whether a token is acceptable (listed with a non-zero quality)
pub fn accepts(entries: &[AcceptEntry], token: &str) -> bool {
    entries
        .iter()
        .any(|e| e.qual > 0.0 && e.token.eq_ignore_ascii_case(token))
}
