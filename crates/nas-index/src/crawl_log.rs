//! Crawl log lines.
//!
//! Fields are whitespace separated: timestamp, status, size, URL, discovery
//! path, via, mime, thread, fetch time, digest, source tag and annotations.

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::sort;

const DUPLICATE_TAG: &str = "duplicate:";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlLogLine {
    pub timestamp: String,
    pub status: i32,
    pub url: String,
    pub mime: String,
    /// Content digest without any `sha1:` style prefix.
    pub digest: String,
    pub annotations: String,
}

impl CrawlLogLine {
    pub fn parse(line: &str) -> Result<Self, IndexError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return Err(IndexError::InvalidCrawlLogLine(line.to_string()));
        }
        let status = fields[1]
            .parse()
            .map_err(|_| IndexError::InvalidCrawlLogLine(line.to_string()))?;
        Ok(Self {
            timestamp: fields[0].to_string(),
            status,
            url: fields[3].to_string(),
            mime: fields[6].to_string(),
            digest: strip_digest_prefix(fields[9]).to_string(),
            annotations: fields.get(11).copied().unwrap_or("").to_string(),
        })
    }

    /// The `(file, offset)` of an earlier identical capture, if annotated.
    pub fn duplicate_origin(&self) -> Option<(String, u64)> {
        parse_duplicate(&self.annotations).map(|d| (d.file.to_string(), d.offset))
    }
}

/// Drop an algorithm prefix such as `sha1:` from a digest.
pub fn strip_digest_prefix(digest: &str) -> &str {
    digest.split_once(':').map_or(digest, |(_, d)| d)
}

/// Sort key for crawl log lines ordered by URL.
pub fn url_key(line: &[u8]) -> &[u8] {
    sort::field(line, 3)
}

/// A `duplicate:` annotation located within a line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DuplicateAnnotation<'a> {
    pub file: &'a str,
    pub offset: u64,
    /// Byte range of the `file,offset` text, quotes excluded.
    pub span: std::ops::Range<usize>,
}

/// Find `duplicate:"file,offset"` (or the unquoted form) in `text`.
pub(crate) fn parse_duplicate(text: &str) -> Option<DuplicateAnnotation<'_>> {
    let tag = text.find(DUPLICATE_TAG)?;
    let start = tag + DUPLICATE_TAG.len();
    let rest = &text[start..];

    let (value_start, value) = if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        (start + 1, &quoted[..end])
    } else {
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        // Unquoted values run until the comma after the offset.
        let candidate = &rest[..end];
        let first_comma = candidate.find(',')?;
        let after = &candidate[first_comma + 1..];
        let offset_len = after.find(',').unwrap_or(after.len());
        (start, &candidate[..first_comma + 1 + offset_len])
    };

    let mut parts = value.split(',');
    let file = parts.next().filter(|f| !f.is_empty())?;
    let offset = parts.next()?.parse().ok()?;
    let used = file.len() + 1 + value[file.len() + 1..].split(',').next()?.len();
    Some(DuplicateAnnotation {
        file,
        offset,
        span: value_start..value_start + used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "2024-01-01T12:00:00.000Z 200 1234 http://example.org/a.png LE http://example.org/ image/png #001 20240101120000000+10 sha1:ABCDEF - duplicate:\"old.arc,512\",content-size:1300";

    #[test]
    fn parses_fields() {
        let line = CrawlLogLine::parse(LINE).unwrap();
        assert_eq!(line.status, 200);
        assert_eq!(line.url, "http://example.org/a.png");
        assert_eq!(line.mime, "image/png");
        assert_eq!(line.digest, "ABCDEF");
        assert_eq!(line.duplicate_origin(), Some(("old.arc".into(), 512)));
    }

    #[test]
    fn short_line_rejected() {
        assert!(CrawlLogLine::parse("a b c").is_err());
    }

    #[test]
    fn duplicate_span_covers_value() {
        let text = "x duplicate:\"f.arc,77\",y";
        let dup = parse_duplicate(text).unwrap();
        assert_eq!(&text[dup.span.clone()], "f.arc,77");

        let text = "duplicate:f.arc,77,content-size:5";
        let dup = parse_duplicate(text).unwrap();
        assert_eq!(dup.offset, 77);
        assert_eq!(&text[dup.span], "f.arc,77");
    }

    #[test]
    fn no_duplicate_annotation() {
        assert!(parse_duplicate("content-size:5").is_none());
        assert!(parse_duplicate("duplicate:\"broken").is_none());
    }
}
