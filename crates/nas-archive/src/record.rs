use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};

const RECORD_MARKER: &str = "@record ";

/// One record of an archive file: a URL, its mime type and the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub url: String,
    pub mime: String,
    /// Byte offset of the record header within its file.
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Reads and writes the records stored in archive files.
///
/// The record container format is opaque to the rest of the system; batch
/// jobs and lookups go through this trait.
pub trait RecordCodec: Send + Sync {
    /// Decode every record of the file, in file order.
    fn read_all(&self, path: &Path) -> ArchiveResult<Vec<ArchiveRecord>>;

    /// Decode the record whose header starts at `offset`.
    fn read_at(&self, path: &Path, offset: u64) -> ArchiveResult<ArchiveRecord> {
        self.read_all(path)?
            .into_iter()
            .find(|r| r.offset == offset)
            .ok_or_else(|| {
                ArchiveError::NotFound(format!("no record at offset {offset} in {}", path.display()))
            })
    }

    /// Append one record to `out`, returning the number of bytes written.
    fn write_record(
        &self,
        out: &mut dyn Write,
        url: &str,
        mime: &str,
        payload: &[u8],
    ) -> ArchiveResult<u64>;
}

/// Plain-text record container.
///
/// Each record is a header line `@record <url> <mime> <length>`, followed by
/// `length` payload bytes and a single newline.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleRecordCodec;

impl SimpleRecordCodec {
    fn malformed(path: &Path, offset: usize, what: &str) -> ArchiveError {
        ArchiveError::Serialization(format!(
            "malformed record at offset {offset} in {}: {what}",
            path.display()
        ))
    }
}

impl RecordCodec for SimpleRecordCodec {
    fn read_all(&self, path: &Path) -> ArchiveResult<Vec<ArchiveRecord>> {
        let bytes = fs::read(path)?;
        let mut records = Vec::new();
        let mut pos = 0usize;

        while pos < bytes.len() {
            let header_end = bytes[pos..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| pos + i)
                .ok_or_else(|| Self::malformed(path, pos, "unterminated header"))?;
            let header = std::str::from_utf8(&bytes[pos..header_end])
                .map_err(|_| Self::malformed(path, pos, "header is not UTF-8"))?;
            let fields = header
                .strip_prefix(RECORD_MARKER)
                .ok_or_else(|| Self::malformed(path, pos, "missing record marker"))?;

            let mut parts = fields.split(' ');
            let (url, mime, length) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(u), Some(m), Some(l), None) => (u, m, l),
                _ => return Err(Self::malformed(path, pos, "expected url, mime and length")),
            };
            let length: usize = length
                .parse()
                .map_err(|_| Self::malformed(path, pos, "bad length"))?;

            let start = header_end + 1;
            let end = start + length;
            if bytes.get(end) != Some(&b'\n') {
                return Err(Self::malformed(path, pos, "truncated payload"));
            }

            records.push(ArchiveRecord {
                url: url.to_string(),
                mime: mime.to_string(),
                offset: pos as u64,
                payload: bytes[start..end].to_vec(),
            });
            pos = end + 1;
        }

        Ok(records)
    }

    fn write_record(
        &self,
        out: &mut dyn Write,
        url: &str,
        mime: &str,
        payload: &[u8],
    ) -> ArchiveResult<u64> {
        if url.is_empty() || url.contains(char::is_whitespace) {
            return Err(ArchiveError::InvalidArgument(format!("bad record url '{url}'")));
        }
        if mime.is_empty() || mime.contains(char::is_whitespace) {
            return Err(ArchiveError::InvalidArgument(format!("bad record mime '{mime}'")));
        }
        let header = format!("{RECORD_MARKER}{url} {mime} {}\n", payload.len());
        out.write_all(header.as_bytes())?;
        out.write_all(payload)?;
        out.write_all(b"\n")?;
        Ok((header.len() + payload.len() + 1) as u64)
    }
}
