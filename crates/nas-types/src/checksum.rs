//! The `filename##checksum` line format used by checksum batch jobs and
//! work files, plus the file checksum function itself.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::TypeError;

/// Separator between filename and checksum in a checksum line.
pub const CHECKSUM_SEPARATOR: &str = "##";

/// Format a checksum line.
pub fn make_line(filename: &str, checksum: &str) -> String {
    format!("{filename}{CHECKSUM_SEPARATOR}{checksum}")
}

/// Split a checksum line into `(filename, checksum)`.
///
/// The line must contain exactly one separator and a non-empty filename.
pub fn parse_line(line: &str) -> Result<(String, String), TypeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.split(CHECKSUM_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(sum), None) if !name.is_empty() => {
            Ok((name.to_string(), sum.to_string()))
        }
        _ => Err(TypeError::InvalidChecksumLine(line.to_string())),
    }
}

/// BLAKE3 hex checksum of a file's contents.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// BLAKE3 hex checksum of an in-memory buffer.
pub fn bytes_checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
