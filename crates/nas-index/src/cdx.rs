//! CDX lines: `<url-key> <timestamp> <original-url> <mime> <status> <digest> ... <offset> <filename>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::sort;

/// One parsed CDX line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdxRecord {
    pub url_key: String,
    pub timestamp: String,
    pub original_url: String,
    pub mime: String,
    pub status: String,
    pub digest: String,
    pub offset: u64,
    pub filename: String,
}

impl CdxRecord {
    /// `filename,offset`, the origin reference used by the dedup index.
    pub fn origin(&self) -> String {
        format!("{},{}", self.filename, self.offset)
    }
}

impl FromStr for CdxRecord {
    type Err = IndexError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(IndexError::InvalidCdxLine(line.to_string()));
        }
        let n = fields.len();
        let offset = fields[n - 2]
            .parse()
            .map_err(|_| IndexError::InvalidCdxLine(line.to_string()))?;
        Ok(Self {
            url_key: fields[0].to_string(),
            timestamp: fields[1].to_string(),
            original_url: fields[2].to_string(),
            mime: fields[3].to_string(),
            status: fields[4].to_string(),
            digest: fields[5].to_string(),
            offset,
            filename: fields[n - 1].to_string(),
        })
    }
}

impl fmt::Display for CdxRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} - {} {}",
            self.url_key,
            self.timestamp,
            self.original_url,
            self.mime,
            self.status,
            self.digest,
            self.offset,
            self.filename
        )
    }
}

/// Sort key for CDX lines ordered by original URL.
pub fn original_url_key(line: &[u8]) -> &[u8] {
    sort::field(line, 2)
}
