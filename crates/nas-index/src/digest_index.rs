//! On-disk deduplication index: content digest to origin of the first
//! capture.
//!
//! An index directory holds a `manifest.json` plus segment files. Each
//! segment is a sorted vector of [`IndexDocument`]s framed as:
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized Vec<IndexDocument>)]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use nas_types::JobId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IndexError, IndexResult};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;
const HEADER_SIZE: usize = 8;
const COMPRESSED_EXT: &str = "zst";
const ZSTD_LEVEL: i32 = 3;

/// One indexed capture.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexDocument {
    pub digest: String,
    pub url: String,
    pub timestamp: String,
    /// `filename,offset` of the stored record.
    pub origin: String,
    pub mime: String,
    pub job: JobId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: String,
    pub docs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub next_segment: u64,
    pub segments: Vec<SegmentMeta>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            next_segment: 0,
            segments: Vec::new(),
        }
    }
}

/// A segment-based digest index rooted at a directory.
///
/// Changes become visible to [`DigestIndex::open`] only after
/// [`DigestIndex::commit`]. Segments replaced by a merge are deleted at the
/// following commit.
#[derive(Debug)]
pub struct DigestIndex {
    dir: PathBuf,
    manifest: Manifest,
    obsolete: Vec<String>,
}

impl DigestIndex {
    /// Create an empty, committed index at `dir`.
    pub fn create(dir: &Path) -> IndexResult<Self> {
        fs::create_dir_all(dir)?;
        let mut index = Self {
            dir: dir.to_path_buf(),
            manifest: Manifest::default(),
            obsolete: Vec::new(),
        };
        index.commit()?;
        Ok(index)
    }

    pub fn open(dir: &Path) -> IndexResult<Self> {
        let text = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| IndexError::Corrupt(format!("manifest in {}: {e}", dir.display())))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            obsolete: Vec::new(),
        })
    }

    /// Decompress an index written by [`DigestIndex::compress_into`] into
    /// `work_dir` and open it there.
    pub fn open_compressed(compressed: &Path, work_dir: &Path) -> IndexResult<Self> {
        fs::create_dir_all(work_dir)?;
        for entry in fs::read_dir(compressed)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(COMPRESSED_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };
            let data = zstd::decode_all(fs::read(&path)?.as_slice())?;
            fs::write(work_dir.join(stem), data)?;
        }
        Self::open(work_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn num_docs(&self) -> u64 {
        self.manifest.segments.iter().map(|s| s.docs).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.manifest.segments.len()
    }

    fn next_segment_name(&mut self) -> String {
        let name = format!("segment-{:06}.seg", self.manifest.next_segment);
        self.manifest.next_segment += 1;
        name
    }

    /// Add documents as one new segment.
    pub fn add_documents(&mut self, mut docs: Vec<IndexDocument>) -> IndexResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        docs.sort();
        docs.dedup();
        let name = self.next_segment_name();
        write_segment(&self.dir.join(&name), &docs)?;
        self.manifest.segments.push(SegmentMeta {
            name,
            docs: docs.len() as u64,
        });
        Ok(())
    }

    /// Copy every committed segment of the indexes at `dirs` into this one.
    pub fn add_indexes(&mut self, dirs: &[PathBuf]) -> IndexResult<()> {
        for dir in dirs {
            let other = Self::open(dir)?;
            for segment in &other.manifest.segments {
                let name = self.next_segment_name();
                fs::copy(other.dir.join(&segment.name), self.dir.join(&name))?;
                self.manifest.segments.push(SegmentMeta {
                    name,
                    docs: segment.docs,
                });
            }
        }
        Ok(())
    }

    /// Merge the smallest segments until at most `max_segments` remain.
    pub fn force_merge(&mut self, max_segments: usize) -> IndexResult<()> {
        let max_segments = max_segments.max(1);
        let count = self.manifest.segments.len();
        if count <= max_segments {
            return Ok(());
        }

        let mut by_size: Vec<usize> = (0..count).collect();
        by_size.sort_by_key(|&i| self.manifest.segments[i].docs);
        let mut victims: Vec<usize> = by_size[..count - max_segments + 1].to_vec();
        victims.sort_unstable();

        let mut docs = Vec::new();
        for &i in &victims {
            docs.extend(read_segment(&self.dir.join(&self.manifest.segments[i].name))?);
        }
        for &i in victims.iter().rev() {
            let old = self.manifest.segments.remove(i);
            self.obsolete.push(old.name);
        }
        debug!(merged = victims.len(), docs = docs.len(), "merging segments");
        self.add_documents(docs)
    }

    /// Persist the manifest and delete segments it no longer references.
    pub fn commit(&mut self) -> IndexResult<()> {
        let json = serde_json::to_vec_pretty(&self.manifest)?;
        let tmp = self.dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.dir.join(MANIFEST_FILE))?;
        for name in self.obsolete.drain(..) {
            if let Err(e) = fs::remove_file(self.dir.join(&name)) {
                warn!(segment = %name, error = %e, "could not remove merged segment");
            }
        }
        Ok(())
    }

    /// Every document, in digest order.
    pub fn documents(&self) -> IndexResult<Vec<IndexDocument>> {
        let mut all = Vec::new();
        for segment in &self.manifest.segments {
            all.extend(read_segment(&self.dir.join(&segment.name))?);
        }
        all.sort();
        Ok(all)
    }

    pub fn lookup_digest(&self, digest: &str) -> IndexResult<Vec<IndexDocument>> {
        let mut hits = Vec::new();
        for segment in &self.manifest.segments {
            let docs = read_segment(&self.dir.join(&segment.name))?;
            let start = docs.partition_point(|d| d.digest.as_str() < digest);
            hits.extend(docs[start..].iter().take_while(|d| d.digest == digest).cloned());
        }
        hits.sort();
        Ok(hits)
    }

    pub fn lookup_url(&self, url: &str) -> IndexResult<Vec<IndexDocument>> {
        Ok(self
            .documents()?
            .into_iter()
            .filter(|d| d.url == url)
            .collect())
    }

    /// Write every committed file of the index, zstd-compressed, into `dest`.
    pub fn compress_into(&self, dest: &Path) -> IndexResult<()> {
        fs::create_dir_all(dest)?;
        let names = std::iter::once(MANIFEST_FILE.to_string())
            .chain(self.manifest.segments.iter().map(|s| s.name.clone()));
        let mut bytes = 0u64;
        for name in names {
            let raw = fs::read(self.dir.join(&name))?;
            let compressed = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?;
            bytes += compressed.len() as u64;
            fs::write(dest.join(format!("{name}.{COMPRESSED_EXT}")), compressed)?;
        }
        info!(dest = %dest.display(), docs = self.num_docs(), bytes, "index compressed");
        Ok(())
    }
}

fn write_segment(path: &Path, docs: &[IndexDocument]) -> IndexResult<()> {
    let payload = bincode::serialize(docs)?;
    let length = u32::try_from(payload.len())
        .map_err(|_| IndexError::Serialization(format!("segment too large: {} bytes", payload.len())))?;
    let crc = crc32fast::hash(&payload);

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
    data.extend_from_slice(&length.to_le_bytes());
    data.extend_from_slice(&crc.to_le_bytes());
    data.extend_from_slice(&payload);

    let tmp = path.with_extension("seg.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_segment(path: &Path) -> IndexResult<Vec<IndexDocument>> {
    let data = fs::read(path)?;
    let corrupt = |what: &str| IndexError::Corrupt(format!("{}: {what}", path.display()));
    if data.len() < HEADER_SIZE {
        return Err(corrupt("truncated header"));
    }
    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let expected_crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let payload = &data[HEADER_SIZE..];
    if payload.len() != length {
        return Err(corrupt("length mismatch"));
    }
    if crc32fast::hash(payload) != expected_crc {
        return Err(corrupt("CRC mismatch"));
    }
    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(digest: &str, url: &str, job: u64) -> IndexDocument {
        IndexDocument {
            digest: digest.into(),
            url: url.into(),
            timestamp: "20240101000000".into(),
            origin: format!("{job}-1.arc,0"),
            mime: "image/png".into(),
            job: JobId::new(job),
        }
    }

    #[test]
    fn add_commit_reopen_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = DigestIndex::create(dir.path()).unwrap();
        index
            .add_documents(vec![doc("B", "http://b", 1), doc("A", "http://a", 1)])
            .unwrap();
        index.add_documents(vec![doc("B", "http://b2", 2)]).unwrap();
        index.commit().unwrap();

        let reopened = DigestIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.num_docs(), 3);
        let hits = reopened.lookup_digest("B").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(reopened.lookup_digest("C").unwrap().is_empty());
        assert_eq!(reopened.lookup_url("http://a").unwrap()[0].digest, "A");
    }

    #[test]
    fn force_merge_limits_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = DigestIndex::create(dir.path()).unwrap();
        for i in 0..6 {
            index.add_documents(vec![doc(&format!("D{i}"), "http://x", i)]).unwrap();
        }
        index.force_merge(2).unwrap();
        index.commit().unwrap();

        assert_eq!(index.segment_count(), 2);
        assert_eq!(index.num_docs(), 6);
        assert_eq!(index.documents().unwrap().len(), 6);
        let seg_files = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().unwrap() == "seg")
            .count();
        assert_eq!(seg_files, 2);
    }

    #[test]
    fn corrupt_segment_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = DigestIndex::create(dir.path()).unwrap();
        index.add_documents(vec![doc("A", "http://a", 1)]).unwrap();
        index.commit().unwrap();

        let seg = dir.path().join(&index.manifest.segments[0].name);
        let mut data = fs::read(&seg).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&seg, data).unwrap();
        assert!(matches!(index.documents(), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = DigestIndex::create(&dir.path().join("live")).unwrap();
        index.add_documents(vec![doc("A", "http://a", 1)]).unwrap();
        index.commit().unwrap();

        index.compress_into(&dir.path().join("packed")).unwrap();
        let restored =
            DigestIndex::open_compressed(&dir.path().join("packed"), &dir.path().join("restored")).unwrap();
        assert_eq!(restored.lookup_digest("A").unwrap(), vec![doc("A", "http://a", 1)]);
    }

    #[test]
    fn add_indexes_copies_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut sub = DigestIndex::create(&dir.path().join("sub")).unwrap();
        sub.add_documents(vec![doc("A", "http://a", 1), doc("B", "http://b", 1)]).unwrap();
        sub.commit().unwrap();

        let mut total = DigestIndex::create(&dir.path().join("total")).unwrap();
        total.add_indexes(&[dir.path().join("sub")]).unwrap();
        total.commit().unwrap();
        assert_eq!(DigestIndex::open(&dir.path().join("total")).unwrap().num_docs(), 2);
    }
}
