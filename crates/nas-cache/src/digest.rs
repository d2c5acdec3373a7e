/// Domain-separated BLAKE3 digest for cache keys.
///
/// The domain tag is hashed ahead of the data, so keys from different
/// caches never share a digest by accident.
#[derive(Clone, Copy, Debug)]
pub struct KeyHasher {
    domain: &'static str,
}

impl KeyHasher {
    /// Digest of a canonical, comma-joined id list.
    pub const ID_SET: Self = Self {
        domain: "nas-id-set-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Lowercase hex digest of `data`.
    pub fn hex(&self, data: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        hex::encode(hasher.finalize().as_bytes())
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_domain_separated() {
        let a = KeyHasher::ID_SET.hex(b"1,2,3");
        assert_eq!(a, KeyHasher::ID_SET.hex(b"1,2,3"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, KeyHasher::new("other").hex(b"1,2,3"));
        assert_ne!(a, KeyHasher::ID_SET.hex(b"1,2,4"));
    }
}
