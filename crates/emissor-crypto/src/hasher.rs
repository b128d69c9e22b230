/// Domain-separated BLAKE3 hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a document digest and a certificate digest over identical
/// bytes never collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Digest of canonical document bytes.
    pub const DOCUMENT: Self = Self {
        domain: "emissor-dps-v1",
    };
    /// Digest of a certificate's to-be-signed fields.
    pub const CERTIFICATE: Self = Self {
        domain: "emissor-cert-v1",
    };
    /// Digest of the signed-info block (document digest plus signing time).
    pub const SIGNED_INFO: Self = Self {
        domain: "emissor-signed-info-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        self.hash_parts(&[data])
    }

    /// Hash several byte slices as one message, each followed by a separator.
    pub fn hash_parts(&self, parts: &[&[u8]]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        *hasher.finalize().as_bytes()
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(
            ContentHasher::DOCUMENT.hash(b"<DPS/>"),
            ContentHasher::DOCUMENT.hash(b"<DPS/>")
        );
    }

    #[test]
    fn domains_separate() {
        let data = b"same bytes";
        assert_ne!(
            ContentHasher::DOCUMENT.hash(data),
            ContentHasher::CERTIFICATE.hash(data)
        );
    }

    #[test]
    fn part_boundaries_matter() {
        let h = ContentHasher::SIGNED_INFO;
        assert_ne!(h.hash_parts(&[b"ab", b"c"]), h.hash_parts(&[b"a", b"bc"]));
    }
}
