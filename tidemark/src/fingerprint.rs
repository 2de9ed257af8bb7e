//! 128-bit structural fingerprints.
//!
//! A fingerprint identifies the static shape of a [`Rendered`] or
//! [`Comprehension`]: the byte-exact static list plus the structural kind of
//! each dynamic position. Two values with equal fingerprints may be diffed
//! against one another; a mismatch forces the differ to resend everything.
//! Source positions must never feed the hash: the same template source has
//! to fingerprint identically across processes.
//!
//! [`Rendered`]: crate::rendered::Rendered
//! [`Comprehension`]: crate::rendered::Comprehension

/// Incremental hasher producing a 128-bit digest.
///
/// Length-prefixes every chunk so that `["ab", "c"]` and `["a", "bc"]`
/// hash differently.
#[derive(Debug)]
pub struct FingerprintHasher {
    inner: blake3::Hasher,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update_str(&mut self, s: &str) {
        self.inner.update(&(s.len() as u64).to_le_bytes());
        self.inner.update(s.as_bytes());
    }

    pub fn update_u8(&mut self, byte: u8) {
        self.inner.update(&[byte]);
    }

    pub fn update_u128(&mut self, value: u128) {
        self.inner.update(&value.to_le_bytes());
    }

    /// Finish, truncating the digest to its first 16 bytes.
    pub fn finish(&self) -> u128 {
        let hash = self.inner.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..16]);
        u128::from_le_bytes(bytes)
    }
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let mut a = FingerprintHasher::new();
        a.update_str("Hello ");
        a.update_u8(0);
        a.update_str("!");
        let mut b = FingerprintHasher::new();
        b.update_str("Hello ");
        b.update_u8(0);
        b.update_str("!");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn chunk_boundaries_matter() {
        let mut a = FingerprintHasher::new();
        a.update_str("ab");
        a.update_str("c");
        let mut b = FingerprintHasher::new();
        b.update_str("a");
        b.update_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn shape_tag_matters() {
        let mut a = FingerprintHasher::new();
        a.update_str("x");
        a.update_u8(1);
        let mut b = FingerprintHasher::new();
        b.update_str("x");
        b.update_u8(2);
        assert_ne!(a.finish(), b.finish());
    }
}
