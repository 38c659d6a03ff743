//! Chunk digest parsing and verification.
//!
//! During warming, background span fetches attest each cached chunk against
//! the digest recorded in the ZTOC. The [`VerifierFactory`] turns a chunk id
//! and an expected digest string into a [`ChunkVerifier`]; digest strings
//! use the OCI `sha256:<64 lowercase hex>` form.

use sha2::{Digest, Sha256};

use crate::error::{LayerError, Result};

/// Incremental verifier for one chunk's bytes.
pub trait ChunkVerifier: Send + std::fmt::Debug {
    /// Feed the next chunk bytes into the verifier.
    fn update(&mut self, data: &[u8]);

    /// Returns true if the bytes fed so far hash to the expected digest.
    fn verified(&self) -> bool;
}

/// Factory producing a verifier for a chunk id and expected digest string.
pub type VerifierFactory = fn(u32, &str) -> Result<Box<dyn ChunkVerifier>>;

/// SHA-256 implementation of [`ChunkVerifier`].
pub struct Sha256Verifier {
    hasher: Sha256,
    expected_hex: String,
}

impl std::fmt::Debug for Sha256Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sha256Verifier")
            .field("expected_hex", &self.expected_hex)
            .finish_non_exhaustive()
    }
}

impl ChunkVerifier for Sha256Verifier {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn verified(&self) -> bool {
        let actual = format!("{:x}", self.hasher.clone().finalize());
        actual == self.expected_hex
    }
}

/// Render the `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Split a digest string into its hex payload, validating the form.
fn parse_sha256(digest: &str) -> Option<&str> {
    let hex = digest.strip_prefix("sha256:")?;
    if hex.len() != 64 {
        return None;
    }
    if !hex
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }
    Some(hex)
}

/// Validate a digest string without constructing a verifier.
pub fn validate_digest(digest: &str) -> Result<()> {
    parse_sha256(digest)
        .map(|_| ())
        .ok_or_else(|| LayerError::InvalidChunkDigest(digest.to_string()))
}

/// The default [`VerifierFactory`].
///
/// Fails with [`LayerError::InvalidChunkDigest`] if the digest string is
/// malformed; the chunk id only contextualizes the error.
pub fn digest_verifier(chunk_id: u32, chunk_digest: &str) -> Result<Box<dyn ChunkVerifier>> {
    let hex = parse_sha256(chunk_digest).ok_or_else(|| {
        LayerError::InvalidChunkDigest(format!("chunk {chunk_id}: {chunk_digest:?}"))
    })?;
    Ok(Box::new(Sha256Verifier {
        hasher: Sha256::new(),
        expected_hex: hex.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_accepts_matching_bytes() {
        let digest = sha256_digest(b"span payload");
        let mut verifier = digest_verifier(3, &digest).unwrap();
        verifier.update(b"span ");
        verifier.update(b"payload");
        assert!(verifier.verified());
    }

    #[test]
    fn test_verifier_rejects_mismatched_bytes() {
        let digest = sha256_digest(b"expected");
        let mut verifier = digest_verifier(0, &digest).unwrap();
        verifier.update(b"actual");
        assert!(!verifier.verified());
    }

    #[test]
    fn test_rejects_missing_algorithm_prefix() {
        let err = digest_verifier(1, &"ab".repeat(32)).unwrap_err();
        assert!(matches!(err, LayerError::InvalidChunkDigest(_)));
    }

    #[test]
    fn test_rejects_wrong_length_and_bad_chars() {
        assert!(digest_verifier(1, "sha256:abcd").is_err());
        let bad = format!("sha256:{}", "zz".repeat(32));
        assert!(digest_verifier(1, &bad).is_err());
        let upper = format!("sha256:{}", "AB".repeat(32));
        assert!(digest_verifier(1, &upper).is_err());
    }

    #[test]
    fn test_validate_digest() {
        assert!(validate_digest(&sha256_digest(b"x")).is_ok());
        assert!(validate_digest("sha512:beef").is_err());
    }
}
