//! Cryptographic hash functions.

use sha2::{Digest, Sha256};

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Domain-separated SHA-256 over a sequence of fields.
///
/// Each field is length-prefixed, so `["ab", "c"]` and `["a", "bc"]`
/// hash differently.
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    /// Start a transcript under the given domain label.
    pub fn new(domain: &str) -> Self {
        let mut transcript = Self {
            hasher: Sha256::new(),
        };
        transcript.append(domain.as_bytes());
        transcript
    }

    /// Append a field.
    pub fn append(&mut self, field: &[u8]) -> &mut Self {
        self.hasher.update((field.len() as u64).to_be_bytes());
        self.hasher.update(field);
        self
    }

    /// Append a u64 field.
    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        self.append(&value.to_be_bytes())
    }

    /// Finish and return the digest.
    pub fn finish(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }

    /// Finish and return the digest as hex.
    pub fn finish_hex(self) -> String {
        to_hex(&self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xab]), "000fab");
    }

    #[test]
    fn test_finish_hex_matches_digest() {
        let mut a = Transcript::new("duel");
        a.append(b"alice");
        let mut b = Transcript::new("duel");
        b.append(b"alice");

        let hex = a.finish_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, to_hex(&b.finish()));
    }

    #[test]
    fn test_transcript_is_deterministic() {
        let mut a = Transcript::new("duel");
        a.append(b"alice").append_u64(1);
        let mut b = Transcript::new("duel");
        b.append(b"alice").append_u64(1);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_transcript_fields_are_length_prefixed() {
        let mut a = Transcript::new("duel");
        a.append(b"ab").append(b"c");
        let mut b = Transcript::new("duel");
        b.append(b"a").append(b"bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_transcript_domain_separation() {
        let mut a = Transcript::new("duel/winner");
        a.append_u64(7);
        let mut b = Transcript::new("duel/tx");
        b.append_u64(7);
        assert_ne!(a.finish_hex(), b.finish_hex());
    }
}
