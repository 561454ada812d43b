use sha2::{Digest, Sha256};

/// SHA-256 of the raw document, hex encoded. Used as the document version in
/// cache keys so a re-uploaded document never reuses stale sections.
pub fn document_fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// First eight characters, for log lines.
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..8).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_content() {
        let first = document_fingerprint(b"<ClinicalDocument/>");
        assert_eq!(first.len(), 64);
        assert_eq!(first, document_fingerprint(b"<ClinicalDocument/>"));
        assert_ne!(first, document_fingerprint(b"<ClinicalDocument />"));
        assert_eq!(short_fingerprint(&first).len(), 8);
    }
}
