use sha2::{Digest, Sha256};

/// Content address of a source document: hex SHA-256 of its bytes.
///
/// Identical bytes always yield the same id, so re-running over the same
/// captures produces the same panel provenance.
pub fn compute_document_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable key for a (document, period) ingestion; the same document filed
/// under a different period is a different ingestion.
pub fn compute_ingestion_key(document_id: &str, period_label: &str, rules_version: &str) -> String {
    let mut s = String::new();
    s.push_str(document_id);
    s.push('|');
    s.push_str(period_label);
    s.push('|');
    s.push_str(rules_version);

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}
