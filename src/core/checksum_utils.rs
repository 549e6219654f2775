/*
 * SHA-256 content fingerprints used to tell whether a previously summarized file
 * has changed since it was summarized. The scanner already holds each file's bytes
 * when counting characters, so checksums are computed from memory.
 */
use sha2::{Digest, Sha256};

/*
 * Lowercase hex SHA-256 of the raw file bytes.
 */
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/*
 * A file counts as changed only when both sides carry a checksum and they differ.
 * Documents written before checksums existed therefore keep their summaries.
 */
pub fn content_changed(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => old != new,
        _ => false,
    }
}
