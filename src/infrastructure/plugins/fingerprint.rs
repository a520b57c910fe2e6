//! Content fingerprints for change detection

use sha2::{Digest, Sha256};
use std::path::Path;

/// Hex SHA-256 of a byte slice
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex SHA-256 of a file; `None` when it cannot be read
pub fn file_digest(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => Some(digest_bytes(&bytes)),
        Err(e) => {
            tracing::debug!("Cannot fingerprint {}: {}", path.display(), e);
            None
        }
    }
}

/// Combined fingerprint of several files; `None` if any is unreadable
pub fn files_digest<'a, I>(paths: I) -> Option<String>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut hasher = Sha256::new();
    for path in paths {
        let bytes = std::fs::read(path).ok()?;
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&bytes);
    }
    Some(hex::encode(hasher.finalize()))
}
