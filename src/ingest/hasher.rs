//! Content signatures used to tell whether a source changed since it was cached.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use memmap2::MmapOptions;
use sha2::{Digest, Sha256};

use crate::error::Result;

const MMAP_THRESHOLD: u64 = 500 * 1024 * 1024; // 500 MB

pub fn calculate_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = Sha256::new();

    if len > MMAP_THRESHOLD {
        // The index file is not expected to change while it is being hashed.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader = BufReader::new(file);
        let mut buffer = [0; 8192];
        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Signature of a local index file.
pub fn local_signature(path: &Path) -> Result<String> {
    Ok(format!("sha256:{}", calculate_hash(path)?))
}

/// Signature of a downloaded index, preferring what the server says about it.
pub fn remote_signature(etag: Option<&str>, last_modified: Option<&str>, body: &[u8]) -> String {
    header_signature(etag, last_modified).unwrap_or_else(|| format!("sha256:{}", hash_bytes(body)))
}

/// Signature derived from response headers alone, if the server sent any.
pub fn header_signature(etag: Option<&str>, last_modified: Option<&str>) -> Option<String> {
    if let Some(etag) = etag.map(str::trim).filter(|value| !value.is_empty()) {
        return Some(format!("etag:{}", etag));
    }
    last_modified
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("last-modified:{}", value))
}

/// Eight hex digits identifying `text`. Used to keep saved file names short
/// but distinct.
pub fn short_key(text: &str) -> String {
    hash_bytes(text.as_bytes())[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;

    #[test]
    fn test_local_signature_tracks_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.json");

        fs::write(&path, b"{\"meta\": {}}")?;
        let first = local_signature(&path)?;
        assert!(first.starts_with("sha256:"));
        assert_eq!(first, local_signature(&path)?);

        fs::write(&path, b"{\"meta\": {\"changed\": true}}")?;
        assert_ne!(first, local_signature(&path)?);
        Ok(())
    }

    #[test]
    fn test_remote_signature_prefers_headers() {
        assert_eq!(remote_signature(Some("\"abc\""), Some("Tue"), b"x"), "etag:\"abc\"");
        assert_eq!(
            remote_signature(None, Some("Tue, 01 Oct 2024"), b"x"),
            "last-modified:Tue, 01 Oct 2024"
        );
        assert_eq!(
            remote_signature(Some("  "), None, b"x"),
            format!("sha256:{}", hash_bytes(b"x"))
        );
        assert_eq!(header_signature(None, None), None);
    }

    #[test]
    fn test_short_key() {
        assert_eq!(short_key("a.ogg").len(), 8);
        assert_eq!(short_key("a.ogg"), short_key("a.ogg"));
        assert_ne!(short_key("a.ogg"), short_key("b.ogg"));
    }
}
