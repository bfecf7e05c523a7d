//! Content-addressed blob store.
//!
//! Addresses are `sha256:` + hex on the wire and raw hex on disk paths.
//! Stores are temp-then-rename atomic and idempotent: identical content
//! always lands at the identical address.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use helm_core::{sha256_hex, HelmError};

pub struct Cas {
    root: PathBuf,
}

impl Cas {
    /// Open (creating if needed) a CAS rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, HelmError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| HelmError::Storage(e.to_string()))?;
        Ok(Self { root })
    }

    fn path_for(&self, hex_digest: &str) -> PathBuf {
        self.root.join(hex_digest)
    }

    /// Store bytes, returning their wire address.
    pub fn store(&self, bytes: &[u8]) -> Result<String, HelmError> {
        let digest = sha256_hex(bytes);
        let target = self.path_for(&digest);
        if target.exists() {
            return Ok(format!("sha256:{digest}"));
        }

        let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, bytes).map_err(|e| HelmError::Storage(e.to_string()))?;
        fs::rename(&tmp, &target).map_err(|e| HelmError::Storage(e.to_string()))?;
        debug!(address = %digest, len = bytes.len(), "blob stored");
        Ok(format!("sha256:{digest}"))
    }

    /// Fetch bytes by wire address.
    pub fn get(&self, address: &str) -> Result<Vec<u8>, HelmError> {
        let digest = address
            .strip_prefix("sha256:")
            .ok_or_else(|| HelmError::BlobNotFound(address.to_string()))?;
        let path = self.path_for(digest);
        if !path.exists() {
            return Err(HelmError::BlobNotFound(address.to_string()));
        }
        fs::read(&path).map_err(|e| HelmError::Storage(e.to_string()))
    }

    pub fn contains(&self, address: &str) -> bool {
        address
            .strip_prefix("sha256:")
            .map(|digest| self.path_for(digest).exists())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_idempotent_and_addressed_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let cas = Cas::open(dir.path()).unwrap();
        let a = cas.store(b"artifact").unwrap();
        let b = cas.store(b"artifact").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(cas.get(&a).unwrap(), b"artifact");
    }

    #[test]
    fn distinct_content_distinct_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let cas = Cas::open(dir.path()).unwrap();
        assert_ne!(cas.store(b"a").unwrap(), cas.store(b"b").unwrap());
    }

    #[test]
    fn missing_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cas = Cas::open(dir.path()).unwrap();
        let missing = format!("sha256:{}", "00".repeat(32));
        assert!(matches!(cas.get(&missing), Err(HelmError::BlobNotFound(_))));
        assert!(!cas.contains(&missing));
    }

    #[test]
    fn disk_layout_is_raw_hex() {
        let dir = tempfile::tempdir().unwrap();
        let cas = Cas::open(dir.path()).unwrap();
        let addr = cas.store(b"artifact").unwrap();
        let digest = addr.strip_prefix("sha256:").unwrap();
        assert!(dir.path().join(digest).exists());
    }
}
