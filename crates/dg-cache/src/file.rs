//! Directory-backed artifact store.
//!
//! [`FileStore`] keeps one file per digest under `{root}/artifacts/`. Each
//! entry is a small header followed by the payload:
//!
//! ```text
//! [mime_len: u32 LE][mime bytes][payload bytes]
//! ```
//!
//! Publishing is atomic: the entry is written to a temporary file in the
//! same directory and renamed into place, so a concurrent reader either
//! sees the complete entry or nothing. Entries are append-only — a store
//! for an existing digest returns without touching the published file.
//!
//! A `VERSION` file in the store root guards the on-disk format. On
//! construction, a missing or mismatched version wipes and reinitializes
//! the whole store; digests from an older format are unusable anyway.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{ArtifactStore, CacheEntry};

/// On-disk format version. Bump when the entry layout or digest inputs change.
const STORE_VERSION: &str = "1";

/// Directory-backed [`ArtifactStore`] rooted at `root`.
///
/// Layout:
/// ```text
/// {root}/
/// +-- VERSION        # store format version
/// +-- artifacts/
///     +-- <digest>   # one entry per digest
/// ```
pub struct FileStore {
    artifacts: PathBuf,
}

impl FileStore {
    /// Open or initialize a store at `root`.
    ///
    /// Wipes the store when the `VERSION` file is missing or mismatched.
    /// Errors during initialization are logged and leave a store that
    /// behaves as always-miss.
    #[must_use]
    pub fn open(root: &Path) -> Self {
        validate_version(root);
        Self {
            artifacts: root.join("artifacts"),
        }
    }
}

impl ArtifactStore for FileStore {
    fn lookup(&self, digest: &str) -> Option<CacheEntry> {
        let path = self.artifacts.join(digest);
        let mut file = File::open(&path).ok()?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).ok()?;
        let mime_len = u32::from_le_bytes(len_buf) as usize;

        let mut mime = vec![0u8; mime_len];
        file.read_exact(&mut mime).ok()?;
        let mime = String::from_utf8(mime).ok()?;

        let mut payload = Vec::new();
        file.read_to_end(&mut payload).ok()?;

        let created_at = file.metadata().ok().and_then(|m| m.modified().ok());

        tracing::debug!(digest, %mime, "artifact cache hit");
        Some(CacheEntry {
            mime,
            payload,
            created_at,
        })
    }

    fn store(&self, digest: &str, mime: &str, payload: &[u8]) {
        let path = self.artifacts.join(digest);
        if path.exists() {
            // Append-only: an existing entry for this digest is by contract
            // byte-identical to what we would write.
            return;
        }

        if let Err(e) = self.publish(&path, mime, payload) {
            tracing::warn!(digest, "failed to persist artifact: {e}");
        }
    }
}

impl FileStore {
    /// Write the entry to a temp file in the artifacts directory and rename
    /// it into place. The rename is the publish point: readers see either
    /// the full entry or a miss.
    fn publish(&self, path: &Path, mime: &str, payload: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.artifacts)?;

        let mut tmp = NamedTempFile::new_in(&self.artifacts)?;
        let mime_bytes = mime.as_bytes();
        tmp.write_all(&(u32::try_from(mime_bytes.len()).unwrap_or(0)).to_le_bytes())?;
        tmp.write_all(mime_bytes)?;
        tmp.write_all(payload)?;

        // A concurrent writer may have published the same digest first; the
        // entries are identical, so losing the rename race is fine.
        if let Err(e) = tmp.persist(path) {
            if path.exists() {
                return Ok(());
            }
            return Err(e.error);
        }
        Ok(())
    }
}

/// Validate the store version, wiping the directory on mismatch.
fn validate_version(root: &Path) {
    let version_file = root.join("VERSION");

    match fs::read_to_string(&version_file) {
        Ok(stored) if stored == STORE_VERSION => {
            tracing::debug!("artifact store version matches: {STORE_VERSION}");
            return;
        }
        Ok(stored) => {
            tracing::info!(
                "artifact store version mismatch (stored={stored}, current={STORE_VERSION}), wiping"
            );
        }
        Err(_) => {
            tracing::info!("no artifact store VERSION file, initializing");
        }
    }

    if root.exists()
        && let Err(e) = fs::remove_dir_all(root)
    {
        tracing::warn!("failed to remove artifact store: {e}");
    }
    if let Err(e) = fs::create_dir_all(root) {
        tracing::warn!("failed to create artifact store: {e}");
        return;
    }
    if let Err(e) = fs::write(&version_file, STORE_VERSION) {
        tracing::warn!("failed to write artifact store VERSION file: {e}");
    }
}
