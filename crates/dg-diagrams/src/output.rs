//! Artifact reference construction.
//!
//! A rendered artifact is handed back to the document in one of two ways:
//! embedded inline as a base64 `data:` URI, or written into an output
//! directory under a content-hash filename and referenced by path. The
//! directory mode is idempotent: the filename is derived from the cache
//! digest, so re-runs overwrite nothing and emit no duplicates.

use std::path::PathBuf;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;

use crate::language::MimeType;

/// How rendered artifacts are referenced from the document tree.
#[derive(Debug, Clone, Default)]
pub enum ArtifactOutput {
    /// Embed the artifact as a `data:` URI (default).
    #[default]
    Inline,
    /// Write artifacts into `dir` and reference them as
    /// `{link_prefix}{filename}`.
    Directory {
        dir: PathBuf,
        link_prefix: String,
    },
}

impl ArtifactOutput {
    /// Produce the reference target for one artifact.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directory mode cannot persist the
    /// artifact file.
    pub fn reference(
        &self,
        digest: &str,
        mime: MimeType,
        payload: &[u8],
    ) -> std::io::Result<String> {
        match self {
            Self::Inline => Ok(format!(
                "data:{};base64,{}",
                mime.as_mime(),
                BASE64_STANDARD.encode(payload)
            )),
            Self::Directory { dir, link_prefix } => {
                let short = digest.get(..12).unwrap_or(digest);
                let filename = format!("diagram_{short}.{}", mime.extension());
                let path = dir.join(&filename);
                if !path.exists() {
                    std::fs::create_dir_all(dir)?;
                    std::fs::write(&path, payload)?;
                }
                Ok(format!("{link_prefix}{filename}"))
            }
        }
    }
}
