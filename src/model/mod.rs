pub mod checkpoint;
pub mod network;
pub mod optim;
pub mod vocab;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointMeta, CheckpointStore};
pub use network::{DietModel, ModelWeights, SequenceExample, SequenceStep};
pub use vocab::Vocabulary;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model artifact not found: {0}")]
    Missing(String),
    #[error("failed reading model artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt model artifact {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("checksum mismatch for checkpoint {path}")]
    ChecksumMismatch { path: String },
    #[error("checkpoint expects {expected} vocabulary tokens but the vocabulary has {found}")]
    VocabularyMismatch { expected: usize, found: usize },
    #[error("no promoted checkpoint in {0}; run `promote` first")]
    NoActiveCheckpoint(String),
    #[error("failed loading food catalog: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),
}

fn write_temp_sibling(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

/// Writes to a sibling temp file and renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp_sibling(path, bytes)?;
    fs::rename(&tmp, path)
}

/// Like [`write_atomic`] but fails with `AlreadyExists` instead of replacing `path`.
/// The final name is claimed with a hard link, which never overwrites.
pub(crate) fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp_sibling(path, bytes)?;
    let linked = fs::hard_link(&tmp, path);
    let cleanup = fs::remove_file(&tmp);
    linked?;
    cleanup
}
