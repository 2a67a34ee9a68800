use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::model::network::ModelWeights;
use crate::model::{write_atomic, write_new, ModelLoadError};

const ACTIVE_MANIFEST: &str = "ACTIVE";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {0} already exists; refusing to overwrite")]
    AlreadyExists(String),
    #[error("failed writing checkpoint {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed encoding checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Load(#[from] ModelLoadError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMeta {
    pub model_tag: String,
    pub version: u32,
    pub epoch: u32,
    pub parent: Option<String>,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub vocab_size: usize,
    #[serde(default)]
    pub hidden_size: usize,
    #[serde(default)]
    pub weights_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub weights: ModelWeights,
}

impl Checkpoint {
    /// Stamps the metadata with the weights' shape and digest.
    pub fn seal(mut meta: CheckpointMeta, weights: ModelWeights) -> Self {
        meta.vocab_size = weights.vocab_size;
        meta.hidden_size = weights.hidden;
        meta.weights_sha256 = weights.digest();
        Self { meta, weights }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CheckpointEntry {
    pub version: u32,
    pub epoch: u32,
    pub file_name: String,
}

/// Versioned checkpoint directory for one model tag.
///
/// Files are named `<tag>_v<version>_epoch_<NN>.json` and are never rewritten. The
/// `ACTIVE` manifest names the checkpoint inference should load.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    tag: String,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tag: tag.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn file_name(&self, version: u32, epoch: u32) -> String {
        format!("{}_v{}_epoch_{:02}.json", self.tag, version, epoch)
    }

    pub fn parse_file_name(&self, name: &str) -> Option<(u32, u32)> {
        let rest = name
            .strip_prefix(self.tag.as_str())?
            .strip_prefix("_v")?
            .strip_suffix(".json")?;
        let (version, epoch) = rest.split_once("_epoch_")?;
        Some((version.parse().ok()?, epoch.parse().ok()?))
    }

    pub fn write(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let name = self.file_name(checkpoint.meta.version, checkpoint.meta.epoch);
        let path = self.dir.join(&name);
        let json = serde_json::to_vec(checkpoint)?;
        write_new(&path, &json).map_err(|source| match source.kind() {
            std::io::ErrorKind::AlreadyExists => {
                CheckpointError::AlreadyExists(path.display().to_string())
            }
            _ => CheckpointError::Io {
                path: path.display().to_string(),
                source,
            },
        })?;
        info!("wrote checkpoint {}", path.display());
        Ok(path)
    }

    pub fn load(&self, file_name: &str) -> Result<Checkpoint, ModelLoadError> {
        load_checkpoint(&self.dir.join(file_name))
    }

    pub fn list(&self) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some((version, epoch)) = self.parse_file_name(&file_name) {
                out.push(CheckpointEntry {
                    version,
                    epoch,
                    file_name,
                });
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn next_version(&self) -> Result<u32, CheckpointError> {
        Ok(self
            .list()?
            .iter()
            .map(|entry| entry.version)
            .max()
            .map(|v| v + 1)
            .unwrap_or(1))
    }

    pub fn active(&self) -> Result<Option<String>, ModelLoadError> {
        let manifest = self.dir.join(ACTIVE_MANIFEST);
        if !manifest.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&manifest).map_err(|source| ModelLoadError::Io {
            path: manifest.display().to_string(),
            source,
        })?;
        let name = raw.trim();
        Ok(if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        })
    }

    pub fn load_active(&self) -> Result<Checkpoint, ModelLoadError> {
        let name = self
            .active()?
            .ok_or_else(|| ModelLoadError::NoActiveCheckpoint(self.dir.display().to_string()))?;
        self.load(&name)
    }

    /// Verifies the checkpoint loads cleanly, then points the manifest at it.
    pub fn promote(&self, file_name: &str) -> Result<CheckpointMeta, CheckpointError> {
        let checkpoint = self.load(file_name)?;
        let manifest = self.dir.join(ACTIVE_MANIFEST);
        write_atomic(&manifest, file_name.as_bytes()).map_err(|source| CheckpointError::Io {
            path: manifest.display().to_string(),
            source,
        })?;
        info!("promoted checkpoint {file_name}");
        Ok(checkpoint.meta)
    }
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, ModelLoadError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(ModelLoadError::Missing(display));
    }
    let data = fs::read(path).map_err(|source| ModelLoadError::Io {
        path: display.clone(),
        source,
    })?;
    let checkpoint: Checkpoint =
        serde_json::from_slice(&data).map_err(|e| ModelLoadError::Corrupt {
            path: display.clone(),
            reason: e.to_string(),
        })?;
    checkpoint
        .weights
        .validate()
        .map_err(|reason| ModelLoadError::Corrupt {
            path: display.clone(),
            reason,
        })?;
    if checkpoint.weights.digest() != checkpoint.meta.weights_sha256 {
        return Err(ModelLoadError::ChecksumMismatch { path: display });
    }
    Ok(checkpoint)
}
