use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::recognition::domain::model_serializer::ModelArtifacts;

pub const ARCHITECTURE_FILE: &str = "model.json";
pub const WEIGHTS_FILE: &str = "model.weights.bin";
pub const LABELS_FILE: &str = "labels.json";

#[derive(Error, Debug)]
#[error("{path}: {source}")]
pub struct ModelDirectoryError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Stores the three head-model artifacts side by side in one directory.
pub struct ModelDirectory {
    dir: PathBuf,
}

impl ModelDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        [ARCHITECTURE_FILE, WEIGHTS_FILE, LABELS_FILE]
            .iter()
            .all(|name| self.dir.join(name).is_file())
    }

    pub fn write(&self, artifacts: &ModelArtifacts) -> Result<(), ModelDirectoryError> {
        fs::create_dir_all(&self.dir).map_err(|source| ModelDirectoryError {
            path: self.dir.clone(),
            source,
        })?;
        self.write_file(ARCHITECTURE_FILE, &artifacts.architecture)?;
        self.write_file(WEIGHTS_FILE, &artifacts.weights)?;
        self.write_file(LABELS_FILE, &artifacts.labels)?;
        log::info!("Saved model to {}", self.dir.display());
        Ok(())
    }

    pub fn read(&self) -> Result<ModelArtifacts, ModelDirectoryError> {
        Ok(ModelArtifacts {
            architecture: self.read_file(ARCHITECTURE_FILE)?,
            weights: self.read_file(WEIGHTS_FILE)?,
            labels: self.read_file(LABELS_FILE)?,
        })
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), ModelDirectoryError> {
        let path = self.dir.join(name);
        fs::write(&path, bytes).map_err(|source| ModelDirectoryError { path, source })
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, ModelDirectoryError> {
        let path = self.dir.join(name);
        fs::read(&path).map_err(|source| ModelDirectoryError { path, source })
    }
}
