use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use faceteach_core::detection::infrastructure::onnx_blazeface_detector::DEFAULT_CONFIDENCE;
use faceteach_core::recognition::domain::training::TrainingConfig;
use faceteach_core::shared::constants::{
    BLAZEFACE_MODEL_NAME, FEATURE_EXTRACTOR_MODEL_NAME, MAX_CONSECUTIVE_DETECTION_FAILURES,
    SAMPLE_SIZE, SEETAFACE_MODEL_NAME,
};
use faceteach_core::shared::model_resolver::ModelSource;

const SEETAFACE_MODEL_URL: &str =
    "https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub feature_extractor: ModelSource,
    pub blazeface: ModelSource,
    pub seetaface: ModelSource,
    /// Checked after the user cache, before downloading.
    pub bundled_dir: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            feature_extractor: ModelSource::local(FEATURE_EXTRACTOR_MODEL_NAME),
            blazeface: ModelSource::local(BLAZEFACE_MODEL_NAME),
            seetaface: ModelSource {
                file: SEETAFACE_MODEL_NAME.to_string(),
                url: Some(SEETAFACE_MODEL_URL.to_string()),
            },
            bundled_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub confidence: f64,
    pub max_consecutive_failures: usize,
    pub min_face_size: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            max_consecutive_failures: MAX_CONSECUTIVE_DETECTION_FAILURES,
            min_face_size: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub models: ModelSettings,
    pub detection: DetectionSettings,
    pub sample_size: u32,
    pub training: TrainingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models: ModelSettings::default(),
            detection: DetectionSettings::default(),
            sample_size: SAMPLE_SIZE,
            training: TrainingConfig::default(),
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceTeach").join("settings.json"))
    }

    /// Loads `path`, or the per-user settings file when `None`.
    ///
    /// A missing file means defaults; an unreadable or invalid one is
    /// reported and also falls back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::config_path) else {
            return Self::default();
        };
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::read(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring settings at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("settings.json")));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.sample_size, 224);
        assert_eq!(settings.training.epochs, 20);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"training": {"epochs": 5, "seed": 7}, "detection": {"confidence": 0.8}}"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path));
        assert_eq!(settings.training.epochs, 5);
        assert_eq!(settings.training.seed, Some(7));
        assert_eq!(settings.training.batch_size, 10);
        assert_eq!(settings.detection.confidence, 0.8);
        assert_eq!(settings.detection.max_consecutive_failures, 2);
        assert_eq!(settings.models, ModelSettings::default());
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load(Some(&path)), Settings::default());
    }

    #[test]
    fn test_model_sources_round_trip() {
        let mut settings = Settings::default();
        settings.models.feature_extractor = ModelSource {
            file: "/opt/models/mobilenet.onnx".into(),
            url: Some("https://models.example.test/mobilenet.onnx".into()),
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }
}
