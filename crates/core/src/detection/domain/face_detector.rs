use thiserror::Error;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// Domain interface for one face detection backend.
///
/// Backends own whatever state they need (a per-call inference session, a
/// continuously updated tracker) but expose the same lifecycle: `init` must
/// succeed before `detect`, and `stop` releases everything acquired since.
pub trait FaceDetector {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    fn init(&mut self) -> Result<(), DetectorError>;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError>;

    fn stop(&mut self);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("{backend} detector unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },
    #[error("no face detector available (primary: {primary}; secondary: {secondary})")]
    NoBackendAvailable { primary: String, secondary: String },
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("face detector is not initialized")]
    NotInitialized,
    #[error("face detector failed after {failures} consecutive detection failures")]
    Failed { failures: usize },
}

impl DetectorError {
    pub fn unavailable(backend: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn detection(reason: impl ToString) -> Self {
        Self::Detection(reason.to_string())
    }

    /// True for conditions that end detection for the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoBackendAvailable { .. } | Self::Failed { .. })
    }
}
