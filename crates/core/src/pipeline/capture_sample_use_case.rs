use thiserror::Error;

use crate::detection::domain::detector_strategy::DetectorStrategy;
use crate::detection::domain::face_detector::DetectorError;
use crate::recognition::domain::image_store::{LabeledImageStore, StoreError};
use crate::recognition::domain::sample::{Label, Sample};
use crate::recognition::infrastructure::image_files::{encode_jpeg, ImageFileError};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::JPEG_QUALITY;
use crate::shared::frame::{Frame, FrameError};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Encode(#[from] ImageFileError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome {
    /// The primary face was stored as the `count`-th sample of `label`.
    Captured {
        label: Label,
        count: usize,
        bbox: BoundingBox,
    },
    NoFace,
}

/// Capture pipeline: detect → primary face → square crop → resize → JPEG → store.
pub struct CaptureSampleUseCase {
    detector: DetectorStrategy,
}

impl CaptureSampleUseCase {
    pub fn new(detector: DetectorStrategy) -> Self {
        Self { detector }
    }

    pub fn detector_mut(&mut self) -> &mut DetectorStrategy {
        &mut self.detector
    }

    /// Stores the largest face in `frame` under `label`, adding the label
    /// to the store when it is new.
    pub fn execute(
        &mut self,
        frame: &Frame,
        label: &Label,
        store: &mut LabeledImageStore,
    ) -> Result<CaptureOutcome, CaptureError> {
        self.detector.init()?;
        let faces = self.detector.detect(frame)?;
        let Some(bbox) = faces.first().cloned() else {
            return Ok(CaptureOutcome::NoFace);
        };
        let Some(crop) = frame.square_crop(&bbox) else {
            log::warn!("Primary face box {bbox:?} lies outside the frame");
            return Ok(CaptureOutcome::NoFace);
        };

        let size = store.sample_size();
        let pixels = crop.resize(size, size)?;
        let encoded = encode_jpeg(&pixels, JPEG_QUALITY)?;

        if !store.contains(label) {
            store.add_label(label.clone())?;
            log::info!("Added label {label}");
        }
        let count = store.add_sample(label, Sample::new(pixels).with_encoded(encoded))?;
        log::debug!("Captured sample {count} for {label}");

        Ok(CaptureOutcome::Captured {
            label: label.clone(),
            count,
            bbox,
        })
    }

    pub fn stop(&mut self) {
        self.detector.stop();
    }
}
