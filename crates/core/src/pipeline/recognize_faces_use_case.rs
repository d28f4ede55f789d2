use thiserror::Error;

use crate::detection::domain::detector_strategy::DetectorStrategy;
use crate::detection::domain::face_detector::DetectorError;
use crate::recognition::domain::feature_extractor::FeatureExtractor;
use crate::recognition::domain::predictor::{PredictError, Prediction, Predictor};
use crate::recognition::domain::sample::Sample;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::{Frame, FrameError};
use crate::shared::tensor_arena::TensorArena;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecognizedFace {
    pub bbox: BoundingBox,
    pub prediction: Prediction,
}

/// Recognition pipeline: detect → crop each face → resize → predict.
pub struct RecognizeFacesUseCase {
    detector: DetectorStrategy,
    extractor: Box<dyn FeatureExtractor>,
    predictor: Predictor,
    arena: TensorArena,
}

impl RecognizeFacesUseCase {
    pub fn new(
        detector: DetectorStrategy,
        extractor: Box<dyn FeatureExtractor>,
        predictor: Predictor,
    ) -> Self {
        Self {
            detector,
            extractor,
            predictor,
            arena: TensorArena::new(),
        }
    }

    pub fn arena(&self) -> &TensorArena {
        &self.arena
    }

    /// Returns one entry per detected face, primary face first.
    pub fn execute(&mut self, frame: &Frame) -> Result<Vec<RecognizedFace>, RecognizeError> {
        self.detector.init()?;
        let boxes = self.detector.detect(frame)?;
        let (w, h) = self.extractor.input_size();

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let Some(crop) = frame.square_crop(&bbox) else {
                continue;
            };
            let sample = Sample::new(crop.resize(w, h)?);
            let prediction = self
                .predictor
                .predict(self.extractor.as_mut(), &self.arena, &sample)?;
            faces.push(RecognizedFace { bbox, prediction });
        }
        Ok(faces)
    }

    pub fn stop(&mut self) {
        self.detector.stop();
    }
}
