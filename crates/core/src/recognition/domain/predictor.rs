use std::fmt;

use ndarray::Array2;
use thiserror::Error;

use crate::recognition::domain::dataset::argmax;
use crate::recognition::domain::feature_extractor::{Embedding, ExtractorError, FeatureExtractor};
use crate::recognition::domain::head_model::HeadModel;
use crate::recognition::domain::head_slot::HeadSlot;
use crate::recognition::domain::sample::{Label, Sample};
use crate::shared::tensor_arena::TensorArena;

#[derive(Clone, Debug, PartialEq)]
pub enum Prediction {
    Recognized { label: Label, confidence: f32 },
    /// No head model has been trained or imported yet.
    NotTrained,
}

impl Prediction {
    pub fn label(&self) -> Option<&Label> {
        match self {
            Prediction::Recognized { label, .. } => Some(label),
            Prediction::NotTrained => None,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Recognized { label, confidence } => {
                let percent = (confidence * 100.0).floor() as u32;
                write!(f, "{label}: {percent}%")
            }
            Prediction::NotTrained => write!(f, "????"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("embedding has {actual} values, head expects {expected}")]
    EmbeddingShape { expected: usize, actual: usize },
}

/// Classifies single crops with whatever head is current.
///
/// Labels come from the head model itself, never from the live store, so
/// adding or removing labels after training cannot shift predictions.
#[derive(Clone, Debug)]
pub struct Predictor {
    slot: HeadSlot,
}

impl Predictor {
    pub fn new(slot: HeadSlot) -> Self {
        Self { slot }
    }

    pub fn is_trained(&self) -> bool {
        self.slot.is_trained()
    }

    pub fn predict(
        &self,
        extractor: &mut dyn FeatureExtractor,
        arena: &TensorArena,
        sample: &Sample,
    ) -> Result<Prediction, PredictError> {
        let Some(model) = self.slot.current() else {
            return Ok(Prediction::NotTrained);
        };
        let embedding = {
            let mut scope = arena.scope();
            extractor.extract(sample, &mut scope)?
        };
        classify(&model, &embedding)
    }

    pub fn predict_embedding(&self, embedding: &Embedding) -> Result<Prediction, PredictError> {
        match self.slot.current() {
            Some(model) => classify(&model, embedding),
            None => Ok(Prediction::NotTrained),
        }
    }
}

fn classify(model: &HeadModel, embedding: &Embedding) -> Result<Prediction, PredictError> {
    if embedding.len() != model.input_len() {
        return Err(PredictError::EmbeddingShape {
            expected: model.input_len(),
            actual: embedding.len(),
        });
    }
    let row = Array2::from_shape_vec((1, embedding.len()), embedding.values().collect())
        .map_err(|_| PredictError::EmbeddingShape {
            expected: model.input_len(),
            actual: embedding.len(),
        })?;
    let probs = model.predict_proba(row.view());
    let index = argmax(probs.row(0));

    Ok(Prediction::Recognized {
        label: model.labels()[index].clone(),
        confidence: probs[[0, index]],
    })
}
