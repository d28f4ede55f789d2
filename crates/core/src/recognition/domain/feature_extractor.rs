use ndarray::ArrayD;
use thiserror::Error;

use crate::recognition::domain::sample::Sample;
use crate::shared::tensor_arena::TensorScope;

/// Output of the frozen feature extractor for one sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Embedding(pub ArrayD<f32>);

impl Embedding {
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values in row-major order.
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("sample is {actual:?}, extractor expects {expected:?}")]
    InputSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("feature extractor unavailable: {0}")]
    Unavailable(String),
    #[error("feature extraction failed: {0}")]
    Inference(String),
}

/// Frozen, pre-trained image → embedding function.
///
/// Implementations must allocate every intermediate buffer through `scope`
/// (or drop it before returning) so the caller controls its lifetime; only
/// the returned embedding may outlive the call.
pub trait FeatureExtractor {
    /// `(width, height)` the extractor expects samples to have.
    fn input_size(&self) -> (u32, u32);

    fn embedding_shape(&self) -> &[usize];

    fn extract(
        &mut self,
        sample: &Sample,
        scope: &mut TensorScope<'_>,
    ) -> Result<Embedding, ExtractorError>;

    fn embedding_len(&self) -> usize {
        self.embedding_shape().iter().product()
    }
}
