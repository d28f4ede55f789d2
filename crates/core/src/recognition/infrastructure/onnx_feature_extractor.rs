/// Truncated MobileNet v1 feature extractor using ONNX Runtime via `ort`.
///
/// The network is MobileNet v1 (alpha 0.25, 224px) cut at `conv_pw_13_relu`,
/// so one sample yields a `[7, 7, 256]` activation map. Input is NHWC with
/// pixels mapped to `[-1, 1]` as `x / 127 - 1`.
use std::path::Path;

use ndarray::{ArrayD, Axis};

use crate::recognition::domain::feature_extractor::{Embedding, ExtractorError, FeatureExtractor};
use crate::recognition::domain::sample::Sample;
use crate::shared::constants::{EMBEDDING_SHAPE, SAMPLE_SIZE};
use crate::shared::execution_provider::build_session;
use crate::shared::tensor_arena::TensorScope;

const PIXEL_SCALE: f32 = 127.0;

pub struct OnnxFeatureExtractor {
    session: ort::session::Session,
    input_size: u32,
    embedding_shape: Vec<usize>,
}

impl OnnxFeatureExtractor {
    pub fn new(model_path: &Path) -> Result<Self, ExtractorError> {
        let session =
            build_session(model_path).map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        log::debug!("Loaded feature extractor from {}", model_path.display());
        Ok(Self {
            session,
            input_size: SAMPLE_SIZE,
            embedding_shape: EMBEDDING_SHAPE.to_vec(),
        })
    }

    fn run(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, ort::Error> {
        let input_value = ort::value::TensorRef::from_array_view(input.view())?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        let activations = outputs[0].try_extract_array::<f32>()?;
        Ok(activations.index_axis(Axis(0), 0).to_owned())
    }
}

impl FeatureExtractor for OnnxFeatureExtractor {
    fn input_size(&self) -> (u32, u32) {
        (self.input_size, self.input_size)
    }

    fn embedding_shape(&self) -> &[usize] {
        &self.embedding_shape
    }

    fn extract(
        &mut self,
        sample: &Sample,
        scope: &mut TensorScope<'_>,
    ) -> Result<Embedding, ExtractorError> {
        let frame = sample.pixels();
        if frame.size() != self.input_size() || frame.channels() != 3 {
            return Err(ExtractorError::InputSize {
                expected: self.input_size(),
                actual: frame.size(),
            });
        }

        let (w, h) = frame.size();
        let input = scope.zeros(&[1, h as usize, w as usize, 3]);
        normalize_into(frame.data(), input);

        let activations = self
            .run(input)
            .map_err(|e| ExtractorError::Inference(e.to_string()))?;
        if activations.shape() != self.embedding_shape.as_slice() {
            return Err(ExtractorError::Inference(format!(
                "model produced {:?}, expected {:?}",
                activations.shape(),
                self.embedding_shape
            )));
        }
        Ok(Embedding(activations))
    }
}

/// Writes interleaved RGB bytes into an NHWC buffer, scaled to `[-1, 1]`.
fn normalize_into(rgb: &[u8], buffer: &mut ArrayD<f32>) {
    for (dst, &px) in buffer.iter_mut().zip(rgb) {
        *dst = px as f32 / PIXEL_SCALE - 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::tensor_arena::TensorArena;
    use approx::assert_abs_diff_eq;
    use ndarray::IxDyn;
    use rstest::rstest;

    #[rstest]
    #[case(0, -1.0)]
    #[case(127, 0.0)]
    #[case(254, 1.0)]
    fn test_normalize_maps_to_unit_range(#[case] px: u8, #[case] expected: f32) {
        let mut buffer = ArrayD::zeros(IxDyn(&[1, 1, 1, 3]));
        normalize_into(&[px, px, px], &mut buffer);
        for v in buffer.iter() {
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_normalize_keeps_channel_order() {
        let mut buffer = ArrayD::zeros(IxDyn(&[1, 1, 2, 3]));
        normalize_into(&[0, 127, 254, 254, 127, 0], &mut buffer);
        assert_abs_diff_eq!(buffer[[0, 0, 0, 0]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(buffer[[0, 0, 0, 2]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(buffer[[0, 0, 1, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(buffer[[0, 0, 1, 2]], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_normalized_buffer_lives_in_scope() {
        let arena = TensorArena::new();
        {
            let mut scope = arena.scope();
            let input = scope.zeros(&[1, 2, 2, 3]);
            normalize_into(&[200; 12], input);
            assert_eq!(arena.live_buffers(), 1);
        }
        assert_eq!(arena.live_buffers(), 0);
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxFeatureExtractor::new(&dir.path().join("missing.onnx"));
        assert!(matches!(result, Err(ExtractorError::Unavailable(_))));
    }
}
