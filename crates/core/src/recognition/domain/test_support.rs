//! Hand-written extractor stubs and store builders for recognition tests.

use ndarray::{Array1, ArrayD, IxDyn};

use crate::recognition::domain::feature_extractor::{Embedding, ExtractorError, FeatureExtractor};
use crate::recognition::domain::image_store::LabeledImageStore;
use crate::recognition::domain::sample::{Label, Sample};
use crate::shared::frame::Frame;
use crate::shared::tensor_arena::TensorScope;

pub const TEST_SAMPLE_SIZE: u32 = 8;

/// Red channel level for the label at sorted position `index`.
pub fn label_level(index: usize) -> u8 {
    (50 * (index + 1)) as u8
}

/// A solid crop whose red channel identifies the label and whose blue
/// channel varies per sample.
pub fn sample_for(label_index: usize, sample_index: usize) -> Sample {
    let level = label_level(label_index);
    let jitter = (sample_index % 5) as u8;
    let pixels: Vec<u8> = (0..TEST_SAMPLE_SIZE * TEST_SAMPLE_SIZE)
        .flat_map(|_| [level + jitter, 255 - level, 10 * jitter])
        .collect();
    Sample::new(Frame::new(pixels, TEST_SAMPLE_SIZE, TEST_SAMPLE_SIZE, 3, 0))
}

/// Store with `count` samples per label. Pixel levels follow sorted order.
pub fn labeled_store(counts: &[(&str, usize)]) -> LabeledImageStore {
    let mut sorted: Vec<&str> = counts.iter().map(|(name, _)| *name).collect();
    sorted.sort();

    let mut store = LabeledImageStore::new(TEST_SAMPLE_SIZE);
    for (name, count) in counts {
        let label = Label::new(name).unwrap();
        let index = sorted.iter().position(|n| n == name).unwrap();
        store.add_label(label.clone()).unwrap();
        for i in 0..*count {
            store.add_sample(&label, sample_for(index, i)).unwrap();
        }
    }
    store
}

/// Embeds a crop as its per-channel means and their complements,
/// shape `[2, 3]`, so crops of different labels are linearly separable.
pub struct StubExtractor {
    calls: usize,
    shape: Vec<usize>,
}

impl StubExtractor {
    /// Scoped buffers allocated per extraction.
    pub const BUFFERS_PER_SAMPLE: usize = 2;

    pub fn new() -> Self {
        Self {
            calls: 0,
            shape: vec![2, 3],
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Recovers the label index from the first embedding value.
    pub fn label_of_value(value: f32) -> usize {
        ((value * 255.0 / 50.0).round() as usize).saturating_sub(1)
    }
}

impl FeatureExtractor for StubExtractor {
    fn input_size(&self) -> (u32, u32) {
        (TEST_SAMPLE_SIZE, TEST_SAMPLE_SIZE)
    }

    fn embedding_shape(&self) -> &[usize] {
        &self.shape
    }

    fn extract(
        &mut self,
        sample: &Sample,
        scope: &mut TensorScope<'_>,
    ) -> Result<Embedding, ExtractorError> {
        self.calls += 1;
        let frame = sample.pixels();
        let (w, h) = frame.size();

        let normalized = scope.zeros(&[1, h as usize, w as usize, 3]);
        for (dst, &px) in normalized.iter_mut().zip(frame.data()) {
            *dst = px as f32 / 255.0;
        }
        let sums: Array1<f32> = (0..3)
            .map(|c| normalized.iter().skip(c).step_by(3).sum::<f32>())
            .collect();

        let means = scope.zeros(&[3]);
        let pixels = (w * h) as f32;
        for (dst, sum) in means.iter_mut().zip(sums.iter()) {
            *dst = sum / pixels;
        }

        let mut values: Vec<f32> = means.iter().copied().collect();
        values.extend(means.iter().map(|m| 1.0 - m));
        let embedding = ArrayD::from_shape_vec(IxDyn(&self.shape), values)
            .map_err(|e| ExtractorError::Inference(e.to_string()))?;
        Ok(Embedding(embedding))
    }
}

/// Succeeds `ok_calls` times, then fails every call.
pub struct FailingExtractor {
    inner: StubExtractor,
    ok_calls: usize,
}

impl FailingExtractor {
    pub fn after(ok_calls: usize) -> Self {
        Self {
            inner: StubExtractor::new(),
            ok_calls,
        }
    }
}

impl FeatureExtractor for FailingExtractor {
    fn input_size(&self) -> (u32, u32) {
        self.inner.input_size()
    }

    fn embedding_shape(&self) -> &[usize] {
        self.inner.embedding_shape()
    }

    fn extract(
        &mut self,
        sample: &Sample,
        scope: &mut TensorScope<'_>,
    ) -> Result<Embedding, ExtractorError> {
        if self.inner.calls() >= self.ok_calls {
            scope.zeros(&[4, 4]);
            return Err(ExtractorError::Inference("simulated failure".into()));
        }
        self.inner.extract(sample, scope)
    }
}

/// Returns embeddings that disagree with the declared shape.
pub struct WrongShapeExtractor;

impl FeatureExtractor for WrongShapeExtractor {
    fn input_size(&self) -> (u32, u32) {
        (TEST_SAMPLE_SIZE, TEST_SAMPLE_SIZE)
    }

    fn embedding_shape(&self) -> &[usize] {
        &[2, 3]
    }

    fn extract(
        &mut self,
        _sample: &Sample,
        scope: &mut TensorScope<'_>,
    ) -> Result<Embedding, ExtractorError> {
        scope.zeros(&[16]);
        Ok(Embedding(ArrayD::zeros(IxDyn(&[5]))))
    }
}

/// Maps each crop to a noisy one-hot vector of its label, shape `[4]`.
/// Perfectly separable for up to four labels.
pub struct SeparableExtractor;

impl FeatureExtractor for SeparableExtractor {
    fn input_size(&self) -> (u32, u32) {
        (TEST_SAMPLE_SIZE, TEST_SAMPLE_SIZE)
    }

    fn embedding_shape(&self) -> &[usize] {
        &[4]
    }

    fn extract(
        &mut self,
        sample: &Sample,
        scope: &mut TensorScope<'_>,
    ) -> Result<Embedding, ExtractorError> {
        let data = sample.pixels().data();
        let label_index = StubExtractor::label_of_value(data[0] as f32 / 255.0);
        let jitter = data[2] as f32 / 1000.0;

        let buffer = scope.zeros(&[4]);
        buffer.fill(jitter);
        if let Some(v) = buffer.iter_mut().nth(label_index) {
            *v = 1.0;
        }
        Ok(Embedding(buffer.clone()))
    }
}
