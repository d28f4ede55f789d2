use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

use crate::recognition::domain::feature_extractor::{ExtractorError, FeatureExtractor};
use crate::recognition::domain::image_store::LabeledImageStore;
use crate::recognition::domain::sample::Label;
use crate::shared::tensor_arena::TensorArena;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error(
        "need at least 2 labels, each with at least one sample (have {labels} labels, {} empty)",
        empty_labels.len()
    )]
    InsufficientData {
        labels: usize,
        empty_labels: Vec<Label>,
    },
    #[error("failed to embed sample {index} of {label}: {source}")]
    Extraction {
        label: Label,
        index: usize,
        #[source]
        source: ExtractorError,
    },
    #[error("extractor returned embedding of shape {actual:?}, expected {expected:?}")]
    EmbeddingShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("{rows} embedding rows but {targets} target rows")]
    RowMismatch { rows: usize, targets: usize },
    #[error("dataset build cancelled")]
    Cancelled,
}

/// Training-ready embeddings with one-hot targets.
///
/// Row `i` of `embeddings` is the flattened embedding of one sample and row
/// `i` of `targets` its one-hot label over `labels`. The label ordering is
/// fixed here and travels on to the head model.
#[derive(Clone, Debug)]
pub struct Dataset {
    embeddings: Array2<f32>,
    targets: Array2<f32>,
    labels: Vec<Label>,
    embedding_shape: Vec<usize>,
}

impl Dataset {
    pub fn new(
        embeddings: Array2<f32>,
        targets: Array2<f32>,
        labels: Vec<Label>,
        embedding_shape: Vec<usize>,
    ) -> Result<Self, DatasetError> {
        if embeddings.nrows() != targets.nrows() {
            return Err(DatasetError::RowMismatch {
                rows: embeddings.nrows(),
                targets: targets.nrows(),
            });
        }
        let flat: usize = embedding_shape.iter().product();
        if embeddings.ncols() != flat {
            return Err(DatasetError::EmbeddingShape {
                expected: embedding_shape,
                actual: vec![embeddings.ncols()],
            });
        }
        if labels.len() < 2 || targets.ncols() != labels.len() {
            return Err(DatasetError::InsufficientData {
                labels: labels.len(),
                empty_labels: Vec::new(),
            });
        }
        Ok(Self {
            embeddings,
            targets,
            labels,
            embedding_shape,
        })
    }

    pub fn len(&self) -> usize {
        self.embeddings.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn embedding_shape(&self) -> &[usize] {
        &self.embedding_shape
    }

    pub fn embedding_len(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.embeddings.view()
    }

    pub fn targets(&self) -> ArrayView2<'_, f32> {
        self.targets.view()
    }

    pub fn embedding(&self, row: usize) -> ArrayView1<'_, f32> {
        self.embeddings.row(row)
    }

    /// Label index of each row.
    pub fn target_indices(&self) -> Vec<usize> {
        self.targets.rows().into_iter().map(argmax).collect()
    }

    /// Permutes rows, keeping each embedding paired with its target.
    pub fn shuffle(&mut self, rng: &mut StdRng) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.embeddings = self.embeddings.select(Axis(0), &order);
        self.targets = self.targets.select(Axis(0), &order);
    }

    /// First row of the validation tail for `validation_split`.
    pub fn validation_start(&self, validation_split: f64) -> usize {
        let n = self.len();
        ((n as f64) * (1.0 - validation_split)).floor() as usize
    }
}

/// Index of the largest value; first wins on ties.
pub(crate) fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Progress callback: `(samples_done, samples_total)`. Return `false` to
/// cancel the build.
pub type BuildProgressFn<'a> = Box<dyn FnMut(usize, usize) -> bool + 'a>;

/// Turns a [`LabeledImageStore`] into a [`Dataset`], one sample at a time.
///
/// Each extraction runs in its own [`TensorScope`](crate::shared::tensor_arena::TensorScope)
/// that is dropped before the next sample starts, so at most one sample's
/// intermediate buffers are alive at any point. Samples are embedded in
/// label-then-sample order; rows are only permuted afterwards when a
/// shuffle was requested.
pub struct DatasetBuilder<'a> {
    arena: &'a TensorArena,
    shuffle: Option<Option<u64>>,
    on_progress: Option<BuildProgressFn<'a>>,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(arena: &'a TensorArena) -> Self {
        Self {
            arena,
            shuffle: None,
            on_progress: None,
        }
    }

    /// Shuffle rows after embedding. `None` seeds from the OS.
    pub fn shuffled(mut self, seed: Option<u64>) -> Self {
        self.shuffle = Some(seed);
        self
    }

    pub fn with_progress(mut self, on_progress: BuildProgressFn<'a>) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn build(
        mut self,
        store: &LabeledImageStore,
        extractor: &mut dyn FeatureExtractor,
    ) -> Result<Dataset, DatasetError> {
        let labels: Vec<Label> = store.labels().cloned().collect();
        let empty_labels: Vec<Label> = store
            .iter()
            .filter(|(_, samples)| samples.is_empty())
            .map(|(label, _)| label.clone())
            .collect();
        if labels.len() < 2 || !empty_labels.is_empty() {
            return Err(DatasetError::InsufficientData {
                labels: labels.len(),
                empty_labels,
            });
        }

        let expected_shape = extractor.embedding_shape().to_vec();
        let flat_len = extractor.embedding_len();
        let total = store.sample_count();
        let mut embeddings = Array2::<f32>::zeros((total, flat_len));
        let mut targets = Array2::<f32>::zeros((total, labels.len()));

        let mut row = 0;
        for (label_index, label) in labels.iter().enumerate() {
            let samples = store.samples(label).unwrap_or_default();
            for (index, sample) in samples.iter().enumerate() {
                {
                    let mut scope = self.arena.scope();
                    let embedding = extractor.extract(sample, &mut scope).map_err(|source| {
                        DatasetError::Extraction {
                            label: label.clone(),
                            index,
                            source,
                        }
                    })?;
                    if embedding.shape() != expected_shape.as_slice() {
                        return Err(DatasetError::EmbeddingShape {
                            expected: expected_shape,
                            actual: embedding.shape().to_vec(),
                        });
                    }
                    for (dst, v) in embeddings.row_mut(row).iter_mut().zip(embedding.values()) {
                        *dst = v;
                    }
                }
                targets[[row, label_index]] = 1.0;
                row += 1;
                log::trace!("Embedded {label} sample {index} ({row}/{total})");

                if let Some(on_progress) = self.on_progress.as_mut() {
                    if !on_progress(row, total) {
                        log::info!("Dataset build cancelled after {row}/{total} samples");
                        return Err(DatasetError::Cancelled);
                    }
                }
            }
        }

        let mut dataset = Dataset::new(embeddings, targets, labels, expected_shape)?;
        if let Some(seed) = self.shuffle {
            dataset.shuffle(&mut make_rng(seed));
        }
        log::debug!(
            "Built dataset: {} samples, {} labels, embedding {:?}",
            dataset.len(),
            dataset.labels().len(),
            dataset.embedding_shape()
        );
        Ok(dataset)
    }
}
