use std::collections::BTreeMap;

use thiserror::Error;

use crate::recognition::domain::sample::{Label, Sample};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("label {0} already exists")]
    DuplicateLabel(Label),
    #[error("unknown label {0}")]
    UnknownLabel(Label),
    #[error("sample is {actual:?} with {channels} channels, expected {expected}x{expected} RGB")]
    SampleSize {
        expected: u32,
        actual: (u32, u32),
        channels: u8,
    },
}

/// Session-scoped collection of labeled face crops.
///
/// Every sample has the same square RGB layout, so the dataset builder can
/// feed them straight to the extractor. Iteration is in sorted label order.
#[derive(Clone, Debug)]
pub struct LabeledImageStore {
    sample_size: u32,
    labels: BTreeMap<Label, Vec<Sample>>,
}

impl LabeledImageStore {
    pub fn new(sample_size: u32) -> Self {
        Self {
            sample_size,
            labels: BTreeMap::new(),
        }
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn add_label(&mut self, label: Label) -> Result<(), StoreError> {
        if self.labels.contains_key(&label) {
            return Err(StoreError::DuplicateLabel(label));
        }
        self.labels.insert(label, Vec::new());
        Ok(())
    }

    pub fn contains(&self, label: &Label) -> bool {
        self.labels.contains_key(label)
    }

    /// Appends a sample under an existing label.
    pub fn add_sample(&mut self, label: &Label, sample: Sample) -> Result<usize, StoreError> {
        let pixels = sample.pixels();
        if pixels.size() != (self.sample_size, self.sample_size) || pixels.channels() != 3 {
            return Err(StoreError::SampleSize {
                expected: self.sample_size,
                actual: pixels.size(),
                channels: pixels.channels(),
            });
        }
        let samples = self
            .labels
            .get_mut(label)
            .ok_or_else(|| StoreError::UnknownLabel(label.clone()))?;
        samples.push(sample);
        Ok(samples.len())
    }

    pub fn remove_label(&mut self, label: &Label) -> Result<Vec<Sample>, StoreError> {
        self.labels
            .remove(label)
            .ok_or_else(|| StoreError::UnknownLabel(label.clone()))
    }

    pub fn samples(&self, label: &Label) -> Option<&[Sample]> {
        self.labels.get(label).map(Vec::as_slice)
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Label, &[Sample])> {
        self.labels.iter().map(|(l, s)| (l, s.as_slice()))
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.labels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }
}
