use thiserror::Error;

use crate::pipeline::progress_logger::ProgressLogger;
use crate::recognition::domain::dataset::{Dataset, DatasetBuilder, DatasetError};
use crate::recognition::domain::feature_extractor::FeatureExtractor;
use crate::recognition::domain::image_store::LabeledImageStore;
use crate::recognition::domain::training::{
    Trainer, TrainingConfig, TrainingError, TrainingRun, TrainingSummary,
};
use crate::shared::tensor_arena::TensorArena;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Training(#[from] TrainingError),
}

/// Training pipeline: store → embeddings dataset → head training run.
pub struct TrainHeadUseCase {
    extractor: Box<dyn FeatureExtractor>,
    trainer: Trainer,
    arena: TensorArena,
}

impl TrainHeadUseCase {
    pub fn new(extractor: Box<dyn FeatureExtractor>, trainer: Trainer) -> Self {
        Self {
            extractor,
            trainer,
            arena: TensorArena::new(),
        }
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    pub fn arena(&self) -> &TensorArena {
        &self.arena
    }

    /// Embeds every sample and starts a run without driving it.
    ///
    /// Rows are shuffled before the split when a validation fraction is
    /// configured, so the held-out rows are not all from the last label.
    pub fn start(
        &mut self,
        store: &LabeledImageStore,
        config: &TrainingConfig,
        logger: &mut dyn ProgressLogger,
    ) -> Result<TrainingRun, TrainError> {
        config.validate()?;
        if self.trainer.is_training() {
            return Err(TrainingError::TrainingInProgress.into());
        }

        let dataset = self.build_dataset(store, config, logger)?;
        logger.info(&format!(
            "Embedded {} samples for {} labels",
            dataset.len(),
            dataset.labels().len()
        ));
        Ok(self.trainer.train(dataset, config)?)
    }

    /// Builds the dataset and trains to completion, reporting every epoch.
    pub fn execute(
        &mut self,
        store: &LabeledImageStore,
        config: &TrainingConfig,
        logger: &mut dyn ProgressLogger,
    ) -> Result<TrainingSummary, TrainError> {
        let run = self.start(store, config, logger)?;
        let summary = run.finish(|progress| logger.epoch(progress))?;
        logger.completed(&summary);
        logger.summary();
        Ok(summary)
    }

    fn build_dataset(
        &mut self,
        store: &LabeledImageStore,
        config: &TrainingConfig,
        logger: &mut dyn ProgressLogger,
    ) -> Result<Dataset, DatasetError> {
        let mut builder = DatasetBuilder::new(&self.arena).with_progress(Box::new(|done, total| {
            logger.embedding_progress(done, total);
            true
        }));
        if config.validation_split > 0.0 {
            builder = builder.shuffled(config.seed);
        }
        builder.build(store, self.extractor.as_mut())
    }
}
