//! Mini-batch training of the head model.
//!
//! [`Trainer::train`] returns a [`TrainingRun`], an iterator that performs
//! exactly one epoch per `next()` call. Control returns to the caller
//! between epochs, so a host loop can interleave rendering, detection or
//! health checks with a long run. The run yields one
//! [`TrainingEvent::Progress`] per epoch and then exactly one terminal
//! event; the new model is installed in the [`HeadSlot`] only on
//! [`TrainingEvent::Completed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{s, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recognition::domain::dataset::{make_rng, Dataset};
use crate::recognition::domain::head_model::HeadModel;
use crate::recognition::domain::head_slot::HeadSlot;
use crate::recognition::domain::optimizer::Adam;
use crate::recognition::domain::sample::Label;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of trailing rows held out for validation, in `[0, 1)`.
    pub validation_split: f64,
    /// Fixes weight initialization and batch order.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-5,
            hidden_units: 100,
            epochs: 20,
            batch_size: 10,
            validation_split: 0.0,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        let invalid = |msg: &str| Err(TrainingError::InvalidConfig(msg.to_string()));
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate must be positive");
        }
        if self.hidden_units == 0 {
            return invalid("hidden_units must be at least 1");
        }
        if self.epochs == 0 {
            return invalid("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return invalid("validation_split must be in [0, 1)");
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("invalid training config: {0}")]
    InvalidConfig(String),
    #[error("a training run is already in progress")]
    TrainingInProgress,
    #[error("validation split leaves no training rows ({rows} rows total)")]
    InsufficientData { rows: usize },
    #[error("training diverged at epoch {epoch} (loss {loss})")]
    Diverged { epoch: usize, loss: f32 },
    #[error("training run already finished")]
    Finished,
}

/// Metrics after one epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingProgress {
    pub epochs_completed: usize,
    pub total_epochs: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
    pub labels: Vec<Label>,
    pub samples: usize,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrainingEvent {
    Progress(TrainingProgress),
    Completed(TrainingSummary),
    Failed(TrainingError),
}

impl TrainingEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrainingEvent::Progress(_))
    }
}

/// Owns the head slot on the write side and serializes training runs.
#[derive(Clone, Debug)]
pub struct Trainer {
    slot: HeadSlot,
    in_flight: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(slot: HeadSlot) -> Self {
        Self {
            slot,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn slot(&self) -> &HeadSlot {
        &self.slot
    }

    pub fn is_training(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts a run over `dataset`.
    ///
    /// Fails with [`TrainingError::TrainingInProgress`] while another run
    /// has not reached its terminal event (or been dropped).
    pub fn train(
        &self,
        dataset: Dataset,
        config: &TrainingConfig,
    ) -> Result<TrainingRun, TrainingError> {
        config.validate()?;
        let val_start = dataset.validation_start(config.validation_split);
        if val_start == 0 {
            return Err(TrainingError::InsufficientData {
                rows: dataset.len(),
            });
        }
        let guard = TrainingGuard::acquire(&self.in_flight)?;

        let mut rng = make_rng(config.seed);
        let model = HeadModel::initialize(
            dataset.embedding_shape(),
            config.hidden_units,
            dataset.labels().to_vec(),
            &mut rng,
        );
        let optimizer = Adam::new(&model, config.learning_rate);
        log::info!(
            "Training head on {} samples ({} for validation), {} labels, {} epochs",
            dataset.len(),
            dataset.len() - val_start,
            dataset.labels().len(),
            config.epochs
        );

        Ok(TrainingRun {
            guard: Some(guard),
            slot: self.slot.clone(),
            config: config.clone(),
            model: Some(model),
            optimizer,
            rng,
            train_rows: (0..val_start).collect(),
            val_start,
            dataset,
            epochs_completed: 0,
            last: None,
            started: Instant::now(),
        })
    }

    /// Installs an externally obtained model (e.g. an import), replacing
    /// the current one. Rejected while a run is in flight.
    pub fn install(&self, model: HeadModel) -> Result<(), TrainingError> {
        let _guard = TrainingGuard::acquire(&self.in_flight)?;
        log::info!("Installing head model with {} labels", model.labels().len());
        self.slot.replace(model);
        Ok(())
    }
}

/// Holds the trainer's in-flight flag; releases it on drop.
#[derive(Debug)]
struct TrainingGuard(Arc<AtomicBool>);

impl TrainingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, TrainingError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TrainingError::TrainingInProgress)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for TrainingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One in-flight training run. See the module docs.
pub struct TrainingRun {
    guard: Option<TrainingGuard>,
    slot: HeadSlot,
    dataset: Dataset,
    config: TrainingConfig,
    model: Option<HeadModel>,
    optimizer: Adam,
    rng: StdRng,
    train_rows: Vec<usize>,
    val_start: usize,
    epochs_completed: usize,
    last: Option<TrainingProgress>,
    started: Instant,
}

impl TrainingRun {
    pub fn total_epochs(&self) -> usize {
        self.config.epochs
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    /// Drives the run to its terminal event, reporting each epoch.
    pub fn finish(
        mut self,
        mut on_progress: impl FnMut(&TrainingProgress),
    ) -> Result<TrainingSummary, TrainingError> {
        for event in self.by_ref() {
            match event {
                TrainingEvent::Progress(p) => on_progress(&p),
                TrainingEvent::Completed(summary) => return Ok(summary),
                TrainingEvent::Failed(e) => return Err(e),
            }
        }
        Err(TrainingError::Finished)
    }

    fn run_epoch(&mut self, model: &mut HeadModel) -> TrainingProgress {
        self.train_rows.shuffle(&mut self.rng);
        let embeddings = self.dataset.embeddings();
        let targets = self.dataset.targets();

        let mut loss_sum = 0.0f32;
        let mut correct = 0;
        for batch in self.train_rows.chunks(self.config.batch_size) {
            let x = embeddings.select(Axis(0), batch);
            let y = targets.select(Axis(0), batch);
            let (metrics, grads) = model.gradients(x.view(), y.view());
            self.optimizer.step(model, &grads);
            loss_sum += metrics.loss * metrics.rows as f32;
            correct += metrics.correct;
        }
        let rows = self.train_rows.len() as f32;

        let (val_loss, val_accuracy) = if self.val_start < self.dataset.len() {
            let m = model.evaluate(
                embeddings.slice(s![self.val_start.., ..]),
                targets.slice(s![self.val_start.., ..]),
            );
            (Some(m.loss), Some(m.correct as f32 / m.rows as f32))
        } else {
            (None, None)
        };

        self.epochs_completed += 1;
        TrainingProgress {
            epochs_completed: self.epochs_completed,
            total_epochs: self.config.epochs,
            loss: loss_sum / rows,
            accuracy: correct as f32 / rows,
            val_loss,
            val_accuracy,
        }
    }

    fn complete(&mut self, model: HeadModel) -> TrainingEvent {
        let last = self.last.take();
        let summary = TrainingSummary {
            epochs: self.epochs_completed,
            loss: last.as_ref().map_or(f32::NAN, |p| p.loss),
            accuracy: last.as_ref().map_or(0.0, |p| p.accuracy),
            val_loss: last.as_ref().and_then(|p| p.val_loss),
            val_accuracy: last.as_ref().and_then(|p| p.val_accuracy),
            labels: model.labels().to_vec(),
            samples: self.dataset.len(),
            elapsed: self.started.elapsed(),
        };
        self.slot.replace(model);
        self.guard = None;
        log::info!(
            "Training finished in {:.1}s: loss {:.4}, accuracy {:.1}%",
            summary.elapsed.as_secs_f64(),
            summary.loss,
            summary.accuracy * 100.0
        );
        TrainingEvent::Completed(summary)
    }
}

impl Iterator for TrainingRun {
    type Item = TrainingEvent;

    fn next(&mut self) -> Option<TrainingEvent> {
        self.guard.as_ref()?;
        let mut model = self.model.take()?;

        if self.epochs_completed >= self.config.epochs {
            return Some(self.complete(model));
        }

        let progress = self.run_epoch(&mut model);
        // A dead ReLU layer can hide infinite weights behind a finite loss.
        if !progress.loss.is_finite() || !model.is_finite() {
            log::warn!(
                "Training diverged at epoch {}; keeping previous head",
                progress.epochs_completed
            );
            self.guard = None;
            return Some(TrainingEvent::Failed(TrainingError::Diverged {
                epoch: progress.epochs_completed,
                loss: progress.loss,
            }));
        }

        log::debug!(
            "Epoch {}/{}: loss {:.4}, accuracy {:.3}",
            progress.epochs_completed,
            progress.total_epochs,
            progress.loss,
            progress.accuracy
        );
        self.model = Some(model);
        self.last = Some(progress.clone());
        Some(TrainingEvent::Progress(progress))
    }
}

impl Drop for TrainingRun {
    fn drop(&mut self) {
        if self.guard.is_some() {
            log::warn!(
                "Training run dropped after {}/{} epochs; previous head kept",
                self.epochs_completed,
                self.config.epochs
            );
        }
    }
}
