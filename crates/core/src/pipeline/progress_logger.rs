use std::time::Instant;

use crate::recognition::domain::training::{TrainingProgress, TrainingSummary};

/// Observer for dataset building and training.
///
/// Decouples the use cases from where progress goes (stdout, a UI, nowhere).
pub trait ProgressLogger {
    /// One more sample has been embedded.
    fn embedding_progress(&mut self, done: usize, total: usize);

    fn epoch(&mut self, progress: &TrainingProgress);

    fn completed(&mut self, summary: &TrainingSummary);

    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards all events. Used by tests and embedders with their own UI.
pub struct NullProgressLogger;

impl ProgressLogger for NullProgressLogger {
    fn embedding_progress(&mut self, _done: usize, _total: usize) {}
    fn epoch(&mut self, _progress: &TrainingProgress) {}
    fn completed(&mut self, _summary: &TrainingSummary) {}
    fn info(&mut self, _message: &str) {}
}

/// CLI logger: throttled embedding progress, one line per epoch and a
/// summary report once training completes.
pub struct StdoutProgressLogger {
    throttle_samples: usize,
    samples_total: usize,
    epochs: Vec<TrainingProgress>,
    finished: Option<TrainingSummary>,
    start_time: Instant,
    messages: Vec<String>,
}

impl StdoutProgressLogger {
    pub fn new(throttle_samples: usize) -> Self {
        Self {
            throttle_samples: throttle_samples.max(1),
            samples_total: 0,
            epochs: Vec::new(),
            finished: None,
            start_time: Instant::now(),
            messages: Vec::new(),
        }
    }

    /// Returns the formatted summary, or `None` before any epoch ran.
    pub fn summary_string(&self) -> Option<String> {
        let last = self.epochs.last()?;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Training summary ({} samples, {}/{} epochs, {elapsed:.1}s total):",
            self.samples_total, last.epochs_completed, last.total_epochs
        )];
        lines.push(format!(
            "  loss {:.4}  accuracy {:.1}%",
            last.loss,
            last.accuracy * 100.0
        ));
        if let (Some(val_loss), Some(val_accuracy)) = (last.val_loss, last.val_accuracy) {
            lines.push(format!(
                "  val_loss {val_loss:.4}  val_accuracy {:.1}%",
                val_accuracy * 100.0
            ));
        }
        if let Some(summary) = &self.finished {
            let labels: Vec<&str> = summary.labels.iter().map(|l| l.as_str()).collect();
            lines.push(format!("  labels: {}", labels.join(", ")));
        }
        Some(lines.join("\n"))
    }

    pub fn epochs(&self) -> &[TrainingProgress] {
        &self.epochs
    }

    pub fn is_completed(&self) -> bool {
        self.finished.is_some()
    }
}

impl Default for StdoutProgressLogger {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressLogger for StdoutProgressLogger {
    fn embedding_progress(&mut self, done: usize, total: usize) {
        self.samples_total = total;
        if total > 0 && (done % self.throttle_samples == 0 || done == total) {
            let pct = done as f64 / total as f64 * 100.0;
            log::info!("Embedding samples: {done}/{total} ({pct:.1}%)");
        }
    }

    fn epoch(&mut self, progress: &TrainingProgress) {
        match (progress.val_loss, progress.val_accuracy) {
            (Some(val_loss), Some(val_accuracy)) => log::info!(
                "Epoch {}/{}: loss {:.5} acc {:.3} val_loss {val_loss:.5} val_acc {val_accuracy:.3}",
                progress.epochs_completed,
                progress.total_epochs,
                progress.loss,
                progress.accuracy
            ),
            _ => log::info!(
                "Epoch {}/{}: loss {:.5} acc {:.3}",
                progress.epochs_completed,
                progress.total_epochs,
                progress.loss,
                progress.accuracy
            ),
        }
        self.epochs.push(progress.clone());
    }

    fn completed(&mut self, summary: &TrainingSummary) {
        self.samples_total = summary.samples;
        self.finished = Some(summary.clone());
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::sample::Label;
    use std::time::Duration;

    fn progress(epoch: usize, val: bool) -> TrainingProgress {
        TrainingProgress {
            epochs_completed: epoch,
            total_epochs: 3,
            loss: 1.0 / epoch as f32,
            accuracy: 0.25 * epoch as f32,
            val_loss: val.then_some(0.9),
            val_accuracy: val.then_some(0.5),
        }
    }

    fn summary() -> TrainingSummary {
        TrainingSummary {
            epochs: 3,
            loss: 0.33,
            accuracy: 0.75,
            val_loss: None,
            val_accuracy: None,
            labels: vec![Label::new("alice").unwrap(), Label::new("bob").unwrap()],
            samples: 12,
            elapsed: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullProgressLogger;
        logger.embedding_progress(1, 10);
        logger.epoch(&progress(1, false));
        logger.completed(&summary());
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_epochs_recorded_in_order() {
        let mut logger = StdoutProgressLogger::default();
        for epoch in 1..=3 {
            logger.epoch(&progress(epoch, false));
        }
        let seen: Vec<usize> = logger.epochs().iter().map(|p| p.epochs_completed).collect();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(!logger.is_completed());
    }

    #[test]
    fn test_empty_summary_returns_none() {
        let logger = StdoutProgressLogger::new(10);
        assert!(logger.summary_string().is_none());
    }

    #[test]
    fn test_summary_reports_last_epoch_and_labels() {
        let mut logger = StdoutProgressLogger::new(10);
        logger.embedding_progress(12, 12);
        logger.epoch(&progress(1, false));
        logger.epoch(&progress(2, false));
        logger.completed(&summary());

        let text = logger.summary_string().unwrap();
        assert!(text.contains("12 samples"));
        assert!(text.contains("2/3 epochs"));
        assert!(text.contains("accuracy 50.0%"));
        assert!(text.contains("labels: alice, bob"));
        assert!(logger.is_completed());
    }

    #[test]
    fn test_summary_includes_validation_metrics() {
        let mut logger = StdoutProgressLogger::new(10);
        logger.epoch(&progress(1, true));
        let text = logger.summary_string().unwrap();
        assert!(text.contains("val_loss 0.9000"));
        assert!(text.contains("val_accuracy 50.0%"));
    }

    #[test]
    fn test_embedding_progress_tracks_total() {
        let mut logger = StdoutProgressLogger::new(4);
        for done in 1..=9 {
            logger.embedding_progress(done, 9);
        }
        assert_eq!(logger.samples_total, 9);
    }

    #[test]
    fn test_info_stores_messages() {
        let mut logger = StdoutProgressLogger::new(10);
        logger.info("hello world");
        assert_eq!(logger.messages, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_default_throttle() {
        assert_eq!(StdoutProgressLogger::default().throttle_samples, 10);
    }
}
