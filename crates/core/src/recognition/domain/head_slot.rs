use std::sync::{Arc, PoisonError, RwLock};

use crate::recognition::domain::head_model::HeadModel;

/// The single current head model, shared by handle.
///
/// Readers take an `Arc` snapshot and never observe a partially replaced
/// model; the trainer swaps in whole models only.
#[derive(Clone, Debug, Default)]
pub struct HeadSlot {
    inner: Arc<RwLock<Option<Arc<HeadModel>>>>,
}

impl HeadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<HeadModel>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_trained(&self) -> bool {
        self.current().is_some()
    }

    /// Installs `model`, returning the one it replaced.
    pub(crate) fn replace(&self, model: HeadModel) -> Option<Arc<HeadModel>> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.replace(Arc::new(model))
    }
}
