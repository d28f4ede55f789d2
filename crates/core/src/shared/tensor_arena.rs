//! Scoped ownership for intermediate tensors.
//!
//! Feature extraction allocates buffers (normalized pixels, batched input)
//! that are large compared to the embedding it produces. Every extraction
//! runs inside a [`TensorScope`]; buffers allocated through the scope live
//! exactly as long as the scope and are released when it drops, including
//! when extraction bails out with an error. The owning [`TensorArena`] keeps
//! counters so callers can assert that nothing outlives its scope.

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{ArrayD, IxDyn};

#[derive(Debug, Default)]
pub struct TensorArena {
    live_buffers: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_buffers: AtomicUsize,
    total_allocations: AtomicUsize,
}

/// Snapshot of arena accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub live_buffers: usize,
    pub live_bytes: usize,
    pub peak_buffers: usize,
    pub total_allocations: usize,
}

impl TensorArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope. All buffers it hands out are released when it drops.
    pub fn scope(&self) -> TensorScope<'_> {
        TensorScope {
            arena: self,
            buffers: Vec::new(),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            live_buffers: self.live_buffers.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            peak_buffers: self.peak_buffers.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    fn acquire(&self, bytes: usize) {
        let live = self.live_buffers.fetch_add(1, Ordering::Relaxed) + 1;
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.peak_buffers.fetch_max(live, Ordering::Relaxed);
    }

    fn release(&self, buffers: usize, bytes: usize) {
        self.live_buffers.fetch_sub(buffers, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Allocation scope for one unit of work (one embedding computation).
pub struct TensorScope<'a> {
    arena: &'a TensorArena,
    buffers: Vec<ArrayD<f32>>,
}

impl TensorScope<'_> {
    /// Allocates a zero-filled buffer owned by this scope.
    pub fn zeros(&mut self, shape: &[usize]) -> &mut ArrayD<f32> {
        self.adopt(ArrayD::zeros(IxDyn(shape)))
    }

    /// Moves an already-built buffer into this scope.
    pub fn adopt(&mut self, buffer: ArrayD<f32>) -> &mut ArrayD<f32> {
        self.arena.acquire(buffer_bytes(&buffer));
        self.buffers.push(buffer);
        let last = self.buffers.len() - 1;
        &mut self.buffers[last]
    }

    /// Number of buffers currently owned by this scope.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for TensorScope<'_> {
    fn drop(&mut self) {
        let bytes = self.buffers.iter().map(buffer_bytes).sum();
        self.arena.release(self.buffers.len(), bytes);
        self.buffers.clear();
    }
}

fn buffer_bytes(buffer: &ArrayD<f32>) -> usize {
    buffer.len() * std::mem::size_of::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_releases_on_drop() {
        let arena = TensorArena::new();
        {
            let mut scope = arena.scope();
            scope.zeros(&[1, 4, 4, 3]);
            scope.zeros(&[2]);
            assert_eq!(scope.len(), 2);
            assert_eq!(arena.live_buffers(), 2);
            assert_eq!(arena.stats().live_bytes, (48 + 2) * 4);
        }
        let stats = arena.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.peak_buffers, 2);
        assert_eq!(stats.total_allocations, 2);
    }

    #[test]
    fn test_scope_releases_on_early_return() {
        fn failing(arena: &TensorArena) -> Result<(), &'static str> {
            let mut scope = arena.scope();
            scope.zeros(&[8, 8]);
            Err("boom")
        }

        let arena = TensorArena::new();
        assert!(failing(&arena).is_err());
        assert_eq!(arena.live_buffers(), 0);
    }

    #[test]
    fn test_sequential_scopes_do_not_accumulate() {
        let arena = TensorArena::new();
        for _ in 0..5 {
            let mut scope = arena.scope();
            scope.zeros(&[16]);
        }
        let stats = arena.stats();
        assert_eq!(stats.peak_buffers, 1);
        assert_eq!(stats.total_allocations, 5);
    }

    #[test]
    fn test_zeros_returns_writable_buffer() {
        let arena = TensorArena::new();
        let mut scope = arena.scope();
        let buf = scope.zeros(&[2, 2]);
        buf[[1, 1]] = 3.0;
        assert_eq!(buf[[1, 1]], 3.0);
        assert_eq!(buf.shape(), &[2, 2]);
    }
}
