//! Scoped tensor buffers
//!
//! Every intermediate buffer of a frame's inference is taken from a
//! [`TensorArena`] and handed out as a [`ScopedTensor`]. The buffer is
//! released when the guard drops, whichever path the frame takes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks live tensor buffers
#[derive(Debug, Clone, Default)]
pub struct TensorArena {
    live: Arc<AtomicUsize>,
}

impl TensorArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed tensor of the given shape
    pub fn zeros(&self, shape: &[usize]) -> ScopedTensor {
        let len = shape.iter().product();
        self.wrap(shape.to_vec(), vec![0.0; len])
    }

    /// Take ownership of an existing buffer
    pub fn wrap(&self, shape: Vec<usize>, data: Vec<f32>) -> ScopedTensor {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        self.live.fetch_add(1, Ordering::AcqRel);
        ScopedTensor {
            shape,
            data,
            live: self.live.clone(),
        }
    }

    /// Number of tensors not yet released
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// A float tensor owned by an arena, released on drop
#[derive(Debug)]
pub struct ScopedTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    live: Arc<AtomicUsize>,
}

impl ScopedTensor {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copy out the buffer for handing to a runtime that needs ownership
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Leading (batch) dimension
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }
}

impl Drop for ScopedTensor {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
