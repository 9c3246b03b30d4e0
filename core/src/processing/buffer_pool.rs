use crate::prelude::StageError;

/// Scoped scratch buffers with a hard ceiling on count and length.
pub struct BufferPool {
    buffers: Vec<Vec<f64>>,
    outstanding: usize,
    max_buffers: usize,
    max_length: usize,
}

impl BufferPool {
    pub fn with_capacity(max_buffers: usize, max_length: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_buffers),
            outstanding: 0,
            max_buffers,
            max_length,
        }
    }

    /// Hands out a zeroed buffer of `length`, reusing a returned one when possible.
    pub fn checkout(&mut self, length: usize) -> Result<Vec<f64>, StageError> {
        if length > self.max_length {
            return Err(StageError::CapacityExceeded(format!(
                "{} samples requested, limit {}",
                length, self.max_length
            )));
        }
        let buffer = if let Some(mut buffer) = self.buffers.pop() {
            buffer.clear();
            buffer.resize(length, 0.0);
            buffer
        } else if self.outstanding < self.max_buffers {
            vec![0.0; length]
        } else {
            return Err(StageError::CapacityExceeded("scratch pool depleted".into()));
        };
        self.outstanding += 1;
        Ok(buffer)
    }

    pub fn release(&mut self, buffer: Vec<f64>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_buffers {
            self.buffers.push(buffer);
        }
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        self.outstanding = 0;
    }
}
