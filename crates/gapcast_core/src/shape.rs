//! Sequence shape metadata.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Shape of a single frame: a multi-channel spatial grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameShape {
    /// Number of channels per grid cell.
    pub channels: usize,
    /// Grid height.
    pub height: usize,
    /// Grid width.
    pub width: usize,
}

impl FrameShape {
    /// Create a new frame shape.
    #[must_use]
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of scalar values in one frame.
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// Shape of a batched sequence tensor.
///
/// Follows the convention `(B, T, C, H, W)`:
/// - `B`: Batch size
/// - `T`: Time steps
/// - `C`, `H`, `W`: Frame channels and grid size
///
/// ```rust
/// use gapcast_core::{FrameShape, SequenceShape};
///
/// let shape = SequenceShape::new(4, 10, FrameShape::new(1, 16, 16));
/// assert_eq!(shape.as_array(), [4, 10, 1, 16, 16]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceShape {
    /// Batch size.
    pub batch: usize,
    /// Number of time steps.
    pub steps: usize,
    /// Per-frame shape.
    pub frame: FrameShape,
}

impl SequenceShape {
    /// Create a new sequence shape.
    #[must_use]
    pub const fn new(batch: usize, steps: usize, frame: FrameShape) -> Self {
        Self {
            batch,
            steps,
            frame,
        }
    }

    /// Build from burn tensor dimensions.
    #[must_use]
    pub const fn from_dims(dims: [usize; 5]) -> Self {
        Self::new(dims[0], dims[1], FrameShape::new(dims[2], dims[3], dims[4]))
    }

    /// Build from a dynamic dimension slice (e.g. an ndarray shape).
    ///
    /// # Errors
    ///
    /// Returns an error if the slice does not contain exactly 5 dimensions.
    pub fn from_slice(dims: &[usize]) -> Result<Self> {
        match dims {
            [b, t, c, h, w] => Ok(Self::new(*b, *t, FrameShape::new(*c, *h, *w))),
            _ => Err(CoreError::InvalidShape {
                expected: "(batch, steps, channels, height, width)".to_string(),
                got: format!("{dims:?}"),
            }),
        }
    }

    /// Dimensions in burn order.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 5] {
        [
            self.batch,
            self.steps,
            self.frame.channels,
            self.frame.height,
            self.frame.width,
        ]
    }

    /// Same shape with a different number of steps.
    #[must_use]
    pub const fn with_steps(&self, steps: usize) -> Self {
        Self::new(self.batch, steps, self.frame)
    }

    /// Total number of scalar values.
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.batch * self.steps * self.frame.numel()
    }
}
