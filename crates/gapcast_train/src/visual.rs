//! Sequence visualization sinks.
//!
//! Predict hands each visualized sample to a [`SequenceVisualizer`] as a host
//! `(T, C, H, W)` array and a destination name such as `predict_3`.

use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView4};
use ndarray_npy::write_npy;

use crate::error::{Result, TrainError};

/// Receives sequences for inspection.
pub trait SequenceVisualizer {
    /// Render or store one `(T, C, H, W)` sequence under `destination`.
    ///
    /// # Errors
    ///
    /// Failures propagate to the predict step.
    fn visualise(&mut self, sequence: ArrayView4<'_, f32>, destination: &str) -> Result<()>;
}

impl<V: SequenceVisualizer + ?Sized> SequenceVisualizer for &mut V {
    fn visualise(&mut self, sequence: ArrayView4<'_, f32>, destination: &str) -> Result<()> {
        (**self).visualise(sequence, destination)
    }
}

/// Writes each sequence to `<dir>/<destination>.npy`.
#[derive(Debug, Clone)]
pub struct NpyVisualizer {
    dir: PathBuf,
}

impl NpyVisualizer {
    /// Visualizer writing into `dir`, created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a destination is written to.
    pub fn path_for(&self, destination: &str) -> PathBuf {
        self.dir.join(format!("{destination}.npy"))
    }
}

impl SequenceVisualizer for NpyVisualizer {
    fn visualise(&mut self, sequence: ArrayView4<'_, f32>, destination: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(destination);
        write_npy(&path, &sequence)
            .map_err(|e| TrainError::Visualization(format!("{}: {e}", path.display())))
    }
}

/// Keeps every sequence in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryVisualizer {
    /// `(destination, sequence)` in arrival order.
    pub frames: Vec<(String, Array4<f32>)>,
}

impl MemoryVisualizer {
    /// Create an empty visualizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Destinations received so far.
    pub fn destinations(&self) -> Vec<&str> {
        self.frames.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl SequenceVisualizer for MemoryVisualizer {
    fn visualise(&mut self, sequence: ArrayView4<'_, f32>, destination: &str) -> Result<()> {
        self.frames.push((destination.to_string(), sequence.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::read_npy;

    #[test]
    fn test_npy_visualizer_writes_file() {
        let dir = std::env::temp_dir().join(format!("gapcast_vis_{}", std::process::id()));
        let mut visualizer = NpyVisualizer::new(&dir);
        let sequence = Array4::from_shape_fn((3, 1, 2, 2), |(t, _, i, j)| (t + i + j) as f32);

        visualizer.visualise(sequence.view(), "input_0").unwrap();
        let back: Array4<f32> = read_npy(visualizer.path_for("input_0")).unwrap();
        assert_eq!(back, sequence);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_memory_visualizer() {
        let mut visualizer = MemoryVisualizer::new();
        let sequence = Array4::<f32>::zeros((2, 1, 2, 2));
        visualizer.visualise(sequence.view(), "diff_1").unwrap();
        assert_eq!(visualizer.destinations(), vec!["diff_1"]);
    }
}
