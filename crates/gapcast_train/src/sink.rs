//! Scalar metric sinks.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};

/// Destination for named scalars such as `train/loss`.
///
/// Logging is fire-and-forget: a sink never fails the step that produced the value.
pub trait MetricSink {
    /// Record `value` for `name` at `step`.
    fn log_scalar(&mut self, name: &str, value: f64, step: usize);
}

impl<S: MetricSink + ?Sized> MetricSink for &mut S {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        (**self).log_scalar(name, value, step);
    }
}

impl<A: MetricSink, C: MetricSink> MetricSink for (A, C) {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        self.0.log_scalar(name, value, step);
        self.1.log_scalar(name, value, step);
    }
}

/// Emits every scalar as a `tracing` debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        tracing::debug!(metric = name, value, step, "scalar");
    }
}

/// In-memory record of every logged scalar, serializable to JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricHistory {
    #[serde(with = "crate::json::series")]
    series: BTreeMap<String, Vec<(usize, f64)>>,
}

impl MetricHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(step, value)` pairs for a name, in logging order.
    pub fn series(&self, name: &str) -> &[(usize, f64)] {
        self.series.get(name).map_or(&[], Vec::as_slice)
    }

    /// Values logged for a name.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.series(name).iter().map(|&(_, v)| v).collect()
    }

    /// Most recent value for a name.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.series(name).last().map(|&(_, v)| v)
    }

    /// Mean of the values logged for a name.
    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.series(name);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().map(|&(_, v)| v).sum::<f64>() / values.len() as f64)
    }

    /// Names with at least one value.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Write the history as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| TrainError::Serialization(e.to_string()))
    }

    /// Read a history written by [`MetricHistory::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| TrainError::Serialization(e.to_string()))
    }
}

impl MetricSink for MetricHistory {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        self.series
            .entry(name.to_string())
            .or_default()
            .push((step, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_records_in_order() {
        let mut history = MetricHistory::new();
        history.log_scalar("train/loss", 2.0, 0);
        history.log_scalar("train/loss", 1.0, 1);
        history.log_scalar("val/loss", 1.5, 0);

        assert_eq!(history.values("train/loss"), vec![2.0, 1.0]);
        assert_eq!(history.last("train/loss"), Some(1.0));
        assert_eq!(history.mean("train/loss"), Some(1.5));
        assert_eq!(history.last("test/loss"), None);
        assert_eq!(history.names().collect::<Vec<_>>(), vec!["train/loss", "val/loss"]);
    }

    #[test]
    fn test_tuple_sink_fans_out() {
        let mut pair = (MetricHistory::new(), TracingSink);
        pair.log_scalar("val/mse", 0.25, 3);
        assert_eq!(pair.0.series("val/mse"), &[(3, 0.25)]);
    }

    #[test]
    fn test_history_save_load() {
        let path = std::env::temp_dir().join(format!("gapcast_history_{}.json", std::process::id()));
        let mut history = MetricHistory::new();
        history.log_scalar("test/ssim", 0.9, 0);
        history.save(&path).unwrap();

        let loaded = MetricHistory::load(&path).unwrap();
        assert_eq!(loaded, history);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_history_save_load_infinite_psnr() {
        let path = std::env::temp_dir().join(format!("gapcast_history_inf_{}.json", std::process::id()));
        let mut history = MetricHistory::new();
        history.log_scalar("test/psnr", f64::INFINITY, 0);
        history.log_scalar("test/psnr", 31.5, 1);
        history.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"inf\""));
        assert!(!text.contains("null"));

        let loaded = MetricHistory::load(&path).unwrap();
        assert_eq!(loaded.values("test/psnr"), vec![f64::INFINITY, 31.5]);
        std::fs::remove_file(path).ok();
    }
}
