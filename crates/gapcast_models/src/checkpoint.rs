//! Checkpoint persistence for pretrained submodules.
//!
//! Pretrained autoencoders are stored with burn's named MessagePack recorder,
//! plus a JSON sidecar describing what was saved. A [`CheckpointRef`] names a
//! checkpoint and the architecture it must contain; a [`CheckpointStore`]
//! turns that reference into a record.
//!
//! # Example
//!
//! ```rust,ignore
//! use gapcast_models::checkpoint::{save_model, CheckpointMetadata, CheckpointRef, FileCheckpointStore};
//!
//! save_model(&autoencoder, "runs/ae")?;
//! CheckpointMetadata::new("autoencoder").with_config(&config).save_beside("runs/ae")?;
//!
//! let reference = CheckpointRef::new("runs/ae", "autoencoder");
//! let frozen = FrozenAutoEncoder::load(&config, &FileCheckpointStore, &reference, &device)?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use serde::{Deserialize, Serialize};

use crate::autoencoder::{AutoEncoder, AutoEncoderRecord};

/// Architecture label written by the autoencoder pretraining stage.
pub const AUTOENCODER_ARCH: &str = "autoencoder";

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Error saving checkpoint.
    #[error("Failed to save checkpoint: {0}")]
    Save(String),

    /// Error loading checkpoint.
    #[error("Failed to load checkpoint: {0}")]
    Load(String),

    /// The checkpoint holds a different architecture than requested.
    #[error("Checkpoint {path} holds '{found}', expected '{expected}'")]
    ArchMismatch {
        /// Checkpoint path.
        path: String,
        /// Selector of the reference.
        expected: String,
        /// Architecture recorded in the metadata.
        found: String,
    },

    /// Stored parameter shapes do not match the configured module.
    #[error("Checkpoint parameter {index} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Position of the parameter in visit order.
        index: usize,
        /// Shape required by the configured module.
        expected: Vec<usize>,
        /// Shape found in the checkpoint.
        got: Vec<usize>,
    },

    /// Stored parameter count does not match the configured module.
    #[error("Checkpoint has {got} parameters, expected {expected}")]
    ParamCount {
        /// Count required by the configured module.
        expected: usize,
        /// Count found in the checkpoint.
        got: usize,
    },
}

/// Reference to a checkpoint: where it lives and what it must contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointRef {
    /// Path of the checkpoint, with or without the `.mpk` extension.
    pub path: PathBuf,
    /// Expected architecture label.
    pub selector: String,
}

impl CheckpointRef {
    /// Create a reference.
    pub fn new(path: impl Into<PathBuf>, selector: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            selector: selector.into(),
        }
    }

    /// Reference to a pretrained autoencoder.
    pub fn autoencoder(path: impl Into<PathBuf>) -> Self {
        Self::new(path, AUTOENCODER_ARCH)
    }

    /// Path of the JSON metadata sidecar.
    pub fn metadata_path(&self) -> PathBuf {
        metadata_path(&self.path)
    }
}

fn metadata_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Source of pretrained autoencoder records.
pub trait CheckpointStore<B: Backend> {
    /// Load the record named by `reference` onto `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint is missing, unreadable, or holds a
    /// different architecture.
    fn load(&self, reference: &CheckpointRef, device: &B::Device) -> Result<AutoEncoderRecord<B>>;
}

/// Reads checkpoints written by [`save_model`] from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCheckpointStore;

impl<B: Backend> CheckpointStore<B> for FileCheckpointStore {
    fn load(&self, reference: &CheckpointRef, device: &B::Device) -> Result<AutoEncoderRecord<B>> {
        let sidecar = reference.metadata_path();
        if sidecar.exists() {
            let metadata = CheckpointMetadata::load(&sidecar)?;
            if metadata.arch != reference.selector {
                return Err(CheckpointError::ArchMismatch {
                    path: reference.path.display().to_string(),
                    expected: reference.selector.clone(),
                    found: metadata.arch,
                });
            }
        }

        load_record::<B, AutoEncoder<B>>(&reference.path, device)
    }
}

/// Hands over autoencoders trained earlier in the same process.
#[derive(Debug, Clone)]
pub struct MemoryCheckpointStore<B: Backend> {
    entries: HashMap<PathBuf, (String, AutoEncoder<B>)>,
}

impl<B: Backend> MemoryCheckpointStore<B> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a module under a reference.
    pub fn insert(&mut self, reference: &CheckpointRef, model: AutoEncoder<B>) {
        self.entries
            .insert(reference.path.clone(), (reference.selector.clone(), model));
    }

    /// Number of stored modules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<B: Backend> Default for MemoryCheckpointStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> CheckpointStore<B> for MemoryCheckpointStore<B> {
    fn load(&self, reference: &CheckpointRef, device: &B::Device) -> Result<AutoEncoderRecord<B>> {
        let (arch, model) = self.entries.get(&reference.path).ok_or_else(|| {
            CheckpointError::Load(format!("no checkpoint at {}", reference.path.display()))
        })?;
        if *arch != reference.selector {
            return Err(CheckpointError::ArchMismatch {
                path: reference.path.display().to_string(),
                expected: reference.selector.clone(),
                found: arch.clone(),
            });
        }
        Ok(model.clone().to_device(device).into_record())
    }
}

/// Save a model to a named MessagePack checkpoint.
///
/// The recorder sets the `.mpk` extension on `path`.
pub fn save_model<B, M>(model: &M, path: impl AsRef<Path>) -> Result<()>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    Recorder::<B>::record(&recorder, model.clone().into_record(), path.as_ref().to_path_buf())
        .map_err(|e| CheckpointError::Save(e.to_string()))
}

/// Load a model record from a named MessagePack checkpoint.
pub fn load_record<B, M>(path: impl AsRef<Path>, device: &B::Device) -> Result<M::Record>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    Recorder::<B>::load(&recorder, path.as_ref().to_path_buf(), device)
        .map_err(|e| CheckpointError::Load(e.to_string()))
}

#[derive(Default)]
struct ShapeCollector {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

fn param_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut collector = ShapeCollector::default();
    module.visit(&mut collector);
    collector.shapes
}

/// Load `record` into `module`, refusing any parameter whose shape differs.
///
/// Nothing is partially loaded: on error the configured module is dropped.
///
/// # Errors
///
/// Returns [`CheckpointError::ShapeMismatch`] or [`CheckpointError::ParamCount`].
pub fn load_validated<B: Backend, M: Module<B>>(module: M, record: M::Record) -> Result<M> {
    let expected = param_shapes::<B, _>(&module);
    let loaded = module.load_record(record);
    let got = param_shapes::<B, _>(&loaded);

    if expected.len() != got.len() {
        return Err(CheckpointError::ParamCount {
            expected: expected.len(),
            got: got.len(),
        });
    }
    if let Some((index, (e, g))) = expected
        .iter()
        .zip(&got)
        .enumerate()
        .find(|(_, (e, g))| e != g)
    {
        return Err(CheckpointError::ShapeMismatch {
            index,
            expected: e.clone(),
            got: g.clone(),
        });
    }

    Ok(loaded)
}

/// Model checkpoint metadata, stored as a JSON sidecar next to the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Model architecture name.
    pub arch: String,
    /// Model configuration as JSON.
    pub config_json: String,
    /// Training epoch (if applicable).
    pub epoch: Option<usize>,
    /// Validation loss (if applicable).
    pub val_loss: Option<f32>,
    /// Additional metadata.
    pub extra: HashMap<String, String>,
}

impl CheckpointMetadata {
    /// Create new metadata for a model.
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            config_json: String::new(),
            epoch: None,
            val_loss: None,
            extra: HashMap::new(),
        }
    }

    /// Set the config JSON.
    #[must_use]
    pub fn with_config<C: Serialize>(mut self, config: &C) -> Self {
        self.config_json = serde_json::to_string(config).unwrap_or_default();
        self
    }

    /// Set the training epoch.
    #[must_use]
    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// Set the validation loss.
    #[must_use]
    pub fn with_val_loss(mut self, loss: f32) -> Self {
        self.val_loss = Some(loss);
        self
    }

    /// Add extra metadata.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Save(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| CheckpointError::Save(e.to_string()))?;
        Ok(())
    }

    /// Save metadata as the sidecar of the checkpoint at `checkpoint`.
    pub fn save_beside(&self, checkpoint: impl AsRef<Path>) -> Result<()> {
        self.save(metadata_path(checkpoint.as_ref()))
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Load(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| CheckpointError::Load(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoencoder::AutoEncoderConfig;
    use burn_ndarray::NdArray;
    use gapcast_core::FrameShape;

    type TestBackend = NdArray;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gapcast_models_{}_{name}", std::process::id()))
    }

    fn config() -> AutoEncoderConfig {
        AutoEncoderConfig::new(FrameShape::new(1, 4, 4), 6).with_hidden_dim(12)
    }

    #[test]
    fn test_checkpoint_metadata() {
        let meta = CheckpointMetadata::new(AUTOENCODER_ARCH)
            .with_epoch(10)
            .with_val_loss(0.25)
            .with_extra("dataset", "synthetic");

        assert_eq!(meta.arch, "autoencoder");
        assert_eq!(meta.epoch, Some(10));
        assert_eq!(meta.val_loss, Some(0.25));
        assert_eq!(meta.extra.get("dataset"), Some(&"synthetic".to_string()));
    }

    #[test]
    fn test_file_store_round_trip() {
        let device = Default::default();
        let ae = config().init::<TestBackend>(&device);
        let path = scratch("ae_round_trip");
        save_model::<TestBackend, _>(&ae, &path).unwrap();
        CheckpointMetadata::new(AUTOENCODER_ARCH).save_beside(&path).unwrap();

        let reference = CheckpointRef::autoencoder(&path);
        let record = CheckpointStore::<TestBackend>::load(&FileCheckpointStore, &reference, &device).unwrap();
        let loaded = load_validated::<TestBackend, _>(config().init(&device), record).unwrap();

        let x = Tensor::<TestBackend, 5>::ones([1, 2, 1, 4, 4], &device);
        let a = ae.encode(x.clone()).into_data().to_vec::<f32>().unwrap();
        let b = loaded.encode(x).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);

        std::fs::remove_file(path.with_extension("mpk")).ok();
        std::fs::remove_file(reference.metadata_path()).ok();
    }

    #[test]
    fn test_file_store_rejects_selector() {
        let device = Default::default();
        let ae = config().init::<TestBackend>(&device);
        let path = scratch("ae_selector");
        save_model::<TestBackend, _>(&ae, &path).unwrap();
        CheckpointMetadata::new("convlstm").save_beside(&path).unwrap();

        let reference = CheckpointRef::autoencoder(&path);
        let err = CheckpointStore::<TestBackend>::load(&FileCheckpointStore, &reference, &device).err().unwrap();
        assert!(matches!(err, CheckpointError::ArchMismatch { .. }));

        std::fs::remove_file(path.with_extension("mpk")).ok();
        std::fs::remove_file(reference.metadata_path()).ok();
    }

    #[test]
    fn test_missing_checkpoint() {
        let device = Default::default();
        let reference = CheckpointRef::autoencoder(scratch("absent"));
        let err = CheckpointStore::<TestBackend>::load(&FileCheckpointStore, &reference, &device).err().unwrap();
        assert!(matches!(err, CheckpointError::Load(_)));
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let device = Default::default();
        let mut store = MemoryCheckpointStore::<TestBackend>::new();
        let reference = CheckpointRef::autoencoder("wide");
        store.insert(&reference, config().with_hidden_dim(20).init(&device));

        let record = store.load(&reference, &device).unwrap();
        let err = load_validated::<TestBackend, _>(config().init(&device), record).unwrap_err();
        assert!(matches!(err, CheckpointError::ShapeMismatch { index: 0, .. }));
    }

    #[test]
    fn test_memory_store_selector() {
        let device = Default::default();
        let mut store = MemoryCheckpointStore::<TestBackend>::new();
        store.insert(&CheckpointRef::autoencoder("ae"), config().init(&device));
        assert_eq!(store.len(), 1);

        assert!(store.load(&CheckpointRef::new("ae", "timae"), &device).is_err());
        assert!(store.load(&CheckpointRef::autoencoder("other"), &device).is_err());
    }
}
