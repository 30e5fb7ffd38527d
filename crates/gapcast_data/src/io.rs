//! NumPy archive I/O for sequence datasets.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use ndarray::{Array2, Array5, Dimension};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement};

use crate::dataset::SequenceDataset;
use crate::error::{DataError, Result};

/// Read an array by name, accepting both `name` and `name.npy` entries.
fn by_name<R, T, D>(npz: &mut NpzReader<R>, name: &str) -> Option<ndarray::Array<T, D>>
where
    R: Read + Seek,
    T: ReadableElement,
    D: Dimension,
{
    npz.by_name(name)
        .or_else(|_| npz.by_name(&format!("{name}.npy")))
        .ok()
}

fn read_sequence<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<Array5<f32>> {
    if let Some(arr) = by_name::<_, f32, _>(npz, name) {
        return Ok(arr);
    }
    by_name::<_, f64, _>(npz, name)
        .map(|arr| arr.mapv(|v| v as f32))
        .ok_or_else(|| DataError::FormatError(format!("missing or non-float 5-D array '{name}'")))
}

fn numeric_mask<R, T>(npz: &mut NpzReader<R>) -> Option<Array2<bool>>
where
    R: Read + Seek,
    T: ReadableElement + PartialEq + Default + Clone,
{
    by_name::<_, T, _>(npz, "mask").map(|arr| arr.mapv(|v| v != T::default()))
}

/// Masks may be stored as booleans or numbers; any non-zero value is observed.
fn read_mask<R: Read + Seek>(npz: &mut NpzReader<R>) -> Result<Array2<bool>> {
    by_name::<_, bool, _>(npz, "mask")
        .or_else(|| numeric_mask::<_, u8>(npz))
        .or_else(|| numeric_mask::<_, i32>(npz))
        .or_else(|| numeric_mask::<_, i64>(npz))
        .or_else(|| numeric_mask::<_, f32>(npz))
        .or_else(|| numeric_mask::<_, f64>(npz))
        .ok_or_else(|| DataError::FormatError("missing or unreadable 2-D array 'mask'".to_string()))
}

/// Read a sequence dataset from a NumPy `.npz` archive.
///
/// Expects arrays `context` `(N, T_in, C, H, W)`, `target` `(N, T_out, C, H, W)`
/// and `mask` `(N, T_in)`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, an array is missing, or the
/// shapes disagree.
pub fn read_npz<P: AsRef<Path>>(path: P) -> Result<SequenceDataset> {
    let file = File::open(path.as_ref())?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| DataError::FormatError(format!("Failed to read npz file: {}", e)))?;

    let context = read_sequence(&mut npz, "context")?;
    let target = read_sequence(&mut npz, "target")?;
    let mask = read_mask(&mut npz)?;

    SequenceDataset::from_arrays(context, target, mask)
}

/// Write a sequence dataset to a NumPy `.npz` archive readable by [`read_npz`] and `numpy.load`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_npz<P: AsRef<Path>>(path: P, dataset: &SequenceDataset) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut npz = NpzWriter::new(file);
    let format = |e: ndarray_npy::WriteNpzError| DataError::FormatError(e.to_string());

    npz.add_array("context.npy", dataset.context()).map_err(format)?;
    npz.add_array("target.npy", dataset.target()).map_err(format)?;
    npz.add_array("mask.npy", dataset.mask()).map_err(format)?;
    npz.finish().map_err(format)?;
    Ok(())
}
