use crate::RhythmError;
use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{read_npy, NpzReader};
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Named activation arrays stored in an `.npz` archive.
pub struct ActivationFile {
    source: NpzSource,
}

enum NpzSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ActivationFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RhythmError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RhythmError::Io(format!(
                "activation file {} not found",
                path.display()
            )));
        }
        Ok(Self {
            source: NpzSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RhythmError> {
        Ok(Self {
            source: NpzSource::Bytes(bytes.to_vec()),
        })
    }

    pub fn names(&self) -> Result<Vec<String>, RhythmError> {
        match &self.source {
            NpzSource::Path(path) => {
                let file = File::open(path).map_err(|e| RhythmError::Io(e.to_string()))?;
                let mut npz = NpzReader::new(file).map_err(|e| RhythmError::Io(e.to_string()))?;
                npz.names().map_err(|e| RhythmError::Io(e.to_string()))
            }
            NpzSource::Bytes(data) => {
                let mut npz = NpzReader::new(Cursor::new(data.as_slice()))
                    .map_err(|e| RhythmError::Io(e.to_string()))?;
                npz.names().map_err(|e| RhythmError::Io(e.to_string()))
            }
        }
    }

    /// Activations stored under `name` (with or without the `.npy` suffix).
    pub fn activations(&self, name: &str) -> Result<Vec<f32>, RhythmError> {
        flatten(self.by_name(name)?, name)
    }

    fn by_name(&self, name: &str) -> Result<ArrayD<f32>, RhythmError> {
        let key = if name.ends_with(".npy") {
            name.to_string()
        } else {
            format!("{}.npy", name)
        };
        match &self.source {
            NpzSource::Path(path) => {
                let file = File::open(path).map_err(|e| RhythmError::Io(e.to_string()))?;
                let mut npz = NpzReader::new(file).map_err(|e| RhythmError::Io(e.to_string()))?;
                npz.by_name::<OwnedRepr<f32>, IxDyn>(&key)
                    .map_err(|e| RhythmError::Io(format!("{}: {}", key, e)))
            }
            NpzSource::Bytes(data) => {
                let mut npz = NpzReader::new(Cursor::new(data.as_slice()))
                    .map_err(|e| RhythmError::Io(e.to_string()))?;
                npz.by_name::<OwnedRepr<f32>, IxDyn>(&key)
                    .map_err(|e| RhythmError::Io(format!("{}: {}", key, e)))
            }
        }
    }
}

/// Load a frame-wise activation sequence from `.npy`, or from the first
/// array of an `.npz` archive.
pub fn load_activations(path: impl AsRef<Path>) -> Result<Vec<f32>, RhythmError> {
    let path = path.as_ref();
    let label = path.display().to_string();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("npy") => {
            let array: ArrayD<f32> =
                read_npy(path).map_err(|e| RhythmError::Io(format!("{}: {}", label, e)))?;
            flatten(array, &label)
        }
        Some("npz") => {
            let file = ActivationFile::open(path)?;
            let names = file.names()?;
            let first = names.first().ok_or_else(|| {
                RhythmError::Io(format!("{} contains no arrays", label))
            })?;
            file.activations(first)
        }
        _ => Err(RhythmError::Io(format!(
            "{}: expected a .npy or .npz file",
            label
        ))),
    }
}

/// Accepts `(frames,)` and `(frames, 1)` arrays.
fn flatten(array: ArrayD<f32>, label: &str) -> Result<Vec<f32>, RhythmError> {
    let shape = array.shape().to_vec();
    match shape.as_slice() {
        [_] | [_, 1] => Ok(array.iter().copied().collect()),
        _ => Err(RhythmError::InvalidInput(format!(
            "{}: expected one activation per frame; got shape {:?}",
            label, shape
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use ndarray_npy::{write_npy, NpzWriter};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rhythm_decode_{}_{}", std::process::id(), name))
    }

    #[test]
    fn loads_npy_sequence() {
        let path = temp_path("acts.npy");
        write_npy(&path, &arr1(&[0.1f32, 0.9, 0.2])).expect("write npy");
        let acts = load_activations(&path).expect("load");
        std::fs::remove_file(&path).ok();
        assert_eq!(acts, vec![0.1, 0.9, 0.2]);
    }

    #[test]
    fn loads_column_vector_and_rejects_matrices() {
        let column = temp_path("column.npy");
        write_npy(&column, &arr2(&[[0.3f32], [0.4]])).expect("write npy");
        assert_eq!(load_activations(&column).expect("load"), vec![0.3, 0.4]);
        std::fs::remove_file(&column).ok();

        let matrix = temp_path("matrix.npy");
        write_npy(&matrix, &arr2(&[[0.3f32, 0.1], [0.4, 0.2]])).expect("write npy");
        let err = load_activations(&matrix).expect_err("two columns");
        std::fs::remove_file(&matrix).ok();
        assert!(matches!(err, RhythmError::InvalidInput(_)));
    }

    #[test]
    fn reads_npz_arrays_by_name() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut npz = NpzWriter::new(&mut buffer);
            npz.add_array("beats", &arr1(&[0.5f32, 0.25]))
                .expect("add array");
            npz.finish().expect("finish npz");
        }
        let file = ActivationFile::from_bytes(buffer.get_ref()).expect("bytes");
        assert_eq!(file.activations("beats").expect("by name"), vec![0.5, 0.25]);
        assert_eq!(file.activations("beats.npy").expect("by key"), vec![0.5, 0.25]);
        assert!(matches!(file.activations("onsets"), Err(RhythmError::Io(_))));
    }

    #[test]
    fn unknown_extension_is_an_io_error() {
        let err = load_activations("activations.txt").expect_err("extension");
        assert!(matches!(err, RhythmError::Io(_)));
        let err = ActivationFile::open(temp_path("missing.npz")).err();
        assert!(matches!(err, Some(RhythmError::Io(_))));
    }
}
