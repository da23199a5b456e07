use super::snapshot::ParameterSnapshot;
use crate::error::IoError;
use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::TrainableModel;
use ahash::AHashMap;
use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One named parameter tensor in row-major order
///
/// Values are stored as `f64` so that every `f32` survives the JSON round trip exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableParameter {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl SerializableParameter {
    fn new(name: &str, value: ArrayViewD<'_, f32>) -> Self {
        Self {
            name: name.to_string(),
            shape: value.shape().to_vec(),
            data: value.iter().map(|&v| v as f64).collect(),
        }
    }

    fn to_tensor(&self) -> Result<Tensor, IoError> {
        let data = self.data.iter().map(|&v| v as f32).collect();
        Tensor::from_shape_vec(self.shape.clone(), data).map_err(|e| {
            IoError::CheckpointMismatch(format!(
                "parameter {} cannot be shaped {:?}: {}",
                self.name, self.shape, e
            ))
        })
    }
}

/// Persisted parameters plus the `[valid, test]` error history of the run that produced them
///
/// Non-finite history entries are stored as JSON `null` and read back as NaN.
///
/// # Example
/// ```rust
/// use nowcast::neural_network::{Activation, EncoderDecoder, PredictionTarget};
/// use nowcast::training::Checkpoint;
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(3);
/// let model = EncoderDecoder::dense(2, &[2], 1, Activation::Tanh, PredictionTarget::FinalFrame, &mut rng).unwrap();
/// let checkpoint = Checkpoint::from_model(&model, &[[0.5, 0.6]]);
/// assert_eq!(checkpoint.parameters.len(), model.parameters().len());
/// assert_eq!(checkpoint.history_errs(), vec![[0.5, 0.6]]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub parameters: Vec<SerializableParameter>,
    history_errs: Vec<[Option<f64>; 2]>,
}

impl Checkpoint {
    /// Captures the current parameters of `model`
    pub fn from_model(model: &dyn TrainableModel, history_errs: &[[f32; 2]]) -> Self {
        Self {
            parameters: model
                .parameters()
                .iter()
                .map(|p| SerializableParameter::new(&p.name, p.value.view()))
                .collect(),
            history_errs: widen(history_errs),
        }
    }

    /// Persists a previously captured snapshot
    pub fn from_snapshot(snapshot: &ParameterSnapshot, history_errs: &[[f32; 2]]) -> Self {
        Self {
            parameters: snapshot
                .entries()
                .iter()
                .map(|(name, value)| SerializableParameter::new(name, value.view()))
                .collect(),
            history_errs: widen(history_errs),
        }
    }

    pub fn history_errs(&self) -> Vec<[f32; 2]> {
        self.history_errs
            .iter()
            .map(|&[valid, test]| [narrow(valid), narrow(test)])
            .collect()
    }

    /// Writes the checkpoint as JSON
    ///
    /// The data goes to a temporary sibling file which is flushed and synced before being
    /// renamed over `path`, so an interrupted write leaves any previous checkpoint intact.
    /// If any step fails the temporary file is removed.
    ///
    /// # Errors
    ///
    /// - `IoError::StdIoError` - If the file cannot be created, written or renamed
    /// - `IoError::JsonError` - If serialization fails
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let path = path.as_ref();
        let temp_path = temp_sibling(path)?;

        let saved = self
            .write_synced(&temp_path)
            .and_then(|()| fs::rename(&temp_path, path).map_err(IoError::from));
        if saved.is_err() {
            // the temp file may not exist if creating it is what failed
            let _ = fs::remove_file(&temp_path);
        }
        saved
    }

    fn write_synced(&self, temp_path: &Path) -> Result<(), IoError> {
        let file = File::create(temp_path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Reads a checkpoint written by [`Checkpoint::save_to_path`]
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let reader = IoError::load_in_buf_reader(path.as_ref())?;
        Ok(from_reader(reader)?)
    }

    /// Converts the stored parameters back into tensors
    ///
    /// # Errors
    ///
    /// - `IoError::CheckpointMismatch` - If a stored shape does not fit its data
    pub fn to_snapshot(&self) -> Result<ParameterSnapshot, IoError> {
        let entries = self
            .parameters
            .iter()
            .map(|p| Ok((p.name.clone(), p.to_tensor()?)))
            .collect::<Result<Vec<_>, IoError>>()?;
        Ok(ParameterSnapshot::from_entries(entries))
    }

    /// Loads the stored parameters into `model`, matching them by name
    ///
    /// Nothing is written unless every parameter of the model has a stored counterpart of the
    /// same shape and the checkpoint has no extra entries.
    ///
    /// # Errors
    ///
    /// - `IoError::CheckpointMismatch` - On a missing, extra, duplicated or differently shaped parameter
    pub fn apply_to_model(&self, model: &mut dyn TrainableModel) -> Result<(), IoError> {
        let mut stored: AHashMap<&str, &SerializableParameter> =
            AHashMap::with_capacity(self.parameters.len());
        for p in &self.parameters {
            if stored.insert(p.name.as_str(), p).is_some() {
                return Err(IoError::CheckpointMismatch(format!(
                    "parameter {} appears more than once",
                    p.name
                )));
            }
        }

        let mut values = Vec::with_capacity(stored.len());
        for p in model.parameters() {
            let entry = stored.get(p.name.as_str()).ok_or_else(|| {
                IoError::CheckpointMismatch(format!("parameter {} is missing", p.name))
            })?;
            if entry.shape != p.value.shape() {
                return Err(IoError::CheckpointMismatch(format!(
                    "parameter {} has shape {:?} in the checkpoint, {:?} in the model",
                    p.name,
                    entry.shape,
                    p.value.shape()
                )));
            }
            values.push(entry.to_tensor()?);
        }
        if values.len() != stored.len() {
            return Err(IoError::CheckpointMismatch(format!(
                "checkpoint has {} parameters, model has {}",
                stored.len(),
                values.len()
            )));
        }

        for (mut param, value) in model.parameters_mut().into_iter().zip(&values) {
            param.assign(value);
        }
        Ok(())
    }
}

fn widen(history_errs: &[[f32; 2]]) -> Vec<[Option<f64>; 2]> {
    let finite = |v: f32| v.is_finite().then_some(v as f64);
    history_errs
        .iter()
        .map(|&[valid, test]| [finite(valid), finite(test)])
        .collect()
}

fn narrow(value: Option<f64>) -> f32 {
    value.map_or(f32::NAN, |v| v as f32)
}

fn temp_sibling(path: &Path) -> Result<PathBuf, IoError> {
    let file_name = path.file_name().ok_or_else(|| {
        IoError::StdIoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("checkpoint path {} has no file name", path.display()),
        ))
    })?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    Ok(path.with_file_name(temp_name))
}
