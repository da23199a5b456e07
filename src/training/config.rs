use crate::error::{IoError, ModelError};
use crate::neural_network::neural_network_trait::Optimizer;
use crate::neural_network::{Activation, Adadelta, PredictionTarget, RMSprop, SGD};
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Layer layout of the encoder; the decoder mirrors it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchitectureConfig {
    /// Fully connected LSTM layers over flat frames of `n_ins` features
    Dense {
        n_ins: usize,
        hidden_layer_sizes: Vec<usize>,
    },
    /// ConvLSTM layers over `(channels, height, width)` frames;
    /// one `(filters, in_channels, kernel_h, kernel_w)` per layer
    Convolutional {
        input_shape: (usize, usize, usize),
        filter_shapes: Vec<(usize, usize, usize, usize)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub architecture: ArchitectureConfig,
    /// Number of frames the decoder generates
    pub n_steps: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub target: PredictionTarget,
}

/// Optimizer and its hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum OptimizerConfig {
    #[serde(rename = "adadelta")]
    Adadelta { rho: f32, epsilon: f32 },
    #[serde(rename = "rmsprop")]
    RMSprop { rho: f32, momentum: f32, epsilon: f32 },
    #[serde(rename = "sgd")]
    SGD,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adadelta {
            rho: 0.95,
            epsilon: 1e-6,
        }
    }
}

impl OptimizerConfig {
    /// Instantiates the optimizer
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If a hyperparameter is out of range
    pub fn build(&self) -> Result<Box<dyn Optimizer>, ModelError> {
        Ok(match *self {
            OptimizerConfig::Adadelta { rho, epsilon } => Box::new(Adadelta::new(rho, epsilon)?),
            OptimizerConfig::RMSprop {
                rho,
                momentum,
                epsilon,
            } => Box::new(RMSprop::new(rho, momentum, epsilon)?),
            OptimizerConfig::SGD => Box::new(SGD::new()),
        })
    }
}

/// Training loop settings
///
/// Missing fields take the defaults below when deserialized.
///
/// # Fields
///
/// - `saveto` - Checkpoint path; no checkpoints are written when `None`
/// - `patience` - Number of validations without improvement tolerated before stopping
/// - `max_epochs` - Upper bound on passes over the training set
/// - `valid_freq` - Updates between validations; one epoch's worth when `None`
/// - `save_freq` - Updates between checkpoints; one epoch's worth when `None`
/// - `display_freq` - Updates between progress messages
/// - `batch_size` - Training minibatch size
/// - `valid_batch_size` - Minibatch size used to compute prediction errors
/// - `learning_rate` - Passed to every optimizer apply
/// - `shuffle` - Shuffle the training examples every epoch
/// - `seed` - Seed for model initialization and shuffling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub saveto: Option<PathBuf>,
    pub patience: usize,
    pub max_epochs: usize,
    pub valid_freq: Option<usize>,
    pub save_freq: Option<usize>,
    pub display_freq: usize,
    pub batch_size: usize,
    pub valid_batch_size: usize,
    pub learning_rate: f32,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            saveto: None,
            patience: 10,
            max_epochs: 5000,
            valid_freq: None,
            save_freq: None,
            display_freq: 1,
            batch_size: 16,
            valid_batch_size: 64,
            learning_rate: 1.0,
            shuffle: true,
            seed: 89677,
        }
    }
}

impl TrainingConfig {
    /// Checks every setting
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If a size, frequency or the patience is 0, or the
    ///   learning rate is not positive and finite
    pub fn validate(&self) -> Result<(), ModelError> {
        let sizes = [
            ("patience", Some(self.patience)),
            ("max_epochs", Some(self.max_epochs)),
            ("valid_freq", self.valid_freq),
            ("save_freq", self.save_freq),
            ("display_freq", Some(self.display_freq)),
            ("batch_size", Some(self.batch_size)),
            ("valid_batch_size", Some(self.valid_batch_size)),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == Some(0)) {
            return Err(ModelError::InputValidationError(format!(
                "{} must be greater than 0",
                name
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ModelError::InputValidationError(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    /// Validation period in updates for a training set of `n_train` examples
    pub fn resolved_valid_freq(&self, n_train: usize) -> usize {
        self.valid_freq.unwrap_or_else(|| self.updates_per_epoch_floor(n_train))
    }

    /// Checkpoint period in updates for a training set of `n_train` examples
    pub fn resolved_save_freq(&self, n_train: usize) -> usize {
        self.save_freq.unwrap_or_else(|| self.updates_per_epoch_floor(n_train))
    }

    fn updates_per_epoch_floor(&self, n_train: usize) -> usize {
        (n_train / self.batch_size.max(1)).max(1)
    }
}

/// Everything needed to run one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl ExperimentConfig {
    /// Validates the model, optimizer and training settings
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.model.n_steps == 0 {
            return Err(ModelError::InputValidationError(
                "n_steps must be greater than 0".to_string(),
            ));
        }
        self.optimizer.build()?;
        self.training.validate()
    }

    /// Reads a configuration from a JSON file
    ///
    /// # Errors
    ///
    /// - `IoError::StdIoError` - If the file cannot be opened
    /// - `IoError::JsonError` - If the content is not a valid configuration
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let reader = IoError::load_in_buf_reader(path.as_ref())?;
        Ok(from_reader(reader)?)
    }

    /// Writes the configuration as pretty-printed JSON
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
