use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Error types that can occur during model construction and evaluation
///
/// # Variants
///
/// - `InputValidationError` - indicates a configuration or input that does not meet the expected shape, range or structural rules
/// - `ProcessingError` - indicates that something went wrong while running the model or an optimizer
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    InputValidationError(String),
    ProcessingError(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::InputValidationError(msg) => write!(f, "Input validation error: {}", msg),
            ModelError::ProcessingError(msg) => write!(f, "Processing error: {}", msg),
        }
    }
}

/// Implements the standard error trait for ModelError
impl std::error::Error for ModelError {}

/// Input/Output error types that can occur during checkpoint and configuration file operations
///
/// # Variants
///
/// - `StdIoError` - Wraps standard I/O errors from file system operations (reading, writing, renaming)
/// - `JsonError` - Wraps JSON serialization/deserialization errors
/// - `CheckpointMismatch` - A checkpoint whose parameter names or shapes do not match the model it is loaded into
#[derive(Debug)]
pub enum IoError {
    StdIoError(std::io::Error),
    JsonError(serde_json::Error),
    CheckpointMismatch(String),
}

impl IoError {
    /// Opens `path` for buffered reading.
    ///
    /// # Errors
    ///
    /// - `IoError::StdIoError` - If the file cannot be opened
    pub fn load_in_buf_reader(path: &Path) -> Result<BufReader<File>, IoError> {
        let file = File::open(path).map_err(IoError::StdIoError)?;
        Ok(BufReader::new(file))
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::StdIoError(e) => write!(f, "IO error: {}", e),
            IoError::JsonError(e) => write!(f, "JSON error: {}", e),
            IoError::CheckpointMismatch(msg) => write!(f, "Checkpoint mismatch: {}", msg),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::StdIoError(e) => Some(e),
            IoError::JsonError(e) => Some(e),
            IoError::CheckpointMismatch(_) => None,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::StdIoError(e)
    }
}

impl From<serde_json::Error> for IoError {
    fn from(e: serde_json::Error) -> Self {
        IoError::JsonError(e)
    }
}

/// Errors that terminate a training run
///
/// # Variants
///
/// - `Model` - Invalid configuration or a failure inside the model or optimizer
/// - `Io` - A checkpoint could not be written or read
/// - `NumericalDivergence` - The minibatch cost became NaN or infinite; parameters were not updated with it
#[derive(Debug)]
pub enum TrainingError {
    Model(ModelError),
    Io(IoError),
    NumericalDivergence { epoch: usize, update: usize, cost: f32 },
}

impl std::fmt::Display for TrainingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingError::Model(e) => write!(f, "{}", e),
            TrainingError::Io(e) => write!(f, "{}", e),
            TrainingError::NumericalDivergence {
                epoch,
                update,
                cost,
            } => write!(
                f,
                "Numerical divergence: cost {} at epoch {}, update {}",
                cost, epoch, update
            ),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Model(e) => Some(e),
            TrainingError::Io(e) => Some(e),
            TrainingError::NumericalDivergence { .. } => None,
        }
    }
}

impl From<ModelError> for TrainingError {
    fn from(e: ModelError) -> Self {
        TrainingError::Model(e)
    }
}

impl From<IoError> for TrainingError {
    fn from(e: IoError) -> Self {
        TrainingError::Io(e)
    }
}
