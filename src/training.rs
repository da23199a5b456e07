/// JSON checkpoints of named parameters and validation history
pub mod checkpoint;
/// Serde-backed experiment configuration
pub mod config;
/// Early stopping over the validation history
pub mod early_stopping;
/// Partitioning example indices into minibatches
pub mod minibatch;
/// Owned copies of model parameters
pub mod snapshot;
/// The training loop
pub mod trainer;

pub use checkpoint::*;
pub use config::*;
pub use early_stopping::*;
pub use minibatch::*;
pub use snapshot::*;
pub use trainer::*;

use crate::dataset::Partitions;
use crate::error::{ModelError, TrainingError};
use crate::neural_network::EncoderDecoder;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Builds the model and optimizer described by `config` and trains on `data`
///
/// Model initialization draws from a `StdRng` seeded with `config.training.seed`.
///
/// # Returns
///
/// - `Ok((EncoderDecoder, TrainingReport))` - The model holding the best parameters and the run summary
///
/// # Errors
///
/// - `TrainingError::Model` - If the configuration is invalid or does not match the data's
///   frame shape or target length
/// - `TrainingError::Io` - If a checkpoint cannot be written
/// - `TrainingError::NumericalDivergence` - If the cost becomes NaN or infinite
pub fn run_experiment(
    config: &ExperimentConfig,
    data: &Partitions,
) -> Result<(EncoderDecoder, TrainingReport), TrainingError> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let mut model = EncoderDecoder::from_config(&config.model, &mut rng)?;
    if model.frame_shape() != data.train.frame_shape() {
        return Err(ModelError::InputValidationError(format!(
            "model expects frames {:?}, data has {:?}",
            model.frame_shape(),
            data.train.frame_shape()
        ))
        .into());
    }
    if data.train.target_len() != model.n_steps() {
        return Err(ModelError::InputValidationError(format!(
            "model generates {} frames, data has {} target frames",
            model.n_steps(),
            data.train.target_len()
        ))
        .into());
    }
    model.summary();

    let optimizer = config.optimizer.build()?;
    let mut trainer = Trainer::new(config.training.clone(), optimizer)?;
    let report = trainer.fit(&mut model, data)?;
    Ok((model, report))
}
