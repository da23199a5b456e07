//! Sequence-to-sequence frame prediction with stacked LSTM and ConvLSTM cells.
//!
//! An encoder stack consumes a (possibly padded) sequence of frames; a mirrored decoder stack,
//! seeded with the encoder's final states in reversed layer order, feeds its own output back
//! as input to generate future frames. Gradients are computed by backpropagation through time
//! and applied by two-phase optimizers, so that a training loop can reject NaN costs before
//! any parameter changes.

/// Error types shared by the model, persistence and training code
pub mod error;

/// Datasets, padded minibatches and synthetic frame generators
pub mod dataset;

/// Commonly used types in one import
pub mod prelude;

/// Minibatch training with validation, checkpointing and early stopping
///
/// # Example
/// ```rust
/// use nowcast::dataset::{Dataset, Partitions, SinGenerator};
/// use nowcast::training::{
///     ArchitectureConfig, ExperimentConfig, ModelConfig, OptimizerConfig, TrainingConfig,
///     run_experiment,
/// };
///
/// let frames: Vec<_> = SinGenerator::new((1, 2, 2))
///     .take(30)
///     .map(|frame| frame.into_shape_with_order(vec![4]).unwrap())
///     .collect();
/// let dataset = Dataset::from_frames(&frames, 3, 1, 4).unwrap();
/// let data = Partitions::new(dataset.clone(), dataset.clone(), dataset).unwrap();
///
/// let config = ExperimentConfig {
///     model: ModelConfig {
///         architecture: ArchitectureConfig::Dense { n_ins: 4, hidden_layer_sizes: vec![4] },
///         n_steps: 1,
///         activation: Default::default(),
///         target: Default::default(),
///     },
///     optimizer: OptimizerConfig::default(),
///     training: TrainingConfig { max_epochs: 2, batch_size: 2, ..Default::default() },
/// };
/// let (_model, report) = run_experiment(&config, &data).unwrap();
/// assert_eq!(report.epochs_run, 2);
/// ```
pub mod training;

/// Cells, stacks, recurrence drivers, the encoder-decoder model, losses and optimizers
///
/// # Example
/// ```rust
/// use nowcast::neural_network::*;
/// use ndarray::{Array1, ArrayD};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let model = EncoderDecoder::convolutional(
///     (1, 6, 6),
///     &[(1, 1, 3, 3), (1, 1, 5, 5)],
///     2,
///     Activation::Tanh,
///     PredictionTarget::FinalFrame,
///     &mut rng,
/// )
/// .unwrap();
/// model.summary();
///
/// let inputs = vec![ArrayD::<f32>::zeros(vec![4, 1, 6, 6]); 3];
/// let masks = vec![Array1::<f32>::ones(4); 3];
/// let frames = model.predict(&inputs, &masks).unwrap();
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[1].shape(), &[4, 1, 6, 6]);
/// ```
pub mod neural_network;

pub use error::*;
