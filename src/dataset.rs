/// Synthetic frame sequences for experiments and tests
pub mod generator;

pub use generator::*;

use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::cell::batched_shape;
use ndarray::{Array1, Axis};

/// Time-major training batch
///
/// # Fields
///
/// - `inputs` - One `(batch, frame...)` tensor per input timestep, zero padded past each example's length
/// - `masks` - One `(batch)` vector per input timestep: 1 where the example has data, 0 in the padding
/// - `targets` - One `(batch, frame...)` tensor per target timestep
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    pub inputs: Vec<Tensor>,
    pub masks: Vec<Array1<f32>>,
    pub targets: Vec<Tensor>,
}

impl Minibatch {
    /// Creates a minibatch after checking that timesteps and batch sizes line up
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If a sequence is empty, the mask count differs
    ///   from the input count, or any tensor disagrees on the batch size
    pub fn new(
        inputs: Vec<Tensor>,
        masks: Vec<Array1<f32>>,
        targets: Vec<Tensor>,
    ) -> Result<Self, ModelError> {
        if inputs.is_empty() || targets.is_empty() {
            return Err(ModelError::InputValidationError(
                "a minibatch needs at least one input and one target timestep".to_string(),
            ));
        }
        if inputs.len() != masks.len() {
            return Err(ModelError::InputValidationError(format!(
                "got {} input timesteps but {} masks",
                inputs.len(),
                masks.len()
            )));
        }
        let batch_size = inputs[0].shape().first().copied().unwrap_or(0);
        let consistent = inputs
            .iter()
            .chain(targets.iter())
            .all(|t| t.shape().first() == Some(&batch_size))
            && masks.iter().all(|m| m.len() == batch_size);
        if !consistent {
            return Err(ModelError::InputValidationError(format!(
                "every tensor and mask must share the batch size {}",
                batch_size
            )));
        }
        Ok(Self {
            inputs,
            masks,
            targets,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.masks.first().map_or(0, |m| m.len())
    }

    /// Number of input timesteps (after padding)
    pub fn n_timesteps(&self) -> usize {
        self.inputs.len()
    }
}

/// A set of (input sequence, target sequence) examples
///
/// Every example is a tensor `(timesteps, frame...)`. Input sequences may differ in
/// length; all target sequences have the same length and every frame has the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Vec<Tensor>,
    targets: Vec<Tensor>,
    frame_shape: Vec<usize>,
}

impl Dataset {
    /// Creates a dataset
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If there are no examples, the input and target
    ///   counts differ, a sequence is empty, frames disagree in shape, or target lengths differ
    pub fn new(inputs: Vec<Tensor>, targets: Vec<Tensor>) -> Result<Self, ModelError> {
        if inputs.is_empty() {
            return Err(ModelError::InputValidationError(
                "a dataset needs at least one example".to_string(),
            ));
        }
        if inputs.len() != targets.len() {
            return Err(ModelError::InputValidationError(format!(
                "got {} input sequences but {} target sequences",
                inputs.len(),
                targets.len()
            )));
        }

        let frame_shape = inputs[0].shape().get(1..).unwrap_or(&[]).to_vec();
        let target_len = targets[0].shape().first().copied().unwrap_or(0);
        for (i, (x, y)) in inputs.iter().zip(&targets).enumerate() {
            for (name, sequence) in [("input", x), ("target", y)] {
                if sequence.ndim() < 2 || sequence.shape()[0] == 0 {
                    return Err(ModelError::InputValidationError(format!(
                        "{} sequence {} must have shape (timesteps > 0, frame...), got {:?}",
                        name,
                        i,
                        sequence.shape()
                    )));
                }
                if sequence.shape()[1..] != frame_shape[..] {
                    return Err(ModelError::InputValidationError(format!(
                        "{} sequence {} has frame shape {:?}, expected {:?}",
                        name,
                        i,
                        &sequence.shape()[1..],
                        frame_shape
                    )));
                }
            }
            if y.shape()[0] != target_len {
                return Err(ModelError::InputValidationError(format!(
                    "target sequence {} has {} timesteps, expected {}",
                    i,
                    y.shape()[0],
                    target_len
                )));
            }
        }

        Ok(Self {
            inputs,
            targets,
            frame_shape,
        })
    }

    /// Cuts a frame stream into consecutive (input, target) windows
    ///
    /// Window k covers frames `k*stride .. k*stride + input_len + output_len`; the first
    /// `input_len` frames are the input, the rest the target.
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If a length or the stride is 0, frames differ in
    ///   shape, or the stream is too short for a single window
    pub fn from_frames(
        frames: &[Tensor],
        input_len: usize,
        output_len: usize,
        stride: usize,
    ) -> Result<Self, ModelError> {
        if input_len == 0 || output_len == 0 || stride == 0 {
            return Err(ModelError::InputValidationError(format!(
                "input_len, output_len and stride must be greater than 0, got {}, {}, {}",
                input_len, output_len, stride
            )));
        }
        let window = input_len + output_len;
        if frames.len() < window {
            return Err(ModelError::InputValidationError(format!(
                "{} frames cannot fill a window of {}",
                frames.len(),
                window
            )));
        }

        let stack = |range: &[Tensor]| {
            let views: Vec<_> = range.iter().map(|f| f.view()).collect();
            ndarray::stack(Axis(0), &views).map_err(|e| {
                ModelError::InputValidationError(format!("frames differ in shape: {}", e))
            })
        };

        let mut inputs = Vec::new();
        let mut targets = Vec::new();
        let mut start = 0;
        while start + window <= frames.len() {
            inputs.push(stack(&frames[start..start + input_len])?);
            targets.push(stack(&frames[start + input_len..start + window])?);
            start += stride;
        }
        Self::new(inputs, targets)
    }

    /// Number of examples
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Shape of a single frame
    pub fn frame_shape(&self) -> &[usize] {
        &self.frame_shape
    }

    /// Number of target timesteps per example
    pub fn target_len(&self) -> usize {
        self.targets[0].shape()[0]
    }

    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    pub fn targets(&self) -> &[Tensor] {
        &self.targets
    }

    /// Gathers the examples at `indices` into a time-major, zero-padded minibatch
    ///
    /// Inputs shorter than the longest selected input are padded at the end with zero
    /// frames whose mask is 0.
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `indices` is empty or an index is out of range
    pub fn minibatch(&self, indices: &[usize]) -> Result<Minibatch, ModelError> {
        if indices.is_empty() {
            return Err(ModelError::InputValidationError(
                "minibatch indices must not be empty".to_string(),
            ));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(ModelError::InputValidationError(format!(
                "example index {} out of range for {} examples",
                bad,
                self.len()
            )));
        }

        let batch_size = indices.len();
        let max_len = indices
            .iter()
            .map(|&i| self.inputs[i].shape()[0])
            .max()
            .unwrap_or(0);
        let frame_batch = batched_shape(batch_size, &self.frame_shape);

        let mut inputs = vec![Tensor::zeros(frame_batch.clone()); max_len];
        let mut masks = vec![Array1::<f32>::zeros(batch_size); max_len];
        let mut targets = vec![Tensor::zeros(frame_batch); self.target_len()];
        for (b, &i) in indices.iter().enumerate() {
            for (t, frame) in self.inputs[i].axis_iter(Axis(0)).enumerate() {
                inputs[t].index_axis_mut(Axis(0), b).assign(&frame);
                masks[t][b] = 1.0;
            }
            for (t, frame) in self.targets[i].axis_iter(Axis(0)).enumerate() {
                targets[t].index_axis_mut(Axis(0), b).assign(&frame);
            }
        }

        Minibatch::new(inputs, masks, targets)
    }
}

/// Train, validation and test datasets of one experiment
#[derive(Debug, Clone, PartialEq)]
pub struct Partitions {
    pub train: Dataset,
    pub valid: Dataset,
    pub test: Dataset,
}

impl Partitions {
    /// Groups three datasets after checking that they describe the same frames
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If frame shapes or target lengths differ
    pub fn new(train: Dataset, valid: Dataset, test: Dataset) -> Result<Self, ModelError> {
        for (name, other) in [("valid", &valid), ("test", &test)] {
            if other.frame_shape() != train.frame_shape() || other.target_len() != train.target_len() {
                return Err(ModelError::InputValidationError(format!(
                    "{} partition has frames {:?} x {} targets, train has {:?} x {}",
                    name,
                    other.frame_shape(),
                    other.target_len(),
                    train.frame_shape(),
                    train.target_len()
                )));
            }
        }
        Ok(Self { train, valid, test })
    }
}
