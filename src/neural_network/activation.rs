use crate::neural_network::Tensor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Element count above which activations are mapped in parallel
const ACTIVATION_PARALLEL_THRESHOLD: usize = 4096;

/// Pre-activations are clamped to this magnitude before exponentiation
const SIGMOID_CLAMP: f32 = 500.0;

/// Activation function enum, supporting Tanh, Sigmoid, ReLU and the identity
///
/// Used by recurrent cells for the candidate value and for squashing the cell state
/// before it is gated into the hidden state. Gates themselves always use a sigmoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Tanh,
    Sigmoid,
    ReLU,
    Linear,
}

impl Activation {
    /// Applies the activation function element-wise, consuming the input tensor
    ///
    /// # Parameters
    ///
    /// - `z` - Pre-activation tensor
    ///
    /// # Returns
    ///
    /// - `Tensor` - The activated tensor, same shape as `z`
    pub fn apply(&self, mut z: Tensor) -> Tensor {
        let f: fn(f32) -> f32 = match self {
            Activation::Tanh => f32::tanh,
            Activation::Sigmoid => sigmoid,
            Activation::ReLU => |x| if x > 0.0 { x } else { 0.0 },
            Activation::Linear => return z,
        };

        if z.len() >= ACTIVATION_PARALLEL_THRESHOLD {
            z.par_mapv_inplace(f);
        } else {
            z.mapv_inplace(f);
        }
        z
    }

    /// Derivative of the activation expressed through its output
    ///
    /// # Parameters
    ///
    /// - `activated` - Output of [`Activation::apply`]
    ///
    /// # Returns
    ///
    /// - `Tensor` - d(activation)/dz evaluated at the pre-activation that produced `activated`
    pub fn derivative(&self, activated: &Tensor) -> Tensor {
        match self {
            Activation::Tanh => activated.mapv(|a| 1.0 - a * a),
            Activation::Sigmoid => activated.mapv(|a| a * (1.0 - a)),
            Activation::ReLU => activated.mapv(|a| if a > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Tensor::ones(activated.raw_dim()),
        }
    }

    /// Returns the name of the activation used in summaries
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
            Activation::ReLU => "relu",
            Activation::Linear => "linear",
        }
    }
}

/// Numerically stable logistic sigmoid
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    let clipped_x = x.clamp(-SIGMOID_CLAMP, SIGMOID_CLAMP);
    1.0 / (1.0 + (-clipped_x).exp())
}
