use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::LossFunction;

/// Training cost of the encoder-decoder: `‖y_pred − y_true‖₂ / n_timesteps`
///
/// The norm is taken over the whole prediction tensor (every example, every element),
/// then divided by the number of predicted timesteps. Its gradient is
/// `(y_pred − y_true) / (n_timesteps · ‖y_pred − y_true‖₂)`, defined as zero when the
/// residual is exactly zero.
#[derive(Debug, Clone, Copy)]
pub struct SequenceL2Cost {
    n_timesteps: usize,
}

impl SequenceL2Cost {
    /// Creates the cost for a decoder unrolled `n_timesteps` steps
    pub fn new(n_timesteps: usize) -> Self {
        Self {
            n_timesteps: n_timesteps.max(1),
        }
    }

    fn residual_norm(y_true: &Tensor, y_pred: &Tensor) -> f32 {
        y_pred
            .iter()
            .zip(y_true.iter())
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f32>()
            .sqrt()
    }
}

impl LossFunction for SequenceL2Cost {
    fn compute_loss(&self, y_true: &Tensor, y_pred: &Tensor) -> f32 {
        Self::residual_norm(y_true, y_pred) / self.n_timesteps as f32
    }

    fn compute_grad(&self, y_true: &Tensor, y_pred: &Tensor) -> Tensor {
        let norm = Self::residual_norm(y_true, y_pred);
        if norm == 0.0 {
            return Tensor::zeros(y_pred.raw_dim());
        }
        let scale = 1.0 / (self.n_timesteps as f32 * norm);
        (y_pred - y_true).mapv(|x| x * scale)
    }
}
