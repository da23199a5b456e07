use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::LossFunction;

/// Mean Squared Error loss function
///
/// # Example
///
/// ```rust
/// use nowcast::neural_network::loss_function::MeanSquaredError;
/// use nowcast::neural_network::LossFunction;
/// use ndarray::ArrayD;
///
/// let y_true = ArrayD::from_shape_vec(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
/// let y_pred = ArrayD::from_shape_vec(vec![3, 1], vec![1.0, 2.0, 5.0]).unwrap();
///
/// let loss = MeanSquaredError::new().compute_loss(&y_true, &y_pred);
/// assert!((loss - 4.0 / 3.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    /// Creates a new instance of MeanSquaredError
    pub fn new() -> Self {
        Self
    }
}

impl LossFunction for MeanSquaredError {
    fn compute_loss(&self, y_true: &Tensor, y_pred: &Tensor) -> f32 {
        let n = y_pred.len();
        if n == 0 {
            return 0.0;
        }
        let squared_sum: f32 = y_pred
            .iter()
            .zip(y_true.iter())
            .map(|(p, t)| (p - t) * (p - t))
            .sum();
        squared_sum / n as f32
    }

    fn compute_grad(&self, y_true: &Tensor, y_pred: &Tensor) -> Tensor {
        let n = y_pred.len().max(1) as f32;
        (y_pred - y_true).mapv(|x| 2.0 * x / n)
    }
}
