use super::input_validation_function::{
    validate_decay_rate, validate_epsilon, validate_learning_rate,
};
use super::{OPTIMIZER_PARALLEL_THRESHOLD, PendingUpdate, compute_pending, ensure_state, take_pending};
use crate::dataset::Minibatch;
use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::{Optimizer, TrainableModel};
use ndarray::Zip;

/// Adadelta optimizer.
///
/// Keeps decaying averages of squared gradients `E[g²]` and squared updates `E[Δ²]` per
/// parameter. `compute` refreshes `E[g²]`; `apply` takes the step
/// `Δ = −sqrt(E[Δ²] + ε) / sqrt(E[g²] + ε) · g`, refreshes `E[Δ²]` and adds
/// `learning_rate · Δ`. A learning rate of 1.0 is the textbook algorithm.
///
/// # Example
/// ```rust
/// use nowcast::neural_network::Adadelta;
///
/// let optimizer = Adadelta::new(0.95, 1e-6).unwrap();
/// assert!(Adadelta::new(1.5, 1e-6).is_err());
/// # let _ = optimizer;
/// ```
#[derive(Debug, Clone)]
pub struct Adadelta {
    rho: f32,
    epsilon: f32,
    running_grads2: Vec<Tensor>,
    running_up2: Vec<Tensor>,
    pending: Option<PendingUpdate>,
}

impl Adadelta {
    /// Creates a new Adadelta optimizer
    ///
    /// # Parameters
    ///
    /// - `rho` - Decay rate of both running averages (typically 0.95)
    /// - `epsilon` - Small constant for numerical stability (typically 1e-6)
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `rho` is outside `[0, 1)` or `epsilon` is not positive
    pub fn new(rho: f32, epsilon: f32) -> Result<Self, ModelError> {
        validate_decay_rate(rho, "rho")?;
        validate_epsilon(epsilon)?;

        Ok(Self {
            rho,
            epsilon,
            running_grads2: Vec::new(),
            running_up2: Vec::new(),
            pending: None,
        })
    }

    /// Running average of squared gradients, one tensor per parameter (empty before the first compute)
    pub fn running_grads2(&self) -> &[Tensor] {
        &self.running_grads2
    }

    /// Running average of squared updates
    pub fn running_up2(&self) -> &[Tensor] {
        &self.running_up2
    }
}

impl Default for Adadelta {
    fn default() -> Self {
        Self {
            rho: 0.95,
            epsilon: 1e-6,
            running_grads2: Vec::new(),
            running_up2: Vec::new(),
            pending: None,
        }
    }
}

impl Optimizer for Adadelta {
    fn compute(
        &mut self,
        model: &dyn TrainableModel,
        batch: &Minibatch,
    ) -> Result<f32, ModelError> {
        let (cost, update) = compute_pending(model, batch)?;
        ensure_state(&mut self.running_grads2, &update.shapes, "Adadelta")?;
        ensure_state(&mut self.running_up2, &update.shapes, "Adadelta")?;

        let rho = self.rho;
        let accumulate = move |rg2: &mut f32, &g: &f32| *rg2 = rho * *rg2 + (1.0 - rho) * g * g;
        for (rg2, g) in self.running_grads2.iter_mut().zip(&update.gradients) {
            let zip = Zip::from(rg2).and(g);
            if g.len() >= OPTIMIZER_PARALLEL_THRESHOLD {
                zip.par_for_each(accumulate);
            } else {
                zip.for_each(accumulate);
            }
        }

        self.pending = Some(update);
        Ok(cost)
    }

    fn apply(
        &mut self,
        model: &mut dyn TrainableModel,
        learning_rate: f32,
    ) -> Result<(), ModelError> {
        validate_learning_rate(learning_rate)?;
        let update = take_pending(&mut self.pending, model, "Adadelta")?;

        let (rho, epsilon) = (self.rho, self.epsilon);
        let step = move |p: &mut f32, ru2: &mut f32, &rg2: &f32, &g: &f32| {
            let delta = -((*ru2 + epsilon).sqrt() / (rg2 + epsilon).sqrt()) * g;
            *ru2 = rho * *ru2 + (1.0 - rho) * delta * delta;
            *p += learning_rate * delta;
        };
        for (((param, ru2), rg2), g) in model
            .parameters_mut()
            .into_iter()
            .zip(self.running_up2.iter_mut())
            .zip(&self.running_grads2)
            .zip(&update.gradients)
        {
            let zip = Zip::from(param).and(ru2).and(rg2).and(g);
            if g.len() >= OPTIMIZER_PARALLEL_THRESHOLD {
                zip.par_for_each(step);
            } else {
                zip.for_each(step);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Adadelta"
    }
}
