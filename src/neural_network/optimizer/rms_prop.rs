use super::input_validation_function::{
    validate_decay_rate, validate_epsilon, validate_learning_rate,
};
use super::{OPTIMIZER_PARALLEL_THRESHOLD, PendingUpdate, compute_pending, ensure_state, take_pending};
use crate::dataset::Minibatch;
use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::{Optimizer, TrainableModel};
use ndarray::Zip;

/// Centred RMSprop with momentum.
///
/// Tracks running averages of the gradient `E[g]` and of its square `E[g²]`, and a
/// velocity `v` per parameter:
///
/// `v ← momentum · v − learning_rate · g / sqrt(E[g²] − E[g]² + ε)`, then `p ← p + v`.
///
/// # Fields
///
/// - `rho` - Decay rate of the running averages
/// - `momentum` - Decay rate of the velocity
/// - `epsilon` - Small constant added to the centred variance
#[derive(Debug, Clone)]
pub struct RMSprop {
    rho: f32,
    momentum: f32,
    epsilon: f32,
    running_grads: Vec<Tensor>,
    running_grads2: Vec<Tensor>,
    velocity: Vec<Tensor>,
    pending: Option<PendingUpdate>,
}

impl RMSprop {
    /// Creates a new RMSprop optimizer with the specified parameters.
    ///
    /// # Parameters
    ///
    /// - `rho` - Decay rate of the gradient averages (typically 0.95)
    /// - `momentum` - Decay rate of the velocity (typically 0.9)
    /// - `epsilon` - Small constant for numerical stability (typically 1e-4)
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If any hyperparameter is out of range
    pub fn new(rho: f32, momentum: f32, epsilon: f32) -> Result<Self, ModelError> {
        validate_decay_rate(rho, "rho")?;
        validate_decay_rate(momentum, "momentum")?;
        validate_epsilon(epsilon)?;

        Ok(Self {
            rho,
            momentum,
            epsilon,
            running_grads: Vec::new(),
            running_grads2: Vec::new(),
            velocity: Vec::new(),
            pending: None,
        })
    }
}

impl Optimizer for RMSprop {
    fn compute(
        &mut self,
        model: &dyn TrainableModel,
        batch: &Minibatch,
    ) -> Result<f32, ModelError> {
        let (cost, update) = compute_pending(model, batch)?;
        for state in [
            &mut self.running_grads,
            &mut self.running_grads2,
            &mut self.velocity,
        ] {
            ensure_state(state, &update.shapes, "RMSprop")?;
        }

        let rho = self.rho;
        let accumulate = move |rg: &mut f32, rg2: &mut f32, &g: &f32| {
            *rg = rho * *rg + (1.0 - rho) * g;
            *rg2 = rho * *rg2 + (1.0 - rho) * g * g;
        };
        for ((rg, rg2), g) in self
            .running_grads
            .iter_mut()
            .zip(self.running_grads2.iter_mut())
            .zip(&update.gradients)
        {
            let zip = Zip::from(rg).and(rg2).and(g);
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
        let update = take_pending(&mut self.pending, model, "RMSprop")?;

        let (momentum, epsilon) = (self.momentum, self.epsilon);
        let step = move |p: &mut f32, v: &mut f32, &rg: &f32, &rg2: &f32, &g: &f32| {
            *v = momentum * *v - learning_rate * g / (rg2 - rg * rg + epsilon).sqrt();
            *p += *v;
        };
        for ((((param, v), rg), rg2), g) in model
            .parameters_mut()
            .into_iter()
            .zip(self.velocity.iter_mut())
            .zip(&self.running_grads)
            .zip(&self.running_grads2)
            .zip(&update.gradients)
        {
            let zip = Zip::from(param).and(v).and(rg).and(rg2).and(g);
            if g.len() >= OPTIMIZER_PARALLEL_THRESHOLD {
                zip.par_for_each(step);
            } else {
                zip.for_each(step);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "RMSprop"
    }
}
