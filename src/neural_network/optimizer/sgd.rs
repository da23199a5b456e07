use super::input_validation_function::validate_learning_rate;
use super::{PendingUpdate, compute_pending, take_pending};
use crate::dataset::Minibatch;
use crate::error::ModelError;
use crate::neural_network::neural_network_trait::{Optimizer, TrainableModel};

/// Stochastic Gradient Descent (SGD) optimizer.
///
/// `apply` moves every parameter by `−learning_rate · g`.
#[derive(Debug, Clone, Default)]
pub struct SGD {
    pending: Option<PendingUpdate>,
}

impl SGD {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for SGD {
    fn compute(
        &mut self,
        model: &dyn TrainableModel,
        batch: &Minibatch,
    ) -> Result<f32, ModelError> {
        let (cost, update) = compute_pending(model, batch)?;
        self.pending = Some(update);
        Ok(cost)
    }

    fn apply(
        &mut self,
        model: &mut dyn TrainableModel,
        learning_rate: f32,
    ) -> Result<(), ModelError> {
        validate_learning_rate(learning_rate)?;
        let update = take_pending(&mut self.pending, model, "SGD")?;
        for (mut param, g) in model.parameters_mut().into_iter().zip(&update.gradients) {
            param.scaled_add(-learning_rate, g);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SGD"
    }
}
