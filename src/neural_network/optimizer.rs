/// Adadelta optimizer
pub mod adadelta;
mod input_validation_function;
/// Centred RMSprop with momentum
pub mod rms_prop;
/// Plain stochastic gradient descent
pub mod sgd;

pub use adadelta::Adadelta;
pub use rms_prop::RMSprop;
pub use sgd::SGD;

use crate::dataset::Minibatch;
use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::TrainableModel;

/// Threshold for switching element-wise updates to rayon (elements per parameter tensor)
const OPTIMIZER_PARALLEL_THRESHOLD: usize = 1024;

/// Gradients produced by `compute` and consumed by the next `apply`
#[derive(Debug, Clone)]
struct PendingUpdate {
    shapes: Vec<Vec<usize>>,
    gradients: Vec<Tensor>,
}

fn parameter_shapes(model: &dyn TrainableModel) -> Vec<Vec<usize>> {
    model
        .parameters()
        .iter()
        .map(|p| p.value.shape().to_vec())
        .collect()
}

/// Runs the model's cost and gradient evaluation and checks the gradients line up with its parameters
fn compute_pending(
    model: &dyn TrainableModel,
    batch: &Minibatch,
) -> Result<(f32, PendingUpdate), ModelError> {
    let shapes = parameter_shapes(model);
    let (cost, gradients) = model.cost_and_gradients(batch)?;
    if gradients.len() != shapes.len() {
        return Err(ModelError::ProcessingError(format!(
            "model returned {} gradients for {} parameters",
            gradients.len(),
            shapes.len()
        )));
    }
    if let Some((i, (g, shape))) = gradients
        .iter()
        .zip(&shapes)
        .enumerate()
        .find(|(_, (g, shape))| g.shape() != shape.as_slice())
    {
        return Err(ModelError::ProcessingError(format!(
            "gradient {} has shape {:?}, parameter has {:?}",
            i,
            g.shape(),
            shape
        )));
    }
    Ok((cost, PendingUpdate { shapes, gradients }))
}

/// Takes the pending update, making sure the model still has the parameters it was computed for
fn take_pending(
    pending: &mut Option<PendingUpdate>,
    model: &dyn TrainableModel,
    optimizer: &str,
) -> Result<PendingUpdate, ModelError> {
    let update = pending.take().ok_or_else(|| {
        ModelError::ProcessingError(format!(
            "{}: apply called without a pending compute",
            optimizer
        ))
    })?;
    if parameter_shapes(model) != update.shapes {
        return Err(ModelError::ProcessingError(format!(
            "{}: model parameters changed between compute and apply",
            optimizer
        )));
    }
    Ok(update)
}

/// Zero-initialises per-parameter state on first use, afterwards checks it still fits
fn ensure_state(
    state: &mut Vec<Tensor>,
    shapes: &[Vec<usize>],
    optimizer: &str,
) -> Result<(), ModelError> {
    if state.is_empty() {
        *state = shapes.iter().map(|shape| Tensor::zeros(shape.clone())).collect();
        return Ok(());
    }
    let fits = state.len() == shapes.len()
        && state
            .iter()
            .zip(shapes)
            .all(|(s, shape)| s.shape() == shape.as_slice());
    if !fits {
        return Err(ModelError::ProcessingError(format!(
            "{} state was built for a different model",
            optimizer
        )));
    }
    Ok(())
}
