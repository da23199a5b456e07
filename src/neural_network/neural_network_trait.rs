use crate::dataset::Minibatch;
use crate::error::ModelError;
use crate::neural_network::Activation;
use crate::neural_network::Tensor;
use crate::neural_network::cell::{
    CellState, GatePreactivations, NamedParameter, StepTrace, apply_gating, gating_backward,
};
use ndarray::{Array1, ArrayViewMutD};

/// Defines the interface for single-timestep recurrent cells.
///
/// Implementors only supply the affine part of an LSTM, i.e. how the four gate
/// pre-activations are formed from the input and the previous hidden state (a matrix
/// product for dense cells, a convolution for convolutional ones) and its derivative.
/// The gating algebra, the per-example masking and their gradients are shared.
pub trait RecurrentCell: Send + Sync {
    /// Returns the type name of the cell (e.g. "LSTMCell").
    fn layer_type(&self) -> &str;

    /// Per-example input shape, without the batch dimension
    fn input_shape(&self) -> &[usize];

    /// Per-example shape of both `cell` and `hidden`, without the batch dimension
    fn state_shape(&self) -> &[usize];

    /// Activation used for the candidate value and the cell-output squashing
    fn activation(&self) -> Activation;

    /// Spatial kernel size of convolutional cells; `None` for dense cells
    fn kernel_size(&self) -> Option<(usize, usize)> {
        None
    }

    /// Computes the four gate pre-activations.
    ///
    /// # Parameters
    ///
    /// - `input` - Input tensor with shape `(batch, input_shape...)`
    /// - `prev_hidden` - Previous hidden state with shape `(batch, state_shape...)`
    ///
    /// # Returns
    ///
    /// - `Ok(GatePreactivations)` - One tensor of shape `(batch, state_shape...)` per gate
    /// - `Err(ModelError)` - If the tensors do not have the expected rank
    fn gate_preactivations(
        &self,
        input: &Tensor,
        prev_hidden: &Tensor,
    ) -> Result<GatePreactivations, ModelError>;

    /// Backpropagates through [`RecurrentCell::gate_preactivations`].
    ///
    /// Parameter gradients are accumulated (added) into `grads`, which is aligned with
    /// [`RecurrentCell::parameters`].
    ///
    /// # Returns
    ///
    /// - `Ok((Tensor, Tensor))` - Gradients with respect to `input` and `prev_hidden`
    fn gate_preactivations_backward(
        &self,
        input: &Tensor,
        prev_hidden: &Tensor,
        d_pre: &GatePreactivations,
        grads: &mut [Tensor],
    ) -> Result<(Tensor, Tensor), ModelError>;

    /// Named views of every trainable tensor, gate by gate
    fn parameters(&self) -> Vec<NamedParameter<'_>>;

    /// Mutable views in the same order as [`RecurrentCell::parameters`]
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Returns the total number of trainable scalars in the cell.
    fn param_count(&self) -> usize;

    /// Zero state for a batch of `batch_size` examples
    fn initial_state(&self, batch_size: usize) -> CellState {
        CellState::zeros(batch_size, self.state_shape())
    }

    /// Advances the cell by one timestep.
    ///
    /// Examples whose mask is 0 keep `prev` bit-for-bit.
    ///
    /// # Parameters
    ///
    /// - `mask` - One value in `[0, 1]` per example
    /// - `input` - Input tensor with shape `(batch, input_shape...)`
    /// - `prev` - State after the previous timestep
    ///
    /// # Returns
    ///
    /// - `Ok((CellState, StepTrace))` - The new state and what the backward pass needs
    fn step(
        &self,
        mask: &Array1<f32>,
        input: &Tensor,
        prev: &CellState,
    ) -> Result<(CellState, StepTrace), ModelError> {
        let pre = self.gate_preactivations(input, &prev.hidden)?;
        Ok(apply_gating(self.activation(), mask, input, prev, pre))
    }

    /// Backpropagates through one [`RecurrentCell::step`].
    ///
    /// # Parameters
    ///
    /// - `trace` - Trace returned by the forward step
    /// - `grad` - Gradient of the loss with respect to the new state
    /// - `grads` - Parameter gradient accumulators aligned with [`RecurrentCell::parameters`]
    ///
    /// # Returns
    ///
    /// - `Ok((Tensor, CellState))` - Gradients with respect to the input and the previous state
    fn step_backward(
        &self,
        trace: &StepTrace,
        grad: &CellState,
        grads: &mut [Tensor],
    ) -> Result<(Tensor, CellState), ModelError> {
        let expected = self.parameters().len();
        if grads.len() != expected {
            return Err(ModelError::ProcessingError(format!(
                "{} expects {} gradient tensors, got {}",
                self.layer_type(),
                expected,
                grads.len()
            )));
        }

        let (d_pre, mut d_prev) = gating_backward(self.activation(), trace, grad);
        let (d_input, d_hidden) =
            self.gate_preactivations_backward(trace.input(), &trace.prev().hidden, &d_pre, grads)?;
        d_prev.hidden += &d_hidden;
        Ok((d_input, d_prev))
    }
}

/// Defines the interface for loss functions used in training and evaluation.
///
/// This trait provides methods to compute both the loss value and its gradient
/// with respect to the predicted values.
pub trait LossFunction {
    /// Computes the loss between true and predicted values.
    ///
    /// # Parameters
    ///
    /// - `y_true` - Tensor containing the ground truth values
    /// - `y_pred` - Tensor containing the predicted values
    ///
    /// # Returns
    ///
    /// - `f32` - The scalar loss value
    fn compute_loss(&self, y_true: &Tensor, y_pred: &Tensor) -> f32;

    /// Computes the gradient of the loss with respect to the predictions.
    ///
    /// # Returns
    ///
    /// - `Tensor` - Gradient with the shape of `y_pred`
    fn compute_grad(&self, y_true: &Tensor, y_pred: &Tensor) -> Tensor;
}

/// A model whose parameters can be read, written and differentiated.
///
/// This is the only view optimizers and the trainer have of a model, so any
/// deterministic implementation can be substituted.
pub trait TrainableModel {
    /// Named views of every trainable tensor in a fixed order
    fn parameters(&self) -> Vec<NamedParameter<'_>>;

    /// Mutable views in the same order as [`TrainableModel::parameters`]
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Scalar training cost of a minibatch and its gradient with respect to every parameter
    ///
    /// # Returns
    ///
    /// - `Ok((f32, Vec<Tensor>))` - The cost and one gradient per parameter, aligned with
    ///   [`TrainableModel::parameters`]
    fn cost_and_gradients(&self, batch: &Minibatch) -> Result<(f32, Vec<Tensor>), ModelError>;

    /// Mean squared prediction error on a minibatch
    fn prediction_error(&self, batch: &Minibatch) -> Result<f32, ModelError>;
}

/// Two-phase optimizer: gradients are computed and stashed, then applied separately.
///
/// The split lets the trainer inspect the cost for NaN/Inf before any parameter is touched.
pub trait Optimizer {
    /// Computes cost and gradients on `batch` and updates the optimizer's running statistics.
    /// Parameters are not modified.
    ///
    /// # Returns
    ///
    /// - `Ok(f32)` - The minibatch cost
    fn compute(&mut self, model: &dyn TrainableModel, batch: &Minibatch)
    -> Result<f32, ModelError>;

    /// Applies the update derived from the last [`Optimizer::compute`] call.
    ///
    /// # Errors
    ///
    /// - `ModelError::ProcessingError` - If no gradients are pending or they no longer match the model
    fn apply(
        &mut self,
        model: &mut dyn TrainableModel,
        learning_rate: f32,
    ) -> Result<(), ModelError>;

    /// Returns the name of the optimizer (e.g. "Adadelta").
    fn name(&self) -> &str;
}
