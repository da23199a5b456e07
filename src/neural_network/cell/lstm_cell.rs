use super::gate::{Gate, GateKind, PARAMETER_ROLES, compute_gate_value};
use super::input_validation_function::validate_step_input;
use super::{GatePreactivations, NamedParameter};
use crate::error::ModelError;
use crate::neural_network::neural_network_trait::RecurrentCell;
use crate::neural_network::{Activation, Tensor};
use ndarray::{Array2, ArrayView2, ArrayViewMutD, Axis, Ix2};

/// Threshold for running the four gate products on separate rayon tasks (batch * units)
const LSTM_CELL_PARALLEL_THRESHOLD: usize = 1024;

/// Fully connected LSTM cell.
///
/// Maps inputs of shape `(batch, input_dim)` and states of shape `(batch, units)`.
///
/// # Example
/// ```rust
/// use nowcast::neural_network::Activation;
/// use nowcast::neural_network::cell::LSTMCell;
/// use nowcast::neural_network::neural_network_trait::RecurrentCell;
/// use ndarray::{Array1, ArrayD};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(42);
/// let cell = LSTMCell::new(3, 4, Activation::Tanh, &mut rng).unwrap();
///
/// let x = ArrayD::<f32>::ones(vec![2, 3]);
/// let prev = cell.initial_state(2);
/// let (next, _trace) = cell.step(&Array1::ones(2), &x, &prev).unwrap();
/// assert_eq!(next.hidden.shape(), &[2, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct LSTMCell {
    input_shape: Vec<usize>,
    state_shape: Vec<usize>,
    input_gate: Gate,
    forget_gate: Gate,
    cell_gate: Gate,
    output_gate: Gate,
    activation: Activation,
}

impl LSTMCell {
    /// Creates a new LSTM cell with randomly initialized gates
    ///
    /// # Parameters
    ///
    /// - `input_dim` - Number of input features
    /// - `units` - Number of hidden units
    /// - `activation` - Candidate and cell-output activation
    /// - `rng` - Random number generator used for initialization
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `input_dim` or `units` is 0
    pub fn new<R: rand::Rng + ?Sized>(
        input_dim: usize,
        units: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let mut gate =
            |kind: GateKind| Gate::new(input_dim, units, kind.bias_init_value(), &mut *rng);
        let input_gate = gate(GateKind::Input)?;
        let forget_gate = gate(GateKind::Forget)?;
        let cell_gate = gate(GateKind::Cell)?;
        let output_gate = gate(GateKind::Output)?;

        Ok(Self {
            input_shape: vec![input_dim],
            state_shape: vec![units],
            input_gate,
            forget_gate,
            cell_gate,
            output_gate,
            activation,
        })
    }

    /// Number of hidden units
    pub fn units(&self) -> usize {
        self.state_shape[0]
    }

    /// Returns the gate parameters of `kind`
    pub fn gate(&self, kind: GateKind) -> &Gate {
        match kind {
            GateKind::Input => &self.input_gate,
            GateKind::Forget => &self.forget_gate,
            GateKind::Cell => &self.cell_gate,
            GateKind::Output => &self.output_gate,
        }
    }

    /// Replaces the weights of one gate
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If any shape does not match the cell
    pub fn set_gate_weights(
        &mut self,
        kind: GateKind,
        kernel: Array2<f32>,
        recurrent_kernel: Array2<f32>,
        bias: Array2<f32>,
    ) -> Result<(), ModelError> {
        let gate = match kind {
            GateKind::Input => &mut self.input_gate,
            GateKind::Forget => &mut self.forget_gate,
            GateKind::Cell => &mut self.cell_gate,
            GateKind::Output => &mut self.output_gate,
        };
        gate.set_weights(kernel, recurrent_kernel, bias)
    }

    fn gates(&self) -> [&Gate; 4] {
        [
            &self.input_gate,
            &self.forget_gate,
            &self.cell_gate,
            &self.output_gate,
        ]
    }
}

/// Views a batched tensor as a matrix
fn as_matrix<'a>(tensor: &'a Tensor, name: &str) -> Result<ArrayView2<'a, f32>, ModelError> {
    tensor
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| ModelError::ProcessingError(format!("{} is not 2D: {}", name, e)))
}

impl RecurrentCell for LSTMCell {
    fn layer_type(&self) -> &str {
        "LSTMCell"
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn state_shape(&self) -> &[usize] {
        &self.state_shape
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    fn gate_preactivations(
        &self,
        input: &Tensor,
        prev_hidden: &Tensor,
    ) -> Result<GatePreactivations, ModelError> {
        let batch_size = input.shape().first().copied().unwrap_or(0);
        validate_step_input(input.shape(), batch_size, &self.input_shape, "input")?;
        validate_step_input(prev_hidden.shape(), batch_size, &self.state_shape, "prev_hidden")?;
        let x_t = as_matrix(input, "input")?;
        let h_prev = as_matrix(prev_hidden, "prev_hidden")?;

        let gate_value = |gate: &Gate| compute_gate_value(gate, &x_t, &h_prev).into_dyn();
        let ((input, forget), (candidate, output)) =
            if batch_size * self.units() >= LSTM_CELL_PARALLEL_THRESHOLD {
                rayon::join(
                    || rayon::join(|| gate_value(&self.input_gate), || gate_value(&self.forget_gate)),
                    || rayon::join(|| gate_value(&self.cell_gate), || gate_value(&self.output_gate)),
                )
            } else {
                (
                    (gate_value(&self.input_gate), gate_value(&self.forget_gate)),
                    (gate_value(&self.cell_gate), gate_value(&self.output_gate)),
                )
            };

        Ok(GatePreactivations {
            input,
            forget,
            candidate,
            output,
        })
    }

    fn gate_preactivations_backward(
        &self,
        input: &Tensor,
        prev_hidden: &Tensor,
        d_pre: &GatePreactivations,
        grads: &mut [Tensor],
    ) -> Result<(Tensor, Tensor), ModelError> {
        let x_t = as_matrix(input, "input")?;
        let h_prev = as_matrix(prev_hidden, "prev_hidden")?;

        let mut d_input = Array2::<f32>::zeros(x_t.raw_dim());
        let mut d_hidden = Array2::<f32>::zeros(h_prev.raw_dim());

        for ((kind, gate), slots) in GateKind::ALL
            .iter()
            .zip(self.gates())
            .zip(grads.chunks_mut(PARAMETER_ROLES.len()))
        {
            let d = as_matrix(d_pre.get(*kind), kind.name())?;

            slots[0] += &x_t.t().dot(&d).into_dyn();
            slots[1] += &h_prev.t().dot(&d).into_dyn();
            slots[2] += &d.sum_axis(Axis(0)).insert_axis(Axis(0)).into_dyn();

            d_input += &d.dot(&gate.kernel.t());
            d_hidden += &d.dot(&gate.recurrent_kernel.t());
        }

        Ok((d_input.into_dyn(), d_hidden.into_dyn()))
    }

    fn parameters(&self) -> Vec<NamedParameter<'_>> {
        GateKind::ALL
            .iter()
            .zip(self.gates())
            .flat_map(|(kind, gate)| {
                PARAMETER_ROLES
                    .iter()
                    .zip(gate.views())
                    .map(move |(role, value)| NamedParameter {
                        name: format!("{}.{}", kind.name(), role),
                        value,
                    })
            })
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut views = Vec::with_capacity(GateKind::ALL.len() * PARAMETER_ROLES.len());
        for gate in [
            &mut self.input_gate,
            &mut self.forget_gate,
            &mut self.cell_gate,
            &mut self.output_gate,
        ] {
            views.extend(gate.views_mut());
        }
        views
    }

    fn param_count(&self) -> usize {
        self.gates().iter().map(|gate| gate.param_count()).sum()
    }
}
