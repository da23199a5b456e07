use super::convolution::{
    add_channel_bias, channel_bias_grad, conv2d_same, conv2d_same_input_grad,
    conv2d_same_kernel_grad,
};
use super::gate::{ConvGate, GateKind, PARAMETER_ROLES};
use super::input_validation_function::validate_step_input;
use super::{GatePreactivations, NamedParameter};
use crate::error::ModelError;
use crate::neural_network::neural_network_trait::RecurrentCell;
use crate::neural_network::{Activation, Tensor};
use ndarray::{Array1, Array4, ArrayView4, ArrayViewMutD, Ix4};

/// Threshold for running the four gate convolutions on separate rayon tasks (batch * filters * height * width)
const CONV_LSTM_CELL_PARALLEL_THRESHOLD: usize = 4096;

/// Convolutional LSTM cell.
///
/// Every gate replaces the matrix products of a dense LSTM by stride-1 convolutions
/// with zero "same" padding, so inputs of shape `(batch, in_channels, height, width)`
/// produce states of shape `(batch, filters, height, width)`.
///
/// # Example
/// ```rust
/// use nowcast::neural_network::Activation;
/// use nowcast::neural_network::cell::ConvLSTMCell;
/// use nowcast::neural_network::neural_network_trait::RecurrentCell;
/// use ndarray::{Array1, ArrayD};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let cell = ConvLSTMCell::new((1, 8, 8), (4, 1, 3, 3), Activation::Tanh, &mut rng).unwrap();
///
/// let frame = ArrayD::<f32>::zeros(vec![2, 1, 8, 8]);
/// let (next, _) = cell.step(&Array1::ones(2), &frame, &cell.initial_state(2)).unwrap();
/// assert_eq!(next.hidden.shape(), &[2, 4, 8, 8]);
/// ```
#[derive(Debug, Clone)]
pub struct ConvLSTMCell {
    input_shape: Vec<usize>,
    state_shape: Vec<usize>,
    filter_shape: (usize, usize, usize, usize),
    input_gate: ConvGate,
    forget_gate: ConvGate,
    cell_gate: ConvGate,
    output_gate: ConvGate,
    activation: Activation,
}

impl ConvLSTMCell {
    /// Creates a new ConvLSTM cell with randomly initialized filters
    ///
    /// # Parameters
    ///
    /// - `input_shape` - Per-example input shape `(channels, height, width)`
    /// - `filter_shape` - `(filters, in_channels, kernel_h, kernel_w)`; `in_channels` must equal `channels`
    /// - `activation` - Candidate and cell-output activation
    /// - `rng` - Random number generator used for initialization
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If a dimension is 0 or the channel counts disagree
    pub fn new<R: rand::Rng + ?Sized>(
        input_shape: (usize, usize, usize),
        filter_shape: (usize, usize, usize, usize),
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let (channels, height, width) = input_shape;
        let (filters, in_channels, _, _) = filter_shape;
        if height == 0 || width == 0 {
            return Err(ModelError::InputValidationError(format!(
                "frame size must be greater than 0, got {}x{}",
                height, width
            )));
        }
        if in_channels != channels {
            return Err(ModelError::InputValidationError(format!(
                "filter expects {} input channels but frames have {}",
                in_channels, channels
            )));
        }

        let mut gate = |kind: GateKind| ConvGate::new(filter_shape, kind.bias_init_value(), &mut *rng);
        let input_gate = gate(GateKind::Input)?;
        let forget_gate = gate(GateKind::Forget)?;
        let cell_gate = gate(GateKind::Cell)?;
        let output_gate = gate(GateKind::Output)?;

        Ok(Self {
            input_shape: vec![channels, height, width],
            state_shape: vec![filters, height, width],
            filter_shape,
            input_gate,
            forget_gate,
            cell_gate,
            output_gate,
            activation,
        })
    }

    /// `(filters, in_channels, kernel_h, kernel_w)`
    pub fn filter_shape(&self) -> (usize, usize, usize, usize) {
        self.filter_shape
    }

    /// Returns the gate parameters of `kind`
    pub fn gate(&self, kind: GateKind) -> &ConvGate {
        match kind {
            GateKind::Input => &self.input_gate,
            GateKind::Forget => &self.forget_gate,
            GateKind::Cell => &self.cell_gate,
            GateKind::Output => &self.output_gate,
        }
    }

    /// Replaces the filters of one gate
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If any shape does not match the cell
    pub fn set_gate_weights(
        &mut self,
        kind: GateKind,
        kernel: Array4<f32>,
        recurrent_kernel: Array4<f32>,
        bias: Array1<f32>,
    ) -> Result<(), ModelError> {
        let gate = match kind {
            GateKind::Input => &mut self.input_gate,
            GateKind::Forget => &mut self.forget_gate,
            GateKind::Cell => &mut self.cell_gate,
            GateKind::Output => &mut self.output_gate,
        };
        gate.set_weights(kernel, recurrent_kernel, bias)
    }

    fn gates(&self) -> [&ConvGate; 4] {
        [
            &self.input_gate,
            &self.forget_gate,
            &self.cell_gate,
            &self.output_gate,
        ]
    }
}

fn as_frames<'a>(tensor: &'a Tensor, name: &str) -> Result<ArrayView4<'a, f32>, ModelError> {
    tensor
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| ModelError::ProcessingError(format!("{} is not 4D: {}", name, e)))
}

/// conv(x, W) + conv(h, U) + b
fn compute_conv_gate_value(gate: &ConvGate, x_t: ArrayView4<f32>, h_prev: ArrayView4<f32>) -> Array4<f32> {
    let mut value = conv2d_same(x_t, &gate.kernel);
    value += &conv2d_same(h_prev, &gate.recurrent_kernel);
    add_channel_bias(&mut value, &gate.bias);
    value
}

impl RecurrentCell for ConvLSTMCell {
    fn layer_type(&self) -> &str {
        "ConvLSTMCell"
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

    fn kernel_size(&self) -> Option<(usize, usize)> {
        Some((self.filter_shape.2, self.filter_shape.3))
    }

    fn gate_preactivations(
        &self,
        input: &Tensor,
        prev_hidden: &Tensor,
    ) -> Result<GatePreactivations, ModelError> {
        let batch_size = input.shape().first().copied().unwrap_or(0);
        validate_step_input(input.shape(), batch_size, &self.input_shape, "input")?;
        validate_step_input(prev_hidden.shape(), batch_size, &self.state_shape, "prev_hidden")?;
        let x_t = as_frames(input, "input")?;
        let h_prev = as_frames(prev_hidden, "prev_hidden")?;

        let gate_value = |gate: &ConvGate| compute_conv_gate_value(gate, x_t, h_prev).into_dyn();
        let ((input, forget), (candidate, output)) =
            if prev_hidden.len() >= CONV_LSTM_CELL_PARALLEL_THRESHOLD {
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
        let x_t = as_frames(input, "input")?;
        let h_prev = as_frames(prev_hidden, "prev_hidden")?;

        let mut d_input = Array4::<f32>::zeros(x_t.raw_dim());
        let mut d_hidden = Array4::<f32>::zeros(h_prev.raw_dim());

        for ((kind, gate), slots) in GateKind::ALL
            .iter()
            .zip(self.gates())
            .zip(grads.chunks_mut(PARAMETER_ROLES.len()))
        {
            let d = as_frames(d_pre.get(*kind), kind.name())?;

            slots[0] += &conv2d_same_kernel_grad(x_t, d, gate.kernel.dim()).into_dyn();
            slots[1] += &conv2d_same_kernel_grad(h_prev, d, gate.recurrent_kernel.dim()).into_dyn();
            slots[2] += &channel_bias_grad(d).into_dyn();

            d_input += &conv2d_same_input_grad(d, &gate.kernel);
            d_hidden += &conv2d_same_input_grad(d, &gate.recurrent_kernel);
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
