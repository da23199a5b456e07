use crate::neural_network::{Activation, Tensor};
use ndarray::{Array1, ArrayViewD, Axis, Zip};

/// Same-padded 2-D convolution kernels used by the convolutional cell
pub(crate) mod convolution;
/// A convolutional LSTM cell over `(channels, height, width)` frames
pub mod conv_lstm_cell;
/// Gate parameter containers for dense and convolutional cells
pub mod gate;
/// Input validation functions for recurrent cells
mod input_validation_function;
/// A fully connected LSTM cell over feature vectors
pub mod lstm_cell;

pub use conv_lstm_cell::ConvLSTMCell;
pub use gate::GateKind;
pub use lstm_cell::LSTMCell;

/// Gate tensors larger than this are activated on separate rayon tasks
const GATING_PARALLEL_THRESHOLD: usize = 1024;

/// Recurrent state of one LSTM layer
///
/// Both tensors have shape `(batch, state_shape...)`: `(batch, units)` for the dense
/// cell and `(batch, filters, height, width)` for the convolutional one.
///
/// # Fields
///
/// - `cell` - Memory cell `c`
/// - `hidden` - Hidden output `h`
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    pub cell: Tensor,
    pub hidden: Tensor,
}

impl CellState {
    /// Zero state for `batch_size` examples
    pub fn zeros(batch_size: usize, state_shape: &[usize]) -> Self {
        let shape = batched_shape(batch_size, state_shape);
        Self {
            cell: Tensor::zeros(shape.clone()),
            hidden: Tensor::zeros(shape),
        }
    }

    /// Zero state with the same shape as `other`
    pub fn zeros_like(other: &CellState) -> Self {
        Self {
            cell: Tensor::zeros(other.cell.raw_dim()),
            hidden: Tensor::zeros(other.hidden.raw_dim()),
        }
    }

    /// Number of examples carried by this state
    pub fn batch_size(&self) -> usize {
        self.hidden.shape().first().copied().unwrap_or(0)
    }
}

/// Prepends the batch dimension to a per-example shape
pub(crate) fn batched_shape(batch_size: usize, shape: &[usize]) -> Vec<usize> {
    let mut batched = Vec::with_capacity(shape.len() + 1);
    batched.push(batch_size);
    batched.extend_from_slice(shape);
    batched
}

/// Read-only view of one trainable tensor together with its stable name
///
/// Names are hierarchical and dot separated, e.g. `encoder.layer0.forget_gate.kernel`.
pub struct NamedParameter<'a> {
    pub name: String,
    pub value: ArrayViewD<'a, f32>,
}

/// Pre-activations (or their gradients) of the four LSTM gates
///
/// The same container carries `z = affine(x, h_prev)` on the way forward and
/// `dL/dz` on the way back.
#[derive(Debug, Clone)]
pub struct GatePreactivations {
    pub input: Tensor,
    pub forget: Tensor,
    pub candidate: Tensor,
    pub output: Tensor,
}

impl GatePreactivations {
    /// Returns the tensor belonging to `kind`
    pub fn get(&self, kind: GateKind) -> &Tensor {
        match kind {
            GateKind::Input => &self.input,
            GateKind::Forget => &self.forget,
            GateKind::Cell => &self.candidate,
            GateKind::Output => &self.output,
        }
    }
}

/// Everything one cell step needs to be differentiated later
#[derive(Debug, Clone)]
pub struct StepTrace {
    mask: Array1<f32>,
    input: Tensor,
    prev: CellState,
    input_gate: Tensor,
    forget_gate: Tensor,
    candidate: Tensor,
    output_gate: Tensor,
    squashed_cell: Tensor,
}

impl StepTrace {
    /// Input the step consumed
    pub fn input(&self) -> &Tensor {
        &self.input
    }

    /// State the step started from
    pub fn prev(&self) -> &CellState {
        &self.prev
    }

    /// Per-example mask the step was run with
    pub fn mask(&self) -> &Array1<f32> {
        &self.mask
    }
}

/// Runs the LSTM gating algebra on precomputed pre-activations
///
/// ```text
/// i = σ(z_i)   f = σ(z_f)   g = act(z_g)   o = σ(z_o)
/// c' = f ⊙ c + i ⊙ g
/// h' = o ⊙ act(c')
/// ```
///
/// The masked blend `m·new + (1−m)·prev` is applied per example; a mask of exactly 0
/// returns the previous state unchanged.
pub(crate) fn apply_gating(
    activation: Activation,
    mask: &Array1<f32>,
    input: &Tensor,
    prev: &CellState,
    pre: GatePreactivations,
) -> (CellState, StepTrace) {
    let GatePreactivations {
        input: z_i,
        forget: z_f,
        candidate: z_g,
        output: z_o,
    } = pre;
    let gate = Activation::Sigmoid;

    let ((input_gate, forget_gate), (candidate, output_gate)) =
        if z_i.len() >= GATING_PARALLEL_THRESHOLD {
            rayon::join(
                move || rayon::join(move || gate.apply(z_i), move || gate.apply(z_f)),
                move || rayon::join(move || activation.apply(z_g), move || gate.apply(z_o)),
            )
        } else {
            (
                (gate.apply(z_i), gate.apply(z_f)),
                (activation.apply(z_g), gate.apply(z_o)),
            )
        };

    let new_cell = &forget_gate * &prev.cell + &input_gate * &candidate;
    let squashed_cell = activation.apply(new_cell.clone());
    let new_hidden = &output_gate * &squashed_cell;

    let state = CellState {
        cell: blend_with_mask(mask, new_cell, &prev.cell),
        hidden: blend_with_mask(mask, new_hidden, &prev.hidden),
    };
    let trace = StepTrace {
        mask: mask.clone(),
        input: input.clone(),
        prev: prev.clone(),
        input_gate,
        forget_gate,
        candidate,
        output_gate,
        squashed_cell,
    };
    (state, trace)
}

/// Differentiates [`apply_gating`]
///
/// # Parameters
///
/// - `activation` - Activation the step ran with
/// - `trace` - Trace recorded by the forward step
/// - `grad` - Gradient of the loss with respect to the (masked) new state
///
/// # Returns
///
/// - `GatePreactivations` - Gradients with respect to the four pre-activations
/// - `CellState` - Gradient reaching the previous state through the mask and the forget gate;
///   the recurrent-kernel contribution to `hidden` is added by the caller
pub(crate) fn gating_backward(
    activation: Activation,
    trace: &StepTrace,
    grad: &CellState,
) -> (GatePreactivations, CellState) {
    let dh = scale_rows(&grad.hidden, &trace.mask, |m| m);
    let dc_direct = scale_rows(&grad.cell, &trace.mask, |m| m);
    let mut d_prev = CellState {
        cell: scale_rows(&grad.cell, &trace.mask, |m| 1.0 - m),
        hidden: scale_rows(&grad.hidden, &trace.mask, |m| 1.0 - m),
    };

    let d_output_gate = &dh * &trace.squashed_cell;
    let dc = dc_direct + &(&dh * &trace.output_gate * &activation.derivative(&trace.squashed_cell));

    let d_forget_gate = &dc * &trace.prev.cell;
    let d_input_gate = &dc * &trace.candidate;
    let d_candidate = &dc * &trace.input_gate;
    d_prev.cell += &(&dc * &trace.forget_gate);

    let gate = Activation::Sigmoid;
    let d_pre = GatePreactivations {
        input: d_input_gate * &gate.derivative(&trace.input_gate),
        forget: d_forget_gate * &gate.derivative(&trace.forget_gate),
        candidate: d_candidate * &activation.derivative(&trace.candidate),
        output: d_output_gate * &gate.derivative(&trace.output_gate),
    };
    (d_pre, d_prev)
}

/// Per-example blend `m·computed + (1−m)·prev`, copying `prev` exactly where `m == 0`
fn blend_with_mask(mask: &Array1<f32>, computed: Tensor, prev: &Tensor) -> Tensor {
    let mut blended = computed;
    for ((mut row, prev_row), &m) in blended
        .axis_iter_mut(Axis(0))
        .zip(prev.axis_iter(Axis(0)))
        .zip(mask.iter())
    {
        if m == 0.0 {
            row.assign(&prev_row);
        } else if m != 1.0 {
            Zip::from(&mut row)
                .and(&prev_row)
                .for_each(|c, &p| *c = m * *c + (1.0 - m) * p);
        }
    }
    blended
}

/// Multiplies every example (row along axis 0) by `scale(mask[b])`
fn scale_rows(tensor: &Tensor, mask: &Array1<f32>, scale: impl Fn(f32) -> f32) -> Tensor {
    let mut scaled = tensor.clone();
    for (mut row, &m) in scaled.axis_iter_mut(Axis(0)).zip(mask.iter()) {
        let s = scale(m);
        if s == 0.0 {
            row.fill(0.0);
        } else if s != 1.0 {
            row *= s;
        }
    }
    scaled
}
