use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::cell::{CellState, StepTrace, batched_shape};
use crate::neural_network::stacked_layer::StackedLayer;
use ndarray::Array1;

/// How a [`RecurrenceDriver`] obtains the input of each timestep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Consume a caller-provided input sequence and mask
    Encode,
    /// Start from a seed frame and feed each step's top output back as the next input
    Decode,
}

/// Inputs of one unroll; the variant must agree with the driver's [`DriveMode`]
#[derive(Debug, Clone)]
pub enum DriverInput<'a> {
    /// Time-major inputs `(batch, input_shape...)` and one mask vector per timestep.
    /// Every layer starts from the zero state.
    Encode {
        inputs: &'a [Tensor],
        masks: &'a [Array1<f32>],
    },
    /// Generate `n_steps` outputs from `seed`, starting from `initial_states` (one per layer).
    /// Masks are all ones.
    Decode {
        n_steps: usize,
        seed: Tensor,
        initial_states: Vec<CellState>,
    },
}

/// Result of unrolling a stack over time
///
/// # Fields
///
/// - `initial_states` - State of every layer before the first timestep
/// - `states` - `states[t][i]` is layer i's state after timestep t
/// - `outputs` - Top-layer hidden state after every timestep
#[derive(Debug, Clone)]
pub struct Unrolled {
    pub initial_states: Vec<CellState>,
    pub states: Vec<Vec<CellState>>,
    pub outputs: Vec<Tensor>,
    traces: Option<Vec<Vec<StepTrace>>>,
}

impl Unrolled {
    /// Number of timesteps that were run
    pub fn n_steps(&self) -> usize {
        self.outputs.len()
    }

    /// State of every layer after the last timestep
    pub fn final_states(&self) -> &[CellState] {
        self.states
            .last()
            .map_or(self.initial_states.as_slice(), |states| states.as_slice())
    }

    /// Whether per-step traces were kept for a backward pass
    pub fn is_recorded(&self) -> bool {
        self.traces.is_some()
    }
}

/// Runs a [`StackedLayer`] over time.
///
/// Timesteps are processed strictly in order; each step depends only on the
/// previous step's states (and, in decode mode, the previous top output).
#[derive(Debug)]
pub struct RecurrenceDriver {
    mode: DriveMode,
    stack: StackedLayer,
}

impl RecurrenceDriver {
    /// Creates a driver
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - In decode mode, if the top layer's state shape
    ///   differs from the bottom layer's input shape, since outputs are fed back as inputs
    pub fn new(mode: DriveMode, stack: StackedLayer) -> Result<Self, ModelError> {
        if mode == DriveMode::Decode && stack.output_shape() != stack.input_shape() {
            return Err(ModelError::InputValidationError(format!(
                "a decoding stack must produce its own input shape: input {:?}, output {:?}",
                stack.input_shape(),
                stack.output_shape()
            )));
        }
        Ok(Self { mode, stack })
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn stack(&self) -> &StackedLayer {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut StackedLayer {
        &mut self.stack
    }

    /// Unrolls the stack over time
    ///
    /// # Parameters
    ///
    /// - `input` - Encode or decode inputs matching this driver's mode
    /// - `record` - Keep per-step traces so that [`RecurrenceDriver::backward`] can run
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - On a mode mismatch, an empty sequence, or
    ///   inconsistent batch sizes and shapes
    pub fn unroll(&self, input: DriverInput<'_>, record: bool) -> Result<Unrolled, ModelError> {
        match (self.mode, input) {
            (DriveMode::Encode, DriverInput::Encode { inputs, masks }) => {
                self.encode(inputs, masks, record)
            }
            (
                DriveMode::Decode,
                DriverInput::Decode {
                    n_steps,
                    seed,
                    initial_states,
                },
            ) => self.decode(n_steps, seed, initial_states, record),
            (mode, _) => Err(ModelError::InputValidationError(format!(
                "driver in {:?} mode received the other kind of input",
                mode
            ))),
        }
    }

    fn encode(
        &self,
        inputs: &[Tensor],
        masks: &[Array1<f32>],
        record: bool,
    ) -> Result<Unrolled, ModelError> {
        if inputs.is_empty() {
            return Err(ModelError::InputValidationError(
                "input sequence must contain at least one timestep".to_string(),
            ));
        }
        if inputs.len() != masks.len() {
            return Err(ModelError::InputValidationError(format!(
                "got {} input timesteps but {} masks",
                inputs.len(),
                masks.len()
            )));
        }
        let batch_size = inputs[0].shape().first().copied().unwrap_or(0);
        let expected = batched_shape(batch_size, self.stack.input_shape());
        for (t, (x, m)) in inputs.iter().zip(masks).enumerate() {
            if x.shape() != expected.as_slice() {
                return Err(ModelError::InputValidationError(format!(
                    "input at timestep {} has shape {:?}, expected {:?}",
                    t,
                    x.shape(),
                    expected
                )));
            }
            if m.len() != batch_size {
                return Err(ModelError::InputValidationError(format!(
                    "mask at timestep {} has {} entries for a batch of {}",
                    t,
                    m.len(),
                    batch_size
                )));
            }
        }

        let initial_states = self.stack.initial_states(batch_size);
        let mut unrolled = Unrolled::start(initial_states, inputs.len(), record);
        for (x, m) in inputs.iter().zip(masks) {
            let (states, traces) = self.stack.step(m, x, unrolled.final_states())?;
            unrolled.push(states, traces);
        }
        Ok(unrolled)
    }

    fn decode(
        &self,
        n_steps: usize,
        seed: Tensor,
        initial_states: Vec<CellState>,
        record: bool,
    ) -> Result<Unrolled, ModelError> {
        if n_steps == 0 {
            return Err(ModelError::InputValidationError(
                "n_steps must be greater than 0".to_string(),
            ));
        }
        let batch_size = seed.shape().first().copied().unwrap_or(0);
        let expected = batched_shape(batch_size, self.stack.input_shape());
        if seed.shape() != expected.as_slice() {
            return Err(ModelError::InputValidationError(format!(
                "seed has shape {:?}, expected {:?}",
                seed.shape(),
                expected
            )));
        }
        if initial_states.len() != self.stack.depth() {
            return Err(ModelError::InputValidationError(format!(
                "expected {} initial states, got {}",
                self.stack.depth(),
                initial_states.len()
            )));
        }
        for (i, (state, cell)) in initial_states.iter().zip(self.stack.cells()).enumerate() {
            let expected = batched_shape(batch_size, cell.state_shape());
            if state.cell.shape() != expected.as_slice() || state.hidden.shape() != expected.as_slice() {
                return Err(ModelError::InputValidationError(format!(
                    "initial state of layer {} has shape {:?}/{:?}, expected {:?}",
                    i,
                    state.cell.shape(),
                    state.hidden.shape(),
                    expected
                )));
            }
        }

        let mask = Array1::<f32>::ones(batch_size);
        let mut unrolled = Unrolled::start(initial_states, n_steps, record);
        let (states, traces) = self.stack.step(&mask, &seed, unrolled.final_states())?;
        unrolled.push(states, traces);
        for _ in 1..n_steps {
            let feedback = unrolled.outputs[unrolled.outputs.len() - 1].clone();
            let (states, traces) = self.stack.step(&mask, &feedback, unrolled.final_states())?;
            unrolled.push(states, traces);
        }
        Ok(unrolled)
    }

    /// Backpropagation through time over a recorded unroll
    ///
    /// # Parameters
    ///
    /// - `unrolled` - Result of [`RecurrenceDriver::unroll`] with `record == true`
    /// - `output_grads` - Gradient with respect to the top output of each timestep, if any
    /// - `final_state_grads` - Gradient with respect to the final state of every layer, if any
    /// - `grads` - Parameter gradient accumulators aligned with the stack's parameters
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<CellState>)` - Gradient with respect to every layer's initial state
    ///
    /// # Errors
    ///
    /// - `ModelError::ProcessingError` - If the unroll was not recorded or the gradients do not line up
    pub fn backward(
        &self,
        unrolled: &Unrolled,
        mut output_grads: Vec<Option<Tensor>>,
        final_state_grads: Option<Vec<CellState>>,
        grads: &mut [Tensor],
    ) -> Result<Vec<CellState>, ModelError> {
        let traces = unrolled.traces.as_ref().ok_or_else(|| {
            ModelError::ProcessingError("backward requires an unroll with recorded traces".to_string())
        })?;
        if output_grads.len() != traces.len() {
            return Err(ModelError::ProcessingError(format!(
                "expected {} output gradients, got {}",
                traces.len(),
                output_grads.len()
            )));
        }

        let top = self.stack.depth() - 1;
        let mut state_grads = match final_state_grads {
            Some(state_grads) => state_grads,
            None => unrolled
                .final_states()
                .iter()
                .map(CellState::zeros_like)
                .collect(),
        };

        for t in (0..traces.len()).rev() {
            if let Some(d_output) = output_grads[t].take() {
                state_grads[top].hidden += &d_output;
            }
            let (d_input, d_prev) = self.stack.step_backward(&traces[t], state_grads, grads)?;
            if self.mode == DriveMode::Decode && t > 0 {
                match output_grads[t - 1].as_mut() {
                    Some(d_output) => *d_output += &d_input,
                    None => output_grads[t - 1] = Some(d_input),
                }
            }
            state_grads = d_prev;
        }
        Ok(state_grads)
    }
}

impl Unrolled {
    fn start(initial_states: Vec<CellState>, capacity: usize, record: bool) -> Self {
        Self {
            initial_states,
            states: Vec::with_capacity(capacity),
            outputs: Vec::with_capacity(capacity),
            traces: record.then(|| Vec::with_capacity(capacity)),
        }
    }

    fn push(&mut self, states: Vec<CellState>, traces: Vec<StepTrace>) {
        if let Some(top) = states.last() {
            self.outputs.push(top.hidden.clone());
        }
        if let Some(recorded) = self.traces.as_mut() {
            recorded.push(traces);
        }
        self.states.push(states);
    }
}
