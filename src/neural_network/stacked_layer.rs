use crate::error::ModelError;
use crate::neural_network::cell::{CellState, ConvLSTMCell, LSTMCell, NamedParameter, StepTrace};
use crate::neural_network::neural_network_trait::RecurrentCell;
use crate::neural_network::{Activation, Tensor};
use ndarray::{Array1, ArrayViewMutD};
use rand::Rng;
use std::ops::Range;

/// A vertical stack of recurrent cells advanced together one timestep at a time.
///
/// Layer 0 consumes the external input; layer i > 0 consumes the new hidden state of
/// layer i-1 at the same timestep. The stack output is the top layer's hidden state.
///
/// # Example
/// ```rust
/// use nowcast::neural_network::{Activation, StackedLayer};
/// use ndarray::{Array1, ArrayD};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(1);
/// let stack = StackedLayer::dense(4, &[4, 8, 4], Activation::Tanh, &mut rng).unwrap();
///
/// let x = ArrayD::<f32>::ones(vec![3, 4]);
/// let (states, _) = stack.step(&Array1::ones(3), &x, &stack.initial_states(3)).unwrap();
/// assert_eq!(states.len(), 3);
/// assert_eq!(states[2].hidden.shape(), &[3, 4]);
/// ```
pub struct StackedLayer {
    cells: Vec<Box<dyn RecurrentCell>>,
    parameter_ranges: Vec<Range<usize>>,
}

impl StackedLayer {
    /// Builds a stack from already constructed cells
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `cells` is empty or a cell's input shape
    ///   differs from the state shape of the cell below it
    pub fn new(cells: Vec<Box<dyn RecurrentCell>>) -> Result<Self, ModelError> {
        if cells.is_empty() {
            return Err(ModelError::InputValidationError(
                "a stacked layer needs at least one cell".to_string(),
            ));
        }
        for (i, pair) in cells.windows(2).enumerate() {
            if pair[1].input_shape() != pair[0].state_shape() {
                return Err(ModelError::InputValidationError(format!(
                    "layer {} expects input shape {:?} but layer {} produces {:?}",
                    i + 1,
                    pair[1].input_shape(),
                    i,
                    pair[0].state_shape()
                )));
            }
        }

        let mut parameter_ranges = Vec::with_capacity(cells.len());
        let mut offset = 0;
        for cell in &cells {
            let count = cell.parameters().len();
            parameter_ranges.push(offset..offset + count);
            offset += count;
        }

        Ok(Self {
            cells,
            parameter_ranges,
        })
    }

    /// Stack of dense LSTM cells
    ///
    /// # Parameters
    ///
    /// - `n_ins` - Number of input features
    /// - `hidden_sizes` - Units per layer, bottom to top
    /// - `activation` - Candidate and cell-output activation of every layer
    /// - `rng` - Random number generator used for initialization
    pub fn dense<R: Rng + ?Sized>(
        n_ins: usize,
        hidden_sizes: &[usize],
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let mut cells: Vec<Box<dyn RecurrentCell>> = Vec::with_capacity(hidden_sizes.len());
        let mut input_dim = n_ins;
        for &units in hidden_sizes {
            cells.push(Box::new(LSTMCell::new(input_dim, units, activation, rng)?));
            input_dim = units;
        }
        Self::new(cells)
    }

    /// Stack of ConvLSTM cells
    ///
    /// # Parameters
    ///
    /// - `input_shape` - Per-example frame shape `(channels, height, width)`
    /// - `filter_shapes` - `(filters, in_channels, kernel_h, kernel_w)` per layer, bottom to top
    /// - `activation` - Candidate and cell-output activation of every layer
    /// - `rng` - Random number generator used for initialization
    pub fn convolutional<R: Rng + ?Sized>(
        input_shape: (usize, usize, usize),
        filter_shapes: &[(usize, usize, usize, usize)],
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let (mut channels, height, width) = input_shape;
        let mut cells: Vec<Box<dyn RecurrentCell>> = Vec::with_capacity(filter_shapes.len());
        for &filter_shape in filter_shapes {
            cells.push(Box::new(ConvLSTMCell::new(
                (channels, height, width),
                filter_shape,
                activation,
                rng,
            )?));
            channels = filter_shape.0;
        }
        Self::new(cells)
    }

    /// Number of layers
    pub fn depth(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &[Box<dyn RecurrentCell>] {
        &self.cells
    }

    /// Per-example input shape of the bottom layer
    pub fn input_shape(&self) -> &[usize] {
        self.cells[0].input_shape()
    }

    /// Per-example state shape of the top layer, i.e. the shape of the stack output
    pub fn output_shape(&self) -> &[usize] {
        self.cells[self.cells.len() - 1].state_shape()
    }

    /// Zero states for every layer
    pub fn initial_states(&self, batch_size: usize) -> Vec<CellState> {
        self.cells
            .iter()
            .map(|cell| cell.initial_state(batch_size))
            .collect()
    }

    /// Advances every layer by one timestep, bottom to top
    ///
    /// # Parameters
    ///
    /// - `mask` - One value per example, shared by all layers
    /// - `input` - Input of the bottom layer with shape `(batch, input_shape...)`
    /// - `prev` - One state per layer
    ///
    /// # Returns
    ///
    /// - `Ok((Vec<CellState>, Vec<StepTrace>))` - New state and trace per layer
    pub fn step(
        &self,
        mask: &Array1<f32>,
        input: &Tensor,
        prev: &[CellState],
    ) -> Result<(Vec<CellState>, Vec<StepTrace>), ModelError> {
        if prev.len() != self.depth() {
            return Err(ModelError::InputValidationError(format!(
                "expected {} layer states, got {}",
                self.depth(),
                prev.len()
            )));
        }

        let mut states: Vec<CellState> = Vec::with_capacity(self.depth());
        let mut traces = Vec::with_capacity(self.depth());
        for (i, (cell, prev_state)) in self.cells.iter().zip(prev).enumerate() {
            let layer_input = if i == 0 { input } else { &states[i - 1].hidden };
            let (state, trace) = cell.step(mask, layer_input, prev_state)?;
            states.push(state);
            traces.push(trace);
        }
        Ok((states, traces))
    }

    /// Backpropagates one [`StackedLayer::step`], top layer first
    ///
    /// # Parameters
    ///
    /// - `traces` - Traces returned by the forward step
    /// - `grad_states` - Gradient with respect to every layer's new state
    /// - `grads` - Parameter gradient accumulators aligned with [`StackedLayer::parameters`]
    ///
    /// # Returns
    ///
    /// - `Ok((Tensor, Vec<CellState>))` - Gradient with respect to the stack input and to
    ///   every layer's previous state
    pub fn step_backward(
        &self,
        traces: &[StepTrace],
        grad_states: Vec<CellState>,
        grads: &mut [Tensor],
    ) -> Result<(Tensor, Vec<CellState>), ModelError> {
        if traces.len() != self.depth() || grad_states.len() != self.depth() {
            return Err(ModelError::ProcessingError(format!(
                "expected {} traces and state gradients, got {} and {}",
                self.depth(),
                traces.len(),
                grad_states.len()
            )));
        }
        if grads.len() != self.parameter_tensor_count() {
            return Err(ModelError::ProcessingError(format!(
                "expected {} gradient tensors, got {}",
                self.parameter_tensor_count(),
                grads.len()
            )));
        }

        let mut d_prev_states = Vec::with_capacity(self.depth());
        let mut d_from_above: Option<Tensor> = None;
        for (i, mut grad) in grad_states.into_iter().enumerate().rev() {
            if let Some(d_above) = d_from_above.take() {
                grad.hidden += &d_above;
            }
            let range = self.parameter_ranges[i].clone();
            let (d_input, d_prev) = self.cells[i].step_backward(&traces[i], &grad, &mut grads[range])?;
            d_prev_states.push(d_prev);
            d_from_above = Some(d_input);
        }
        d_prev_states.reverse();

        let d_input = d_from_above.ok_or_else(|| {
            ModelError::ProcessingError("stacked layer has no cells".to_string())
        })?;
        Ok((d_input, d_prev_states))
    }

    /// Named views of every parameter, prefixed with `layer{i}.`
    pub fn parameters(&self) -> Vec<NamedParameter<'_>> {
        self.cells
            .iter()
            .enumerate()
            .flat_map(|(i, cell)| {
                cell.parameters()
                    .into_iter()
                    .map(move |p| NamedParameter {
                        name: format!("layer{}.{}", i, p.name),
                        value: p.value,
                    })
            })
            .collect()
    }

    /// Mutable views in the same order as [`StackedLayer::parameters`]
    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.cells
            .iter_mut()
            .flat_map(|cell| cell.parameters_mut())
            .collect()
    }

    /// Number of parameter tensors (not scalars)
    pub fn parameter_tensor_count(&self) -> usize {
        self.parameter_ranges.last().map_or(0, |range| range.end)
    }

    /// Number of trainable scalars
    pub fn param_count(&self) -> usize {
        self.cells.iter().map(|cell| cell.param_count()).sum()
    }
}

impl std::fmt::Debug for StackedLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.cells.iter().map(|cell| {
                format!(
                    "{}({:?} -> {:?})",
                    cell.layer_type(),
                    cell.input_shape(),
                    cell.state_shape()
                )
            }))
            .finish()
    }
}
