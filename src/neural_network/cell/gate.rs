use super::input_validation_function::{validate_dimension_greater_than_zero, validate_weight_shape};
use crate::error::ModelError;
use ndarray::{
    Array, Array1, Array2, Array4, ArrayView2, ArrayViewD, ArrayViewMutD, Dimension, ShapeBuilder,
};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Parameter roles of every gate, in storage order
pub const PARAMETER_ROLES: [&str; 3] = ["kernel", "recurrent_kernel", "bias"];

/// The four LSTM gates, in the order their parameters are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    Input,
    Forget,
    Cell,
    Output,
}

impl GateKind {
    /// All gates in storage order
    pub const ALL: [GateKind; 4] = [
        GateKind::Input,
        GateKind::Forget,
        GateKind::Cell,
        GateKind::Output,
    ];

    /// Name used as the parameter path segment, e.g. `forget_gate`
    pub fn name(&self) -> &'static str {
        match self {
            GateKind::Input => "input_gate",
            GateKind::Forget => "forget_gate",
            GateKind::Cell => "cell_gate",
            GateKind::Output => "output_gate",
        }
    }

    /// Initial bias: 1.0 for the forget gate, 0.0 otherwise
    pub fn bias_init_value(&self) -> f32 {
        match self {
            GateKind::Forget => 1.0,
            _ => 0.0,
        }
    }
}

/// Gate parameters of a fully connected LSTM cell.
///
/// # Fields
///
/// - `kernel` - Weight matrix for input connections with shape (input_dim, units)
/// - `recurrent_kernel` - Weight matrix for recurrent connections with shape (units, units)
/// - `bias` - Bias vector with shape (1, units)
#[derive(Debug, Clone)]
pub struct Gate {
    pub kernel: Array2<f32>,
    pub recurrent_kernel: Array2<f32>,
    pub bias: Array2<f32>,
}

impl Gate {
    /// Creates a gate with randomly initialized weights.
    ///
    /// Uses Xavier/Glorot initialization for the input kernel, a column-normalized
    /// random recurrent kernel, and a constant bias value.
    ///
    /// # Parameters
    ///
    /// - `input_dim` - Dimensionality of the input features
    /// - `units` - Number of units in this gate
    /// - `bias_init_value` - Initial value for the bias
    /// - `rng` - Random number generator used for the weights
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `input_dim` or `units` is 0
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        units: usize,
        bias_init_value: f32,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        validate_dimension_greater_than_zero(input_dim, "input_dim")?;
        validate_dimension_greater_than_zero(units, "units")?;

        let limit = (6.0 / (input_dim + units) as f32).sqrt();
        let kernel = random_uniform((input_dim, units), limit, rng)?;

        let mut recurrent_kernel = random_uniform((units, units), 1.0, rng)?;
        for mut col in recurrent_kernel.columns_mut() {
            let norm = col.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 1e-8 {
                col /= norm;
            }
        }

        let bias = Array::from_elem((1, units), bias_init_value);

        Ok(Self {
            kernel,
            recurrent_kernel,
            bias,
        })
    }

    /// Replaces the gate weights after checking their shapes
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If any shape differs from the current one
    pub fn set_weights(
        &mut self,
        kernel: Array2<f32>,
        recurrent_kernel: Array2<f32>,
        bias: Array2<f32>,
    ) -> Result<(), ModelError> {
        validate_weight_shape(self.kernel.shape(), kernel.shape(), "kernel")?;
        validate_weight_shape(
            self.recurrent_kernel.shape(),
            recurrent_kernel.shape(),
            "recurrent_kernel",
        )?;
        validate_weight_shape(self.bias.shape(), bias.shape(), "bias")?;
        self.kernel = kernel;
        self.recurrent_kernel = recurrent_kernel;
        self.bias = bias;
        Ok(())
    }

    pub fn views(&self) -> [ArrayViewD<'_, f32>; 3] {
        [
            self.kernel.view().into_dyn(),
            self.recurrent_kernel.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    pub fn views_mut(&mut self) -> [ArrayViewMutD<'_, f32>; 3] {
        [
            self.kernel.view_mut().into_dyn(),
            self.recurrent_kernel.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.recurrent_kernel.len() + self.bias.len()
    }
}

/// Computes gate value: x_t @ kernel + h_prev @ recurrent_kernel + bias
///
/// # Parameters
///
/// - `gate` - Gate parameters used for the computation
/// - `x_t` - Input at the current timestep with shape (batch, input_dim)
/// - `h_prev` - Previous hidden state with shape (batch, units)
///
/// # Returns
///
/// - `Array2<f32>` - Pre-activation gate values with shape (batch, units)
#[inline]
pub fn compute_gate_value(
    gate: &Gate,
    x_t: &ArrayView2<f32>,
    h_prev: &ArrayView2<f32>,
) -> Array2<f32> {
    x_t.dot(&gate.kernel) + h_prev.dot(&gate.recurrent_kernel) + &gate.bias
}

/// Gate parameters of a convolutional LSTM cell.
///
/// # Fields
///
/// - `kernel` - Input-to-state filters with shape (filters, in_channels, kernel_h, kernel_w)
/// - `recurrent_kernel` - State-to-state filters with shape (filters, filters, kernel_h, kernel_w)
/// - `bias` - Per-channel bias with shape (filters)
#[derive(Debug, Clone)]
pub struct ConvGate {
    pub kernel: Array4<f32>,
    pub recurrent_kernel: Array4<f32>,
    pub bias: Array1<f32>,
}

impl ConvGate {
    /// Creates a convolutional gate with Xavier/Glorot uniform filters and a constant bias
    ///
    /// # Parameters
    ///
    /// - `filter_shape` - `(filters, in_channels, kernel_h, kernel_w)`
    /// - `bias_init_value` - Initial value for every channel bias
    /// - `rng` - Random number generator used for the filters
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If any filter dimension is 0
    pub fn new<R: Rng + ?Sized>(
        filter_shape: (usize, usize, usize, usize),
        bias_init_value: f32,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let (filters, in_channels, kernel_h, kernel_w) = filter_shape;
        validate_dimension_greater_than_zero(filters, "filters")?;
        validate_dimension_greater_than_zero(in_channels, "in_channels")?;
        validate_dimension_greater_than_zero(kernel_h, "kernel_h")?;
        validate_dimension_greater_than_zero(kernel_w, "kernel_w")?;

        let receptive = kernel_h * kernel_w;
        let input_limit = (6.0 / ((in_channels + filters) * receptive) as f32).sqrt();
        let recurrent_limit = (6.0 / ((filters + filters) * receptive) as f32).sqrt();

        Ok(Self {
            kernel: random_uniform(filter_shape, input_limit, rng)?,
            recurrent_kernel: random_uniform((filters, filters, kernel_h, kernel_w), recurrent_limit, rng)?,
            bias: Array1::from_elem(filters, bias_init_value),
        })
    }

    /// Replaces the gate filters after checking their shapes
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If any shape differs from the current one
    pub fn set_weights(
        &mut self,
        kernel: Array4<f32>,
        recurrent_kernel: Array4<f32>,
        bias: Array1<f32>,
    ) -> Result<(), ModelError> {
        validate_weight_shape(self.kernel.shape(), kernel.shape(), "kernel")?;
        validate_weight_shape(
            self.recurrent_kernel.shape(),
            recurrent_kernel.shape(),
            "recurrent_kernel",
        )?;
        validate_weight_shape(self.bias.shape(), bias.shape(), "bias")?;
        self.kernel = kernel;
        self.recurrent_kernel = recurrent_kernel;
        self.bias = bias;
        Ok(())
    }

    pub fn views(&self) -> [ArrayViewD<'_, f32>; 3] {
        [
            self.kernel.view().into_dyn(),
            self.recurrent_kernel.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    pub fn views_mut(&mut self) -> [ArrayViewMutD<'_, f32>; 3] {
        [
            self.kernel.view_mut().into_dyn(),
            self.recurrent_kernel.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.recurrent_kernel.len() + self.bias.len()
    }
}

/// Draws an array from U(-limit, limit)
fn random_uniform<Sh, D, R>(shape: Sh, limit: f32, rng: &mut R) -> Result<Array<f32, D>, ModelError>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    let dist = Uniform::<f32>::new(-limit, limit).map_err(|e| {
        ModelError::ProcessingError(format!("Failed to build weight distribution: {}", e))
    })?;
    Ok(Array::from_shape_simple_fn(shape, || dist.sample(rng)))
}
