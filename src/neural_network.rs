/// Module that contains activation function implementations
pub mod activation;
/// Module that contains the recurrent cells (dense LSTM and ConvLSTM) and their shared gating algebra
pub mod cell;
/// Module that contains the sequence-to-sequence encoder-decoder model
pub mod encoder_decoder;
/// Module that contains loss function implementations
pub mod loss_function;
/// Module that contains the traits tying cells, models and optimizers together
pub mod neural_network_trait;
/// Module that contains optimization algorithms for training
pub mod optimizer;
/// Module that unrolls a stacked layer over time in encode or decode mode
pub mod recurrence_driver;
/// Module that composes cells into a vertical stack
pub mod stacked_layer;

pub use activation::*;
pub use cell::{CellState, ConvLSTMCell, GateKind, LSTMCell, NamedParameter, StepTrace};
pub use encoder_decoder::*;
pub use loss_function::*;
pub use optimizer::*;
pub use recurrence_driver::*;
pub use stacked_layer::*;

use ndarray::ArrayD;

/// Type alias for n-dimensional arrays used as tensors in the neural network
pub type Tensor = ArrayD<f32>;

pub use neural_network_trait::{LossFunction, Optimizer, RecurrentCell, TrainableModel};
