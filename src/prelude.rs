pub use crate::dataset::{ConstantGenerator, Dataset, Minibatch, Partitions, SinGenerator};
pub use crate::error::{IoError, ModelError, TrainingError};
pub use crate::neural_network::neural_network_trait::{
    LossFunction, Optimizer, RecurrentCell, TrainableModel,
};
pub use crate::neural_network::{
    Activation, Adadelta, CellState, ConvLSTMCell, DriveMode, DriverInput, EncoderDecoder,
    GateKind, LSTMCell, MeanSquaredError, PredictionTarget, RMSprop, RecurrenceDriver, SGD,
    SequenceL2Cost, StackedLayer, Tensor,
};
pub use crate::training::{
    Checkpoint, EarlyStopping, ExperimentConfig, ParameterSnapshot, StopReason, Trainer,
    TrainingConfig, TrainingReport, run_experiment,
};
