/// Mean Squared Error, used as the prediction error of a trained model
pub mod mean_squared_error;
/// L2 norm of the prediction residual averaged over the predicted timesteps, used as the training cost
pub mod sequence_l2_cost;

pub use mean_squared_error::*;
pub use sequence_l2_cost::*;
