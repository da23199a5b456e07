use crate::error::ModelError;

fn require_positive_finite(value: f32, name: &str) -> Result<(), ModelError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ModelError::InputValidationError(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

/// Checked on every `apply`, since the trainer passes the rate per update
pub(super) fn validate_learning_rate(learning_rate: f32) -> Result<(), ModelError> {
    require_positive_finite(learning_rate, "learning_rate")
}

/// Running-average decay (`rho`) or velocity decay (`momentum`); both live in `[0, 1)`.
///
/// NaN fails the range check.
pub(super) fn validate_decay_rate(value: f32, name: &str) -> Result<(), ModelError> {
    if (0.0..1.0).contains(&value) {
        return Ok(());
    }
    Err(ModelError::InputValidationError(format!(
        "{} must lie in [0, 1), got {}",
        name, value
    )))
}

pub(super) fn validate_epsilon(epsilon: f32) -> Result<(), ModelError> {
    require_positive_finite(epsilon, "epsilon")
}
