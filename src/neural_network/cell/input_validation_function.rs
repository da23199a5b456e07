use crate::error::ModelError;

/// Validates that a dimension is greater than zero
///
/// # Parameters
///
/// - `value` - The dimension value to check
/// - `name` - Name used in the error message
///
/// # Errors
///
/// - `ModelError::InputValidationError` - If `value` is 0
pub(super) fn validate_dimension_greater_than_zero(
    value: usize,
    name: &str,
) -> Result<(), ModelError> {
    if value == 0 {
        return Err(ModelError::InputValidationError(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(())
}

/// Validates that a replacement weight has the shape of the weight it replaces
pub(super) fn validate_weight_shape(
    expected: &[usize],
    actual: &[usize],
    name: &str,
) -> Result<(), ModelError> {
    if expected != actual {
        return Err(ModelError::InputValidationError(format!(
            "{} shape mismatch: expected {:?}, got {:?}",
            name, expected, actual
        )));
    }
    Ok(())
}

/// Validates that a step input matches `(batch, expected...)`
pub(super) fn validate_step_input(
    actual: &[usize],
    batch_size: usize,
    expected: &[usize],
    name: &str,
) -> Result<(), ModelError> {
    if actual.len() != expected.len() + 1 || actual[0] != batch_size || &actual[1..] != expected {
        return Err(ModelError::InputValidationError(format!(
            "{} must have shape [{}, {:?}], got {:?}",
            name, batch_size, expected, actual
        )));
    }
    Ok(())
}
