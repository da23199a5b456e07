use crate::error::ModelError;

/// Outcome of recording one validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// The validation error is no worse than any earlier one
    pub is_best: bool,
    /// Patience ran out
    pub should_stop: bool,
}

/// Patience-based early stopping over `(valid, test)` error pairs.
///
/// After each validation:
/// - a validation error `<=` every earlier one is the new best and resets the bad counter;
/// - once more than `patience` errors are recorded, an error no better than the best one
///   recorded before the last `patience` validations increments the bad counter;
/// - the run stops when the bad counter exceeds `patience`.
///
/// # Example
/// ```rust
/// use nowcast::training::EarlyStopping;
///
/// let mut early_stopping = EarlyStopping::new(1).unwrap();
/// assert!(early_stopping.record(1.0, 1.0).is_best);
/// assert!(!early_stopping.record(2.0, 2.0).should_stop);
/// assert!(early_stopping.record(3.0, 3.0).should_stop);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    history: Vec<[f32; 2]>,
    bad_counter: usize,
}

impl EarlyStopping {
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `patience` is 0
    pub fn new(patience: usize) -> Result<Self, ModelError> {
        if patience == 0 {
            return Err(ModelError::InputValidationError(
                "patience must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            patience,
            history: Vec::new(),
            bad_counter: 0,
        })
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    /// Recorded `[valid, test]` pairs, oldest first
    pub fn history(&self) -> &[[f32; 2]] {
        &self.history
    }

    pub fn bad_counter(&self) -> usize {
        self.bad_counter
    }

    /// Lowest validation error recorded so far
    pub fn best_valid_error(&self) -> Option<f32> {
        min_valid(&self.history)
    }

    /// Records one validation and decides whether it is the best and whether to stop
    pub fn record(&mut self, valid_error: f32, test_error: f32) -> Verdict {
        let is_best = self.history.iter().all(|&[valid, _]| valid_error <= valid);
        self.history.push([valid_error, test_error]);
        if is_best {
            self.bad_counter = 0;
        }

        let mut should_stop = false;
        if self.history.len() > self.patience {
            let settled = &self.history[..self.history.len() - self.patience];
            if min_valid(settled).is_some_and(|best| valid_error >= best) {
                self.bad_counter += 1;
                should_stop = self.bad_counter > self.patience;
            }
        }

        Verdict {
            is_best,
            should_stop,
        }
    }
}

fn min_valid(history: &[[f32; 2]]) -> Option<f32> {
    history.iter().map(|&[valid, _]| valid).reduce(f32::min)
}
