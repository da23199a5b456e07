use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::neural_network_trait::TrainableModel;

/// Owned copy of every parameter of a model, by name
///
/// Later training steps never change a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSnapshot {
    entries: Vec<(String, Tensor)>,
}

impl ParameterSnapshot {
    /// Copies the current parameters of `model`
    pub fn capture(model: &dyn TrainableModel) -> Self {
        Self {
            entries: model
                .parameters()
                .into_iter()
                .map(|p| (p.name, p.value.to_owned()))
                .collect(),
        }
    }

    pub(crate) fn from_entries(entries: Vec<(String, Tensor)>) -> Self {
        Self { entries }
    }

    /// `(name, value)` pairs in the model's parameter order
    pub fn entries(&self) -> &[(String, Tensor)] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
    }

    /// Writes the snapshot back into `model`
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If the model's parameter names or shapes differ;
    ///   the model is left untouched
    pub fn restore_into(&self, model: &mut dyn TrainableModel) -> Result<(), ModelError> {
        {
            let parameters = model.parameters();
            if parameters.len() != self.entries.len() {
                return Err(ModelError::InputValidationError(format!(
                    "snapshot has {} parameters, model has {}",
                    self.entries.len(),
                    parameters.len()
                )));
            }
            for (p, (name, value)) in parameters.iter().zip(&self.entries) {
                if &p.name != name || p.value.shape() != value.shape() {
                    return Err(ModelError::InputValidationError(format!(
                        "snapshot entry {} {:?} does not match model parameter {} {:?}",
                        name,
                        value.shape(),
                        p.name,
                        p.value.shape()
                    )));
                }
            }
        }

        for (mut param, (_, value)) in model.parameters_mut().into_iter().zip(&self.entries) {
            param.assign(value);
        }
        Ok(())
    }
}
