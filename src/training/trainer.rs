use super::checkpoint::Checkpoint;
use super::config::TrainingConfig;
use super::early_stopping::EarlyStopping;
use super::minibatch::{minibatch_indices, shuffled_minibatch_indices};
use super::snapshot::ParameterSnapshot;
use crate::dataset::{Dataset, Partitions};
use crate::error::{ModelError, TrainingError};
use crate::neural_network::neural_network_trait::{Optimizer, TrainableModel};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;

/// Why a training run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Validation error stopped improving for longer than the patience allows
    EarlyStopped,
    /// All `max_epochs` epochs ran
    EpochsExhausted,
}

/// Summary of a finished training run
///
/// The errors are computed over the full partitions after the best parameters were restored.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub stop_reason: StopReason,
    pub train_error: f32,
    pub valid_error: f32,
    pub test_error: f32,
    pub epochs_run: usize,
    pub updates: usize,
    /// `[valid, test]` error of every validation, oldest first
    pub history_errs: Vec<[f32; 2]>,
}

/// Minibatch training loop with periodic validation, checkpointing and early stopping
pub struct Trainer {
    config: TrainingConfig,
    optimizer: Box<dyn Optimizer>,
    rng: StdRng,
}

impl Trainer {
    /// Creates a trainer; shuffling draws from a `StdRng` seeded with `config.seed`
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If the configuration is invalid
    pub fn new(config: TrainingConfig, optimizer: Box<dyn Optimizer>) -> Result<Self, ModelError> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            optimizer,
            rng,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Trains `model` on `data.train` until early stopping or `max_epochs`
    ///
    /// Every update computes the minibatch cost and checks it before any parameter changes.
    /// Every `valid_freq` updates the prediction error of all three partitions is measured;
    /// every `save_freq` updates the best parameters so far (or the current ones, before the
    /// first validation) are checkpointed. When the loop ends the best parameters are restored
    /// into `model`.
    ///
    /// # Errors
    ///
    /// - `TrainingError::NumericalDivergence` - If a minibatch cost is NaN or infinite; that
    ///   update is not applied
    /// - `TrainingError::Io` - If a checkpoint cannot be written
    /// - `TrainingError::Model` - If the model or optimizer rejects a minibatch
    pub fn fit<M: TrainableModel>(
        &mut self,
        model: &mut M,
        data: &Partitions,
    ) -> Result<TrainingReport, TrainingError> {
        let n_train = data.train.len();
        let batch_size = self.config.batch_size;
        let valid_freq = self.config.resolved_valid_freq(n_train);
        let save_freq = self.config.resolved_save_freq(n_train);
        let batches_per_epoch = n_train.div_ceil(batch_size);

        println!("{} train examples", n_train);
        println!("{} valid examples", data.valid.len());
        println!("{} test examples", data.test.len());

        let mut early_stopping = EarlyStopping::new(self.config.patience)?;
        let mut best: Option<ParameterSnapshot> = None;
        let mut stop_reason = StopReason::EpochsExhausted;
        let mut epochs_run = 0;
        let mut updates = 0;

        let progress_bar = ProgressBar::new((self.config.max_epochs * batches_per_epoch) as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} | Epoch {msg}")
                .map_err(|e| {
                    ModelError::ProcessingError(format!("invalid progress bar template: {}", e))
                })?
                .progress_chars("█▓░"),
        );

        'epochs: for epoch in 0..self.config.max_epochs {
            epochs_run = epoch + 1;
            let groups = if self.config.shuffle {
                shuffled_minibatch_indices(n_train, batch_size, &mut self.rng)?
            } else {
                minibatch_indices(n_train, batch_size)?
            };

            let mut n_samples = 0;
            for indices in &groups {
                updates += 1;
                let batch = data.train.minibatch(indices)?;
                n_samples += batch.batch_size();

                let cost = self.optimizer.compute(&*model, &batch)?;
                if !cost.is_finite() {
                    progress_bar.abandon_with_message(format!("{}: NaN detected", epoch));
                    return Err(TrainingError::NumericalDivergence {
                        epoch,
                        update: updates,
                        cost,
                    });
                }
                self.optimizer.apply(&mut *model, self.config.learning_rate)?;
                progress_bar.inc(1);

                if updates % self.config.display_freq == 0 {
                    progress_bar.set_message(format!("{}, Update {}, Cost {:.6}", epoch, updates, cost));
                }

                if let Some(path) = &self.config.saveto {
                    if updates % save_freq == 0 {
                        progress_bar.println(format!("Saving to {}...", path.display()));
                        let checkpoint = match &best {
                            Some(snapshot) => {
                                Checkpoint::from_snapshot(snapshot, early_stopping.history())
                            }
                            None => Checkpoint::from_model(&*model, early_stopping.history()),
                        };
                        checkpoint.save_to_path(path)?;
                    }
                }

                if updates % valid_freq == 0 {
                    let [train_err, valid_err, test_err] = self.partition_errors(&*model, data)?;
                    let verdict = early_stopping.record(valid_err, test_err);
                    if verdict.is_best {
                        best = Some(ParameterSnapshot::capture(&*model));
                    }
                    progress_bar.println(format!(
                        "(validation) Train: {:.6}, Valid: {:.6}, Test: {:.6}",
                        train_err, valid_err, test_err
                    ));
                    if verdict.should_stop {
                        progress_bar.println("Early Stop!");
                        stop_reason = StopReason::EarlyStopped;
                        break 'epochs;
                    }
                }
            }

            progress_bar.println(format!(
                "Epoch {}/{}: Seen {} samples",
                epoch + 1,
                self.config.max_epochs,
                n_samples
            ));
        }
        progress_bar.finish_with_message("Training completed");

        if let Some(snapshot) = &best {
            snapshot.restore_into(&mut *model)?;
        }
        let [train_error, valid_error, test_error] = self.partition_errors(&*model, data)?;
        if let Some(path) = &self.config.saveto {
            save_final(&*model, early_stopping.history(), path)?;
        }

        println!(
            "Train finished ({:?} after {} epochs, {} updates). Train: {}, Valid: {}, Test: {}",
            stop_reason, epochs_run, updates, train_error, valid_error, test_error
        );

        Ok(TrainingReport {
            stop_reason,
            train_error,
            valid_error,
            test_error,
            epochs_run,
            updates,
            history_errs: early_stopping.history().to_vec(),
        })
    }

    fn partition_errors(
        &self,
        model: &dyn TrainableModel,
        data: &Partitions,
    ) -> Result<[f32; 3], ModelError> {
        let batch_size = self.config.valid_batch_size;
        Ok([
            prediction_error(model, &data.train, batch_size)?,
            prediction_error(model, &data.valid, batch_size)?,
            prediction_error(model, &data.test, batch_size)?,
        ])
    }
}

fn save_final(
    model: &dyn TrainableModel,
    history_errs: &[[f32; 2]],
    path: &Path,
) -> Result<(), TrainingError> {
    println!("Saving to {}...", path.display());
    Checkpoint::from_model(model, history_errs).save_to_path(path)?;
    Ok(())
}

/// Mean prediction error of `model` over `dataset`, evaluated in minibatches of `batch_size`
///
/// Each minibatch error is weighted by the number of examples in it.
pub fn prediction_error(
    model: &dyn TrainableModel,
    dataset: &Dataset,
    batch_size: usize,
) -> Result<f32, ModelError> {
    let mut total = 0.0;
    for indices in minibatch_indices(dataset.len(), batch_size)? {
        let batch = dataset.minibatch(&indices)?;
        total += model.prediction_error(&batch)? * indices.len() as f32;
    }
    Ok(total / dataset.len() as f32)
}
