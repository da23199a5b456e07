use crate::dataset::Minibatch;
use crate::error::ModelError;
use crate::neural_network::cell::{CellState, NamedParameter};
use crate::neural_network::loss_function::{MeanSquaredError, SequenceL2Cost};
use crate::neural_network::neural_network_trait::{LossFunction, TrainableModel};
use crate::neural_network::recurrence_driver::{DriveMode, DriverInput, RecurrenceDriver, Unrolled};
use crate::neural_network::stacked_layer::StackedLayer;
use crate::neural_network::{Activation, Tensor};
use crate::training::config::{ArchitectureConfig, ModelConfig};
use ndarray::{Array1, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// What the model's prediction is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTarget {
    /// Decoder output at the last step vs. the last target frame
    #[default]
    FinalFrame,
    /// Every decoder output vs. every target frame, stacked time-major
    FullSequence,
}

/// Sequence-to-sequence model: an encoding stack summarizes the input sequence and a
/// mirrored decoding stack generates `n_steps` future frames from that summary.
///
/// The decoder is initialized with the encoder's final states in reverse layer order
/// (decoder layer i starts from encoder layer N-1-i) and seeded with the last valid
/// input frame of each example.
///
/// # Example
/// ```rust
/// use nowcast::neural_network::{Activation, EncoderDecoder, PredictionTarget};
/// use ndarray::{Array1, ArrayD};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(89677);
/// let model = EncoderDecoder::dense(
///     2, &[2, 3, 2], 4, Activation::Tanh, PredictionTarget::FinalFrame, &mut rng,
/// ).unwrap();
///
/// let inputs = vec![ArrayD::<f32>::ones(vec![5, 2]); 3];
/// let masks = vec![Array1::<f32>::ones(5); 3];
/// let outputs = model.predict(&inputs, &masks).unwrap();
/// assert_eq!(outputs.len(), 4);
/// assert_eq!(outputs[3].shape(), &[5, 2]);
/// ```
#[derive(Debug)]
pub struct EncoderDecoder {
    encoder: RecurrenceDriver,
    decoder: RecurrenceDriver,
    n_steps: usize,
    target: PredictionTarget,
}

impl EncoderDecoder {
    /// Assembles a model from an encoding and a decoding stack
    ///
    /// # Parameters
    ///
    /// - `encoder` - Stack run over the input sequence
    /// - `decoder` - Stack run for `n_steps` steps, feeding its output back as input
    /// - `n_steps` - Number of frames to generate
    /// - `target` - What the cost compares
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `n_steps` is 0, the depths differ, the encoder
    ///   does not map its input shape to itself at both ends, or decoder layer i does not mirror
    ///   encoder layer N-1-i (state shape and kernel size)
    pub fn new(
        encoder: StackedLayer,
        decoder: StackedLayer,
        n_steps: usize,
        target: PredictionTarget,
    ) -> Result<Self, ModelError> {
        if n_steps == 0 {
            return Err(ModelError::InputValidationError(
                "n_steps must be greater than 0".to_string(),
            ));
        }
        if encoder.depth() != decoder.depth() {
            return Err(ModelError::InputValidationError(format!(
                "encoder has {} layers but decoder has {}",
                encoder.depth(),
                decoder.depth()
            )));
        }

        let input_shape = encoder.input_shape();
        let first_state = encoder.cells()[0].state_shape();
        if input_shape != first_state || input_shape != encoder.output_shape() {
            return Err(ModelError::InputValidationError(format!(
                "input shape {:?} must equal the first layer shape {:?} and the last layer shape {:?}",
                input_shape,
                first_state,
                encoder.output_shape()
            )));
        }
        if decoder.input_shape() != input_shape {
            return Err(ModelError::InputValidationError(format!(
                "decoder input shape {:?} differs from encoder input shape {:?}",
                decoder.input_shape(),
                input_shape
            )));
        }

        let depth = encoder.depth();
        for (i, decoder_cell) in decoder.cells().iter().enumerate() {
            let encoder_cell = &encoder.cells()[depth - 1 - i];
            if decoder_cell.state_shape() != encoder_cell.state_shape() {
                return Err(ModelError::InputValidationError(format!(
                    "decoder layer {} has state shape {:?} but encoder layer {} has {:?}",
                    i,
                    decoder_cell.state_shape(),
                    depth - 1 - i,
                    encoder_cell.state_shape()
                )));
            }
            if decoder_cell.kernel_size() != encoder_cell.kernel_size() {
                return Err(ModelError::InputValidationError(format!(
                    "decoder layer {} has kernel {:?} but encoder layer {} has {:?}",
                    i,
                    decoder_cell.kernel_size(),
                    depth - 1 - i,
                    encoder_cell.kernel_size()
                )));
            }
        }

        Ok(Self {
            encoder: RecurrenceDriver::new(DriveMode::Encode, encoder)?,
            decoder: RecurrenceDriver::new(DriveMode::Decode, decoder)?,
            n_steps,
            target,
        })
    }

    /// Dense encoder-decoder over feature vectors
    ///
    /// # Parameters
    ///
    /// - `n_ins` - Number of input features; must equal the first and the last hidden size
    /// - `hidden_layer_sizes` - Encoder units per layer, bottom to top; the decoder uses them reversed
    /// - `n_steps` - Number of frames to generate
    /// - `activation` - Candidate and cell-output activation
    /// - `target` - What the cost compares
    /// - `rng` - Random number generator used for initialization
    pub fn dense<R: Rng + ?Sized>(
        n_ins: usize,
        hidden_layer_sizes: &[usize],
        n_steps: usize,
        activation: Activation,
        target: PredictionTarget,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let reversed: Vec<usize> = hidden_layer_sizes.iter().rev().copied().collect();
        let encoder = StackedLayer::dense(n_ins, hidden_layer_sizes, activation, rng)?;
        let decoder = StackedLayer::dense(n_ins, &reversed, activation, rng)?;
        Self::new(encoder, decoder, n_steps, target)
    }

    /// Convolutional encoder-decoder over `(channels, height, width)` frames
    ///
    /// # Parameters
    ///
    /// - `input_shape` - Frame shape `(channels, height, width)`
    /// - `filter_shapes` - Encoder `(filters, in_channels, kernel_h, kernel_w)` per layer; the
    ///   decoder mirrors them in reverse order
    /// - `n_steps` - Number of frames to generate
    /// - `activation` - Candidate and cell-output activation
    /// - `target` - What the cost compares
    /// - `rng` - Random number generator used for initialization
    pub fn convolutional<R: Rng + ?Sized>(
        input_shape: (usize, usize, usize),
        filter_shapes: &[(usize, usize, usize, usize)],
        n_steps: usize,
        activation: Activation,
        target: PredictionTarget,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let mut mirrored = Vec::with_capacity(filter_shapes.len());
        let mut in_channels = input_shape.0;
        for &(filters, _, kernel_h, kernel_w) in filter_shapes.iter().rev() {
            mirrored.push((filters, in_channels, kernel_h, kernel_w));
            in_channels = filters;
        }
        let encoder = StackedLayer::convolutional(input_shape, filter_shapes, activation, rng)?;
        let decoder = StackedLayer::convolutional(input_shape, &mirrored, activation, rng)?;
        Self::new(encoder, decoder, n_steps, target)
    }

    /// Builds the model described by `config`
    pub fn from_config<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Result<Self, ModelError> {
        match &config.architecture {
            ArchitectureConfig::Dense {
                n_ins,
                hidden_layer_sizes,
            } => Self::dense(
                *n_ins,
                hidden_layer_sizes,
                config.n_steps,
                config.activation,
                config.target,
                rng,
            ),
            ArchitectureConfig::Convolutional {
                input_shape,
                filter_shapes,
            } => Self::convolutional(
                *input_shape,
                filter_shapes,
                config.n_steps,
                config.activation,
                config.target,
                rng,
            ),
        }
    }

    pub fn encoder(&self) -> &RecurrenceDriver {
        &self.encoder
    }

    pub fn decoder(&self) -> &RecurrenceDriver {
        &self.decoder
    }

    /// Number of generated frames
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    pub fn target(&self) -> PredictionTarget {
        self.target
    }

    /// Per-example frame shape
    pub fn frame_shape(&self) -> &[usize] {
        self.encoder.stack().input_shape()
    }

    /// Runs encoder then decoder and returns both unrolls
    fn run(
        &self,
        inputs: &[Tensor],
        masks: &[Array1<f32>],
        record: bool,
    ) -> Result<(Unrolled, Unrolled), ModelError> {
        let encoded = self
            .encoder
            .unroll(DriverInput::Encode { inputs, masks }, record)?;
        let initial_states: Vec<CellState> = encoded.final_states().iter().rev().cloned().collect();
        let decoded = self.decoder.unroll(
            DriverInput::Decode {
                n_steps: self.n_steps,
                seed: last_valid_frame(inputs, masks),
                initial_states,
            },
            record,
        )?;
        Ok((encoded, decoded))
    }

    /// Encoder and decoder unrolls of one forward pass, for inspection
    pub fn unroll(
        &self,
        inputs: &[Tensor],
        masks: &[Array1<f32>],
    ) -> Result<(Unrolled, Unrolled), ModelError> {
        self.run(inputs, masks, false)
    }

    /// Generates `n_steps` frames from an input sequence
    ///
    /// # Parameters
    ///
    /// - `inputs` - Time-major frames, each `(batch, frame_shape...)`
    /// - `masks` - One `(batch)` vector per input timestep
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Tensor>)` - Top decoder output after every decoding step
    pub fn predict(&self, inputs: &[Tensor], masks: &[Array1<f32>]) -> Result<Vec<Tensor>, ModelError> {
        let (_, decoded) = self.run(inputs, masks, false)?;
        Ok(decoded.outputs)
    }

    /// The prediction tensor selected by [`PredictionTarget`]
    ///
    /// # Returns
    ///
    /// - `Ok(Tensor)` - `(batch, frame...)` for `FinalFrame`, `(n_steps, batch, frame...)` for `FullSequence`
    pub fn forecast(&self, inputs: &[Tensor], masks: &[Array1<f32>]) -> Result<Tensor, ModelError> {
        let outputs = self.predict(inputs, masks)?;
        self.select_prediction(outputs)
    }

    /// Training cost `‖prediction − target‖₂ / n_steps`
    ///
    /// # Parameters
    ///
    /// - `targets` - Time-major target frames, exactly `n_steps` of them; `FinalFrame`
    ///   compares only the last one
    pub fn cost(
        &self,
        inputs: &[Tensor],
        masks: &[Array1<f32>],
        targets: &[Tensor],
    ) -> Result<f32, ModelError> {
        let prediction = self.forecast(inputs, masks)?;
        let target = self.select_target(targets, &prediction)?;
        Ok(SequenceL2Cost::new(self.n_steps).compute_loss(&target, &prediction))
    }

    fn select_prediction(&self, mut outputs: Vec<Tensor>) -> Result<Tensor, ModelError> {
        match self.target {
            PredictionTarget::FinalFrame => outputs.pop().ok_or_else(|| {
                ModelError::ProcessingError("decoder produced no output".to_string())
            }),
            PredictionTarget::FullSequence => {
                let views: Vec<_> = outputs.iter().map(|o| o.view()).collect();
                ndarray::stack(Axis(0), &views).map_err(|e| {
                    ModelError::ProcessingError(format!("cannot stack decoder outputs: {}", e))
                })
            }
        }
    }

    fn select_target(&self, targets: &[Tensor], prediction: &Tensor) -> Result<Tensor, ModelError> {
        if targets.len() != self.n_steps {
            return Err(ModelError::InputValidationError(format!(
                "expected {} target frames, got {}",
                self.n_steps,
                targets.len()
            )));
        }
        let target = match self.target {
            PredictionTarget::FinalFrame => targets[self.n_steps - 1].clone(),
            PredictionTarget::FullSequence => {
                let views: Vec<_> = targets.iter().map(|t| t.view()).collect();
                ndarray::stack(Axis(0), &views).map_err(|e| {
                    ModelError::InputValidationError(format!("target frames differ in shape: {}", e))
                })?
            }
        };
        if target.shape() != prediction.shape() {
            return Err(ModelError::InputValidationError(format!(
                "target shape {:?} does not match prediction shape {:?}",
                target.shape(),
                prediction.shape()
            )));
        }
        Ok(target)
    }

    /// Cost and its gradient with respect to every parameter, by backpropagation through time
    ///
    /// Gradients flow from the cost into the decoder outputs, through the fed-back decoder
    /// inputs, into the decoder's initial states and from there into the encoder's final states.
    ///
    /// # Returns
    ///
    /// - `Ok((f32, Vec<Tensor>))` - Cost and gradients aligned with [`EncoderDecoder::parameters`]
    pub fn cost_and_gradients(
        &self,
        inputs: &[Tensor],
        masks: &[Array1<f32>],
        targets: &[Tensor],
    ) -> Result<(f32, Vec<Tensor>), ModelError> {
        let (encoded, decoded) = self.run(inputs, masks, true)?;
        let prediction = self.select_prediction(decoded.outputs.clone())?;
        let target = self.select_target(targets, &prediction)?;

        let loss = SequenceL2Cost::new(self.n_steps);
        let cost = loss.compute_loss(&target, &prediction);
        let d_prediction = loss.compute_grad(&target, &prediction);

        let mut output_grads: Vec<Option<Tensor>> = vec![None; self.n_steps];
        match self.target {
            PredictionTarget::FinalFrame => output_grads[self.n_steps - 1] = Some(d_prediction),
            PredictionTarget::FullSequence => {
                for (slot, grad) in output_grads.iter_mut().zip(d_prediction.axis_iter(Axis(0))) {
                    *slot = Some(grad.to_owned());
                }
            }
        }

        let mut grads: Vec<Tensor> = self
            .parameters()
            .iter()
            .map(|p| Tensor::zeros(p.value.raw_dim()))
            .collect();
        let (encoder_grads, decoder_grads) =
            grads.split_at_mut(self.encoder.stack().parameter_tensor_count());

        let d_decoder_initial = self
            .decoder
            .backward(&decoded, output_grads, None, decoder_grads)?;
        let d_encoder_final: Vec<CellState> = d_decoder_initial.into_iter().rev().collect();
        self.encoder.backward(
            &encoded,
            vec![None; encoded.n_steps()],
            Some(d_encoder_final),
            encoder_grads,
        )?;

        Ok((cost, grads))
    }

    /// Named views of every parameter: encoder first, then decoder
    pub fn parameters(&self) -> Vec<NamedParameter<'_>> {
        let mut params = Vec::new();
        for (prefix, driver) in [("encoder", &self.encoder), ("decoder", &self.decoder)] {
            params.extend(driver.stack().parameters().into_iter().map(|p| NamedParameter {
                name: format!("{}.{}", prefix, p.name),
                value: p.value,
            }));
        }
        params
    }

    /// Mutable views in the same order as [`EncoderDecoder::parameters`]
    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut params = self.encoder.stack_mut().parameters_mut();
        params.extend(self.decoder.stack_mut().parameters_mut());
        params
    }

    /// Number of trainable scalars
    pub fn param_count(&self) -> usize {
        self.encoder.stack().param_count() + self.decoder.stack().param_count()
    }

    /// Prints a summary of the model structure
    pub fn summary(&self) {
        let col1_width = 33;
        let col2_width = 24;
        let col3_width = 15;
        println!("Model: \"encoder_decoder\"");
        println!(
            "┏{}┳{}┳{}┓",
            "━".repeat(col1_width),
            "━".repeat(col2_width),
            "━".repeat(col3_width)
        );
        println!(
            "┃ {:<31} ┃ {:<22} ┃ {:>13} ┃",
            "Layer (type)", "Output Shape", "Param #"
        );
        println!(
            "┡{}╇{}╇{}┩",
            "━".repeat(col1_width),
            "━".repeat(col2_width),
            "━".repeat(col3_width)
        );
        for (prefix, driver) in [("encoder", &self.encoder), ("decoder", &self.decoder)] {
            for (i, cell) in driver.stack().cells().iter().enumerate() {
                println!(
                    "│ {:<31} │ {:<22} │ {:>13} │",
                    format!("{}.layer{} ({})", prefix, i, cell.layer_type()),
                    format!("{:?}", cell.state_shape()),
                    cell.param_count()
                );
            }
        }
        println!(
            "└{}┴{}┴{}┘",
            "─".repeat(col1_width),
            "─".repeat(col2_width),
            "─".repeat(col3_width)
        );
        println!(" Total params: {}", self.param_count());
        println!(" Decoding steps: {} ({:?})", self.n_steps, self.target);
    }
}

impl TrainableModel for EncoderDecoder {
    fn parameters(&self) -> Vec<NamedParameter<'_>> {
        EncoderDecoder::parameters(self)
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        EncoderDecoder::parameters_mut(self)
    }

    fn cost_and_gradients(&self, batch: &Minibatch) -> Result<(f32, Vec<Tensor>), ModelError> {
        EncoderDecoder::cost_and_gradients(self, &batch.inputs, &batch.masks, &batch.targets)
    }

    fn prediction_error(&self, batch: &Minibatch) -> Result<f32, ModelError> {
        let prediction = self.forecast(&batch.inputs, &batch.masks)?;
        let target = self.select_target(&batch.targets, &prediction)?;
        Ok(MeanSquaredError::new().compute_loss(&target, &prediction))
    }
}

/// Last frame of each example whose mask is set; `inputs[T-1]` for unpadded batches
fn last_valid_frame(inputs: &[Tensor], masks: &[Array1<f32>]) -> Tensor {
    let last = inputs.len() - 1;
    let mut seed = inputs[last].clone();
    for (b, mut row) in seed.axis_iter_mut(Axis(0)).enumerate() {
        let valid = (0..inputs.len()).rev().find(|&t| masks[t][b] > 0.0);
        if let Some(t) = valid.filter(|&t| t != last) {
            row.assign(&inputs[t].index_axis(Axis(0), b));
        }
    }
    seed
}
