use approx::assert_relative_eq;
use ndarray::{Array1, ArrayD, Axis, array};
use nowcast::dataset::Minibatch;
use nowcast::neural_network::neural_network_trait::TrainableModel;
use nowcast::neural_network::{
    Activation, EncoderDecoder, LossFunction, MeanSquaredError, PredictionTarget, StackedLayer,
    Tensor,
};
use nowcast::training::{ArchitectureConfig, ModelConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};

fn random_sequence(steps: usize, shape: &[usize], seed: u64) -> Vec<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let uniform = Uniform::<f32>::new(-1.0, 1.0).unwrap();
    (0..steps)
        .map(|_| ArrayD::from_shape_simple_fn(shape.to_vec(), || uniform.sample(&mut rng)))
        .collect()
}

fn dense_model(target: PredictionTarget, seed: u64) -> EncoderDecoder {
    let mut rng = StdRng::seed_from_u64(seed);
    EncoderDecoder::dense(2, &[2, 3, 2], 2, Activation::Tanh, target, &mut rng).unwrap()
}

#[test]
fn test_encoder_decoder_construction_is_validated() {
    let mut rng = StdRng::seed_from_u64(0);
    let target = PredictionTarget::FinalFrame;

    // input features must equal the first and last layer sizes
    assert!(EncoderDecoder::dense(3, &[4], 1, Activation::Tanh, target, &mut rng).is_err());
    assert!(EncoderDecoder::dense(3, &[3, 4], 1, Activation::Tanh, target, &mut rng).is_err());
    assert!(EncoderDecoder::dense(3, &[3, 5, 3], 1, Activation::Tanh, target, &mut rng).is_ok());
    assert!(EncoderDecoder::dense(3, &[3], 0, Activation::Tanh, target, &mut rng).is_err());

    // depth mismatch
    let encoder = StackedLayer::dense(3, &[3, 3], Activation::Tanh, &mut rng).unwrap();
    let decoder = StackedLayer::dense(3, &[3], Activation::Tanh, &mut rng).unwrap();
    assert!(EncoderDecoder::new(encoder, decoder, 1, target).is_err());

    // decoder layer 0 must mirror encoder layer 2
    let encoder = StackedLayer::dense(3, &[3, 5, 3], Activation::Tanh, &mut rng).unwrap();
    let decoder = StackedLayer::dense(3, &[3, 4, 3], Activation::Tanh, &mut rng).unwrap();
    assert!(EncoderDecoder::new(encoder, decoder, 1, target).is_err());

    // decoder kernels must mirror the encoder's
    let encoder =
        StackedLayer::convolutional((1, 5, 5), &[(1, 1, 3, 3), (1, 1, 5, 5)], Activation::Tanh, &mut rng)
            .unwrap();
    let decoder =
        StackedLayer::convolutional((1, 5, 5), &[(1, 1, 3, 3), (1, 1, 5, 5)], Activation::Tanh, &mut rng)
            .unwrap();
    assert!(EncoderDecoder::new(encoder, decoder, 1, target).is_err());

    assert!(
        EncoderDecoder::convolutional((1, 5, 5), &[(1, 1, 3, 3), (1, 1, 5, 5)], 2, Activation::Tanh, target, &mut rng)
            .is_ok()
    );
    assert!(
        EncoderDecoder::convolutional((1, 5, 5), &[(2, 1, 3, 3)], 2, Activation::Tanh, target, &mut rng)
            .is_err()
    );
}

#[test]
fn test_decoder_starts_from_reversed_encoder_states() {
    let model = dense_model(PredictionTarget::FinalFrame, 1);
    let inputs = random_sequence(4, &[3, 2], 2);
    let masks = vec![Array1::<f32>::ones(3); 4];

    let (encoded, decoded) = model.unroll(&inputs, &masks).unwrap();
    let depth = model.encoder().stack().depth();
    for i in 0..depth {
        assert_eq!(decoded.initial_states[i], encoded.final_states()[depth - 1 - i]);
    }
    assert_eq!(decoded.n_steps(), model.n_steps());
}

#[test]
fn test_predict_is_deterministic() {
    let model = dense_model(PredictionTarget::FinalFrame, 3);
    let inputs = random_sequence(5, &[4, 2], 4);
    let masks = vec![Array1::<f32>::ones(4); 5];

    let first = model.predict(&inputs, &masks).unwrap();
    let second = model.predict(&inputs, &masks).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].shape(), &[4, 2]);

    let forecast = model.forecast(&inputs, &masks).unwrap();
    assert_eq!(forecast, first[1]);
}

#[test]
fn test_full_sequence_forecast_is_time_major() {
    let model = dense_model(PredictionTarget::FullSequence, 5);
    let inputs = random_sequence(3, &[2, 2], 6);
    let masks = vec![Array1::<f32>::ones(2); 3];

    let forecast = model.forecast(&inputs, &masks).unwrap();
    let outputs = model.predict(&inputs, &masks).unwrap();
    assert_eq!(forecast.shape(), &[2, 2, 2]);
    assert_eq!(forecast.index_axis(Axis(0), 0), outputs[0]);
    assert_eq!(forecast.index_axis(Axis(0), 1), outputs[1]);
}

#[test]
fn test_padded_example_matches_unpadded_prediction() {
    let model = dense_model(PredictionTarget::FinalFrame, 7);
    let long = random_sequence(4, &[1, 2], 8);
    let short = random_sequence(2, &[1, 2], 9);

    // batch of two: the second example is only two frames long
    let inputs: Vec<Tensor> = (0..4)
        .map(|t| {
            let second = if t < 2 {
                short[t].clone()
            } else {
                ArrayD::zeros(vec![1, 2])
            };
            ndarray::concatenate(Axis(0), &[long[t].view(), second.view()]).unwrap()
        })
        .collect();
    let masks = vec![array![1.0f32, 1.0], array![1.0, 1.0], array![1.0, 0.0], array![1.0, 0.0]];

    let batched = model.predict(&inputs, &masks).unwrap();
    let alone = model
        .predict(&short, &vec![Array1::<f32>::ones(1); 2])
        .unwrap();

    for (b, a) in batched.iter().zip(&alone) {
        for (x, y) in b.index_axis(Axis(0), 1).iter().zip(a.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-5);
        }
    }
}

#[test]
fn test_cost_is_residual_norm_over_steps() {
    let model = dense_model(PredictionTarget::FinalFrame, 10);
    let inputs = random_sequence(3, &[2, 2], 11);
    let masks = vec![Array1::<f32>::ones(2); 3];
    let targets = random_sequence(2, &[2, 2], 12);

    let prediction = model.forecast(&inputs, &masks).unwrap();
    let expected = (&prediction - &targets[1]).mapv(|d| d * d).sum().sqrt() / 2.0;
    let cost = model.cost(&inputs, &masks, &targets).unwrap();
    assert_relative_eq!(cost, expected, epsilon = 1e-6);

    let (cost_with_grads, grads) = model.cost_and_gradients(&inputs, &masks, &targets).unwrap();
    assert_relative_eq!(cost_with_grads, cost, epsilon = 1e-6);
    assert_eq!(grads.len(), model.parameters().len());

    let wrong_targets = random_sequence(2, &[2, 3], 13);
    assert!(model.cost(&inputs, &masks, &wrong_targets).is_err());
}

#[test]
fn test_prediction_error_is_mean_squared_error() {
    let model = dense_model(PredictionTarget::FinalFrame, 14);
    let inputs = random_sequence(3, &[2, 2], 15);
    let masks = vec![Array1::<f32>::ones(2); 3];
    let targets = random_sequence(2, &[2, 2], 16);
    let batch = Minibatch::new(inputs.clone(), masks.clone(), targets.clone()).unwrap();

    let prediction = model.forecast(&inputs, &masks).unwrap();
    let expected = MeanSquaredError::new().compute_loss(&targets[1], &prediction);
    assert_relative_eq!(model.prediction_error(&batch).unwrap(), expected, epsilon = 1e-6);
}

#[test]
fn test_target_count_must_equal_decoding_steps() {
    let inputs = random_sequence(3, &[2, 2], 30);
    let masks = vec![Array1::<f32>::ones(2); 3];
    for target in [PredictionTarget::FinalFrame, PredictionTarget::FullSequence] {
        let model = dense_model(target, 31);
        for n_targets in [1, 3] {
            let targets = random_sequence(n_targets, &[2, 2], 32);
            assert!(model.cost(&inputs, &masks, &targets).is_err());
            assert!(model.cost_and_gradients(&inputs, &masks, &targets).is_err());

            let batch = Minibatch::new(inputs.clone(), masks.clone(), targets).unwrap();
            assert!(model.prediction_error(&batch).is_err());
        }
    }
}

fn check_gradients(model: &mut EncoderDecoder, inputs: &[Tensor], masks: &[Array1<f32>], targets: &[Tensor]) {
    let (_, grads) = model.cost_and_gradients(inputs, masks, targets).unwrap();
    let eps = 1e-2;

    let n_params = grads.len();
    for p in 0..n_params {
        let len = grads[p].len();
        for index in [0, len / 2, len - 1] {
            let original = model.parameters()[p].value.iter().nth(index).copied().unwrap();

            set_parameter(model, p, index, original + eps);
            let plus = model.cost(inputs, masks, targets).unwrap();
            set_parameter(model, p, index, original - eps);
            let minus = model.cost(inputs, masks, targets).unwrap();
            set_parameter(model, p, index, original);

            let numeric = (plus - minus) / (2.0 * eps);
            let analytic = grads[p].iter().nth(index).copied().unwrap();
            assert_relative_eq!(analytic, numeric, epsilon = 2e-3, max_relative = 5e-2);
        }
    }
}

fn set_parameter(model: &mut EncoderDecoder, p: usize, index: usize, value: f32) {
    let mut params = model.parameters_mut();
    if let Some(slot) = params[p].iter_mut().nth(index) {
        *slot = value;
    }
}

#[test]
fn test_dense_gradients_match_finite_differences() {
    let mut model = dense_model(PredictionTarget::FullSequence, 17);
    let inputs = random_sequence(3, &[2, 2], 18);
    let masks = vec![array![1.0f32, 1.0], array![1.0, 1.0], array![1.0, 0.0]];
    let targets = random_sequence(2, &[2, 2], 19);
    check_gradients(&mut model, &inputs, &masks, &targets);
}

#[test]
fn test_convolutional_gradients_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(20);
    let mut model = EncoderDecoder::convolutional(
        (1, 4, 4),
        &[(1, 1, 3, 3)],
        2,
        Activation::Tanh,
        PredictionTarget::FinalFrame,
        &mut rng,
    )
    .unwrap();
    let inputs = random_sequence(2, &[2, 1, 4, 4], 21);
    let masks = vec![Array1::<f32>::ones(2); 2];
    let targets = random_sequence(2, &[2, 1, 4, 4], 22);
    check_gradients(&mut model, &inputs, &masks, &targets);
}

#[test]
fn test_from_config_builds_both_architectures() {
    let mut rng = StdRng::seed_from_u64(23);
    let dense = ModelConfig {
        architecture: ArchitectureConfig::Dense {
            n_ins: 3,
            hidden_layer_sizes: vec![3, 6, 3],
        },
        n_steps: 4,
        activation: Activation::Tanh,
        target: PredictionTarget::FullSequence,
    };
    let model = EncoderDecoder::from_config(&dense, &mut rng).unwrap();
    assert_eq!(model.frame_shape(), &[3]);
    assert_eq!(model.n_steps(), 4);
    assert_eq!(model.target(), PredictionTarget::FullSequence);
    assert_eq!(model.encoder().stack().depth(), 3);

    let convolutional = ModelConfig {
        architecture: ArchitectureConfig::Convolutional {
            input_shape: (1, 8, 8),
            filter_shapes: vec![(1, 1, 5, 5)],
        },
        n_steps: 1,
        activation: Activation::Tanh,
        target: PredictionTarget::FinalFrame,
    };
    let model = EncoderDecoder::from_config(&convolutional, &mut rng).unwrap();
    assert_eq!(model.frame_shape(), &[1, 8, 8]);
    model.summary();
}
