use ndarray::{Array1, ArrayD, Axis, array};
use nowcast::neural_network::{
    Activation, CellState, DriveMode, DriverInput, RecurrenceDriver, StackedLayer, Tensor,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn stack(seed: u64) -> StackedLayer {
    let mut rng = StdRng::seed_from_u64(seed);
    StackedLayer::dense(2, &[3, 2], Activation::Tanh, &mut rng).unwrap()
}

fn sequence(batch_size: usize, steps: usize) -> (Vec<Tensor>, Vec<Array1<f32>>) {
    let inputs = (0..steps)
        .map(|t| ArrayD::from_shape_fn(vec![batch_size, 2], |i| (t + i[0] + i[1]) as f32 * 0.1))
        .collect();
    (inputs, vec![Array1::ones(batch_size); steps])
}

#[test]
fn test_driver_mode_mismatch_is_rejected() {
    let encoder = RecurrenceDriver::new(DriveMode::Encode, stack(0)).unwrap();
    let decode_input = DriverInput::Decode {
        n_steps: 2,
        seed: ArrayD::zeros(vec![1, 2]),
        initial_states: encoder.stack().initial_states(1),
    };
    assert!(encoder.unroll(decode_input, false).is_err());

    let decoder = RecurrenceDriver::new(DriveMode::Decode, stack(1)).unwrap();
    let (inputs, masks) = sequence(1, 3);
    let encode_input = DriverInput::Encode {
        inputs: &inputs,
        masks: &masks,
    };
    assert!(decoder.unroll(encode_input, false).is_err());
}

#[test]
fn test_decoder_requires_output_shape_equal_to_input_shape() {
    let mut rng = StdRng::seed_from_u64(2);
    let narrowing = StackedLayer::dense(4, &[4, 2], Activation::Tanh, &mut rng).unwrap();
    assert!(RecurrenceDriver::new(DriveMode::Decode, narrowing).is_err());

    let narrowing = StackedLayer::dense(4, &[4, 2], Activation::Tanh, &mut rng).unwrap();
    assert!(RecurrenceDriver::new(DriveMode::Encode, narrowing).is_ok());
}

#[test]
fn test_encoder_validates_inputs() {
    let encoder = RecurrenceDriver::new(DriveMode::Encode, stack(3)).unwrap();
    let empty: Vec<Tensor> = Vec::new();
    let no_masks: Vec<Array1<f32>> = Vec::new();
    let input = DriverInput::Encode {
        inputs: &empty,
        masks: &no_masks,
    };
    assert!(encoder.unroll(input, false).is_err());

    let (inputs, _) = sequence(2, 3);
    let short_masks = vec![Array1::<f32>::ones(2); 2];
    let input = DriverInput::Encode {
        inputs: &inputs,
        masks: &short_masks,
    };
    assert!(encoder.unroll(input, false).is_err());

    let wrong_batch_masks = vec![Array1::<f32>::ones(3); 3];
    let input = DriverInput::Encode {
        inputs: &inputs,
        masks: &wrong_batch_masks,
    };
    assert!(encoder.unroll(input, false).is_err());
}

#[test]
fn test_encoder_keeps_state_of_padded_examples() {
    let encoder = RecurrenceDriver::new(DriveMode::Encode, stack(4)).unwrap();
    let (inputs, mut masks) = sequence(2, 4);
    masks[2] = array![1.0, 0.0];
    masks[3] = array![1.0, 0.0];

    let unrolled = encoder
        .unroll(
            DriverInput::Encode {
                inputs: &inputs,
                masks: &masks,
            },
            false,
        )
        .unwrap();

    for t in 2..4 {
        for layer in 0..2 {
            let before = &unrolled.states[t - 1][layer];
            let after = &unrolled.states[t][layer];
            assert_eq!(after.cell.index_axis(Axis(0), 1), before.cell.index_axis(Axis(0), 1));
            assert_eq!(after.hidden.index_axis(Axis(0), 1), before.hidden.index_axis(Axis(0), 1));
            assert_ne!(after.hidden.index_axis(Axis(0), 0), before.hidden.index_axis(Axis(0), 0));
        }
    }
    assert_eq!(unrolled.outputs.len(), 4);
    assert_eq!(unrolled.final_states(), unrolled.states[3].as_slice());
}

#[test]
fn test_decoder_feeds_back_its_output() {
    let decoder = RecurrenceDriver::new(DriveMode::Decode, stack(5)).unwrap();
    let seed = array![[0.2, -0.1], [0.5, 0.4]].into_dyn();
    let initial_states = vec![
        CellState {
            cell: ArrayD::from_elem(vec![2, 3], 0.1),
            hidden: ArrayD::from_elem(vec![2, 3], -0.2),
        },
        CellState {
            cell: ArrayD::from_elem(vec![2, 2], 0.3),
            hidden: ArrayD::from_elem(vec![2, 2], 0.05),
        },
    ];

    let unrolled = decoder
        .unroll(
            DriverInput::Decode {
                n_steps: 3,
                seed: seed.clone(),
                initial_states: initial_states.clone(),
            },
            false,
        )
        .unwrap();
    assert_eq!(unrolled.n_steps(), 3);
    assert_eq!(unrolled.initial_states, initial_states);

    let mask = Array1::<f32>::ones(2);
    let mut states = initial_states;
    let mut input = seed;
    for t in 0..3 {
        let (next, _) = decoder.stack().step(&mask, &input, &states).unwrap();
        assert_eq!(next, unrolled.states[t]);
        input = next[1].hidden.clone();
        assert_eq!(input, unrolled.outputs[t]);
        states = next;
    }
}

#[test]
fn test_decoder_validates_inputs() {
    let decoder = RecurrenceDriver::new(DriveMode::Decode, stack(6)).unwrap();
    let zero_steps = DriverInput::Decode {
        n_steps: 0,
        seed: ArrayD::zeros(vec![1, 2]),
        initial_states: decoder.stack().initial_states(1),
    };
    assert!(decoder.unroll(zero_steps, false).is_err());

    let missing_state = DriverInput::Decode {
        n_steps: 1,
        seed: ArrayD::zeros(vec![1, 2]),
        initial_states: vec![CellState::zeros(1, &[3])],
    };
    assert!(decoder.unroll(missing_state, false).is_err());

    let wrong_batch = DriverInput::Decode {
        n_steps: 1,
        seed: ArrayD::zeros(vec![1, 2]),
        initial_states: decoder.stack().initial_states(2),
    };
    assert!(decoder.unroll(wrong_batch, false).is_err());
}

#[test]
fn test_backward_requires_recorded_unroll() {
    let encoder = RecurrenceDriver::new(DriveMode::Encode, stack(7)).unwrap();
    let (inputs, masks) = sequence(1, 2);
    let input = || DriverInput::Encode {
        inputs: &inputs,
        masks: &masks,
    };
    let mut grads: Vec<Tensor> = encoder
        .stack()
        .parameters()
        .iter()
        .map(|p| Tensor::zeros(p.value.raw_dim()))
        .collect();

    let unrecorded = encoder.unroll(input(), false).unwrap();
    assert!(!unrecorded.is_recorded());
    assert!(encoder.backward(&unrecorded, vec![None, None], None, &mut grads).is_err());

    let recorded = encoder.unroll(input(), true).unwrap();
    assert!(recorded.is_recorded());
    assert!(encoder.backward(&recorded, vec![None], None, &mut grads).is_err());

    let top_grad = Some(ArrayD::ones(vec![1, 2]));
    let initial_grads = encoder
        .backward(&recorded, vec![None, top_grad], None, &mut grads)
        .unwrap();
    assert_eq!(initial_grads.len(), 2);
    assert!(grads.iter().any(|g| g.iter().any(|&v| v != 0.0)));
}
