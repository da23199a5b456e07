use ndarray::{Array1, Array4, ArrayD};
use nowcast::neural_network::neural_network_trait::RecurrentCell;
use nowcast::neural_network::{
    Activation, ConvLSTMCell, DriveMode, DriverInput, GateKind, RecurrenceDriver, StackedLayer,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn test_conv_lstm_cell_new() {
    let mut rng = StdRng::seed_from_u64(0);
    assert!(ConvLSTMCell::new((1, 8, 8), (4, 1, 3, 3), Activation::Tanh, &mut rng).is_ok());
    // channel mismatch
    assert!(ConvLSTMCell::new((2, 8, 8), (4, 1, 3, 3), Activation::Tanh, &mut rng).is_err());
    // empty frames and filters
    assert!(ConvLSTMCell::new((1, 0, 8), (4, 1, 3, 3), Activation::Tanh, &mut rng).is_err());
    assert!(ConvLSTMCell::new((1, 8, 8), (0, 1, 3, 3), Activation::Tanh, &mut rng).is_err());
    assert!(ConvLSTMCell::new((1, 8, 8), (4, 1, 0, 3), Activation::Tanh, &mut rng).is_err());
}

#[test]
fn test_conv_lstm_cell_shapes_and_parameters() {
    let mut rng = StdRng::seed_from_u64(1);
    let cell = ConvLSTMCell::new((2, 6, 5), (3, 2, 5, 3), Activation::Tanh, &mut rng).unwrap();

    assert_eq!(cell.layer_type(), "ConvLSTMCell");
    assert_eq!(cell.input_shape(), &[2, 6, 5]);
    assert_eq!(cell.state_shape(), &[3, 6, 5]);
    assert_eq!(cell.kernel_size(), Some((5, 3)));
    assert_eq!(cell.filter_shape(), (3, 2, 5, 3));
    assert_eq!(cell.param_count(), 4 * (3 * 2 * 5 * 3 + 3 * 3 * 5 * 3 + 3));

    let parameters = cell.parameters();
    assert_eq!(parameters[0].name, "input_gate.kernel");
    assert_eq!(parameters[0].value.shape(), &[3, 2, 5, 3]);
    assert_eq!(parameters[1].value.shape(), &[3, 3, 5, 3]);
    assert_eq!(parameters[2].value.shape(), &[3]);
    assert!(cell.gate(GateKind::Forget).bias.iter().all(|&b| b == 1.0));

    let x = ArrayD::<f32>::ones(vec![4, 2, 6, 5]);
    let (next, _) = cell.step(&Array1::ones(4), &x, &cell.initial_state(4)).unwrap();
    assert_eq!(next.hidden.shape(), &[4, 3, 6, 5]);
    assert_eq!(next.cell.shape(), &[4, 3, 6, 5]);
}

#[test]
fn test_conv_lstm_cell_zero_weights_and_zero_input_stay_zero() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut cell = ConvLSTMCell::new((1, 5, 5), (1, 1, 3, 3), Activation::Tanh, &mut rng).unwrap();
    for kind in GateKind::ALL {
        cell.set_gate_weights(
            kind,
            Array4::zeros((1, 1, 3, 3)),
            Array4::zeros((1, 1, 3, 3)),
            Array1::zeros(1),
        )
        .unwrap();
    }

    let stack = StackedLayer::new(vec![Box::new(cell)]).unwrap();
    let driver = RecurrenceDriver::new(DriveMode::Encode, stack).unwrap();
    let inputs = vec![ArrayD::<f32>::zeros(vec![2, 1, 5, 5]); 4];
    let masks = vec![Array1::<f32>::ones(2); 4];
    let unrolled = driver
        .unroll(
            DriverInput::Encode {
                inputs: &inputs,
                masks: &masks,
            },
            false,
        )
        .unwrap();

    assert_eq!(unrolled.n_steps(), 4);
    for states in &unrolled.states {
        assert!(states[0].hidden.iter().all(|&v| v == 0.0));
        assert!(states[0].cell.iter().all(|&v| v == 0.0));
    }
}

#[test]
fn test_conv_lstm_cell_set_gate_weights_validates_shapes() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut cell = ConvLSTMCell::new((1, 4, 4), (2, 1, 3, 3), Activation::Tanh, &mut rng).unwrap();

    let wrong_recurrent = cell.set_gate_weights(
        GateKind::Input,
        Array4::zeros((2, 1, 3, 3)),
        Array4::zeros((2, 1, 3, 3)),
        Array1::zeros(2),
    );
    assert!(wrong_recurrent.is_err());

    let wrong_bias = cell.set_gate_weights(
        GateKind::Input,
        Array4::zeros((2, 1, 3, 3)),
        Array4::zeros((2, 2, 3, 3)),
        Array1::zeros(3),
    );
    assert!(wrong_bias.is_err());
}

#[test]
fn test_conv_lstm_cell_masked_example_keeps_state() {
    let mut rng = StdRng::seed_from_u64(4);
    let cell = ConvLSTMCell::new((1, 4, 4), (2, 1, 3, 3), Activation::Tanh, &mut rng).unwrap();
    let x = ArrayD::<f32>::ones(vec![2, 1, 4, 4]);

    let (first, _) = cell.step(&Array1::ones(2), &x, &cell.initial_state(2)).unwrap();
    let (second, _) = cell.step(&ndarray::array![1.0, 0.0], &x, &first).unwrap();

    assert_eq!(
        second.cell.index_axis(ndarray::Axis(0), 1),
        first.cell.index_axis(ndarray::Axis(0), 1)
    );
    assert_eq!(
        second.hidden.index_axis(ndarray::Axis(0), 1),
        first.hidden.index_axis(ndarray::Axis(0), 1)
    );
}
