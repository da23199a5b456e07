use approx::assert_relative_eq;
use ndarray::{Array1, ArrayD, ArrayViewMutD, IxDyn};
use nowcast::ModelError;
use nowcast::dataset::Minibatch;
use nowcast::neural_network::{
    Adadelta, NamedParameter, Optimizer, RMSprop, SGD, Tensor, TrainableModel,
};

/// cost = Σ w², gradient 2w
struct Quadratic {
    w: Tensor,
}

impl Quadratic {
    fn new(values: &[f32]) -> Self {
        Self {
            w: ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap(),
        }
    }
}

impl TrainableModel for Quadratic {
    fn parameters(&self) -> Vec<NamedParameter<'_>> {
        vec![NamedParameter {
            name: "w".to_string(),
            value: self.w.view(),
        }]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.w.view_mut()]
    }

    fn cost_and_gradients(&self, _batch: &Minibatch) -> Result<(f32, Vec<Tensor>), ModelError> {
        Ok((self.w.mapv(|w| w * w).sum(), vec![self.w.mapv(|w| 2.0 * w)]))
    }

    fn prediction_error(&self, _batch: &Minibatch) -> Result<f32, ModelError> {
        Ok(self.w.mapv(|w| w * w).mean().unwrap_or(0.0))
    }
}

/// A model that reports one gradient too many
struct Misaligned {
    w: Tensor,
}

impl TrainableModel for Misaligned {
    fn parameters(&self) -> Vec<NamedParameter<'_>> {
        vec![NamedParameter {
            name: "w".to_string(),
            value: self.w.view(),
        }]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.w.view_mut()]
    }

    fn cost_and_gradients(&self, _batch: &Minibatch) -> Result<(f32, Vec<Tensor>), ModelError> {
        Ok((0.0, vec![self.w.clone(), self.w.clone()]))
    }

    fn prediction_error(&self, _batch: &Minibatch) -> Result<f32, ModelError> {
        Ok(0.0)
    }
}

fn dummy_batch() -> Minibatch {
    Minibatch::new(
        vec![ArrayD::zeros(IxDyn(&[1, 1]))],
        vec![Array1::ones(1)],
        vec![ArrayD::zeros(IxDyn(&[1, 1]))],
    )
    .unwrap()
}

#[test]
fn test_constructors_validate_hyperparameters() {
    assert!(Adadelta::new(0.95, 1e-6).is_ok());
    assert!(Adadelta::new(1.0, 1e-6).is_err());
    assert!(Adadelta::new(-0.1, 1e-6).is_err());
    assert!(Adadelta::new(0.95, 0.0).is_err());
    assert!(Adadelta::new(f32::NAN, 1e-6).is_err());

    assert!(RMSprop::new(0.95, 0.9, 1e-4).is_ok());
    assert!(RMSprop::new(0.95, 1.2, 1e-4).is_err());
    assert!(RMSprop::new(0.95, 0.9, -1.0).is_err());
}

#[test]
fn test_apply_without_compute_fails() {
    let mut model = Quadratic::new(&[1.0]);
    let mut optimizers: Vec<Box<dyn Optimizer>> = vec![
        Box::new(Adadelta::default()),
        Box::new(RMSprop::new(0.95, 0.9, 1e-4).unwrap()),
        Box::new(SGD::new()),
    ];
    for optimizer in optimizers.iter_mut() {
        assert!(matches!(
            optimizer.apply(&mut model, 1.0),
            Err(ModelError::ProcessingError(_))
        ));
        assert_eq!(model.w[[0]], 1.0);
    }
}

#[test]
fn test_compute_leaves_parameters_untouched() {
    let mut model = Quadratic::new(&[1.0, -2.0]);
    let batch = dummy_batch();
    let mut optimizer = Adadelta::default();

    let cost = optimizer.compute(&model, &batch).unwrap();
    assert_relative_eq!(cost, 5.0);
    assert_eq!(model.w.as_slice().unwrap(), &[1.0, -2.0]);

    // running E[g²] is refreshed by compute
    assert_relative_eq!(optimizer.running_grads2()[0][[0]], 0.05 * 4.0, epsilon = 1e-7);
    assert_relative_eq!(optimizer.running_grads2()[0][[1]], 0.05 * 16.0, epsilon = 1e-6);
    assert!(optimizer.running_up2()[0].iter().all(|&v| v == 0.0));

    optimizer.apply(&mut model, 1.0).unwrap();
    assert!(model.w[[0]] < 1.0);
    assert!(model.w[[1]] > -2.0);

    // one compute allows exactly one apply
    assert!(optimizer.apply(&mut model, 1.0).is_err());
}

#[test]
fn test_sgd_step() {
    let mut model = Quadratic::new(&[1.0, -0.5]);
    let mut optimizer = SGD::new();
    optimizer.compute(&model, &dummy_batch()).unwrap();
    optimizer.apply(&mut model, 0.1).unwrap();

    assert_relative_eq!(model.w[[0]], 0.8, epsilon = 1e-6);
    assert_relative_eq!(model.w[[1]], -0.4, epsilon = 1e-6);
    assert!(optimizer.compute(&model, &dummy_batch()).is_ok());
    assert!(optimizer.apply(&mut model, 0.0).is_err());
}

#[test]
fn test_adadelta_first_step() {
    let mut model = Quadratic::new(&[1.0]);
    let mut optimizer = Adadelta::new(0.95, 1e-6).unwrap();
    optimizer.compute(&model, &dummy_batch()).unwrap();
    optimizer.apply(&mut model, 1.0).unwrap();

    // Δ = -sqrt(1e-6) / sqrt(0.2 + 1e-6) * 2
    let delta = -(1e-6f32).sqrt() / (0.2f32 + 1e-6).sqrt() * 2.0;
    assert_relative_eq!(model.w[[0]], 1.0 + delta, epsilon = 1e-6);
    assert_relative_eq!(model.w[[0]], 0.99552788, epsilon = 1e-6);
    assert_relative_eq!(optimizer.running_up2()[0][[0]], 0.05 * delta * delta, epsilon = 1e-9);
}

#[test]
fn test_adadelta_scales_by_learning_rate() {
    let mut full = Quadratic::new(&[1.0]);
    let mut half = Quadratic::new(&[1.0]);
    let mut a = Adadelta::default();
    let mut b = Adadelta::default();
    a.compute(&full, &dummy_batch()).unwrap();
    a.apply(&mut full, 1.0).unwrap();
    b.compute(&half, &dummy_batch()).unwrap();
    b.apply(&mut half, 0.5).unwrap();

    assert_relative_eq!(1.0 - half.w[[0]], 0.5 * (1.0 - full.w[[0]]), epsilon = 1e-7);
}

#[test]
fn test_rmsprop_steps() {
    let (rho, momentum, epsilon, lr) = (0.95f32, 0.9f32, 1e-4f32, 0.01f32);
    let mut model = Quadratic::new(&[1.0]);
    let mut optimizer = RMSprop::new(rho, momentum, epsilon).unwrap();

    let (mut rg, mut rg2, mut v, mut w) = (0.0f32, 0.0f32, 0.0f32, 1.0f32);
    for _ in 0..3 {
        let g = 2.0 * w;
        rg = rho * rg + (1.0 - rho) * g;
        rg2 = rho * rg2 + (1.0 - rho) * g * g;
        v = momentum * v - lr * g / (rg2 - rg * rg + epsilon).sqrt();
        w += v;

        optimizer.compute(&model, &dummy_batch()).unwrap();
        optimizer.apply(&mut model, lr).unwrap();
        assert_relative_eq!(model.w[[0]], w, epsilon = 1e-5);
    }
}

#[test]
fn test_optimizers_reduce_a_quadratic() {
    let mut optimizers: Vec<(Box<dyn Optimizer>, f32)> = vec![
        (Box::new(Adadelta::default()), 1.0),
        (Box::new(SGD::new()), 0.1),
    ];
    for (optimizer, lr) in optimizers.iter_mut() {
        let mut model = Quadratic::new(&[1.0, -1.0, 0.5]);
        let initial = optimizer.compute(&model, &dummy_batch()).unwrap();
        optimizer.apply(&mut model, *lr).unwrap();
        for _ in 0..50 {
            optimizer.compute(&model, &dummy_batch()).unwrap();
            optimizer.apply(&mut model, *lr).unwrap();
        }
        let last = model.w.mapv(|w| w * w).sum();
        assert!(last < initial, "{} did not reduce the cost", optimizer.name());
    }
}

#[test]
fn test_state_shape_mismatch_is_rejected() {
    let mut small = Quadratic::new(&[1.0]);
    let large = Quadratic::new(&[1.0, 2.0]);
    let mut optimizer = Adadelta::default();
    optimizer.compute(&small, &dummy_batch()).unwrap();
    optimizer.apply(&mut small, 1.0).unwrap();

    assert!(optimizer.compute(&large, &dummy_batch()).is_err());
}

#[test]
fn test_parameters_changed_between_compute_and_apply() {
    let model = Quadratic::new(&[1.0]);
    let mut other = Quadratic::new(&[1.0, 2.0]);
    let mut optimizer = SGD::new();
    optimizer.compute(&model, &dummy_batch()).unwrap();
    assert!(optimizer.apply(&mut other, 0.1).is_err());
}

#[test]
fn test_misaligned_gradients_are_rejected() {
    let model = Misaligned {
        w: ArrayD::zeros(IxDyn(&[2])),
    };
    let mut optimizer = SGD::new();
    assert!(optimizer.compute(&model, &dummy_batch()).is_err());
}
