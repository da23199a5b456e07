use approx::assert_relative_eq;
use ndarray::{Array1, ArrayD, Axis, IxDyn, array};
use nowcast::dataset::{ConstantGenerator, Dataset, Minibatch, Partitions, SinGenerator};
use std::f32::consts::PI;

fn sequence(len: usize, width: usize, start: f32) -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[len, width]), |idx| start + idx[0] as f32 + idx[1] as f32 * 0.1)
}

#[test]
fn test_dataset_validation() {
    assert!(Dataset::new(vec![], vec![]).is_err());
    assert!(Dataset::new(vec![sequence(2, 3, 0.0)], vec![]).is_err());
    // frame shapes must agree
    assert!(Dataset::new(vec![sequence(2, 3, 0.0)], vec![sequence(1, 2, 0.0)]).is_err());
    // target lengths must agree
    assert!(
        Dataset::new(
            vec![sequence(2, 3, 0.0), sequence(2, 3, 0.0)],
            vec![sequence(1, 3, 0.0), sequence(2, 3, 0.0)],
        )
        .is_err()
    );
    // empty sequence
    assert!(Dataset::new(vec![sequence(0, 3, 0.0)], vec![sequence(1, 3, 0.0)]).is_err());

    let dataset = Dataset::new(
        vec![sequence(2, 3, 0.0), sequence(4, 3, 0.0)],
        vec![sequence(1, 3, 0.0), sequence(1, 3, 0.0)],
    )
    .unwrap();
    assert_eq!(dataset.len(), 2);
    assert!(!dataset.is_empty());
    assert_eq!(dataset.frame_shape(), &[3]);
    assert_eq!(dataset.target_len(), 1);
}

#[test]
fn test_minibatch_pads_and_masks_short_sequences() {
    let dataset = Dataset::new(
        vec![sequence(2, 2, 10.0), sequence(3, 2, 20.0), sequence(1, 2, 30.0)],
        vec![sequence(1, 2, -1.0), sequence(1, 2, -2.0), sequence(1, 2, -3.0)],
    )
    .unwrap();

    let batch = dataset.minibatch(&[2, 0, 1]).unwrap();
    assert_eq!(batch.batch_size(), 3);
    assert_eq!(batch.n_timesteps(), 3);
    assert_eq!(batch.masks[0], array![1.0, 1.0, 1.0]);
    assert_eq!(batch.masks[1], array![0.0, 1.0, 1.0]);
    assert_eq!(batch.masks[2], array![0.0, 0.0, 1.0]);

    // example order follows the indices
    assert_eq!(batch.inputs[0].index_axis(Axis(0), 0), sequence(1, 2, 30.0).index_axis(Axis(0), 0));
    assert_eq!(batch.inputs[1].index_axis(Axis(0), 1), sequence(2, 2, 10.0).index_axis(Axis(0), 1));
    assert!(batch.inputs[2].index_axis(Axis(0), 0).iter().all(|&v| v == 0.0));
    assert_eq!(batch.targets.len(), 1);
    assert_eq!(batch.targets[0].index_axis(Axis(0), 2), sequence(1, 2, -2.0).index_axis(Axis(0), 0));

    assert!(dataset.minibatch(&[]).is_err());
    assert!(dataset.minibatch(&[3]).is_err());
}

#[test]
fn test_minibatch_new_checks_batch_sizes() {
    let frame = |b: usize| ArrayD::<f32>::zeros(IxDyn(&[b, 2]));
    assert!(Minibatch::new(vec![frame(2)], vec![Array1::ones(2)], vec![frame(2)]).is_ok());
    assert!(Minibatch::new(vec![frame(2)], vec![Array1::ones(3)], vec![frame(2)]).is_err());
    assert!(Minibatch::new(vec![frame(2)], vec![Array1::ones(2)], vec![frame(1)]).is_err());
    assert!(Minibatch::new(vec![frame(2)], vec![], vec![frame(2)]).is_err());
    assert!(Minibatch::new(vec![], vec![], vec![frame(2)]).is_err());
}

#[test]
fn test_from_frames_builds_sliding_windows() {
    let frames: Vec<ArrayD<f32>> = (0..7).map(|t| ArrayD::from_elem(IxDyn(&[1, 2, 2]), t as f32)).collect();
    let dataset = Dataset::from_frames(&frames, 3, 2, 2).unwrap();

    // windows start at 0 and 2; a window at 4 would need frames up to 8
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.inputs()[1].shape(), &[3, 1, 2, 2]);
    assert_eq!(dataset.targets()[1].shape(), &[2, 1, 2, 2]);
    assert_eq!(dataset.inputs()[1][[0, 0, 0, 0]], 2.0);
    assert_eq!(dataset.targets()[1][[1, 0, 1, 1]], 6.0);

    assert!(Dataset::from_frames(&frames, 5, 3, 1).is_err());
    assert!(Dataset::from_frames(&frames, 3, 2, 0).is_err());
    assert!(Dataset::from_frames(&frames, 0, 2, 1).is_err());
}

#[test]
fn test_partitions_require_matching_frames() {
    let a = Dataset::new(vec![sequence(2, 3, 0.0)], vec![sequence(1, 3, 0.0)]).unwrap();
    let b = Dataset::new(vec![sequence(2, 4, 0.0)], vec![sequence(1, 4, 0.0)]).unwrap();
    let c = Dataset::new(vec![sequence(2, 3, 0.0)], vec![sequence(2, 3, 0.0)]).unwrap();

    assert!(Partitions::new(a.clone(), a.clone(), a.clone()).is_ok());
    assert!(Partitions::new(a.clone(), b, a.clone()).is_err());
    assert!(Partitions::new(a.clone(), a, c).is_err());
}

#[test]
fn test_generators() {
    let frames: Vec<_> = ConstantGenerator::new((2, 3, 4), -1.5).take(2).collect();
    assert_eq!(frames[1].shape(), &[2, 3, 4]);
    assert!(frames[1].iter().all(|&v| v == -1.5));

    let mut sine = SinGenerator::new((1, 3, 3));
    let first = sine.next().unwrap();
    let second = sine.next().unwrap();
    assert_eq!(first, sine.frame_at(0));
    assert_eq!(second, sine.frame_at(1));

    // frame[0][j][i] = (1 + sin((t - i - j) / pi)) * 0.4
    assert_relative_eq!(first[[0, 0, 0]], 0.4, epsilon = 1e-6);
    assert_relative_eq!(
        second[[0, 2, 1]],
        (1.0 + ((1.0f32 - 1.0 - 2.0) / PI).sin()) * 0.4,
        epsilon = 1e-6
    );
    // the wave drifts one pixel per frame along the diagonal
    assert_relative_eq!(second[[0, 1, 1]], first[[0, 0, 1]], epsilon = 1e-6);
    assert!(sine.take(10).all(|f| f.iter().all(|&v| (0.0..=0.8).contains(&v))));
}
