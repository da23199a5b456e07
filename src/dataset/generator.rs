use crate::neural_network::Tensor;
use std::f32::consts::PI;

/// Endless stream of frames with a constant value
///
/// Frames have shape `(depth, height, width)`.
///
/// # Example
/// ```rust
/// use nowcast::dataset::ConstantGenerator;
///
/// let frames: Vec<_> = ConstantGenerator::new((1, 4, 4), 0.5).take(3).collect();
/// assert_eq!(frames.len(), 3);
/// assert!(frames[2].iter().all(|&v| v == 0.5));
/// ```
#[derive(Debug, Clone)]
pub struct ConstantGenerator {
    shape: (usize, usize, usize),
    value: f32,
}

impl ConstantGenerator {
    pub fn new(shape: (usize, usize, usize), value: f32) -> Self {
        Self { shape, value }
    }
}

impl Iterator for ConstantGenerator {
    type Item = Tensor;

    fn next(&mut self) -> Option<Tensor> {
        let (depth, height, width) = self.shape;
        Some(Tensor::from_elem(vec![depth, height, width], self.value))
    }
}

/// Endless stream of diagonal sine waves drifting one pixel per frame
///
/// Frame t has `frame[k][j][i] = (1 + sin((t − i − j) / π)) · 0.4`, so values lie in `[0, 0.8]`.
#[derive(Debug, Clone)]
pub struct SinGenerator {
    shape: (usize, usize, usize),
    t: usize,
}

impl SinGenerator {
    pub fn new(shape: (usize, usize, usize)) -> Self {
        Self { shape, t: 0 }
    }

    /// Frame at timestep `t`, independent of the iterator position
    pub fn frame_at(&self, t: usize) -> Tensor {
        let (depth, height, width) = self.shape;
        Tensor::from_shape_fn(vec![depth, height, width], |index| {
            let (j, i) = (index[1] as f32, index[2] as f32);
            (1.0 + ((t as f32 - i - j) / PI).sin()) * 0.4
        })
    }
}

impl Iterator for SinGenerator {
    type Item = Tensor;

    fn next(&mut self) -> Option<Tensor> {
        let frame = self.frame_at(self.t);
        self.t += 1;
        Some(frame)
    }
}
