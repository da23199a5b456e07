use ndarray::{Array1, Array4, ArrayView3, ArrayView4, ArrayViewMut3, Axis, Zip, s};
use rayon::prelude::*;

/// Threshold for deciding between parallel and sequential execution (batch * filters * height * width)
const CONVOLUTION_PARALLEL_THRESHOLD: usize = 10000;

/// Output index range `[start, end)` for which `index + offset` stays inside `[0, len)`
fn valid_range(len: usize, offset: isize) -> Option<(usize, usize)> {
    let start = (-offset).max(0);
    let end = (len as isize - offset).min(len as isize);
    if start >= end {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

/// Top/left zero padding that keeps the spatial size for an odd or even kernel
#[inline]
fn same_padding(kernel: usize) -> isize {
    ((kernel - 1) / 2) as isize
}

/// Visits every kernel tap that overlaps the image and hands over the
/// destination window `(y0..y1, x0..x1)` and the shifted source window.
fn for_each_tap(
    (height, width): (usize, usize),
    (kernel_h, kernel_w): (usize, usize),
    mut visit: impl FnMut(usize, usize, (usize, usize, usize, usize), (usize, usize, usize, usize)),
) {
    let (pad_h, pad_w) = (same_padding(kernel_h), same_padding(kernel_w));
    for ky in 0..kernel_h {
        let dy = ky as isize - pad_h;
        let Some((y0, y1)) = valid_range(height, dy) else {
            continue;
        };
        for kx in 0..kernel_w {
            let dx = kx as isize - pad_w;
            let Some((x0, x1)) = valid_range(width, dx) else {
                continue;
            };
            let shifted = (
                (y0 as isize + dy) as usize,
                (y1 as isize + dy) as usize,
                (x0 as isize + dx) as usize,
                (x1 as isize + dx) as usize,
            );
            visit(ky, kx, (y0, y1, x0, x1), shifted);
        }
    }
}

/// Stride-1 "same" convolution of one example
fn convolve_sample(output: &mut ArrayViewMut3<f32>, sample: &ArrayView3<f32>, kernel: &Array4<f32>) {
    let (filters, channels, kernel_h, kernel_w) = kernel.dim();
    let (_, height, width) = sample.dim();
    for_each_tap(
        (height, width),
        (kernel_h, kernel_w),
        |ky, kx, (y0, y1, x0, x1), (sy0, sy1, sx0, sx1)| {
            for f in 0..filters {
                let mut out = output.slice_mut(s![f, y0..y1, x0..x1]);
                for c in 0..channels {
                    out.scaled_add(kernel[[f, c, ky, kx]], &sample.slice(s![c, sy0..sy1, sx0..sx1]));
                }
            }
        },
    );
}

/// Gradient of [`convolve_sample`] with respect to its input
fn convolve_sample_transposed(
    grad_input: &mut ArrayViewMut3<f32>,
    grad_output: &ArrayView3<f32>,
    kernel: &Array4<f32>,
) {
    let (filters, channels, kernel_h, kernel_w) = kernel.dim();
    let (_, height, width) = grad_output.dim();
    for_each_tap(
        (height, width),
        (kernel_h, kernel_w),
        |ky, kx, (y0, y1, x0, x1), (sy0, sy1, sx0, sx1)| {
            for c in 0..channels {
                let mut dst = grad_input.slice_mut(s![c, sy0..sy1, sx0..sx1]);
                for f in 0..filters {
                    dst.scaled_add(kernel[[f, c, ky, kx]], &grad_output.slice(s![f, y0..y1, x0..x1]));
                }
            }
        },
    );
}

/// Stride-1 convolution with zero "same" padding
///
/// # Parameters
///
/// - `input` - Input with shape \[batch, channels, height, width\]
/// - `kernel` - Filters with shape \[filters, channels, kernel_h, kernel_w\]
///
/// # Returns
///
/// - `Array4<f32>` - Output with shape \[batch, filters, height, width\]
pub(crate) fn conv2d_same(input: ArrayView4<f32>, kernel: &Array4<f32>) -> Array4<f32> {
    let (batch_size, _, height, width) = input.dim();
    let filters = kernel.dim().0;
    let mut output = Array4::<f32>::zeros((batch_size, filters, height, width));
    let parallel = output.len() >= CONVOLUTION_PARALLEL_THRESHOLD;

    let zip = Zip::from(output.axis_iter_mut(Axis(0))).and(input.axis_iter(Axis(0)));
    if parallel {
        zip.par_for_each(|mut out, sample| convolve_sample(&mut out, &sample, kernel));
    } else {
        zip.for_each(|mut out, sample| convolve_sample(&mut out, &sample, kernel));
    }
    output
}

/// Gradient of [`conv2d_same`] with respect to its input
///
/// # Parameters
///
/// - `grad_output` - Upstream gradient with shape \[batch, filters, height, width\]
/// - `kernel` - Filters used in the forward pass
///
/// # Returns
///
/// - `Array4<f32>` - Gradient with shape \[batch, channels, height, width\]
pub(crate) fn conv2d_same_input_grad(grad_output: ArrayView4<f32>, kernel: &Array4<f32>) -> Array4<f32> {
    let (batch_size, _, height, width) = grad_output.dim();
    let channels = kernel.dim().1;
    let mut grad_input = Array4::<f32>::zeros((batch_size, channels, height, width));
    let parallel = grad_input.len() >= CONVOLUTION_PARALLEL_THRESHOLD;

    let zip = Zip::from(grad_input.axis_iter_mut(Axis(0))).and(grad_output.axis_iter(Axis(0)));
    if parallel {
        zip.par_for_each(|mut g_in, g_out| convolve_sample_transposed(&mut g_in, &g_out, kernel));
    } else {
        zip.for_each(|mut g_in, g_out| convolve_sample_transposed(&mut g_in, &g_out, kernel));
    }
    grad_input
}

/// Gradient of [`conv2d_same`] with respect to its filters
///
/// # Parameters
///
/// - `input` - Input of the forward pass with shape \[batch, channels, height, width\]
/// - `grad_output` - Upstream gradient with shape \[batch, filters, height, width\]
/// - `kernel_dim` - `(filters, channels, kernel_h, kernel_w)`
///
/// # Returns
///
/// - `Array4<f32>` - Gradient with shape `kernel_dim`
pub(crate) fn conv2d_same_kernel_grad(
    input: ArrayView4<f32>,
    grad_output: ArrayView4<f32>,
    kernel_dim: (usize, usize, usize, usize),
) -> Array4<f32> {
    let (_, channels, kernel_h, kernel_w) = kernel_dim;
    let (batch_size, _, height, width) = input.dim();
    let mut grad_kernel = Array4::<f32>::zeros(kernel_dim);

    let filter_grad = |f: usize, filter: &mut ArrayViewMut3<f32>| {
        for_each_tap(
            (height, width),
            (kernel_h, kernel_w),
            |ky, kx, (y0, y1, x0, x1), (sy0, sy1, sx0, sx1)| {
                for c in 0..channels {
                    let mut sum = 0.0;
                    for b in 0..batch_size {
                        sum += Zip::from(grad_output.slice(s![b, f, y0..y1, x0..x1]))
                            .and(input.slice(s![b, c, sy0..sy1, sx0..sx1]))
                            .fold(0.0, |acc, &g, &x| acc + g * x);
                    }
                    filter[[c, ky, kx]] = sum;
                }
            },
        );
    };

    if grad_output.len() >= CONVOLUTION_PARALLEL_THRESHOLD {
        grad_kernel
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(f, mut filter)| filter_grad(f, &mut filter));
    } else {
        for (f, mut filter) in grad_kernel.axis_iter_mut(Axis(0)).enumerate() {
            filter_grad(f, &mut filter);
        }
    }
    grad_kernel
}

/// Adds a per-channel bias to a \[batch, channels, height, width\] tensor
pub(crate) fn add_channel_bias(output: &mut Array4<f32>, bias: &Array1<f32>) {
    for (mut channel, &b) in output.axis_iter_mut(Axis(1)).zip(bias.iter()) {
        channel += b;
    }
}

/// Gradient of [`add_channel_bias`]: sums every axis except the channel axis
pub(crate) fn channel_bias_grad(grad_output: ArrayView4<f32>) -> Array1<f32> {
    grad_output
        .sum_axis(Axis(3))
        .sum_axis(Axis(2))
        .sum_axis(Axis(0))
}

/// Reference implementation used to cross-check the sliced kernels in tests
#[cfg(test)]
pub(crate) fn conv2d_same_naive(input: ArrayView4<f32>, kernel: &Array4<f32>) -> Array4<f32> {
    let (batch_size, channels, height, width) = input.dim();
    let (filters, _, kernel_h, kernel_w) = kernel.dim();
    let (pad_h, pad_w) = (same_padding(kernel_h), same_padding(kernel_w));
    let mut output = Array4::<f32>::zeros((batch_size, filters, height, width));
    for b in 0..batch_size {
        let mut sample = ndarray::Array3::<f32>::zeros((filters, height, width));
        for f in 0..filters {
            for y in 0..height {
                for x in 0..width {
                    let mut sum = 0.0;
                    for c in 0..channels {
                        for ky in 0..kernel_h {
                            for kx in 0..kernel_w {
                                let iy = y as isize + ky as isize - pad_h;
                                let ix = x as isize + kx as isize - pad_w;
                                if iy < 0 || ix < 0 || iy >= height as isize || ix >= width as isize {
                                    continue;
                                }
                                sum += input[[b, c, iy as usize, ix as usize]] * kernel[[f, c, ky, kx]];
                            }
                        }
                    }
                    sample[[f, y, x]] = sum;
                }
            }
        }
        output.index_axis_mut(Axis(0), b).assign(&sample);
    }
    output
}
