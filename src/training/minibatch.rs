use crate::error::ModelError;
use rand::Rng;
use rand::seq::SliceRandom;

/// Splits `0..n` into consecutive groups of `batch_size`; the last group keeps the remainder
///
/// # Example
/// ```rust
/// use nowcast::training::minibatch_indices;
///
/// let groups = minibatch_indices(9, 4).unwrap();
/// assert_eq!(groups, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8]]);
/// ```
///
/// # Errors
///
/// - `ModelError::InputValidationError` - If `batch_size` is 0
pub fn minibatch_indices(n: usize, batch_size: usize) -> Result<Vec<Vec<usize>>, ModelError> {
    let indices: Vec<usize> = (0..n).collect();
    chunk_indices(&indices, batch_size)
}

/// Same as [`minibatch_indices`] after shuffling the example order with `rng`
pub fn shuffled_minibatch_indices<R: Rng + ?Sized>(
    n: usize,
    batch_size: usize,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>, ModelError> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    chunk_indices(&indices, batch_size)
}

fn chunk_indices(indices: &[usize], batch_size: usize) -> Result<Vec<Vec<usize>>, ModelError> {
    if batch_size == 0 {
        return Err(ModelError::InputValidationError(
            "batch_size must be greater than 0".to_string(),
        ));
    }
    Ok(indices.chunks(batch_size).map(<[usize]>::to_vec).collect())
}
