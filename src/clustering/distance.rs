//! Pairwise descriptor distance.

use crate::error::VisageError;

/// Euclidean distance between two descriptor vectors.
///
/// Descriptors of mismatched length are a precondition violation for the
/// batch; the error aborts the batch rather than silently truncating.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, VisageError> {
    if a.len() != b.len() {
        return Err(VisageError::DescriptorMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let sum_sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    Ok(sum_sq.sqrt())
}
