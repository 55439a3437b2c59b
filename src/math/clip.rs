//! Joint clipping of a list of arrays by their global L2 norm.
//!
//! Every array is rescaled by the same factor, so the direction of the
//! concatenated vector is preserved and its norm is bounded by `clip_norm`.

use ndarray::ArrayD;

use crate::math::norms::global_l2_norm;

/// Factor that brings a vector of norm `norm` within `clip_norm`.
///
/// `1.0` when `norm <= clip_norm`, so a zero norm never divides;
/// `clip_norm / norm` otherwise. Computed in `f64`.
pub fn clip_scale(norm: f64, clip_norm: f32) -> f64 {
    let clip_norm = f64::from(clip_norm);
    if norm <= clip_norm {
        1.0
    } else {
        clip_norm / norm
    }
}

/// Clip a list of arrays so their joint L2 norm does not exceed `clip_norm`.
///
/// Returns the (possibly rescaled) arrays and the norm measured before
/// clipping. When the norm is at most `clip_norm` the arrays are returned
/// untouched.
///
/// A non-finite norm is returned as-is with the arrays unscaled; callers
/// decide how to treat it.
pub fn clip_by_global_norm(leaves: Vec<ArrayD<f32>>, clip_norm: f32) -> (Vec<ArrayD<f32>>, f64) {
    let norm = {
        let refs: Vec<&ArrayD<f32>> = leaves.iter().collect();
        global_l2_norm(&refs)
    };

    if !norm.is_finite() || norm <= f64::from(clip_norm) {
        return (leaves, norm);
    }

    let scale = clip_scale(norm, clip_norm);
    let clipped = leaves
        .into_iter()
        .map(|mut leaf| {
            leaf.mapv_inplace(|x| (f64::from(x) * scale) as f32);
            leaf
        })
        .collect();
    (clipped, norm)
}
