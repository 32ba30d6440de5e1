//! Whitening matrix derivation from sampled Gram matrices.

use ndarray::{Array1, Array2};
use ndarray_linalg::svd::SVD;

use crate::error::{Result, WhitenError};

/// Aggregates sampled Gram matrices into the per-sample second-moment
/// estimate AAt and derives the symmetric whitening transform
/// `W = U · diag(1/√S) · Uᵗ` from its SVD, so `W · AAt · Wᵗ ≈ I`.
///
/// Normalization divides by `grams.len() · chunk_size`, which assumes
/// every sampled chunk holds exactly `chunk_size` samples. If the last
/// chunk is sampled and is shorter, the estimate is biased slightly low;
/// this known approximation is kept as-is.
///
/// Singular values are floored at `s_max · M · ε` before inversion, so a
/// rank-deficient estimate yields a finite transform instead of a
/// division blow-up. An all-zero spectrum cannot be whitened and is a
/// `Numerical` error.
pub fn whitening_matrix(grams: &[Array2<f64>], chunk_size: usize) -> Result<Array2<f64>> {
    let first = grams
        .first()
        .ok_or_else(|| WhitenError::Numerical("no sampled Gram matrices to aggregate".into()))?;
    let num_channels = first.nrows();
    if grams
        .iter()
        .any(|g| g.nrows() != num_channels || g.ncols() != num_channels)
    {
        return Err(WhitenError::Numerical(format!(
            "sampled Gram matrices disagree on shape; expected {num_channels}×{num_channels}"
        )));
    }

    let normalizer = (grams.len() * chunk_size) as f64;
    let mut aat = Array2::<f64>::zeros((num_channels, num_channels));
    for gram in grams {
        aat += &(gram / normalizer);
    }

    let (u, s, vt) = aat
        .svd(true, true)
        .map_err(|e| WhitenError::Numerical(format!("SVD of covariance estimate failed: {e}")))?;
    let u = u.ok_or_else(|| {
        WhitenError::Numerical("SVD did not return left singular vectors".into())
    })?;
    let vt = vt.ok_or_else(|| {
        WhitenError::Numerical("SVD did not return right singular vectors".into())
    })?;

    let s_max = s.iter().copied().fold(0.0_f64, f64::max);
    if !(s_max > 0.0) || !s_max.is_finite() {
        return Err(WhitenError::Numerical(
            "covariance estimate has no positive singular values; nothing to whiten".into(),
        ));
    }
    let floor = s_max * num_channels as f64 * f64::EPSILON;
    let inv_sqrt: Array1<f64> = s.mapv(|v| 1.0 / v.max(floor).sqrt());

    // AAt is symmetric PSD, so vt coincides with uᵗ up to sign and the
    // product below is the symmetric whitening transform.
    Ok((&u * &inv_sqrt).dot(&vt))
}
