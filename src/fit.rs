//! Regularized batched regression of every time sample onto the spatial basis.

use crate::basis::INTERCEPT_COLUMN;
use crate::estimator::EstimatorError;
use crate::faer_ndarray::solve_symmetric_in_place;
use crate::mask::{PixelMask, median_inplace, median_profile};
use crate::matrix::SparseDesignMatrix;
use crate::types::GaussianPrior;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};

/// Output of [`fit_weights`]. Immutable once produced.
#[derive(Debug, Clone)]
pub struct FittedWeights {
    /// One row per time sample, one column per basis function.
    weights: Array2<f64>,
    /// Coefficients of the smoothed median-over-time profile.
    baseline: Array1<f64>,
    /// Per-time-sample prior mean of the intercept coefficient.
    offsets: Array1<f64>,
}

impl FittedWeights {
    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    pub fn baseline(&self) -> ArrayView1<'_, f64> {
        self.baseline.view()
    }

    pub fn offsets(&self) -> ArrayView1<'_, f64> {
        self.offsets.view()
    }

    pub fn n_samples(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_basis(&self) -> usize {
        self.weights.ncols()
    }

    /// Residual-model coefficients for time sample `index`.
    pub fn residual_row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.weights.row(index)
    }

    /// Baseline plus residual coefficients for time sample `index`.
    pub fn background_row(&self, index: usize) -> Array1<f64> {
        &self.baseline + &self.weights.row(index)
    }
}

/// Fits one weight vector per time sample against `design`, using only the
/// pixels included by `mask`.
///
/// The regression target is the flux minus each pixel's median over time.
/// Every coefficient carries an independent Gaussian prior with standard
/// deviation `prior.sigma`; the prior mean is zero except for the intercept,
/// which is the median residual of that time sample over the included pixels.
/// The normal-equations matrix does not depend on the time sample, so it is
/// factorized once and applied to all right-hand sides together. The baseline
/// profile is solved as one extra right-hand side of the same system.
pub fn fit_weights(
    design: &SparseDesignMatrix,
    flux: ArrayView2<f64>,
    mask: &PixelMask,
    prior: &GaussianPrior,
) -> Result<FittedWeights, EstimatorError> {
    let (n_samples, n_pixels) = flux.dim();
    if design.nrows() != n_pixels || mask.len() != n_pixels {
        return Err(EstimatorError::ShapeMismatch(format!(
            "design has {} rows and mask has {} entries, but flux has {} pixels",
            design.nrows(),
            mask.len(),
            n_pixels
        )));
    }
    if n_samples == 0 || n_pixels == 0 {
        return Err(EstimatorError::InvalidInput(format!(
            "cannot fit a {n_samples}x{n_pixels} flux block"
        )));
    }
    if !(prior.sigma.is_finite() && prior.sigma > 0.0) {
        return Err(EstimatorError::InvalidInput(format!(
            "prior standard deviation must be positive and finite, got {}",
            prior.sigma
        )));
    }
    let included = mask.included_indices();
    if included.is_empty() {
        return Err(EstimatorError::InvalidInput(
            "outlier mask excludes every pixel".to_string(),
        ));
    }

    let profile = median_profile(flux);
    let residual = &flux - &profile.view().insert_axis(Axis(0));

    let mut scratch = Vec::with_capacity(included.len());
    let offsets: Array1<f64> = residual
        .axis_iter(Axis(0))
        .map(|sample| {
            scratch.clear();
            scratch.extend(included.iter().map(|&p| sample[p]));
            median_inplace(&mut scratch)
        })
        .collect();
    scratch.clear();
    scratch.extend(included.iter().map(|&p| profile[p]));
    let baseline_level = median_inplace(&mut scratch);

    log::debug!(
        "fitting {} time samples on {} of {} pixels with {} basis functions",
        n_samples,
        included.len(),
        n_pixels,
        design.ncols()
    );

    let precision = prior.precision();
    let mut lhs = design.masked_gram(mask.as_slice());
    lhs.diag_mut().mapv_inplace(|v| v + precision);

    // Columns 0..T are the residual time samples; column T is the baseline profile.
    let mut targets = Array2::<f64>::zeros((n_pixels, n_samples + 1));
    for (t, sample) in residual.axis_iter(Axis(0)).enumerate() {
        targets.column_mut(t).assign(&sample);
    }
    targets.column_mut(n_samples).assign(&profile);

    let mut rhs = design.masked_transpose_multiply(mask.as_slice(), targets.view());
    {
        let mut intercept = rhs.row_mut(INTERCEPT_COLUMN);
        intercept
            .slice_mut(s![..n_samples])
            .scaled_add(precision, &offsets);
        intercept[n_samples] += precision * baseline_level;
    }

    solve_symmetric_in_place(&lhs, &mut rhs).map_err(EstimatorError::LinearSystemSolveFailed)?;

    if rhs.iter().any(|v| !v.is_finite()) {
        return Err(EstimatorError::NonFiniteSolution);
    }

    let weights = rhs
        .slice(s![.., ..n_samples])
        .t()
        .as_standard_layout()
        .into_owned();
    let baseline = rhs.column(n_samples).to_owned();

    Ok(FittedWeights {
        weights,
        baseline,
        offsets,
    })
}
