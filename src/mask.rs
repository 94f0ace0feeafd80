//! Robust spatial pixel mask.
//!
//! The mask is derived once from the median-over-time profile of every pixel
//! and shared by every time sample of the fit.

use crate::types::SigmaClipOptions;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Per-pixel inclusion flags; `true` means the pixel takes part in the fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMask(Vec<bool>);

impl PixelMask {
    pub fn new(included: Vec<bool>) -> Self {
        Self(included)
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn included_count(&self) -> usize {
        self.0.iter().filter(|&&keep| keep).count()
    }

    /// Indices of the included pixels, in pixel order.
    pub fn included_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect()
    }
}

/// Median of a slice, averaging the two middle values for even lengths.
///
/// Returns NaN for an empty slice. The slice is reordered in place.
pub fn median_inplace(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = values[mid];
    if n % 2 == 1 {
        return upper;
    }
    let lower = values[..mid]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    0.5 * (lower + upper)
}

/// Median over time of every pixel column of a `time x pixel` block.
pub fn median_profile(flux: ArrayView2<f64>) -> Array1<f64> {
    let mut scratch = Vec::with_capacity(flux.nrows());
    flux.axis_iter(Axis(1))
        .map(|pixel| {
            scratch.clear();
            scratch.extend(pixel.iter().copied());
            median_inplace(&mut scratch)
        })
        .collect()
}

/// Iterative sigma clipping; returns `true` for values that survive.
///
/// Each pass recomputes the median and the population standard deviation of
/// the surviving values and rejects anything strictly outside
/// `median +/- sigma * std`. Non-finite values are rejected up front.
pub fn sigma_clip(values: ArrayView1<f64>, options: &SigmaClipOptions) -> Vec<bool> {
    let mut keep: Vec<bool> = values.iter().map(|v| v.is_finite()).collect();
    let mut survivors = Vec::with_capacity(values.len());

    for _ in 0..options.max_iters {
        survivors.clear();
        for (&v, &k) in values.iter().zip(keep.iter()) {
            if k {
                survivors.push(v);
            }
        }
        if survivors.is_empty() {
            break;
        }

        let count = survivors.len() as f64;
        let mean = survivors.iter().sum::<f64>() / count;
        let sum_sq: f64 = survivors.iter().map(|v| (v - mean).powi(2)).sum();
        let std = (sum_sq / count).sqrt();
        let center = median_inplace(&mut survivors);
        let lower = center - options.sigma * std;
        let upper = center + options.sigma * std;

        let mut rejected = 0usize;
        for (k, &v) in keep.iter_mut().zip(values.iter()) {
            if *k && (v < lower || v > upper) {
                *k = false;
                rejected += 1;
            }
        }
        if rejected == 0 {
            break;
        }
    }
    keep
}

/// Sigma-clipped mask of the median-over-time profile with default clip options.
pub fn compute_mask(flux: ArrayView2<f64>) -> PixelMask {
    let profile = median_profile(flux);
    compute_mask_from_profile(profile.view(), &SigmaClipOptions::default())
}

pub fn compute_mask_from_profile(
    profile: ArrayView1<f64>,
    options: &SigmaClipOptions,
) -> PixelMask {
    let mask = PixelMask::new(sigma_clip(profile, options));
    log::debug!(
        "outlier mask keeps {} of {} pixels",
        mask.included_count(),
        mask.len()
    );
    mask
}
