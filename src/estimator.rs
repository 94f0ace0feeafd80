//! Background estimator: validates an observation set, fits it once at
//! construction and answers prediction queries afterwards.

use crate::basis::{BasisError, build_design_matrix};
use crate::faer_ndarray::FaerLinalgError;
use crate::fit::{FittedWeights, fit_weights};
use crate::mask::{PixelMask, compute_mask};
use crate::matrix::SparseDesignMatrix;
use crate::predict::{BasisCacheEntry, PixelCoordinates, TimeIndex, evaluate};
use crate::source::ObservationSource;
use crate::types::{BasisAxes, GaussianPrior, MissionMetadata};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("Inconsistent observation shapes: {0}")]
    ShapeMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Time sample identifier(s) {ids:?} are not present in the fitted set")]
    UnknownTimeSample { ids: Vec<i64> },

    #[error("Regularized normal equations could not be solved: {0}")]
    LinearSystemSolveFailed(FaerLinalgError),

    #[error("The regularized solve produced non-finite weights")]
    NonFiniteSolution,

    #[error("Underlying basis function generation failed: {0}")]
    BasisError(#[from] BasisError),
}

/// The four arrays an estimator is built from.
///
/// `row`, `column` and the columns of `flux` share one pixel ordering; the rows
/// of `flux` are time samples labelled by `time_ids`.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    pub row: Array1<f64>,
    pub column: Array1<f64>,
    pub flux: Array2<f64>,
    pub time_ids: Array1<i64>,
}

impl ObservationSet {
    pub fn new(
        row: Array1<f64>,
        column: Array1<f64>,
        flux: Array2<f64>,
        time_ids: Array1<i64>,
    ) -> Result<Self, EstimatorError> {
        let observations = Self {
            row,
            column,
            flux,
            time_ids,
        };
        observations.validate()?;
        Ok(observations)
    }

    pub fn validate(&self) -> Result<(), EstimatorError> {
        let (n_samples, n_pixels) = self.flux.dim();
        if self.row.len() != n_pixels || self.column.len() != n_pixels {
            return Err(EstimatorError::ShapeMismatch(format!(
                "flux has {n_pixels} pixels but row has {} and column has {} coordinates",
                self.row.len(),
                self.column.len()
            )));
        }
        if self.time_ids.len() != n_samples {
            return Err(EstimatorError::ShapeMismatch(format!(
                "flux has {n_samples} time samples but {} time identifiers were given",
                self.time_ids.len()
            )));
        }
        if n_samples == 0 || n_pixels == 0 {
            return Err(EstimatorError::ShapeMismatch(format!(
                "flux needs at least one time sample and one pixel, got {n_samples}x{n_pixels}"
            )));
        }
        if let Some(((t, p), v)) = self.flux.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(EstimatorError::InvalidInput(format!(
                "flux must be finite, found {v} at time sample {t}, pixel {p}"
            )));
        }
        let finite = |a: &Array1<f64>| a.iter().all(|v| v.is_finite());
        if !(finite(&self.row) && finite(&self.column)) {
            return Err(EstimatorError::InvalidInput(
                "pixel coordinates must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.flux.dim()
    }
}

/// Fitted background model for one detector channel.
///
/// Construction runs the whole fit: outlier mask, design matrix and the
/// batched regularized solve. A constructor that returns `Ok` holds a
/// complete model; no partially fitted estimator is ever observable.
///
/// Prediction methods that accept coordinates take `&mut self` because they
/// may replace the basis cache entry. Shared references are safe to use from
/// several threads for the read-only accessors and [`Estimator::model_all`].
#[derive(Debug, Clone)]
pub struct Estimator {
    observations: ObservationSet,
    mask: PixelMask,
    design: Arc<SparseDesignMatrix>,
    fitted: FittedWeights,
    time_index: TimeIndex,
    cache: BasisCacheEntry,
    axes: BasisAxes,
    metadata: MissionMetadata,
}

impl Estimator {
    pub fn new(
        row: Array1<f64>,
        column: Array1<f64>,
        flux: Array2<f64>,
        time_ids: Array1<i64>,
    ) -> Result<Self, EstimatorError> {
        Self::from_observations(ObservationSet::new(row, column, flux, time_ids)?)
    }

    pub fn from_observations(observations: ObservationSet) -> Result<Self, EstimatorError> {
        observations.validate()?;
        let axes = BasisAxes::default();

        let mask = compute_mask(observations.flux.view());
        let design = Arc::new(build_design_matrix(
            observations.row.view(),
            observations.column.view(),
            axes,
        )?);
        let fitted = fit_weights(
            &design,
            observations.flux.view(),
            &mask,
            &GaussianPrior::default(),
        )?;

        let time_index = TimeIndex::new(observations.time_ids.clone());
        let cache = BasisCacheEntry::new(
            observations.row.clone(),
            observations.column.clone(),
            Arc::clone(&design),
        );

        let (n_samples, n_pixels) = observations.shape();
        log::debug!(
            "background estimator ready: {n_samples} time samples, {n_pixels} pixels, {} excluded",
            n_pixels - mask.included_count()
        );

        Ok(Self {
            observations,
            mask,
            design,
            fitted,
            time_index,
            cache,
            axes,
            metadata: MissionMetadata::default(),
        })
    }

    /// Loads observations through `source` and fits them, keeping the source's metadata.
    pub fn from_source<S: ObservationSource + ?Sized>(source: &S) -> Result<Self, EstimatorError> {
        let mut estimator = Self::from_observations(source.load()?)?;
        estimator.metadata = source.metadata();
        Ok(estimator)
    }

    /// Shape of the flux block, `(time samples, pixels)`.
    pub fn shape(&self) -> (usize, usize) {
        self.observations.shape()
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn mask(&self) -> &PixelMask {
        &self.mask
    }

    pub fn design(&self) -> &SparseDesignMatrix {
        &self.design
    }

    pub fn fitted(&self) -> &FittedWeights {
        &self.fitted
    }

    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.fitted.weights()
    }

    pub fn time_ids(&self) -> ArrayView1<'_, i64> {
        self.time_index.ids()
    }

    pub fn axes(&self) -> BasisAxes {
        self.axes
    }

    pub fn metadata(&self) -> &MissionMetadata {
        &self.metadata
    }

    pub fn cache_entry(&self) -> &BasisCacheEntry {
        &self.cache
    }

    /// Background for the first fitted time sample found in `time_ids`.
    ///
    /// Fitted samples are scanned in fit order and the first one whose
    /// identifier appears in `time_ids` is used, so the result always has shape
    /// `(1, n_pixels)` no matter how many identifiers are requested. Use
    /// [`Estimator::model_batch`] for one row per identifier.
    ///
    /// `coords` of `None` evaluates at the fit-time pixels.
    pub fn model(
        &mut self,
        time_ids: &[i64],
        coords: Option<PixelCoordinates<'_>>,
    ) -> Result<Array2<f64>, EstimatorError> {
        let index = self.time_index.first_match(time_ids)?;
        let design = self.design_for(coords)?;
        let coefficients = self.fitted.background_row(index);
        Ok(evaluate(&design, coefficients.view().insert_axis(Axis(0))))
    }

    /// Like [`Estimator::model`] but without the smoothed median profile:
    /// only the deviation of the selected time sample from it.
    pub fn residual_model(
        &mut self,
        time_ids: &[i64],
        coords: Option<PixelCoordinates<'_>>,
    ) -> Result<Array2<f64>, EstimatorError> {
        let index = self.time_index.first_match(time_ids)?;
        let design = self.design_for(coords)?;
        let coefficients = self.fitted.residual_row(index);
        Ok(evaluate(&design, coefficients.insert_axis(Axis(0))))
    }

    /// Background with one row per requested identifier, in request order.
    pub fn model_batch(
        &mut self,
        time_ids: &[i64],
        coords: Option<PixelCoordinates<'_>>,
    ) -> Result<Array2<f64>, EstimatorError> {
        let indices = self.time_index.resolve_all(time_ids)?;
        let design = self.design_for(coords)?;
        let weights = self.fitted.weights().select(Axis(0), &indices);
        let coefficients = &weights + &self.fitted.baseline().insert_axis(Axis(0));
        Ok(evaluate(&design, coefficients.view()))
    }

    /// Background at the fit-time pixels for every fitted time sample, `(T, P)`.
    pub fn model_all(&self) -> Array2<f64> {
        let coefficients = &self.fitted.weights() + &self.fitted.baseline().insert_axis(Axis(0));
        evaluate(&self.design, coefficients.view())
    }

    fn design_for(
        &mut self,
        coords: Option<PixelCoordinates<'_>>,
    ) -> Result<Arc<SparseDesignMatrix>, EstimatorError> {
        let Some(coords) = coords else {
            return Ok(Arc::clone(&self.design));
        };
        if coords.row.len() != coords.column.len() {
            return Err(EstimatorError::ShapeMismatch(format!(
                "prediction row has {} coordinates but column has {}",
                coords.row.len(),
                coords.column.len()
            )));
        }
        if let Some(entry) = self.cache.refreshed(coords, self.axes)? {
            self.cache = entry;
        }
        Ok(Arc::clone(self.cache.design()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grid() -> (Array1<f64>, Array1<f64>) {
        let row = Array1::from_shape_fn(24, |p| 300.0 + (p / 4) as f64);
        let column = Array1::from_shape_fn(24, |p| 500.0 + (p % 4) as f64);
        (row, column)
    }

    fn smooth_estimator() -> Estimator {
        let (row, column) = grid();
        let flux = Array2::from_shape_fn((5, 24), |(t, p)| {
            100.0 + 2.0 * t as f64 + 0.3 * row[p] / 300.0
        });
        Estimator::new(row, column, flux, array![10, 11, 12, 13, 14]).expect("fit should succeed")
    }

    #[test]
    fn shape_reports_flux_dimensions() {
        assert_eq!(smooth_estimator().shape(), (5, 24));
    }

    #[test]
    fn construction_rejects_inconsistent_lengths() {
        let (row, column) = grid();
        let flux = Array2::from_elem((3, 24), 1.0);
        let err = Estimator::new(row.clone(), column.clone(), flux.clone(), array![1, 2])
            .expect_err("time ids too short");
        assert!(matches!(err, EstimatorError::ShapeMismatch(_)));

        let short_row = row.slice(ndarray::s![..20]).to_owned();
        let err = Estimator::new(short_row, column, flux, array![1, 2, 3]).expect_err("short row");
        assert!(matches!(err, EstimatorError::ShapeMismatch(_)));
    }

    #[test]
    fn construction_rejects_non_finite_flux() {
        let (row, column) = grid();
        let mut flux = Array2::from_elem((2, 24), 1.0);
        flux[[1, 3]] = f64::NAN;
        let err = Estimator::new(row, column, flux, array![1, 2]).expect_err("nan flux");
        assert!(matches!(err, EstimatorError::InvalidInput(_)));
    }

    #[test]
    fn unknown_time_sample_is_reported() {
        let mut estimator = smooth_estimator();
        let err = estimator.model(&[99], None).expect_err("unknown id");
        assert!(matches!(err, EstimatorError::UnknownTimeSample { .. }));
        match estimator.model_batch(&[10, 99], None) {
            Err(EstimatorError::UnknownTimeSample { ids }) => assert_eq!(ids, vec![99]),
            other => panic!("expected unknown time sample, got {other:?}"),
        }
    }

    #[test]
    fn failed_lookup_leaves_cache_untouched() {
        let mut estimator = smooth_estimator();
        let row = array![1.0, 2.0];
        let column = array![3.0, 4.0];
        let coords = PixelCoordinates::new(row.view(), column.view());
        let _ = estimator.model(&[99], Some(coords));
        assert_eq!(estimator.cache_entry().row().len(), 24);
    }

    #[test]
    fn residual_and_background_differ_by_the_baseline() {
        let mut estimator = smooth_estimator();
        let full = estimator.model(&[12], None).expect("known id");
        let residual = estimator.residual_model(&[12], None).expect("known id");
        let baseline = estimator
            .design()
            .matrix_vector_multiply(estimator.fitted().baseline());
        for p in 0..24 {
            let expected = residual[[0, p]] + baseline[p];
            assert_abs_diff_eq!(full[[0, p]], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn mismatched_prediction_coordinates_are_rejected() {
        let mut estimator = smooth_estimator();
        let row = array![1.0, 2.0, 3.0];
        let column = array![3.0, 4.0];
        let coords = PixelCoordinates::new(row.view(), column.view());
        let err = estimator
            .model(&[10], Some(coords))
            .expect_err("lengths differ");
        assert!(matches!(err, EstimatorError::ShapeMismatch(_)));
    }
}
