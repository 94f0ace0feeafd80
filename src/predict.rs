use crate::basis::{BasisError, build_design_matrix};
use crate::estimator::EstimatorError;
use crate::matrix::SparseDesignMatrix;
use crate::types::BasisAxes;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::collections::HashMap;
use std::sync::Arc;

/// Borrowed pixel coordinates for a prediction request.
#[derive(Debug, Clone, Copy)]
pub struct PixelCoordinates<'a> {
    pub row: ArrayView1<'a, f64>,
    pub column: ArrayView1<'a, f64>,
}

impl<'a> PixelCoordinates<'a> {
    pub fn new(row: ArrayView1<'a, f64>, column: ArrayView1<'a, f64>) -> Self {
        Self { row, column }
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }
}

/// Coordinates together with the design matrix built from them.
///
/// Entries are never edited; a request for different coordinates produces a
/// new entry that replaces the old one as a whole.
#[derive(Debug, Clone)]
pub struct BasisCacheEntry {
    row: Array1<f64>,
    column: Array1<f64>,
    design: Arc<SparseDesignMatrix>,
}

impl BasisCacheEntry {
    pub fn new(row: Array1<f64>, column: Array1<f64>, design: Arc<SparseDesignMatrix>) -> Self {
        Self {
            row,
            column,
            design,
        }
    }

    pub fn build(coords: PixelCoordinates<'_>, axes: BasisAxes) -> Result<Self, BasisError> {
        let design = build_design_matrix(coords.row, coords.column, axes)?;
        Ok(Self::new(
            coords.row.to_owned(),
            coords.column.to_owned(),
            Arc::new(design),
        ))
    }

    pub fn row(&self) -> ArrayView1<'_, f64> {
        self.row.view()
    }

    pub fn column(&self) -> ArrayView1<'_, f64> {
        self.column.view()
    }

    pub fn design(&self) -> &Arc<SparseDesignMatrix> {
        &self.design
    }

    /// True when `coords` equals the cached coordinates element for element.
    pub fn matches(&self, coords: PixelCoordinates<'_>) -> bool {
        self.row.view() == coords.row && self.column.view() == coords.column
    }

    /// A replacement entry when `coords` differ from this one, `None` on a hit.
    pub fn refreshed(
        &self,
        coords: PixelCoordinates<'_>,
        axes: BasisAxes,
    ) -> Result<Option<Self>, BasisError> {
        if self.matches(coords) {
            return Ok(None);
        }
        log::debug!(
            "prediction coordinates changed ({} -> {} pixels); rebuilding basis",
            self.row.len(),
            coords.len()
        );
        Self::build(coords, axes).map(Some)
    }
}

/// Lookup from time-sample identifier to its row in the fitted weights.
#[derive(Debug, Clone)]
pub struct TimeIndex {
    ids: Array1<i64>,
    first_row: HashMap<i64, usize>,
}

impl TimeIndex {
    pub fn new(ids: Array1<i64>) -> Self {
        let mut first_row = HashMap::with_capacity(ids.len());
        for (row, &id) in ids.iter().enumerate() {
            first_row.entry(id).or_insert(row);
        }
        Self { ids, first_row }
    }

    pub fn ids(&self) -> ArrayView1<'_, i64> {
        self.ids.view()
    }

    pub fn position(&self, id: i64) -> Option<usize> {
        self.first_row.get(&id).copied()
    }

    /// Earliest fitted row whose identifier appears anywhere in `requested`.
    pub fn first_match(&self, requested: &[i64]) -> Result<usize, EstimatorError> {
        requested
            .iter()
            .filter_map(|&id| self.position(id))
            .min()
            .ok_or_else(|| EstimatorError::UnknownTimeSample {
                ids: requested.to_vec(),
            })
    }

    /// Fitted row of every requested identifier, in request order.
    pub fn resolve_all(&self, requested: &[i64]) -> Result<Vec<usize>, EstimatorError> {
        let missing: Vec<i64> = requested
            .iter()
            .copied()
            .filter(|&id| self.position(id).is_none())
            .collect();
        if !missing.is_empty() || requested.is_empty() {
            return Err(EstimatorError::UnknownTimeSample { ids: missing });
        }
        let rows = requested.iter().filter_map(|&id| self.position(id));
        Ok(rows.collect())
    }
}

/// Evaluates `design * c` for every coefficient row `c`, one output row each.
pub fn evaluate(design: &SparseDesignMatrix, coefficients: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((coefficients.nrows(), design.nrows()));
    for (mut target, coeffs) in out.rows_mut().into_iter().zip(coefficients.rows()) {
        target.assign(&design.matrix_vector_multiply(coeffs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn first_match_follows_fitted_order() {
        let index = TimeIndex::new(array![10, 11, 12, 13]);
        assert_eq!(index.first_match(&[13, 11]).expect("both known"), 1);
        assert_eq!(index.first_match(&[99, 12]).expect("12 is known"), 2);
        assert!(matches!(
            index.first_match(&[99]),
            Err(EstimatorError::UnknownTimeSample { .. })
        ));
        assert!(index.first_match(&[]).is_err());
    }

    #[test]
    fn resolve_all_keeps_request_order_and_reports_missing() {
        let index = TimeIndex::new(array![5, 6, 7]);
        let rows = index.resolve_all(&[7, 5, 7]).expect("known");
        assert_eq!(rows, vec![2, 0, 2]);
        match index.resolve_all(&[5, 8, 9]) {
            Err(EstimatorError::UnknownTimeSample { ids }) => assert_eq!(ids, vec![8, 9]),
            other => panic!("expected unknown time sample, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_resolve_to_first_row() {
        let index = TimeIndex::new(array![3, 4, 3]);
        assert_eq!(index.position(3), Some(0));
    }

    #[test]
    fn cache_entry_hits_on_equal_coordinates_only() {
        let row = array![10.0, 20.0, 30.0];
        let column = array![1.0, 2.0, 3.0];
        let coords = PixelCoordinates::new(row.view(), column.view());
        let entry = BasisCacheEntry::build(coords, BasisAxes::Row).expect("basis should build");

        let hit = entry
            .refreshed(coords, BasisAxes::Row)
            .expect("no rebuild needed");
        assert!(hit.is_none());

        let moved_column = array![1.0, 2.0, 4.0];
        let moved = PixelCoordinates::new(row.view(), moved_column.view());
        let miss = entry
            .refreshed(moved, BasisAxes::Row)
            .expect("rebuild should succeed")
            .expect("column changed");
        assert_eq!(miss.column(), moved_column.view());

        let shorter = array![10.0, 20.0];
        let shorter_column = array![1.0, 2.0];
        let shrunk = PixelCoordinates::new(shorter.view(), shorter_column.view());
        let miss = entry
            .refreshed(shrunk, BasisAxes::Row)
            .expect("rebuild should succeed")
            .expect("length changed");
        assert_eq!(miss.design().nrows(), 2);
    }

    #[test]
    fn evaluate_produces_one_row_per_coefficient_vector() {
        let row = array![100.0, 200.0, 300.0, 400.0];
        let coords = PixelCoordinates::new(row.view(), row.view());
        let entry = BasisCacheEntry::build(coords, BasisAxes::Row).expect("basis should build");
        let mut coefficients = Array2::<f64>::zeros((2, entry.design().ncols()));
        coefficients[[0, 0]] = 2.5;
        coefficients[[1, 0]] = -1.0;
        let out = evaluate(entry.design(), coefficients.view());
        assert_eq!(out.dim(), (2, 4));
        assert!(out.row(0).iter().all(|&v| v == 2.5));
        assert!(out.row(1).iter().all(|&v| v == -1.0));
    }
}
