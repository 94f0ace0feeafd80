//! Spatial design matrix for the detector background.
//!
//! Every row of the design matrix corresponds to one pixel. Column 0 is a
//! constant intercept; the remaining columns are the clamped cubic B-spline
//! functions (with intercept) over a fixed set of interior knots along the
//! detector row axis.

use crate::matrix::SparseDesignMatrix;
use crate::types::BasisAxes;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::OnceLock;
use thiserror::Error;

/// Polynomial degree of the spatial splines.
pub const SPLINE_DEGREE: usize = 3;

/// First and last points of the evenly spaced partition the interior knots are taken from.
pub const KNOT_PARTITION_RANGE: (f64, f64) = (20.0, 1108.0);

/// Number of points in the partition. Its two end points are dropped.
pub const KNOT_PARTITION_POINTS: usize = 42;

/// Number of interior knots actually placed.
pub const INTERIOR_KNOT_COUNT: usize = KNOT_PARTITION_POINTS - 2;

/// Sentinel coordinates that anchor the spline domain.
pub const DOMAIN_SENTINELS: (f64, f64) = (0.0, 1400.0);

/// Number of B-spline functions (intercept included) over the fixed knots.
pub const SPLINE_BASIS_COUNT: usize = INTERIOR_KNOT_COUNT + SPLINE_DEGREE + 1;

/// Total design-matrix width: the constant column followed by the splines.
pub const DESIGN_COLUMNS: usize = SPLINE_BASIS_COUNT + 1;

/// Column index of the constant intercept term.
pub const INTERCEPT_COLUMN: usize = 0;

const PAR_THRESHOLD: usize = 256;
const CHUNK_SIZE: usize = 1024;
const ENTRIES_PER_ROW: usize = SPLINE_DEGREE + 2;

fn bspline_thread_pool() -> &'static ThreadPool {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .build()
            .expect("bspline thread pool initialization should succeed")
    })
}

#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "The knot vector is invalid: {0}. It must be non-decreasing and contain only finite values."
    )]
    InvalidKnotVector(String),

    #[error("Failed to build sparse basis matrix: {0}")]
    SparseCreation(String),
}

/// The fixed interior knots, computed once per process.
pub fn interior_knots() -> &'static Array1<f64> {
    static KNOTS: OnceLock<Array1<f64>> = OnceLock::new();
    KNOTS.get_or_init(|| {
        let (start, end) = KNOT_PARTITION_RANGE;
        let partition = Array1::linspace(start, end, KNOT_PARTITION_POINTS);
        partition
            .slice(ndarray::s![1..KNOT_PARTITION_POINTS - 1])
            .to_owned()
    })
}

/// Boundary knots for a coordinate set once the domain sentinels are appended.
pub fn padded_domain(x: ArrayView1<f64>) -> (f64, f64) {
    let (mut lower, mut upper) = DOMAIN_SENTINELS;
    for &v in x.iter() {
        lower = lower.min(v);
        upper = upper.max(v);
    }
    (lower, upper)
}

/// Clamped knot vector: each boundary repeated `degree + 1` times around the interior knots.
pub fn clamped_knot_vector(
    domain: (f64, f64),
    interior: ArrayView1<f64>,
    degree: usize,
) -> Result<Array1<f64>, BasisError> {
    let (lower, upper) = domain;
    let mut knots = Vec::with_capacity(interior.len() + 2 * (degree + 1));
    knots.extend(std::iter::repeat_n(lower, degree + 1));
    knots.extend(interior.iter().copied());
    knots.extend(std::iter::repeat_n(upper, degree + 1));

    if knots.iter().any(|k| !k.is_finite()) {
        return Err(BasisError::InvalidKnotVector(
            "knot vector contains non-finite (NaN or Infinity) values".to_string(),
        ));
    }
    if knots.windows(2).any(|w| w[0] > w[1]) {
        return Err(BasisError::InvalidKnotVector(
            "knot vector is not non-decreasing".to_string(),
        ));
    }
    Ok(Array1::from_vec(knots))
}

/// Builds the `n x DESIGN_COLUMNS` design matrix for pixels at (`row`, `column`).
///
/// Only `BasisAxes::Row` exists: the column coordinate is length-checked but
/// does not influence the result. Coordinates outside the sentinel domain
/// widen the clamped boundary instead of failing, exactly as if the sentinels
/// and the data had been evaluated together.
pub fn build_design_matrix(
    row: ArrayView1<f64>,
    column: ArrayView1<f64>,
    axes: BasisAxes,
) -> Result<SparseDesignMatrix, BasisError> {
    if row.len() != column.len() {
        return Err(BasisError::DimensionMismatch(format!(
            "row has {} coordinates but column has {}",
            row.len(),
            column.len()
        )));
    }
    if let Some(bad) = row.iter().chain(column.iter()).find(|v| !v.is_finite()) {
        return Err(BasisError::InvalidInput(format!(
            "pixel coordinates must be finite, found {bad}"
        )));
    }

    let spatial = match axes {
        BasisAxes::Row => row,
    };
    let knots = clamped_knot_vector(
        padded_domain(spatial),
        interior_knots().view(),
        SPLINE_DEGREE,
    )?;
    assemble(spatial, knots.view())
}

fn push_row_entries(
    row_i: usize,
    x: f64,
    knots: ArrayView1<f64>,
    scratch: &mut internal::BsplineScratch,
    values: &mut [f64],
    out: &mut Vec<Triplet<usize, usize, f64>>,
) {
    out.push(Triplet::new(row_i, INTERCEPT_COLUMN, 1.0));
    let first = internal::evaluate_splines_sparse_into(x, SPLINE_DEGREE, knots, values, scratch);
    for (offset, &v) in values.iter().enumerate() {
        if v == 0.0 {
            continue;
        }
        let spline_j = first + offset;
        if spline_j < SPLINE_BASIS_COUNT {
            out.push(Triplet::new(row_i, INTERCEPT_COLUMN + 1 + spline_j, v));
        }
    }
}

/// Triplets for consecutive pixels starting at design row `first_row`.
fn collect_triplets<'a>(
    first_row: usize,
    xs: impl ExactSizeIterator<Item = &'a f64>,
    knots: ArrayView1<f64>,
) -> Vec<Triplet<usize, usize, f64>> {
    let mut scratch = internal::BsplineScratch::new(SPLINE_DEGREE);
    let mut values = vec![0.0; SPLINE_DEGREE + 1];
    let mut triplets = Vec::with_capacity(xs.len() * ENTRIES_PER_ROW);
    for (offset, &x) in xs.enumerate() {
        let row_i = first_row + offset;
        push_row_entries(row_i, x, knots, &mut scratch, &mut values, &mut triplets);
    }
    triplets
}

fn parallel_triplets(data: &[f64], knots: ArrayView1<f64>) -> Vec<Triplet<usize, usize, f64>> {
    let chunks: Vec<Vec<Triplet<usize, usize, f64>>> = bspline_thread_pool().install(|| {
        data.par_chunks(CHUNK_SIZE)
            .enumerate()
            .map(|(i, chunk)| collect_triplets(i * CHUNK_SIZE, chunk.iter(), knots))
            .collect()
    });
    chunks.into_iter().flatten().collect()
}

fn assemble(
    data: ArrayView1<f64>,
    knots: ArrayView1<f64>,
) -> Result<SparseDesignMatrix, BasisError> {
    let nrows = data.len();
    let triplets = match data.as_slice() {
        Some(slice) if nrows >= PAR_THRESHOLD => parallel_triplets(slice, knots),
        _ => collect_triplets(0, data.iter(), knots),
    };

    let matrix = SparseColMat::try_new_from_triplets(nrows, DESIGN_COLUMNS, &triplets)
        .map_err(|err| BasisError::SparseCreation(format!("{err:?}")))?;
    Ok(SparseDesignMatrix::new(matrix))
}

pub(crate) mod internal {
    use ndarray::ArrayView1;

    /// Reusable buffers for one Cox-de Boor evaluation.
    #[derive(Clone, Debug)]
    pub struct BsplineScratch {
        left: Vec<f64>,
        right: Vec<f64>,
        n: Vec<f64>,
    }

    impl BsplineScratch {
        #[inline]
        pub fn new(degree: usize) -> Self {
            let len = degree + 1;
            Self {
                left: vec![0.0; len],
                right: vec![0.0; len],
                n: vec![0.0; len],
            }
        }
    }

    /// Evaluates the `degree + 1` non-zero B-splines at `x` (Piegl and Tiller, A2.2)
    /// and returns the index of the first one.
    ///
    /// Points outside the clamped knot range use the nearest boundary span, so
    /// the boundary polynomial is extrapolated rather than zeroed.
    #[inline]
    pub fn evaluate_splines_sparse_into(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
        values: &mut [f64],
        scratch: &mut BsplineScratch,
    ) -> usize {
        let num_basis = knots.len() - degree - 1;
        debug_assert_eq!(values.len(), degree + 1);

        scratch.n.fill(0.0);
        scratch.left.fill(0.0);
        scratch.right.fill(0.0);

        let mu = if x >= knots[num_basis] {
            num_basis - 1
        } else if x < knots[degree] {
            degree
        } else {
            let mut span = degree;
            while span < num_basis && x >= knots[span + 1] {
                span += 1;
            }
            span
        };

        let left = &mut scratch.left;
        let right = &mut scratch.right;
        let n = &mut scratch.n;

        n[0] = 1.0;
        for d in 1..=degree {
            left[d] = x - knots[mu + 1 - d];
            right[d] = knots[mu + d] - x;

            let mut saved = 0.0;
            for r in 0..d {
                let den = right[r + 1] + left[d - r];
                let temp = if den.abs() > 1e-12 { n[r] / den } else { 0.0 };
                n[r] = saved + right[r + 1] * temp;
                saved = left[d - r] * temp;
            }
            n[d] = saved;
        }

        values.copy_from_slice(&n[..=degree]);
        mu - degree
    }
}
