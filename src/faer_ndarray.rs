use faer::linalg::solvers::{self, Solve};
pub use faer::linalg::solvers::{Ldlt as FaerLdlt, Llt as FaerLlt};
use faer::{MatMut, MatRef, Side};
use ndarray::{Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
    #[error("Matrix must be square with {expected} rows, got {rows}x{cols}")]
    Shape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
}

pub enum FaerSymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl FaerSymmetricFactor {
    #[inline]
    pub fn solve_in_place(&self, rhs: MatMut<'_, f64>) {
        match self {
            FaerSymmetricFactor::Llt(f) => f.solve_in_place(rhs),
            FaerSymmetricFactor::Ldlt(f) => f.solve_in_place(rhs),
        }
    }

    pub fn is_cholesky(&self) -> bool {
        matches!(self, FaerSymmetricFactor::Llt(_))
    }
}

/// Factorize a symmetric system with an LLT first attempt and LDLT fallback.
#[inline]
pub fn factorize_symmetric_with_fallback(
    matrix: MatRef<'_, f64>,
    side: Side,
) -> Result<FaerSymmetricFactor, FaerLinalgError> {
    if let Ok(llt) = FaerLlt::new(matrix, side) {
        return Ok(FaerSymmetricFactor::Llt(llt));
    }
    log::warn!(
        "Cholesky factorization of {}x{} system failed; retrying with LDLT",
        matrix.nrows(),
        matrix.ncols()
    );
    let ldlt = FaerLdlt::new(matrix, side).map_err(FaerLinalgError::Ldlt)?;
    Ok(FaerSymmetricFactor::Ldlt(ldlt))
}

/// Solve `lhs * X = rhs` for every column of `rhs` at once, overwriting `rhs` with `X`.
///
/// `lhs` must be symmetric; only its lower triangle is read. The factorization
/// is computed a single time and applied to all right-hand-side columns.
pub fn solve_symmetric_in_place<S: Data<Elem = f64>>(
    lhs: &ArrayBase<S, Ix2>,
    rhs: &mut Array2<f64>,
) -> Result<FaerSymmetricFactor, FaerLinalgError> {
    let (rows, cols) = lhs.dim();
    if rows != cols || rows != rhs.nrows() {
        return Err(FaerLinalgError::Shape {
            expected: rhs.nrows(),
            rows,
            cols,
        });
    }
    let lhs_view = FaerArrayView::new(lhs);
    let factor = factorize_symmetric_with_fallback(lhs_view.as_ref(), Side::Lower)?;
    let mut rhs_view = array2_to_mat_mut(rhs);
    factor.solve_in_place(rhs_view.as_mut());
    Ok(factor)
}

#[inline]
pub fn array2_to_mat_mut(array: &mut Array2<f64>) -> MatMut<'_, f64> {
    let (rows, cols) = array.dim();
    let strides = array.strides();
    let s0 = strides[0];
    let s1 = strides[1];

    // SAFETY: an owned Array2 has non-negative strides and the dimensions and
    // strides below are exactly those ndarray reports for its buffer.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), rows, cols, s0, s1) }
}

pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides can alias; materialize a compact copy for those.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }

        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: pointer/shape/strides either come directly from a live ndarray
        // view with positive strides, or from an owned compact copy stored inside
        // this wrapper, which guarantees validity for the returned view lifetime.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}
