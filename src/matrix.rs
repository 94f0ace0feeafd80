use faer::sparse::SparseColMat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

/// Column-compressed design matrix with a lazily materialized dense copy.
#[derive(Clone)]
pub struct SparseDesignMatrix {
    matrix: SparseColMat<usize, f64>,
    dense_cache: Arc<OnceLock<Arc<Array2<f64>>>>,
}

impl SparseDesignMatrix {
    pub fn new(matrix: SparseColMat<usize, f64>) -> Self {
        Self {
            matrix,
            dense_cache: Arc::new(OnceLock::new()),
        }
    }

    pub fn to_dense_arc(&self) -> Arc<Array2<f64>> {
        self.dense_cache
            .get_or_init(|| {
                let mut out = Array2::<f64>::zeros((self.matrix.nrows(), self.matrix.ncols()));
                self.for_each_entry(|row, col, value| out[[row, col]] = value);
                Arc::new(out)
            })
            .clone()
    }

    /// Visits every stored entry as `(row, col, value)`, column by column.
    fn for_each_entry<F>(&self, mut visit: F)
    where
        F: FnMut(usize, usize, f64),
    {
        let (symbolic, values) = self.matrix.parts();
        let col_ptr = symbolic.col_ptr();
        let row_idx = symbolic.row_idx();
        for col in 0..self.matrix.ncols() {
            for idx in col_ptr[col]..col_ptr[col + 1] {
                visit(row_idx[idx], col, values[idx]);
            }
        }
    }

    /// Stored entries grouped by row, each row ordered by column.
    pub fn row_entries(&self) -> Vec<Vec<(usize, f64)>> {
        let mut rows = vec![Vec::new(); self.matrix.nrows()];
        self.for_each_entry(|row, col, value| rows[row].push((col, value)));
        rows
    }

    pub fn matrix_vector_multiply(&self, vector: ArrayView1<f64>) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.matrix.nrows());
        self.for_each_entry(|row, col, value| output[row] += value * vector[col]);
        output
    }

    /// `A_m^T A_m` where `A_m` keeps only the rows flagged in `row_mask`.
    pub fn masked_gram(&self, row_mask: &[bool]) -> Array2<f64> {
        let p = self.matrix.ncols();
        let mut gram = Array2::<f64>::zeros((p, p));
        for (row, entries) in self.row_entries().iter().enumerate() {
            if !row_mask[row] {
                continue;
            }
            for &(j, vj) in entries {
                for &(k, vk) in entries {
                    gram[[j, k]] += vj * vk;
                }
            }
        }
        gram
    }

    /// `A_m^T R_m` for a right-hand block `rhs` whose rows are aligned with the rows of `A`.
    pub fn masked_transpose_multiply(
        &self,
        row_mask: &[bool],
        rhs: ArrayView2<f64>,
    ) -> Array2<f64> {
        let mut output = Array2::<f64>::zeros((self.matrix.ncols(), rhs.ncols()));
        self.for_each_entry(|row, col, value| {
            if row_mask[row] {
                output.row_mut(col).scaled_add(value, &rhs.row(row));
            }
        });
        output
    }
}

impl Deref for SparseDesignMatrix {
    type Target = SparseColMat<usize, f64>;
    fn deref(&self) -> &Self::Target {
        &self.matrix
    }
}

impl AsRef<SparseColMat<usize, f64>> for SparseDesignMatrix {
    fn as_ref(&self) -> &SparseColMat<usize, f64> {
        &self.matrix
    }
}

impl fmt::Debug for SparseDesignMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseDesignMatrix")
            .field("nrows", &self.matrix.nrows())
            .field("ncols", &self.matrix.ncols())
            .finish()
    }
}

impl From<SparseColMat<usize, f64>> for SparseDesignMatrix {
    fn from(value: SparseColMat<usize, f64>) -> Self {
        Self::new(value)
    }
}
