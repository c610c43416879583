//! Expression matrix: dense or compressed sparse, cells × genes.

use ndarray::{Array2, Axis};
use stereo_core::{Result, StereoError};

use crate::sparse::{SparseFormat, SparseMatrix};

/// The primary data matrix, either dense or sparse.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixData {
    /// Dense row-major matrix (n_cells × n_genes).
    Dense(Array2<f64>),
    /// Compressed sparse matrix in CSR or CSC order.
    Sparse(SparseMatrix),
}

impl MatrixData {
    /// (n_rows, n_cols).
    pub fn shape(&self) -> (usize, usize) {
        match self {
            MatrixData::Dense(a) => a.dim(),
            MatrixData::Sparse(s) => s.shape(),
        }
    }

    /// Get a value at (row, col). Out-of-range positions read as 0.0.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            MatrixData::Dense(a) => a.get((row, col)).copied().unwrap_or(0.0),
            MatrixData::Sparse(s) => s.get(row, col),
        }
    }

    /// Whether the matrix is stored sparse.
    pub fn is_sparse(&self) -> bool {
        matches!(self, MatrixData::Sparse(_))
    }

    /// Storage order of a sparse matrix, `None` when dense.
    pub fn sparse_format(&self) -> Option<SparseFormat> {
        match self {
            MatrixData::Dense(_) => None,
            MatrixData::Sparse(s) => Some(s.format()),
        }
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        match self {
            MatrixData::Dense(a) => a.iter().filter(|&&v| v != 0.0).count(),
            MatrixData::Sparse(s) => s.nnz(),
        }
    }

    /// Dense copy of the matrix.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            MatrixData::Dense(a) => a.clone(),
            MatrixData::Sparse(s) => s.to_dense(),
        }
    }

    /// Column-compressed view used for per-gene traversal.
    pub fn to_csc(&self) -> SparseMatrix {
        match self {
            MatrixData::Dense(a) => SparseMatrix::from_dense(SparseFormat::Csc, a),
            MatrixData::Sparse(s) => s.to_format(SparseFormat::Csc),
        }
    }

    /// Subset to the given rows, keeping dense/sparse storage and order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<MatrixData> {
        match self {
            MatrixData::Dense(a) => {
                let n = a.nrows();
                if let Some(&bad) = rows.iter().find(|&&r| r >= n) {
                    return Err(StereoError::InvalidInput(format!(
                        "row index {bad} out of bounds (n_rows={n})"
                    )));
                }
                Ok(MatrixData::Dense(a.select(Axis(0), rows)))
            }
            MatrixData::Sparse(s) => Ok(MatrixData::Sparse(s.select_rows(rows)?)),
        }
    }
}
