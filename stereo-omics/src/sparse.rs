//! Compressed sparse matrices in row (CSR) or column (CSC) order.
//!
//! [`SparseMatrix`] keeps the three constituent arrays of a compressed matrix
//! (`data`, `indices`, `indptr`) together with its logical shape and an
//! explicit [`SparseFormat`]. The storage order is part of the value: a matrix
//! written as CSC comes back as CSC, with its arrays untouched.
//!
//! For a CSR matrix the *major* axis is rows and `indices` holds column
//! numbers; for CSC the roles are swapped.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use stereo_core::{Result, StereoError, Summarizable};

/// Storage order of a compressed sparse matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SparseFormat {
    /// Compressed sparse row.
    Csr,
    /// Compressed sparse column.
    Csc,
}

impl SparseFormat {
    /// Short tag, `"csr"` or `"csc"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SparseFormat::Csr => "csr",
            SparseFormat::Csc => "csc",
        }
    }

    /// Encoding tag written next to the arrays on disk.
    pub fn encoding_type(&self) -> &'static str {
        match self {
            SparseFormat::Csr => "csr_matrix",
            SparseFormat::Csc => "csc_matrix",
        }
    }

    /// Inverse of [`SparseFormat::encoding_type`].
    pub fn from_encoding_type(tag: &str) -> Option<Self> {
        match tag {
            "csr_matrix" => Some(SparseFormat::Csr),
            "csc_matrix" => Some(SparseFormat::Csc),
            _ => None,
        }
    }
}

impl fmt::Display for SparseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SparseFormat {
    type Err = StereoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "csr" => Ok(SparseFormat::Csr),
            "csc" => Ok(SparseFormat::Csc),
            other => Err(StereoError::Parse(format!(
                "unknown sparse format '{other}', expected 'csr' or 'csc'"
            ))),
        }
    }
}

/// A compressed sparse matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    format: SparseFormat,
    data: Vec<f64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
    n_rows: usize,
    n_cols: usize,
}

impl SparseMatrix {
    /// Create an empty sparse matrix with the given dimensions.
    pub fn new(format: SparseFormat, n_rows: usize, n_cols: usize) -> Self {
        let major = match format {
            SparseFormat::Csr => n_rows,
            SparseFormat::Csc => n_cols,
        };
        Self {
            format,
            data: Vec::new(),
            indices: Vec::new(),
            indptr: vec![0; major + 1],
            n_rows,
            n_cols,
        }
    }

    /// Assemble a matrix from its compressed arrays.
    ///
    /// - `data`: stored values
    /// - `indices`: minor-axis index for each value
    /// - `indptr`: major-axis pointer array (length `major + 1`)
    ///
    /// An empty `indptr` is accepted when the major dimension is zero.
    pub fn from_parts(
        format: SparseFormat,
        data: Vec<f64>,
        indices: Vec<usize>,
        mut indptr: Vec<usize>,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<Self> {
        let (major, minor) = match format {
            SparseFormat::Csr => (n_rows, n_cols),
            SparseFormat::Csc => (n_cols, n_rows),
        };
        if data.len() != indices.len() {
            return Err(StereoError::InvalidInput(format!(
                "{format} data ({}) and indices ({}) must have the same length",
                data.len(),
                indices.len()
            )));
        }
        if indptr.is_empty() && major == 0 {
            indptr.push(0);
        }
        if indptr.len() != major + 1 {
            return Err(StereoError::InvalidInput(format!(
                "{format} indptr length ({}) must be {} + 1",
                indptr.len(),
                major
            )));
        }
        if indptr[0] != 0 || indptr[major] != data.len() {
            return Err(StereoError::InvalidInput(format!(
                "{format} indptr must start at 0 and end at nnz ({})",
                data.len()
            )));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(StereoError::InvalidInput(format!(
                "{format} indptr must be non-decreasing"
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= minor) {
            return Err(StereoError::InvalidInput(format!(
                "{format} index {bad} out of bounds for minor dimension {minor}"
            )));
        }
        Ok(Self {
            format,
            data,
            indices,
            indptr,
            n_rows,
            n_cols,
        })
    }

    /// Create a sparse matrix from `(row, col, value)` triplets.
    ///
    /// All three vectors must have the same length, and all indices must be
    /// within bounds. Entries are ordered by major then minor index.
    pub fn from_triplets(
        format: SparseFormat,
        rows: Vec<usize>,
        cols: Vec<usize>,
        values: Vec<f64>,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<Self> {
        if rows.len() != cols.len() || cols.len() != values.len() {
            return Err(StereoError::InvalidInput(
                "rows, cols, and values must have the same length".into(),
            ));
        }
        for (i, (&r, &c)) in rows.iter().zip(cols.iter()).enumerate() {
            if r >= n_rows || c >= n_cols {
                return Err(StereoError::InvalidInput(format!(
                    "triplet {i} index ({r}, {c}) out of bounds for ({n_rows}, {n_cols})"
                )));
            }
        }

        let (major_of, minor_of): (&[usize], &[usize]) = match format {
            SparseFormat::Csr => (&rows, &cols),
            SparseFormat::Csc => (&cols, &rows),
        };
        let major = match format {
            SparseFormat::Csr => n_rows,
            SparseFormat::Csc => n_cols,
        };

        let nnz = values.len();
        let mut order: Vec<usize> = (0..nnz).collect();
        order.sort_by_key(|&i| (major_of[i], minor_of[i]));

        let mut data = Vec::with_capacity(nnz);
        let mut indices = Vec::with_capacity(nnz);
        let mut indptr = vec![0usize; major + 1];
        for &i in &order {
            data.push(values[i]);
            indices.push(minor_of[i]);
            indptr[major_of[i] + 1] += 1;
        }
        for i in 1..=major {
            indptr[i] += indptr[i - 1];
        }

        Ok(Self {
            format,
            data,
            indices,
            indptr,
            n_rows,
            n_cols,
        })
    }

    /// Create a sparse matrix from dense data, storing only non-zero values.
    pub fn from_dense(format: SparseFormat, dense: &Array2<f64>) -> Self {
        let (n_rows, n_cols) = dense.dim();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for ((r, c), &v) in dense.indexed_iter() {
            if v != 0.0 {
                rows.push(r);
                cols.push(c);
                values.push(v);
            }
        }
        // Indices come from the array itself, so they are always in bounds.
        Self::from_triplets(format, rows, cols, values, n_rows, n_cols)
            .unwrap_or_else(|_| Self::new(format, n_rows, n_cols))
    }

    /// Storage order.
    pub fn format(&self) -> SparseFormat {
        self.format
    }

    /// (n_rows, n_cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Fraction of entries that are stored: `nnz / (n_rows * n_cols)`.
    pub fn density(&self) -> f64 {
        let total = self.n_rows as f64 * self.n_cols as f64;
        if total == 0.0 {
            return 0.0;
        }
        self.data.len() as f64 / total
    }

    /// Stored values.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Minor-axis index of each stored value.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Major-axis pointer array.
    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// Length of the major axis (rows for CSR, columns for CSC).
    pub fn major_len(&self) -> usize {
        self.indptr.len() - 1
    }

    /// Minor indices and values stored along major position `i`.
    pub fn major_slice(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.indptr[i]..self.indptr[i + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    /// Get the value at `(row, col)`. Returns 0.0 if no entry is stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.n_rows || col >= self.n_cols {
            return 0.0;
        }
        let (major, minor) = match self.format {
            SparseFormat::Csr => (row, col),
            SparseFormat::Csc => (col, row),
        };
        let (idx, vals) = self.major_slice(major);
        idx.iter()
            .position(|&m| m == minor)
            .map_or(0.0, |p| vals[p])
    }

    /// Iterate over stored triplets `(row, col, value)` in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.major_len()).flat_map(move |major| {
            let (idx, vals) = self.major_slice(major);
            idx.iter().zip(vals.iter()).map(move |(&minor, &v)| match self.format {
                SparseFormat::Csr => (major, minor, v),
                SparseFormat::Csc => (minor, major, v),
            })
        })
    }

    /// Convert to a dense array.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.n_rows, self.n_cols));
        for (r, c, v) in self.iter() {
            dense[[r, c]] = v;
        }
        dense
    }

    /// Re-encode in the given storage order.
    pub fn to_format(&self, format: SparseFormat) -> SparseMatrix {
        if format == self.format {
            return self.clone();
        }
        let mut rows = Vec::with_capacity(self.nnz());
        let mut cols = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        for (r, c, v) in self.iter() {
            rows.push(r);
            cols.push(c);
            values.push(v);
        }
        Self::from_triplets(format, rows, cols, values, self.n_rows, self.n_cols)
            .unwrap_or_else(|_| Self::new(format, self.n_rows, self.n_cols))
    }

    /// Subset to the given rows, in the given order, keeping the storage order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<SparseMatrix> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(StereoError::InvalidInput(format!(
                "row index {bad} out of bounds (n_rows={})",
                self.n_rows
            )));
        }
        let mut targets: Vec<Vec<usize>> = vec![Vec::new(); self.n_rows];
        for (new_row, &old_row) in rows.iter().enumerate() {
            targets[old_row].push(new_row);
        }

        let mut new_rows = Vec::new();
        let mut new_cols = Vec::new();
        let mut values = Vec::new();
        for (r, c, v) in self.iter() {
            for &nr in &targets[r] {
                new_rows.push(nr);
                new_cols.push(c);
                values.push(v);
            }
        }
        Self::from_triplets(
            self.format,
            new_rows,
            new_cols,
            values,
            rows.len(),
            self.n_cols,
        )
    }

    /// Decompose into `(data, indices, indptr)`.
    pub fn into_parts(self) -> (Vec<f64>, Vec<usize>, Vec<usize>) {
        (self.data, self.indices, self.indptr)
    }
}

impl Summarizable for SparseMatrix {
    fn summary(&self) -> String {
        format!(
            "SparseMatrix ({}): {}\u{00d7}{}, {} nonzeros ({:.2}% density)",
            self.format,
            self.n_rows,
            self.n_cols,
            self.nnz(),
            self.density() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample(format: SparseFormat) -> SparseMatrix {
        SparseMatrix::from_triplets(
            format,
            vec![0, 0, 1, 2, 2],
            vec![0, 2, 1, 0, 2],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            3,
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_new_empty() {
        let m = SparseMatrix::new(SparseFormat::Csr, 10, 20);
        assert_eq!(m.shape(), (10, 20));
        assert_eq!(m.nnz(), 0);
        assert_eq!(m.indptr().len(), 11);
        assert_eq!(m.density(), 0.0);

        let m = SparseMatrix::new(SparseFormat::Csc, 10, 20);
        assert_eq!(m.indptr().len(), 21);
    }

    #[test]
    fn test_csr_layout() {
        let m = sample(SparseFormat::Csr);
        assert_eq!(m.data(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(m.indices(), &[0, 2, 1, 0, 2]);
        assert_eq!(m.indptr(), &[0, 2, 3, 5]);
    }

    #[test]
    fn test_csc_layout() {
        let m = sample(SparseFormat::Csc);
        assert_eq!(m.data(), &[1.0, 4.0, 3.0, 2.0, 5.0]);
        assert_eq!(m.indices(), &[0, 2, 1, 0, 2]);
        assert_eq!(m.indptr(), &[0, 2, 3, 5]);
        assert_eq!(m.get(2, 0), 4.0);
        assert_eq!(m.get(1, 0), 0.0);
    }

    #[test]
    fn test_from_triplets_bounds_check() {
        let result =
            SparseMatrix::from_triplets(SparseFormat::Csr, vec![5], vec![0], vec![1.0], 3, 3);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_triplets_length_mismatch() {
        let result =
            SparseMatrix::from_triplets(SparseFormat::Csr, vec![0, 1], vec![0], vec![1.0], 3, 3);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_parts_validation() {
        // indptr too short
        assert!(SparseMatrix::from_parts(
            SparseFormat::Csr,
            vec![1.0],
            vec![0],
            vec![0, 1],
            2,
            2
        )
        .is_err());
        // index out of bounds
        assert!(SparseMatrix::from_parts(
            SparseFormat::Csr,
            vec![1.0],
            vec![5],
            vec![0, 1, 1],
            2,
            2
        )
        .is_err());
        // indptr does not end at nnz
        assert!(SparseMatrix::from_parts(
            SparseFormat::Csc,
            vec![1.0, 2.0],
            vec![0, 1],
            vec![0, 1, 1],
            2,
            2
        )
        .is_err());
    }

    #[test]
    fn test_from_parts_zero_major() {
        let m = SparseMatrix::from_parts(SparseFormat::Csr, vec![], vec![], vec![], 0, 4).unwrap();
        assert_eq!(m.shape(), (0, 4));
        assert_eq!(m.indptr(), &[0]);
    }

    #[test]
    fn test_to_dense_and_back() {
        let m = sample(SparseFormat::Csr);
        let dense = m.to_dense();
        assert_eq!(
            dense,
            array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0], [4.0, 0.0, 5.0]]
        );
        let back = SparseMatrix::from_dense(SparseFormat::Csr, &dense);
        assert_eq!(back, m);
    }

    #[test]
    fn test_to_format() {
        let csr = sample(SparseFormat::Csr);
        let csc = csr.to_format(SparseFormat::Csc);
        assert_eq!(csc, sample(SparseFormat::Csc));
        assert_eq!(csc.to_format(SparseFormat::Csr), csr);
    }

    #[test]
    fn test_select_rows() {
        let m = sample(SparseFormat::Csc);
        let sub = m.select_rows(&[2, 0]).unwrap();
        assert_eq!(sub.format(), SparseFormat::Csc);
        assert_eq!(sub.shape(), (2, 3));
        assert_eq!(sub.to_dense(), array![[4.0, 0.0, 5.0], [1.0, 0.0, 2.0]]);
        assert!(m.select_rows(&[3]).is_err());
    }

    #[test]
    fn test_iter_storage_order() {
        let m = sample(SparseFormat::Csc);
        let first: Vec<_> = m.iter().take(2).collect();
        assert_eq!(first, vec![(0, 0, 1.0), (2, 0, 4.0)]);
    }

    #[test]
    fn test_format_tags() {
        assert_eq!("csc".parse::<SparseFormat>().unwrap(), SparseFormat::Csc);
        assert!("coo".parse::<SparseFormat>().is_err());
        assert_eq!(
            SparseFormat::from_encoding_type("csr_matrix"),
            Some(SparseFormat::Csr)
        );
        assert_eq!(SparseFormat::from_encoding_type("array"), None);
    }

    #[test]
    fn test_summary() {
        let m = SparseMatrix::from_triplets(SparseFormat::Csr, vec![0], vec![0], vec![1.0], 100, 50)
            .unwrap();
        assert_eq!(
            m.summary(),
            "SparseMatrix (csr): 100\u{00d7}50, 1 nonzeros (0.02% density)"
        );
    }
}
