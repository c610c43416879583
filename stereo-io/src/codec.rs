//! Matrix codec: dense and compressed sparse matrices on an HDF5 group.
//!
//! A dense matrix is a 2-D `f64` dataset tagged `encoding-type = "array"`.
//! A sparse matrix is a subgroup tagged `csr_matrix` or `csc_matrix` holding
//! a `shape` attribute and the `data`, `indices` and `indptr` arrays, with the
//! index arrays stored as `i64`. The storage order is read back from the tag,
//! so a CSC matrix round-trips as CSC.
//!
//! Requires a system HDF5 library installation (`brew install hdf5` on macOS,
//! `apt install libhdf5-dev` on Linux).

use std::path::Path;
use std::str::FromStr;

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, Location};
use ndarray::{Array1, Array2};

use stereo_core::{Result, StereoError};
use stereo_omics::{MatrixData, SparseFormat, SparseMatrix};

pub(crate) const ENCODING_TYPE: &str = "encoding-type";
pub(crate) const ENCODING_VERSION: &str = "encoding-version";

pub(crate) fn h5err(e: hdf5::Error) -> StereoError {
    StereoError::Storage(format!("HDF5 error: {e}"))
}

/// Open an existing file, read-only or for in-place updates.
///
/// A path that does not exist is reported as [`StereoError::Io`].
pub(crate) fn open_file(path: &Path, writable: bool) -> Result<File> {
    std::fs::metadata(path)?;
    let opened = if writable { File::open_rw(path) } else { File::open(path) };
    opened.map_err(|e| StereoError::Storage(format!("cannot open {}: {e}", path.display())))
}

/// Convert text to an HDF5 variable-length string.
pub(crate) fn to_unicode(s: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(s)
        .map_err(|e| StereoError::InvalidInput(format!("cannot store {s:?} as HDF5 text: {e}")))
}

pub(crate) fn to_unicode_vec(values: &[String]) -> Result<Vec<VarLenUnicode>> {
    values.iter().map(|s| to_unicode(s)).collect()
}

/// Write a VarLenUnicode scalar attribute on any HDF5 location.
/// Uses a macro because Group, Dataset, etc. reach `new_attr` through
/// different Deref chains.
macro_rules! write_attr_str {
    ($loc:expr, $key:expr, $val:expr) => {{
        let s = $crate::codec::to_unicode($val)?;
        $loc.new_attr::<hdf5::types::VarLenUnicode>()
            .create($key)
            .and_then(|attr| attr.write_scalar(&s))
            .map_err($crate::codec::h5err)
    }};
}
pub(crate) use write_attr_str;

/// Read a string attribute, `None` if it is absent or not text.
pub(crate) fn read_attr_str(loc: &Location, name: &str) -> Option<String> {
    loc.attr(name)
        .ok()
        .and_then(|a| a.read_scalar::<VarLenUnicode>().ok())
        .map(|s| s.as_str().to_string())
}

/// The `encoding-type` tag of a group or dataset.
pub(crate) fn encoding_type(loc: &Location) -> Option<String> {
    read_attr_str(loc, ENCODING_TYPE)
}

/// Write `matrix` under `name` in `group`.
///
/// # Errors
///
/// Returns [`StereoError::AlreadyExists`] if `name` is taken, or a storage
/// error from HDF5.
pub fn write_matrix(group: &Group, name: &str, matrix: &MatrixData) -> Result<()> {
    if group.link_exists(name) {
        return Err(StereoError::AlreadyExists(name.to_string()));
    }
    match matrix {
        MatrixData::Dense(arr) => write_dense(group, name, arr),
        MatrixData::Sparse(sm) => write_sparse(group, name, sm),
    }
}

/// Read the matrix stored under `name` in `group`.
///
/// # Errors
///
/// Returns [`StereoError::KeyNotFound`] if nothing is stored under `name`,
/// or a parse error if the stored object is not a matrix.
pub fn read_matrix(group: &Group, name: &str) -> Result<MatrixData> {
    if !group.link_exists(name) {
        return Err(StereoError::KeyNotFound(name.to_string()));
    }
    if let Ok(ds) = group.dataset(name) {
        if ds.ndim() != 2 {
            return Err(StereoError::Parse(format!(
                "'{name}' is a {}-D dataset, expected a 2-D matrix",
                ds.ndim()
            )));
        }
        return Ok(MatrixData::Dense(ds.read_2d::<f64>().map_err(h5err)?));
    }
    let sub = group.group(name).map_err(h5err)?;
    read_sparse(&sub, name).map(MatrixData::Sparse)
}

/// Write a dense 2-D block tagged as an array.
pub(crate) fn write_dense(group: &Group, name: &str, arr: &Array2<f64>) -> Result<()> {
    let ds = group
        .new_dataset_builder()
        .with_data(arr)
        .create(name)
        .map_err(h5err)?;
    write_attr_str!(ds, ENCODING_TYPE, "array")?;
    write_attr_str!(ds, ENCODING_VERSION, "0.2.0")?;
    Ok(())
}

fn write_sparse(group: &Group, name: &str, sm: &SparseMatrix) -> Result<()> {
    let (n_rows, n_cols) = sm.shape();

    let sub = group.create_group(name).map_err(h5err)?;
    write_attr_str!(sub, ENCODING_TYPE, sm.format().encoding_type())?;
    write_attr_str!(sub, ENCODING_VERSION, "0.1.0")?;

    let shape_arr = ndarray::arr1(&[n_rows as i64, n_cols as i64]);
    sub.new_attr_builder()
        .with_data(&shape_arr)
        .create("shape")
        .map_err(h5err)?;

    let data_arr = Array1::from(sm.data().to_vec());
    sub.new_dataset_builder()
        .with_data(&data_arr)
        .create("data")
        .map_err(h5err)?;

    let indices_arr = Array1::from(sm.indices().iter().map(|&v| v as i64).collect::<Vec<_>>());
    sub.new_dataset_builder()
        .with_data(&indices_arr)
        .create("indices")
        .map_err(h5err)?;

    let indptr_arr = Array1::from(sm.indptr().iter().map(|&v| v as i64).collect::<Vec<_>>());
    sub.new_dataset_builder()
        .with_data(&indptr_arr)
        .create("indptr")
        .map_err(h5err)?;
    Ok(())
}

fn read_sparse(group: &Group, name: &str) -> Result<SparseMatrix> {
    let format = encoding_type(group)
        .as_deref()
        .and_then(SparseFormat::from_encoding_type)
        .ok_or_else(|| {
            StereoError::Parse(format!("'{name}' is not a csr_matrix or csc_matrix group"))
        })?;

    let shape = group
        .attr("shape")
        .and_then(|a| a.read_1d::<i64>())
        .map_err(h5err)?;
    if shape.len() != 2 {
        return Err(StereoError::Parse(format!(
            "'{name}' shape attribute has {} entries, expected 2",
            shape.len()
        )));
    }
    let n_rows = to_usize(shape[0], name)?;
    let n_cols = to_usize(shape[1], name)?;

    let data = group
        .dataset("data")
        .and_then(|ds| ds.read_1d::<f64>())
        .map_err(h5err)?
        .to_vec();
    let indices = read_index_array(group, "indices", name)?;
    let indptr = read_index_array(group, "indptr", name)?;

    SparseMatrix::from_parts(format, data, indices, indptr, n_rows, n_cols)
}

fn read_index_array(group: &Group, member: &str, name: &str) -> Result<Vec<usize>> {
    group
        .dataset(member)
        .and_then(|ds| ds.read_1d::<i64>())
        .map_err(h5err)?
        .iter()
        .map(|&v| to_usize(v, name))
        .collect()
}

fn to_usize(v: i64, name: &str) -> Result<usize> {
    usize::try_from(v)
        .map_err(|_| StereoError::Parse(format!("'{name}' holds negative index {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::{tempdir, TempDir};

    fn temp_file() -> (TempDir, hdf5::File) {
        let dir = tempdir().unwrap();
        let file = hdf5::File::create(dir.path().join("test.h5")).unwrap();
        (dir, file)
    }

    #[test]
    fn dense_roundtrip() {
        let (_tmp, file) = temp_file();
        let m = MatrixData::Dense(array![[1.0, 0.0, 2.5], [0.0, -3.0, 4.0]]);
        write_matrix(&file, "exp_matrix", &m).unwrap();
        let back = read_matrix(&file, "exp_matrix").unwrap();
        assert_eq!(back, m);
        let ds = file.dataset("exp_matrix").unwrap();
        assert_eq!(encoding_type(&ds).as_deref(), Some("array"));
    }

    #[test]
    fn sparse_keeps_storage_order() {
        let (_tmp, file) = temp_file();
        let dense = array![[0.0, 7.0], [1.0, 0.0], [0.0, 2.0]];
        for format in [SparseFormat::Csr, SparseFormat::Csc] {
            let name = format.encoding_type();
            let m = MatrixData::Sparse(SparseMatrix::from_dense(format, &dense));
            write_matrix(&file, name, &m).unwrap();
            let back = read_matrix(&file, name).unwrap();
            assert_eq!(back.sparse_format(), Some(format));
            assert_eq!(back, m);
            assert_eq!(back.to_dense(), dense);
        }
    }

    #[test]
    fn empty_sparse_roundtrip() {
        let (_tmp, file) = temp_file();
        let m = MatrixData::Sparse(SparseMatrix::new(SparseFormat::Csr, 0, 3));
        write_matrix(&file, "empty", &m).unwrap();
        let back = read_matrix(&file, "empty").unwrap();
        assert_eq!(back.shape(), (0, 3));
        assert_eq!(back.nnz(), 0);
    }

    #[test]
    fn empty_dense_roundtrip() {
        let (_tmp, file) = temp_file();
        let m = MatrixData::Dense(Array2::zeros((4, 0)));
        write_matrix(&file, "empty", &m).unwrap();
        assert_eq!(read_matrix(&file, "empty").unwrap().shape(), (4, 0));
    }

    #[test]
    fn missing_key_is_an_error() {
        let (_tmp, file) = temp_file();
        let err = read_matrix(&file, "nope").unwrap_err();
        assert!(matches!(err, StereoError::KeyNotFound(_)));
    }

    #[test]
    fn existing_target_is_an_error() {
        let (_tmp, file) = temp_file();
        let m = MatrixData::Dense(array![[1.0]]);
        write_matrix(&file, "m", &m).unwrap();
        let err = write_matrix(&file, "m", &m).unwrap_err();
        assert!(matches!(err, StereoError::AlreadyExists(_)));
    }

    #[test]
    fn rejects_untagged_group() {
        let (_tmp, file) = temp_file();
        file.create_group("plain").unwrap();
        let err = read_matrix(&file, "plain").unwrap_err();
        assert!(matches!(err, StereoError::Parse(_)));
    }
}
