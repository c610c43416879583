//! Addressed object store over one HDF5 group.
//!
//! [`ObjectStore`] writes and reads typed values as direct members of a
//! group, named by their wire key (see [`crate::key`]). Each member carries an
//! `encoding-type` tag so it can be read back without knowing its type:
//!
//! | Value | Stored as | Tag |
//! |-------|-----------|-----|
//! | scalar | 0-D dataset | `numeric-scalar` / `string` |
//! | strings | 1-D variable-length UTF-8 dataset | `string-array` |
//! | numbers | 1-D `f64` dataset | `array` |
//! | 2-D array | 2-D `f64` dataset | `array` |
//! | sparse matrix | group | `csr_matrix` / `csc_matrix` |
//! | table | group, one dataset per column | `dataframe` |
//! | table (matrix layout) | group with one `values` block | `dataframe-matrix` |
//!
//! Writes never overwrite: a taken key is [`StereoError::AlreadyExists`].
//! Reading a key that was never written is [`StereoError::KeyNotFound`].

use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, Group};
use ndarray::{Array1, Array2};
use tracing::debug;

use stereo_core::{Result, StereoError};
use stereo_omics::{ColumnData, MatrixData, Scalar, Table};

use crate::codec::{self, encoding_type, h5err, read_attr_str, write_attr_str, ENCODING_TYPE};
use crate::key::ObjectKey;

const INDEX_MEMBER: &str = "_index";
const CATEGORIES_MEMBER: &str = "__categories";
const VALUES_MEMBER: &str = "values";
const INDEX_NAME_ATTR: &str = "index-name";
const COLUMN_ORDER_ATTR: &str = "column-order";

/// How a table is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableLayout {
    /// One dataset per column, each with its own type.
    #[default]
    Columns,
    /// All columns flattened into one 2-D block. Every column must be
    /// numeric, or every column text.
    Matrix,
}

/// A value of any shape the store understands.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Scalar(Scalar),
    Strings(Vec<String>),
    Numbers(Vec<f64>),
    Array(Array2<f64>),
    /// A matrix; dense matrices read back as [`StoredValue::Array`].
    Matrix(MatrixData),
    Table(Table),
}

/// Typed access to the members of one group.
pub struct ObjectStore<'a> {
    group: &'a Group,
}

impl<'a> ObjectStore<'a> {
    /// Wrap a group. An open [`hdf5::File`] is its own root group.
    pub fn new(group: &'a Group) -> Self {
        Self { group }
    }

    /// The wrapped group.
    pub fn group(&self) -> &'a Group {
        self.group
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.group.link_exists(key)
    }

    /// Every member name parsed as an [`ObjectKey`], in name order.
    ///
    /// Members whose names do not parse are skipped.
    pub fn keys(&self) -> Result<Vec<ObjectKey>> {
        let mut keys = Vec::new();
        for name in self.group.member_names().map_err(h5err)? {
            match name.parse::<ObjectKey>() {
                Ok(key) => keys.push(key),
                Err(e) => debug!(member = %name, error = %e, "skipping unaddressed member"),
            }
        }
        Ok(keys)
    }

    /// Member names starting with `prefix`, sorted.
    pub fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .group
            .member_names()
            .map_err(h5err)?
            .into_iter()
            .filter(|n| n.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Open the subgroup at a `/`-separated path, creating missing levels.
    pub fn subgroup(&self, path: &str) -> Result<Group> {
        let mut current = self.group.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = if current.link_exists(part) {
                current.group(part).map_err(h5err)?
            } else {
                current.create_group(part).map_err(h5err)?
            };
        }
        Ok(current)
    }

    /// Create a new, empty subgroup named `key`.
    pub fn create_group(&self, key: &str) -> Result<Group> {
        self.ensure_absent(key)?;
        self.group.create_group(key).map_err(h5err)
    }

    /// Open the existing subgroup `key`.
    pub fn open_group(&self, key: &str) -> Result<Group> {
        self.ensure_present(key)?;
        self.group.group(key).map_err(h5err)
    }

    // -----------------------------------------------------------------------
    // Generic access
    // -----------------------------------------------------------------------

    /// Write any value. Tables use the per-column layout.
    pub fn write(&self, key: &str, value: &StoredValue) -> Result<()> {
        match value {
            StoredValue::Scalar(v) => self.write_scalar(key, v),
            StoredValue::Strings(v) => self.write_strings(key, v),
            StoredValue::Numbers(v) => self.write_numbers(key, v),
            StoredValue::Array(v) => self.write_array(key, v),
            StoredValue::Matrix(v) => self.write_matrix(key, v),
            StoredValue::Table(v) => self.write_table(key, v, TableLayout::Columns),
        }
    }

    /// Read any value, deciding its shape from the stored tag and rank.
    pub fn read(&self, key: &str) -> Result<StoredValue> {
        self.ensure_present(key)?;
        if let Ok(ds) = self.group.dataset(key) {
            return match ds.ndim() {
                0 => read_scalar_dataset(&ds, key).map(StoredValue::Scalar),
                1 if is_text(&ds)? => self.read_strings(key).map(StoredValue::Strings),
                1 => self.read_numbers(key).map(StoredValue::Numbers),
                2 => self.read_array(key).map(StoredValue::Array),
                n => Err(StereoError::Parse(format!("'{key}' is a {n}-D dataset"))),
            };
        }
        let group = self.group.group(key).map_err(h5err)?;
        match encoding_type(&group).as_deref() {
            Some("dataframe") | Some("dataframe-matrix") => {
                self.read_table(key).map(StoredValue::Table)
            }
            _ => self.read_matrix(key).map(StoredValue::Matrix),
        }
    }

    // -----------------------------------------------------------------------
    // Scalars and flat sequences
    // -----------------------------------------------------------------------

    pub fn write_scalar(&self, key: &str, value: &Scalar) -> Result<()> {
        self.ensure_absent(key)?;
        let ds = match value {
            Scalar::Bool(v) => {
                let ds = self.scalar_dataset::<bool>(key)?;
                ds.write_scalar(v).map_err(h5err)?;
                ds
            }
            Scalar::Int(v) => {
                let ds = self.scalar_dataset::<i64>(key)?;
                ds.write_scalar(v).map_err(h5err)?;
                ds
            }
            Scalar::Float(v) => {
                let ds = self.scalar_dataset::<f64>(key)?;
                ds.write_scalar(v).map_err(h5err)?;
                ds
            }
            Scalar::Text(v) => {
                let ds = self.scalar_dataset::<VarLenUnicode>(key)?;
                ds.write_scalar(&codec::to_unicode(v)?).map_err(h5err)?;
                ds
            }
        };
        let tag = if matches!(value, Scalar::Text(_)) {
            "string"
        } else {
            "numeric-scalar"
        };
        write_attr_str!(ds, ENCODING_TYPE, tag)?;
        debug!(key, dtype = value.dtype(), "wrote scalar");
        Ok(())
    }

    pub fn read_scalar(&self, key: &str) -> Result<Scalar> {
        self.ensure_present(key)?;
        let ds = self.group.dataset(key).map_err(h5err)?;
        read_scalar_dataset(&ds, key)
    }

    /// Read a text scalar.
    pub fn read_text(&self, key: &str) -> Result<String> {
        match self.read_scalar(key)? {
            Scalar::Text(s) => Ok(s),
            other => Err(StereoError::Parse(format!(
                "'{key}' holds a {} scalar, expected text",
                other.dtype()
            ))),
        }
    }

    /// Read a boolean scalar.
    pub fn read_bool(&self, key: &str) -> Result<bool> {
        match self.read_scalar(key)? {
            Scalar::Bool(b) => Ok(b),
            Scalar::Int(i) => Ok(i != 0),
            other => Err(StereoError::Parse(format!(
                "'{key}' holds a {} scalar, expected bool",
                other.dtype()
            ))),
        }
    }

    pub fn write_strings(&self, key: &str, values: &[String]) -> Result<()> {
        self.ensure_absent(key)?;
        let ds = write_text_dataset(self.group, key, values)?;
        write_attr_str!(ds, ENCODING_TYPE, "string-array")?;
        debug!(key, len = values.len(), "wrote strings");
        Ok(())
    }

    pub fn read_strings(&self, key: &str) -> Result<Vec<String>> {
        self.ensure_present(key)?;
        let ds = self.group.dataset(key).map_err(h5err)?;
        read_text_dataset(&ds)
    }

    pub fn write_numbers(&self, key: &str, values: &[f64]) -> Result<()> {
        self.ensure_absent(key)?;
        let arr = Array1::from(values.to_vec());
        let ds = self
            .group
            .new_dataset_builder()
            .with_data(&arr)
            .create(key)
            .map_err(h5err)?;
        write_attr_str!(ds, ENCODING_TYPE, "array")?;
        Ok(())
    }

    pub fn read_numbers(&self, key: &str) -> Result<Vec<f64>> {
        self.ensure_present(key)?;
        Ok(self
            .group
            .dataset(key)
            .and_then(|ds| ds.read_1d::<f64>())
            .map_err(h5err)?
            .to_vec())
    }

    // -----------------------------------------------------------------------
    // Arrays and matrices
    // -----------------------------------------------------------------------

    /// Write a dense 2-D block, e.g. an embedding or coordinates.
    pub fn write_array(&self, key: &str, arr: &Array2<f64>) -> Result<()> {
        self.ensure_absent(key)?;
        codec::write_dense(self.group, key, arr)?;
        debug!(key, shape = ?arr.dim(), "wrote array");
        Ok(())
    }

    pub fn read_array(&self, key: &str) -> Result<Array2<f64>> {
        match codec::read_matrix(self.group, key)? {
            MatrixData::Dense(arr) => Ok(arr),
            MatrixData::Sparse(_) => Err(StereoError::Parse(format!(
                "'{key}' is a sparse matrix, expected a dense array"
            ))),
        }
    }

    pub fn write_matrix(&self, key: &str, matrix: &MatrixData) -> Result<()> {
        codec::write_matrix(self.group, key, matrix)?;
        debug!(key, shape = ?matrix.shape(), sparse = matrix.is_sparse(), "wrote matrix");
        Ok(())
    }

    pub fn read_matrix(&self, key: &str) -> Result<MatrixData> {
        codec::read_matrix(self.group, key)
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// Write a table.
    ///
    /// # Errors
    ///
    /// Interval columns must be converted to text first. The matrix layout
    /// rejects tables that mix numeric and text columns.
    pub fn write_table(&self, key: &str, table: &Table, layout: TableLayout) -> Result<()> {
        self.ensure_absent(key)?;
        for (name, col) in table.columns() {
            if name == INDEX_MEMBER || name == CATEGORIES_MEMBER || name == VALUES_MEMBER {
                return Err(StereoError::InvalidInput(format!(
                    "table '{key}' has a column named '{name}', which is reserved"
                )));
            }
            if matches!(col, ColumnData::Intervals(_)) {
                return Err(StereoError::InvalidInput(format!(
                    "column '{name}' of '{key}' holds intervals; convert them to text first"
                )));
            }
        }

        // Built before the group exists so a rejected table leaves nothing behind.
        let block = match layout {
            TableLayout::Matrix if table.n_cols() > 0 => Some(values_block(key, table)?),
            _ => None,
        };

        let group = self.group.create_group(key).map_err(h5err)?;
        write_text_dataset(&group, INDEX_MEMBER, table.index())?;
        write_attr_str!(group, INDEX_NAME_ATTR, table.index_name())?;
        let names: Vec<String> = table.column_names().into_iter().map(String::from).collect();
        if !names.is_empty() {
            let order = Array1::from(codec::to_unicode_vec(&names)?);
            group
                .new_attr_builder()
                .with_data(&order)
                .create(COLUMN_ORDER_ATTR)
                .map_err(h5err)?;
        }

        match layout {
            TableLayout::Columns => {
                write_attr_str!(group, ENCODING_TYPE, "dataframe")?;
                for (name, col) in table.columns() {
                    write_column(&group, name, col)?;
                }
            }
            TableLayout::Matrix => {
                write_attr_str!(group, ENCODING_TYPE, "dataframe-matrix")?;
                if let Some(block) = &block {
                    write_values_block(&group, block)?;
                }
            }
        }
        debug!(key, rows = table.n_rows(), cols = table.n_cols(), ?layout, "wrote table");
        Ok(())
    }

    /// Read a table in either layout.
    pub fn read_table(&self, key: &str) -> Result<Table> {
        let group = self.open_group(key)?;
        let index = read_text_dataset(&group.dataset(INDEX_MEMBER).map_err(h5err)?)?;
        let index_name =
            read_attr_str(&group, INDEX_NAME_ATTR).unwrap_or_else(|| INDEX_MEMBER.to_string());
        let names = read_column_order(&group)?;
        let mut table = Table::new(&index_name, index);

        match encoding_type(&group).as_deref() {
            Some("dataframe") => {
                for name in &names {
                    table.add_column(name, read_column(&group, name)?)?;
                }
            }
            Some("dataframe-matrix") => {
                if !names.is_empty() {
                    for (name, col) in names.iter().zip(read_values_block(&group, key)?) {
                        table.add_column(name, col)?;
                    }
                }
            }
            other => {
                return Err(StereoError::Parse(format!(
                    "'{key}' is not a table (encoding-type {other:?})"
                )))
            }
        }
        Ok(table)
    }

    fn scalar_dataset<T: hdf5::H5Type>(&self, key: &str) -> Result<Dataset> {
        self.group
            .new_dataset::<T>()
            .shape(())
            .create(key)
            .map_err(h5err)
    }

    fn ensure_absent(&self, key: &str) -> Result<()> {
        if self.contains(key) {
            return Err(StereoError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    fn ensure_present(&self, key: &str) -> Result<()> {
        if !self.contains(key) {
            return Err(StereoError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn descriptor(ds: &Dataset) -> Result<TypeDescriptor> {
    ds.dtype()
        .and_then(|t| t.to_descriptor())
        .map_err(h5err)
}

fn is_text(ds: &Dataset) -> Result<bool> {
    Ok(matches!(descriptor(ds)?, TypeDescriptor::VarLenUnicode))
}

fn read_scalar_dataset(ds: &Dataset, key: &str) -> Result<Scalar> {
    if ds.ndim() != 0 {
        return Err(StereoError::Parse(format!("'{key}' is not a scalar")));
    }
    match descriptor(ds)? {
        TypeDescriptor::Boolean => ds.read_scalar::<bool>().map(Scalar::Bool).map_err(h5err),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            ds.read_scalar::<i64>().map(Scalar::Int).map_err(h5err)
        }
        TypeDescriptor::Float(_) => ds.read_scalar::<f64>().map(Scalar::Float).map_err(h5err),
        TypeDescriptor::VarLenUnicode => ds
            .read_scalar::<VarLenUnicode>()
            .map(|s| Scalar::Text(s.as_str().to_string()))
            .map_err(h5err),
        other => Err(StereoError::Parse(format!(
            "'{key}' has unsupported scalar type {other:?}"
        ))),
    }
}

fn write_text_dataset(group: &Group, name: &str, values: &[String]) -> Result<Dataset> {
    let arr = Array1::from(codec::to_unicode_vec(values)?);
    group
        .new_dataset_builder()
        .with_data(&arr)
        .create(name)
        .map_err(h5err)
}

fn read_text_dataset(ds: &Dataset) -> Result<Vec<String>> {
    Ok(ds
        .read_1d::<VarLenUnicode>()
        .map_err(h5err)?
        .iter()
        .map(|s| s.as_str().to_string())
        .collect())
}

fn read_column_order(group: &Group) -> Result<Vec<String>> {
    if !group.attr_names().map_err(h5err)?.iter().any(|n| n == COLUMN_ORDER_ATTR) {
        return Ok(Vec::new());
    }
    Ok(group
        .attr(COLUMN_ORDER_ATTR)
        .and_then(|a| a.read_1d::<VarLenUnicode>())
        .map_err(h5err)?
        .iter()
        .map(|s| s.as_str().to_string())
        .collect())
}

/// Write a metadata column to a table group.
fn write_column(group: &Group, name: &str, col: &ColumnData) -> Result<()> {
    match col {
        ColumnData::Strings(vals) => {
            write_text_dataset(group, name, vals)?;
        }
        ColumnData::Numeric(vals) => {
            let arr = Array1::from(vals.clone());
            group
                .new_dataset_builder()
                .with_data(&arr)
                .create(name)
                .map_err(h5err)?;
        }
        ColumnData::Integer(vals) => {
            let arr = Array1::from(vals.clone());
            group
                .new_dataset_builder()
                .with_data(&arr)
                .create(name)
                .map_err(h5err)?;
        }
        ColumnData::Boolean(vals) => {
            let arr = Array1::from(vals.clone());
            group
                .new_dataset_builder()
                .with_data(&arr)
                .create(name)
                .map_err(h5err)?;
        }
        ColumnData::Categorical { codes, categories } => {
            let codes_arr = Array1::from(codes.clone());
            group
                .new_dataset_builder()
                .with_data(&codes_arr)
                .create(name)
                .map_err(h5err)?;

            // Categories live under __categories/<name>
            if !group.link_exists(CATEGORIES_MEMBER) {
                group.create_group(CATEGORIES_MEMBER).map_err(h5err)?;
            }
            let cat_group = group.group(CATEGORIES_MEMBER).map_err(h5err)?;
            write_text_dataset(&cat_group, name, categories)?;
        }
        ColumnData::Intervals(_) => {
            return Err(StereoError::InvalidInput(format!(
                "interval column '{name}' must be converted to text before writing"
            )))
        }
    }
    Ok(())
}

/// Read a metadata column from a table group.
fn read_column(group: &Group, name: &str) -> Result<ColumnData> {
    let ds = group
        .dataset(name)
        .map_err(|_| StereoError::KeyNotFound(format!("column '{name}'")))?;

    if group.link_exists(CATEGORIES_MEMBER) {
        let cat_group = group.group(CATEGORIES_MEMBER).map_err(h5err)?;
        if cat_group.link_exists(name) {
            let categories = read_text_dataset(&cat_group.dataset(name).map_err(h5err)?)?;
            let codes = ds.read_1d::<i32>().map_err(h5err)?.to_vec();
            return Ok(ColumnData::Categorical { codes, categories });
        }
    }

    match descriptor(&ds)? {
        TypeDescriptor::VarLenUnicode => read_text_dataset(&ds).map(ColumnData::Strings),
        TypeDescriptor::Float(_) => Ok(ColumnData::Numeric(
            ds.read_1d::<f64>().map_err(h5err)?.to_vec(),
        )),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => Ok(ColumnData::Integer(
            ds.read_1d::<i64>().map_err(h5err)?.to_vec(),
        )),
        TypeDescriptor::Boolean => Ok(ColumnData::Boolean(
            ds.read_1d::<bool>().map_err(h5err)?.to_vec(),
        )),
        other => Err(StereoError::Parse(format!(
            "unsupported column type for '{name}': {other:?}"
        ))),
    }
}

/// A table flattened into one rows × columns block.
enum ValuesBlock {
    Numeric(Array2<f64>),
    Text(Array2<VarLenUnicode>),
}

/// Flatten every column into one block; fails on mixed column types.
fn values_block(key: &str, table: &Table) -> Result<ValuesBlock> {
    let (n_rows, n_cols) = (table.n_rows(), table.n_cols());
    let cols: Vec<&ColumnData> = table.columns().map(|(_, c)| c).collect();

    if cols.iter().all(|c| c.is_numeric()) {
        let mut block = Array2::<f64>::zeros((n_rows, n_cols));
        for (j, col) in cols.iter().enumerate() {
            let values = col.to_f64().unwrap_or_default();
            for (i, v) in values.into_iter().enumerate() {
                block[[i, j]] = v;
            }
        }
        Ok(ValuesBlock::Numeric(block))
    } else if cols.iter().all(|c| matches!(c, ColumnData::Strings(_))) {
        let mut flat = Vec::with_capacity(n_rows * n_cols);
        let texts: Vec<Vec<String>> = cols.iter().map(|c| c.to_text()).collect();
        for i in 0..n_rows {
            for col in &texts {
                flat.push(codec::to_unicode(&col[i])?);
            }
        }
        let block = Array2::from_shape_vec((n_rows, n_cols), flat)
            .map_err(|e| StereoError::ShapeMismatch(format!("table '{key}': {e}")))?;
        Ok(ValuesBlock::Text(block))
    } else {
        Err(StereoError::InvalidInput(format!(
            "table '{key}' mixes column types and cannot be stored as one matrix"
        )))
    }
}

fn write_values_block(group: &Group, block: &ValuesBlock) -> Result<()> {
    let builder = group.new_dataset_builder();
    match block {
        ValuesBlock::Numeric(b) => builder.with_data(b).create(VALUES_MEMBER),
        ValuesBlock::Text(b) => builder.with_data(b).create(VALUES_MEMBER),
    }
    .map_err(h5err)?;
    Ok(())
}

fn read_values_block(group: &Group, key: &str) -> Result<Vec<ColumnData>> {
    let ds = group
        .dataset(VALUES_MEMBER)
        .map_err(|_| StereoError::KeyNotFound(format!("{key}/{VALUES_MEMBER}")))?;
    if matches!(descriptor(&ds)?, TypeDescriptor::VarLenUnicode) {
        let block = ds.read_2d::<VarLenUnicode>().map_err(h5err)?;
        Ok(block
            .columns()
            .into_iter()
            .map(|c| ColumnData::Strings(c.iter().map(|s| s.as_str().to_string()).collect()))
            .collect())
    } else {
        let block = ds.read_2d::<f64>().map_err(h5err)?;
        Ok(block
            .columns()
            .into_iter()
            .map(|c| ColumnData::Numeric(c.to_vec()))
            .collect())
    }
}
