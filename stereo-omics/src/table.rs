//! Typed columnar tables for gene, cell and analysis-result metadata.
//!
//! A [`Table`] is an ordered set of named [`ColumnData`] columns sharing one
//! string index (gene names for the gene table, cell names for the cell
//! table). Column order is preserved, which keeps a table written to disk and
//! read back identical to what was written.
//!
//! # Example
//!
//! ```
//! use stereo_omics::table::{ColumnData, Table};
//!
//! let mut genes = Table::new("gene_name", vec!["Gapdh".into(), "Actb".into()]);
//! genes.add_column("n_counts", ColumnData::Numeric(vec![12.0, 40.0])).unwrap();
//! assert_eq!(genes.n_rows(), 2);
//! assert_eq!(genes.column_names(), vec!["n_counts"]);
//! ```

use std::fmt;

use stereo_core::{Result, StereoError};

/// A single typed value: a dataset attribute, a parameter, or a stored scalar.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Short dtype tag, used when a scalar is persisted as text.
    pub fn dtype(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Text(_) => "str",
        }
    }

    /// Rebuild a scalar from its text rendering and [`Scalar::dtype`] tag.
    pub fn parse_typed(dtype: &str, text: &str) -> Result<Scalar> {
        let bad = |e: &dyn fmt::Display| {
            StereoError::Parse(format!("cannot parse '{text}' as {dtype}: {e}"))
        };
        match dtype {
            "bool" => text.parse::<bool>().map(Scalar::Bool).map_err(|e| bad(&e)),
            "int" => text.parse::<i64>().map(Scalar::Int).map_err(|e| bad(&e)),
            "float" => text.parse::<f64>().map(Scalar::Float).map_err(|e| bad(&e)),
            "str" => Ok(Scalar::Text(text.to_string())),
            other => Err(StereoError::Parse(format!("unknown scalar dtype '{other}'"))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

/// A half-open numeric interval `(left, right]`, as produced by binning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub left: f64,
    pub right: f64,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.left, self.right)
    }
}

/// A metadata column with typed data.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Free-text string values.
    Strings(Vec<String>),
    /// Floating point values.
    Numeric(Vec<f64>),
    /// Integer values.
    Integer(Vec<i64>),
    /// Boolean flags.
    Boolean(Vec<bool>),
    /// Categorical data stored as integer codes indexing into a category list.
    Categorical {
        codes: Vec<i32>,
        categories: Vec<String>,
    },
    /// Interval values. These have no on-disk encoding of their own and must
    /// be converted with [`ColumnData::intervals_to_text`] before writing.
    Intervals(Vec<Interval>),
}

impl ColumnData {
    /// Number of elements in this column.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Strings(v) => v.len(),
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Integer(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Categorical { codes, .. } => codes.len(),
            ColumnData::Intervals(v) => v.len(),
        }
    }

    /// Whether the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try to get as string slice. Returns `None` if not `Strings` variant.
    pub fn as_strings(&self) -> Option<&Vec<String>> {
        match self {
            ColumnData::Strings(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as numeric slice. Returns `None` if not `Numeric` variant.
    pub fn as_numeric(&self) -> Option<&Vec<f64>> {
        match self {
            ColumnData::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Whether every value is a number (float, integer or boolean).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnData::Numeric(_) | ColumnData::Integer(_) | ColumnData::Boolean(_)
        )
    }

    /// Values as `f64`, for numeric columns only.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Numeric(v) => Some(v.clone()),
            ColumnData::Integer(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ColumnData::Boolean(v) => Some(v.iter().map(|&b| f64::from(u8::from(b))).collect()),
            _ => None,
        }
    }

    /// Render every value as text. Categorical codes resolve to their
    /// category, negative codes (missing) to the empty string.
    pub fn to_text(&self) -> Vec<String> {
        match self {
            ColumnData::Strings(v) => v.clone(),
            ColumnData::Numeric(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnData::Integer(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnData::Boolean(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnData::Categorical { codes, categories } => codes
                .iter()
                .map(|&c| {
                    usize::try_from(c)
                        .ok()
                        .and_then(|i| categories.get(i))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect(),
            ColumnData::Intervals(v) => v.iter().map(|x| x.to_string()).collect(),
        }
    }

    /// Replace an interval column by its text rendering; other columns are
    /// returned unchanged.
    pub fn intervals_to_text(self) -> ColumnData {
        match self {
            ColumnData::Intervals(v) => {
                ColumnData::Strings(v.iter().map(|x| x.to_string()).collect())
            }
            other => other,
        }
    }

    /// Subset to the given indices.
    pub fn subset(&self, indices: &[usize]) -> Self {
        match self {
            ColumnData::Strings(v) => {
                ColumnData::Strings(indices.iter().map(|&i| v[i].clone()).collect())
            }
            ColumnData::Numeric(v) => {
                ColumnData::Numeric(indices.iter().map(|&i| v[i]).collect())
            }
            ColumnData::Integer(v) => {
                ColumnData::Integer(indices.iter().map(|&i| v[i]).collect())
            }
            ColumnData::Boolean(v) => {
                ColumnData::Boolean(indices.iter().map(|&i| v[i]).collect())
            }
            ColumnData::Categorical { codes, categories } => ColumnData::Categorical {
                codes: indices.iter().map(|&i| codes[i]).collect(),
                categories: categories.clone(),
            },
            ColumnData::Intervals(v) => {
                ColumnData::Intervals(indices.iter().map(|&i| v[i]).collect())
            }
        }
    }
}

/// An ordered, indexed collection of typed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    index_name: String,
    index: Vec<String>,
    columns: Vec<(String, ColumnData)>,
}

impl Table {
    /// Create a table with an index and no columns.
    pub fn new(index_name: &str, index: Vec<String>) -> Self {
        Self {
            index_name: index_name.to_string(),
            index,
            columns: Vec::new(),
        }
    }

    /// Create a table whose index is the row number rendered as text.
    pub fn with_row_numbers(n_rows: usize) -> Self {
        Self::new("_index", (0..n_rows).map(|i| i.to_string()).collect())
    }

    /// Name of the index column.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Row labels.
    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    /// Number of columns, excluding the index.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Add a column, replacing any existing column of the same name in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the column length does not match the row count.
    pub fn add_column(&mut self, name: &str, data: ColumnData) -> Result<()> {
        if data.len() != self.n_rows() {
            return Err(StereoError::ShapeMismatch(format!(
                "column '{}' length ({}) does not match table rows ({})",
                name,
                data.len(),
                self.n_rows()
            )));
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = data,
            None => self.columns.push((name.to_string(), data)),
        }
        Ok(())
    }

    /// Builder-style [`Table::add_column`].
    pub fn with_column(mut self, name: &str, data: ColumnData) -> Result<Self> {
        self.add_column(name, data)?;
        Ok(self)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Mutable lookup of a column by name.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnData> {
        self.columns.iter_mut().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Iterate over `(name, column)` pairs in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnData)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Copy of the table with every interval column rendered as text.
    pub fn with_intervals_as_text(&self) -> Table {
        Table {
            index_name: self.index_name.clone(),
            index: self.index.clone(),
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.clone().intervals_to_text()))
                .collect(),
        }
    }

    /// Subset rows to the given indices.
    pub fn subset(&self, indices: &[usize]) -> Result<Table> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows()) {
            return Err(StereoError::InvalidInput(format!(
                "row index {bad} out of bounds (n_rows={})",
                self.n_rows()
            )));
        }
        Ok(Table {
            index_name: self.index_name.clone(),
            index: indices.iter().map(|&i| self.index[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.subset(indices)))
                .collect(),
        })
    }
}
