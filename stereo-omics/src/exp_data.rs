//! The spatial expression dataset.
//!
//! [`StereoExpData`] bundles the expression matrix (cells × genes) with its
//! gene and cell tables, per-cell coordinates and binning metadata. A merged
//! dataset carries several batches, tagged by the cells' `batch` column, and
//! can be split back into one dataset per batch.
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use stereo_omics::exp_data::StereoExpData;
//! use stereo_omics::matrix::MatrixData;
//! use stereo_omics::table::Table;
//!
//! let data = StereoExpData::new(
//!     Table::new("gene_name", vec!["g1".into(), "g2".into()]),
//!     Table::new("cell_name", vec!["c1".into()]),
//!     array![[10.0, 20.0]],
//!     MatrixData::Dense(array![[1.0, 0.0]]),
//! ).unwrap();
//! assert_eq!(data.shape(), (1, 2));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::{Array2, Axis};
use stereo_core::{Result, StereoError, Summarizable};

use crate::analysis::{AnalysisResult, KeyRecord, ResultSet};
use crate::matrix::MatrixData;
use crate::table::{Scalar, Table};

/// Name of the cell column that tags the batch of a merged dataset.
pub const BATCH_COLUMN: &str = "batch";

/// How the expression matrix was binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinType {
    /// Square bins of `bin_size` DNB spots.
    #[default]
    Bins,
    /// Segmented cells.
    CellBins,
}

impl BinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinType::Bins => "bins",
            BinType::CellBins => "cell_bins",
        }
    }
}

impl fmt::Display for BinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BinType {
    type Err = StereoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bins" => Ok(BinType::Bins),
            "cell_bins" => Ok(BinType::CellBins),
            other => Err(StereoError::Parse(format!(
                "the bin type '{other}' is not one of 'bins', 'cell_bins'"
            ))),
        }
    }
}

/// Sample (chip) identifiers of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleNames {
    /// One sample for the whole dataset.
    Single(String),
    /// Batch id → sample id, for merged datasets.
    PerBatch(BTreeMap<String, String>),
}

/// Copy of the dataset taken before processing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    genes: Table,
    cells: Table,
    position: Array2<f64>,
    exp_matrix: MatrixData,
}

impl RawSnapshot {
    /// # Errors
    ///
    /// Returns an error if the matrix or positions disagree with the tables.
    pub fn new(
        genes: Table,
        cells: Table,
        position: Array2<f64>,
        exp_matrix: MatrixData,
    ) -> Result<Self> {
        check_shapes(&genes, &cells, &position, &exp_matrix)?;
        Ok(Self {
            genes,
            cells,
            position,
            exp_matrix,
        })
    }

    pub fn genes(&self) -> &Table {
        &self.genes
    }

    pub fn cells(&self) -> &Table {
        &self.cells
    }

    pub fn position(&self) -> &Array2<f64> {
        &self.position
    }

    pub fn exp_matrix(&self) -> &MatrixData {
        &self.exp_matrix
    }

    pub fn gene_names(&self) -> &[String] {
        self.genes.index()
    }

    pub fn cell_names(&self) -> &[String] {
        self.cells.index()
    }

    fn select_cells(&self, rows: &[usize]) -> Result<RawSnapshot> {
        Ok(RawSnapshot {
            genes: self.genes.clone(),
            cells: self.cells.subset(rows)?,
            position: self.position.select(Axis(0), rows),
            exp_matrix: self.exp_matrix.select_rows(rows)?,
        })
    }
}

/// A spatial expression dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoExpData {
    genes: Table,
    cells: Table,
    position: Array2<f64>,
    exp_matrix: MatrixData,
    /// Binning scheme.
    pub bin_type: BinType,
    /// Bin edge length in DNB spots.
    pub bin_size: u32,
    /// Sample id(s), if known.
    pub sn: Option<SampleNames>,
    /// Whether this dataset merges several batches.
    pub merged: bool,
    /// Free-form attributes, e.g. the source file's `minX`/`minY`/`resolution`.
    pub attr: Vec<(String, Scalar)>,
    /// Default output path used when a write does not name one.
    pub output: Option<PathBuf>,
    raw: Option<RawSnapshot>,
    results: ResultSet,
    key_record: KeyRecord,
}

impl StereoExpData {
    /// Create a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::ShapeMismatch`] unless matrix rows and position
    /// rows equal the cell count and matrix columns equal the gene count.
    pub fn new(
        genes: Table,
        cells: Table,
        position: Array2<f64>,
        exp_matrix: MatrixData,
    ) -> Result<Self> {
        check_shapes(&genes, &cells, &position, &exp_matrix)?;
        Ok(Self {
            genes,
            cells,
            position,
            exp_matrix,
            bin_type: BinType::default(),
            bin_size: 100,
            sn: None,
            merged: false,
            attr: Vec::new(),
            output: None,
            raw: None,
            results: ResultSet::new(),
            key_record: KeyRecord::new(),
        })
    }

    pub fn genes(&self) -> &Table {
        &self.genes
    }

    pub fn cells(&self) -> &Table {
        &self.cells
    }

    pub fn position(&self) -> &Array2<f64> {
        &self.position
    }

    pub fn exp_matrix(&self) -> &MatrixData {
        &self.exp_matrix
    }

    pub fn gene_names(&self) -> &[String] {
        self.genes.index()
    }

    pub fn cell_names(&self) -> &[String] {
        self.cells.index()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.n_rows()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.n_rows()
    }

    /// (n_cells, n_genes).
    pub fn shape(&self) -> (usize, usize) {
        self.exp_matrix.shape()
    }

    pub fn raw(&self) -> Option<&RawSnapshot> {
        self.raw.as_ref()
    }

    /// Attach a raw snapshot.
    pub fn set_raw(&mut self, raw: RawSnapshot) {
        self.raw = Some(raw);
    }

    /// Snapshot the current genes, cells, positions and matrix as raw.
    pub fn snapshot_raw(&mut self) {
        self.raw = Some(RawSnapshot {
            genes: self.genes.clone(),
            cells: self.cells.clone(),
            position: self.position.clone(),
            exp_matrix: self.exp_matrix.clone(),
        });
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn result(&self, result_key: &str) -> Option<&AnalysisResult> {
        self.results.get(result_key)
    }

    /// Store a result and list it in the key record under its kind.
    pub fn add_result(&mut self, result_key: &str, result: AnalysisResult) {
        self.key_record.insert(result.kind().as_str(), result_key);
        self.results.insert(result_key.to_string(), result);
    }

    /// Store a result without touching the key record.
    pub fn insert_result_unrecorded(&mut self, result_key: &str, result: AnalysisResult) {
        self.results.insert(result_key.to_string(), result);
    }

    /// Drop a result and its key record entries.
    pub fn remove_result(&mut self, result_key: &str) -> Option<AnalysisResult> {
        self.key_record.remove_result(result_key);
        self.results.remove(result_key)
    }

    pub fn key_record(&self) -> &KeyRecord {
        &self.key_record
    }

    pub fn key_record_mut(&mut self) -> &mut KeyRecord {
        &mut self.key_record
    }

    /// Distinct batch ids in sorted order, `None` without a batch column.
    pub fn batches(&self) -> Option<Vec<String>> {
        let mut batches = self.cells.column(BATCH_COLUMN)?.to_text();
        batches.sort();
        batches.dedup();
        Some(batches)
    }

    /// Split a merged dataset into one non-merged dataset per batch.
    ///
    /// Batches are visited in sorted order. Each part keeps every gene and
    /// takes the sample id mapped to its batch, or the batch id itself when
    /// there is no per-batch mapping. The raw snapshot follows when its own
    /// cells carry a batch column; results are not carried over.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell table has no `batch` column.
    pub fn split_batches(&self) -> Result<Vec<(String, StereoExpData)>> {
        let tags = self
            .cells
            .column(BATCH_COLUMN)
            .ok_or_else(|| {
                StereoError::InvalidInput(format!(
                    "cannot split by batch: cells have no '{BATCH_COLUMN}' column"
                ))
            })?
            .to_text();
        let raw_tags = self
            .raw
            .as_ref()
            .and_then(|r| r.cells.column(BATCH_COLUMN))
            .map(|c| c.to_text());

        let mut parts = Vec::new();
        for batch in self.batches().unwrap_or_default() {
            let rows = rows_tagged(&tags, &batch);
            let sample = match &self.sn {
                Some(SampleNames::PerBatch(map)) => map.get(&batch).cloned(),
                _ => None,
            }
            .unwrap_or_else(|| batch.clone());

            let mut part = StereoExpData::new(
                self.genes.clone(),
                self.cells.subset(&rows)?,
                self.position.select(Axis(0), &rows),
                self.exp_matrix.select_rows(&rows)?,
            )?;
            part.bin_type = self.bin_type;
            part.bin_size = self.bin_size;
            part.attr = self.attr.clone();
            part.sn = Some(SampleNames::Single(sample));
            if let (Some(raw), Some(raw_tags)) = (&self.raw, &raw_tags) {
                part.raw = Some(raw.select_cells(&rows_tagged(raw_tags, &batch))?);
            }
            parts.push((batch, part));
        }
        Ok(parts)
    }
}

impl Summarizable for StereoExpData {
    fn summary(&self) -> String {
        let storage = match self.exp_matrix.sparse_format() {
            Some(f) => format!("sparse {f}"),
            None => "dense".to_string(),
        };
        format!(
            "StereoExpData: {} cells \u{00d7} {} genes, {} (bin {}), {}{}",
            self.n_cells(),
            self.n_genes(),
            self.bin_type,
            self.bin_size,
            storage,
            if self.merged { ", merged" } else { "" }
        )
    }
}

fn rows_tagged(tags: &[String], batch: &str) -> Vec<usize> {
    tags.iter()
        .enumerate()
        .filter(|(_, t)| t.as_str() == batch)
        .map(|(i, _)| i)
        .collect()
}

fn check_shapes(
    genes: &Table,
    cells: &Table,
    position: &Array2<f64>,
    exp_matrix: &MatrixData,
) -> Result<()> {
    let (rows, cols) = exp_matrix.shape();
    if rows != cells.n_rows() {
        return Err(StereoError::ShapeMismatch(format!(
            "expression matrix rows ({rows}) do not match cell count ({})",
            cells.n_rows()
        )));
    }
    if cols != genes.n_rows() {
        return Err(StereoError::ShapeMismatch(format!(
            "expression matrix columns ({cols}) do not match gene count ({})",
            genes.n_rows()
        )));
    }
    if position.nrows() != cells.n_rows() {
        return Err(StereoError::ShapeMismatch(format!(
            "position rows ({}) do not match cell count ({})",
            position.nrows(),
            cells.n_rows()
        )));
    }
    Ok(())
}
