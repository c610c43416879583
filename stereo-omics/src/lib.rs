//! In-memory data model for spatial transcriptomics.
//!
//! This crate provides the objects that the `stereo-io` crate persists:
//!
//! - **Matrices**: [`SparseMatrix`] in CSR/CSC order and the dense-or-sparse [`MatrixData`]
//! - **Tables**: typed, ordered [`Table`] columns ([`ColumnData`]) and [`Scalar`] values
//! - **Datasets**: [`StereoExpData`] with its raw snapshot and batch splitting
//! - **Analysis results**: [`AnalysisKind`], [`AnalysisResult`] and the [`KeyRecord`] catalog
//! - **Multi-slice containers**: [`MsData`]
//!
//! # Quick start
//!
//! ```
//! use ndarray::array;
//! use stereo_core::Summarizable;
//! use stereo_omics::{MatrixData, SparseFormat, SparseMatrix, StereoExpData, Table};
//!
//! let counts = SparseMatrix::from_dense(SparseFormat::Csr, &array![[3.0, 0.0], [0.0, 1.0]]);
//! let data = StereoExpData::new(
//!     Table::new("gene_name", vec!["Gapdh".into(), "Actb".into()]),
//!     Table::new("cell_name", vec!["c1".into(), "c2".into()]),
//!     array![[0.0, 0.0], [1.0, 0.0]],
//!     MatrixData::Sparse(counts),
//! ).unwrap();
//!
//! assert_eq!(
//!     data.summary(),
//!     "StereoExpData: 2 cells \u{00d7} 2 genes, bins (bin 100), sparse csr"
//! );
//! ```

pub mod analysis;
pub mod exp_data;
pub mod matrix;
pub mod ms_data;
pub mod sparse;
pub mod table;

pub use analysis::{
    AnalysisKind, AnalysisResult, CellCommunication, KeyRecord, MarkerGenes, RegulatoryNetwork,
    ResultSet,
};
pub use exp_data::{BinType, RawSnapshot, SampleNames, StereoExpData, BATCH_COLUMN};
pub use matrix::MatrixData;
pub use ms_data::MsData;
pub use sparse::{SparseFormat, SparseMatrix};
pub use table::{ColumnData, Interval, Scalar, Table};
