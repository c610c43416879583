//! HDF5 persistence for spatial transcriptomics datasets.
//!
//! - **Dataset containers** ([`h5ad`]): one [`StereoExpData`](stereo_omics::StereoExpData)
//!   per file with its raw snapshot and cataloged analysis results. Merged
//!   datasets can be split into one file per batch.
//! - **Multi-slice containers** ([`h5ms`]): an [`MsData`](stereo_omics::MsData)
//!   with every slice and the merged view.
//! - **GEF count files** ([`gef`]): mid-count matrices in per-gene layout, and
//!   in-place cluster patching of cell-bin files.
//!
//! The lower layers are public too: [`store::ObjectStore`] reads and writes
//! typed objects under keys, [`key::ObjectKey`] parses the key grammar and
//! [`catalog`] handles the `key_record` group.
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use stereo_io::{read_h5ad, write_h5ad, WriteOptions};
//! use stereo_omics::{MatrixData, StereoExpData, Table};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("sample.h5ad");
//!
//! let data = StereoExpData::new(
//!     Table::new("gene_name", vec!["Gapdh".into()]),
//!     Table::new("cell_name", vec!["c1".into(), "c2".into()]),
//!     array![[0.0, 0.0], [1.0, 0.0]],
//!     MatrixData::Dense(array![[2.0], [5.0]]),
//! ).unwrap();
//!
//! let written = write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();
//! assert_eq!(written, vec![path.clone()]);
//!
//! let back = read_h5ad(&path).unwrap();
//! assert_eq!(back.exp_matrix(), data.exp_matrix());
//! ```
//!
//! Reading and writing need the HDF5 C library (1.10 or later) on the
//! system.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod gef;
pub mod h5ad;
pub mod h5ms;
pub mod key;
pub mod results;
pub mod store;

pub use catalog::{read_catalog, write_catalog};
pub use config::WriteOptions;
pub use gef::{
    cell_id, cluster_assignment, patch_cluster_ids, read_gef_bin, update_gef, write_mid_gef,
    ExpressionRecord, GefBin, GeneRecord,
};
pub use h5ad::{read_h5ad, write_h5ad};
pub use h5ms::{read_h5ms, write_h5ms};
pub use key::ObjectKey;
pub use results::{read_results, write_results};
pub use store::{ObjectStore, StoredValue, TableLayout};
