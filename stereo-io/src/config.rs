//! Options for writing a dataset container.

use std::path::PathBuf;

use stereo_core::{Result, StereoError};
use stereo_omics::{KeyRecord, StereoExpData};

/// What to include when writing a dataset, and where.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteOptions {
    /// Destination path. Falls back to the dataset's own `output`.
    pub output: Option<PathBuf>,
    /// Write the raw snapshot, if the dataset has one.
    pub use_raw: bool,
    /// Write the key record and the results it lists.
    pub use_result: bool,
    /// Catalog to write instead of the dataset's own key record.
    pub key_record: Option<KeyRecord>,
    /// Write a merged dataset as one file per batch.
    pub split_batches: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            output: None,
            use_raw: true,
            use_result: true,
            key_record: None,
            split_batches: true,
        }
    }
}

impl WriteOptions {
    /// Default options writing to `output`.
    pub fn to_path(output: impl Into<PathBuf>) -> Self {
        WriteOptions {
            output: Some(output.into()),
            ..Default::default()
        }
    }

    /// The path to write `data` to.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::Config`] when neither the options nor the
    /// dataset name an output path.
    pub fn resolve_output(&self, data: &StereoExpData) -> Result<PathBuf> {
        self.output
            .clone()
            .or_else(|| data.output.clone())
            .ok_or_else(|| {
                StereoError::Config("the output path must be set before writing".into())
            })
    }

    /// The catalog to write for `data`.
    pub fn effective_key_record<'a>(&'a self, data: &'a StereoExpData) -> &'a KeyRecord {
        self.key_record.as_ref().unwrap_or_else(|| data.key_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use stereo_omics::{MatrixData, Table};

    fn data() -> StereoExpData {
        StereoExpData::new(
            Table::new("gene_name", vec![]),
            Table::new("cell_name", vec![]),
            Array2::zeros((0, 2)),
            MatrixData::Dense(Array2::zeros((0, 0))),
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let opts = WriteOptions::default();
        assert!(opts.use_raw && opts.use_result && opts.split_batches);
        assert!(opts.key_record.is_none());
    }

    #[test]
    fn output_resolution_order() {
        let mut d = data();
        assert!(matches!(
            WriteOptions::default().resolve_output(&d).unwrap_err(),
            StereoError::Config(_)
        ));
        d.output = Some("from_data.h5ad".into());
        assert_eq!(
            WriteOptions::default().resolve_output(&d).unwrap(),
            PathBuf::from("from_data.h5ad")
        );
        assert_eq!(
            WriteOptions::to_path("explicit.h5ad").resolve_output(&d).unwrap(),
            PathBuf::from("explicit.h5ad")
        );
    }

    #[test]
    fn key_record_override() {
        let mut d = data();
        d.key_record_mut().insert("pca", "pca");
        let opts = WriteOptions {
            key_record: Some(KeyRecord::new().with("umap", "umap")),
            ..Default::default()
        };
        assert!(opts.effective_key_record(&d).get("pca").is_none());
        assert!(WriteOptions::default().effective_key_record(&d).get("pca").is_some());
    }
}
