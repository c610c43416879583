//! Analysis results attached to a dataset and the key record that lists them.
//!
//! Each result is stored under a caller-chosen *result key* and belongs to
//! exactly one [`AnalysisKind`]. The payload shape is fixed by the kind; see
//! [`AnalysisResult`]. The [`KeyRecord`] maps kind names to the result keys
//! of that kind and decides what gets persisted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use stereo_core::{Result, StereoError};

use crate::matrix::MatrixData;
use crate::table::{Scalar, Table};

/// The fixed set of analysis kinds a key record may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnalysisKind {
    /// Highly variable genes (feature selection).
    Hvg,
    /// Principal component embedding.
    Pca,
    /// UMAP embedding.
    Umap,
    /// Neighbor graph.
    Neighbors,
    /// Cell clustering.
    Cluster,
    /// Mean expression of each gene per cluster.
    GeneExpCluster,
    /// Differential expression / marker genes per cluster.
    MarkerGenes,
    /// Ligand-receptor cell-cell communication.
    CellCellCommunication,
    /// Regulatory network inference.
    RegulatoryNetworkInference,
    /// SCTransform normalization. Reserved: accepted in a key record but
    /// never materialized.
    Sct,
    /// Spatial hotspot detection. Reserved like [`AnalysisKind::Sct`].
    SpatialHotspot,
}

impl AnalysisKind {
    /// All kinds, in declaration order.
    pub const ALL: [AnalysisKind; 11] = [
        AnalysisKind::Hvg,
        AnalysisKind::Pca,
        AnalysisKind::Umap,
        AnalysisKind::Neighbors,
        AnalysisKind::Cluster,
        AnalysisKind::GeneExpCluster,
        AnalysisKind::MarkerGenes,
        AnalysisKind::CellCellCommunication,
        AnalysisKind::RegulatoryNetworkInference,
        AnalysisKind::Sct,
        AnalysisKind::SpatialHotspot,
    ];

    /// Wire name used in key records and addressed keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Hvg => "hvg",
            AnalysisKind::Pca => "pca",
            AnalysisKind::Umap => "umap",
            AnalysisKind::Neighbors => "neighbors",
            AnalysisKind::Cluster => "cluster",
            AnalysisKind::GeneExpCluster => "gene_exp_cluster",
            AnalysisKind::MarkerGenes => "marker_genes",
            AnalysisKind::CellCellCommunication => "cell_cell_communication",
            AnalysisKind::RegulatoryNetworkInference => "regulatory_network_inference",
            AnalysisKind::Sct => "sct",
            AnalysisKind::SpatialHotspot => "spatial_hotspot",
        }
    }

    /// Reserved kinds have no payload type and are never written or read.
    pub fn is_reserved(&self) -> bool {
        matches!(self, AnalysisKind::Sct | AnalysisKind::SpatialHotspot)
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = StereoError;

    fn from_str(s: &str) -> Result<Self> {
        AnalysisKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StereoError::Parse(format!("unrecognized analysis kind '{s}'")))
    }
}

/// Mapping of analysis-kind name to the result keys of that kind.
///
/// Kind names are kept as plain strings so that a record naming an unknown
/// kind can be represented; such entries are dropped when the record is
/// written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyRecord {
    entries: BTreeMap<String, Vec<String>>,
}

impl KeyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `result_key` under `kind` unless it is already listed.
    pub fn insert(&mut self, kind: &str, result_key: &str) {
        let keys = self.entries.entry(kind.to_string()).or_default();
        if !keys.iter().any(|k| k == result_key) {
            keys.push(result_key.to_string());
        }
    }

    /// Builder-style [`KeyRecord::insert`].
    pub fn with(mut self, kind: &str, result_key: &str) -> Self {
        self.insert(kind, result_key);
        self
    }

    /// Replace the full list of result keys for `kind`.
    pub fn set(&mut self, kind: &str, result_keys: Vec<String>) {
        self.entries.insert(kind.to_string(), result_keys);
    }

    /// Result keys listed under `kind`.
    pub fn get(&self, kind: &str) -> Option<&[String]> {
        self.entries.get(kind).map(Vec::as_slice)
    }

    /// Remove `result_key` from every kind it is listed under.
    pub fn remove_result(&mut self, result_key: &str) {
        for keys in self.entries.values_mut() {
            keys.retain(|k| k != result_key);
        }
    }

    /// Iterate over `(kind, result_keys)` in kind-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into the recognized part and the names of unknown kinds.
    pub fn recognized(&self) -> (Vec<(AnalysisKind, Vec<String>)>, Vec<String>) {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for (name, keys) in &self.entries {
            match name.parse::<AnalysisKind>() {
                Ok(kind) => known.push((kind, keys.clone())),
                Err(_) => unknown.push(name.clone()),
            }
        }
        (known, unknown)
    }
}

/// Marker-gene (differential expression) result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerGenes {
    /// One table per cluster comparison, in insertion order.
    pub clusters: Vec<(String, Table)>,
    /// Run parameters, stored under the reserved `parameters` sub-key.
    pub parameters: Option<Vec<(String, Scalar)>>,
}

/// Cell-cell communication result: named tables plus run parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellCommunication {
    pub tables: BTreeMap<String, Table>,
    pub parameters: Option<Vec<(String, Scalar)>>,
}

/// Regulatory network inference result: named tables plus the regulon list
/// in its text rendering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegulatoryNetwork {
    pub tables: BTreeMap<String, Table>,
    pub regulons: Option<String>,
}

/// An analysis payload, one variant per materialized [`AnalysisKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    Hvg(Table),
    Pca(Array2<f64>),
    Umap(Array2<f64>),
    /// Named graph matrices, e.g. `connectivities` and `nn_dist`.
    Neighbors(BTreeMap<String, MatrixData>),
    Cluster(Table),
    /// Wide numeric table, genes × clusters.
    GeneExpCluster(Table),
    MarkerGenes(MarkerGenes),
    CellCellCommunication(CellCommunication),
    RegulatoryNetworkInference(RegulatoryNetwork),
}

impl AnalysisResult {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisResult::Hvg(_) => AnalysisKind::Hvg,
            AnalysisResult::Pca(_) => AnalysisKind::Pca,
            AnalysisResult::Umap(_) => AnalysisKind::Umap,
            AnalysisResult::Neighbors(_) => AnalysisKind::Neighbors,
            AnalysisResult::Cluster(_) => AnalysisKind::Cluster,
            AnalysisResult::GeneExpCluster(_) => AnalysisKind::GeneExpCluster,
            AnalysisResult::MarkerGenes(_) => AnalysisKind::MarkerGenes,
            AnalysisResult::CellCellCommunication(_) => AnalysisKind::CellCellCommunication,
            AnalysisResult::RegulatoryNetworkInference(_) => {
                AnalysisKind::RegulatoryNetworkInference
            }
        }
    }
}

/// Results keyed by result key.
pub type ResultSet = HashMap<String, AnalysisResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_roundtrip() {
        for kind in AnalysisKind::ALL {
            assert_eq!(kind.as_str().parse::<AnalysisKind>().unwrap(), kind);
        }
        assert!("tsne".parse::<AnalysisKind>().is_err());
    }

    #[test]
    fn reserved_kinds() {
        assert!(AnalysisKind::Sct.is_reserved());
        assert!(AnalysisKind::SpatialHotspot.is_reserved());
        assert!(!AnalysisKind::Pca.is_reserved());
    }

    #[test]
    fn key_record_insert_dedupes() {
        let mut kr = KeyRecord::new();
        kr.insert("pca", "pca");
        kr.insert("pca", "pca");
        kr.insert("pca", "pca_integrated");
        assert_eq!(kr.get("pca").unwrap(), &["pca", "pca_integrated"]);
    }

    #[test]
    fn key_record_recognized_split() {
        let kr = KeyRecord::new()
            .with("cluster", "leiden")
            .with("made_up", "x");
        let (known, unknown) = kr.recognized();
        assert_eq!(known, vec![(AnalysisKind::Cluster, vec!["leiden".to_string()])]);
        assert_eq!(unknown, vec!["made_up".to_string()]);
    }

    #[test]
    fn key_record_remove_result() {
        let mut kr = KeyRecord::new().with("pca", "a").with("umap", "a").with("umap", "b");
        kr.remove_result("a");
        assert!(kr.get("pca").unwrap().is_empty());
        assert_eq!(kr.get("umap").unwrap(), &["b"]);
    }

    #[test]
    fn payload_kind() {
        let r = AnalysisResult::Pca(Array2::zeros((2, 2)));
        assert_eq!(r.kind(), AnalysisKind::Pca);
        let r = AnalysisResult::MarkerGenes(MarkerGenes::default());
        assert_eq!(r.kind(), AnalysisKind::MarkerGenes);
    }
}
