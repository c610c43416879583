//! Analysis results: the per-kind encoders and decoders and the write/read
//! passes driven by the catalog.
//!
//! Each materialized [`AnalysisKind`] has one entry in a static registry
//! pairing an encoder with a decoder. Reserved kinds have no entry and are
//! skipped.

use std::collections::BTreeMap;

use tracing::debug;

use stereo_core::{Result, StereoError};
use stereo_omics::{
    AnalysisKind, AnalysisResult, CellCommunication, ColumnData, KeyRecord, MarkerGenes,
    RegulatoryNetwork, ResultSet, Scalar, Table,
};

use crate::catalog::{read_catalog, write_catalog, CATALOG_KEY};
use crate::key::ObjectKey;
use crate::store::{ObjectStore, TableLayout};

/// Sub-key holding run parameters.
pub const PARAMETERS: &str = "parameters";
/// Sub-key listing the ordered marker-gene comparisons.
pub const CLUSTERS_RECORD: &str = "clusters_record";
/// Sub-key holding the regulon list text.
pub const REGULONS: &str = "regulons";

type EncodeFn = fn(&ObjectStore<'_>, &str, &AnalysisResult) -> Result<()>;
type DecodeFn = fn(&ObjectStore<'_>, &str) -> Result<Option<AnalysisResult>>;

/// Encoder/decoder pair for one analysis kind.
pub struct KindCodec {
    pub kind: AnalysisKind,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

static REGISTRY: &[KindCodec] = &[
    KindCodec { kind: AnalysisKind::Hvg, encode: encode_hvg, decode: decode_hvg },
    KindCodec { kind: AnalysisKind::Pca, encode: encode_embedding, decode: decode_pca },
    KindCodec { kind: AnalysisKind::Umap, encode: encode_embedding, decode: decode_umap },
    KindCodec {
        kind: AnalysisKind::Neighbors,
        encode: encode_neighbors,
        decode: decode_neighbors,
    },
    KindCodec { kind: AnalysisKind::Cluster, encode: encode_cluster, decode: decode_cluster },
    KindCodec {
        kind: AnalysisKind::GeneExpCluster,
        encode: encode_gene_exp_cluster,
        decode: decode_gene_exp_cluster,
    },
    KindCodec {
        kind: AnalysisKind::MarkerGenes,
        encode: encode_marker_genes,
        decode: decode_marker_genes,
    },
    KindCodec {
        kind: AnalysisKind::CellCellCommunication,
        encode: encode_cell_communication,
        decode: decode_cell_communication,
    },
    KindCodec {
        kind: AnalysisKind::RegulatoryNetworkInference,
        encode: encode_regulatory_network,
        decode: decode_regulatory_network,
    },
];

/// The registered codec of `kind`; `None` for reserved kinds.
pub fn codec_for(kind: AnalysisKind) -> Option<&'static KindCodec> {
    REGISTRY.iter().find(|c| c.kind == kind)
}

/// Write the catalog and every result it lists.
///
/// Unrecognized kinds are dropped with a warning. Every listed result key of
/// a materialized kind must be present in `results` with a payload of that
/// kind; this is checked before anything is written.
pub fn write_results(
    store: &ObjectStore<'_>,
    results: &ResultSet,
    record: &KeyRecord,
) -> Result<()> {
    // Unrecognized kinds are warned about once, by the catalog writer.
    for (kind, keys) in record.recognized().0 {
        if kind.is_reserved() {
            continue;
        }
        for res_key in &keys {
            let payload = results
                .get(res_key)
                .ok_or_else(|| StereoError::MissingResult(res_key.clone()))?;
            if payload.kind() != kind {
                return Err(StereoError::KindMismatch(format!(
                    "'{res_key}' is listed under {kind} but holds a {} result",
                    payload.kind()
                )));
            }
        }
    }

    for (kind, keys) in write_catalog(store, record)? {
        let Some(codec) = codec_for(kind) else {
            debug!(%kind, "reserved analysis kind has no payload, skipping");
            continue;
        };
        for res_key in &keys {
            // Presence was checked above.
            if let Some(payload) = results.get(res_key) {
                (codec.encode)(store, res_key, payload)?;
                debug!(%kind, res_key = %res_key, "wrote analysis result");
            }
        }
    }
    Ok(())
}

/// Read the catalog and every result it lists that is present.
///
/// Returns an empty record and result set if the container has no catalog.
pub fn read_results(store: &ObjectStore<'_>) -> Result<(KeyRecord, ResultSet)> {
    let mut results = ResultSet::new();
    if !store.contains(CATALOG_KEY) {
        return Ok((KeyRecord::new(), results));
    }
    let record = read_catalog(store)?;
    for (kind, keys) in record.recognized().0 {
        let Some(codec) = codec_for(kind) else {
            debug!(%kind, "reserved analysis kind has no payload, skipping");
            continue;
        };
        for res_key in keys {
            match (codec.decode)(store, &res_key)? {
                Some(payload) => {
                    results.insert(res_key, payload);
                }
                None => debug!(%kind, res_key = %res_key, "catalogued result not stored"),
            }
        }
    }
    Ok((record, results))
}

// ---------------------------------------------------------------------------
// Per-kind codecs
// ---------------------------------------------------------------------------

fn key(kind: AnalysisKind, res_key: &str, sub_key: Option<&str>) -> Result<String> {
    ObjectKey::result(kind, res_key, sub_key).map(|k| k.to_string())
}

fn mismatch(expected: AnalysisKind, res_key: &str, got: &AnalysisResult) -> StereoError {
    StereoError::KindMismatch(format!(
        "'{res_key}' was encoded as {expected} but holds a {} result",
        got.kind()
    ))
}

/// Sub-keys stored for one nested result, in name order.
fn sub_keys(store: &ObjectStore<'_>, kind: AnalysisKind, res_key: &str) -> Result<Vec<String>> {
    Ok(store
        .keys()?
        .into_iter()
        .filter(|k| k.belongs_to(kind, res_key))
        .filter_map(|k| k.sub_key().map(str::to_string))
        .collect())
}

fn encode_hvg(store: &ObjectStore<'_>, res_key: &str, result: &AnalysisResult) -> Result<()> {
    let AnalysisResult::Hvg(table) = result else {
        return Err(mismatch(AnalysisKind::Hvg, res_key, result));
    };
    // Interval bins (`mean_bin`) have no stored form of their own.
    let table = table.with_intervals_as_text();
    store.write_table(&key(AnalysisKind::Hvg, res_key, None)?, &table, TableLayout::Columns)
}

fn decode_hvg(store: &ObjectStore<'_>, res_key: &str) -> Result<Option<AnalysisResult>> {
    read_flat_table(store, AnalysisKind::Hvg, res_key).map(|t| t.map(AnalysisResult::Hvg))
}

fn encode_embedding(store: &ObjectStore<'_>, res_key: &str, result: &AnalysisResult) -> Result<()> {
    match result {
        AnalysisResult::Pca(arr) => store.write_array(&key(AnalysisKind::Pca, res_key, None)?, arr),
        AnalysisResult::Umap(arr) => {
            store.write_array(&key(AnalysisKind::Umap, res_key, None)?, arr)
        }
        other => Err(mismatch(AnalysisKind::Pca, res_key, other)),
    }
}

fn decode_pca(store: &ObjectStore<'_>, res_key: &str) -> Result<Option<AnalysisResult>> {
    let k = key(AnalysisKind::Pca, res_key, None)?;
    if !store.contains(&k) {
        return Ok(None);
    }
    store.read_array(&k).map(|a| Some(AnalysisResult::Pca(a)))
}

fn decode_umap(store: &ObjectStore<'_>, res_key: &str) -> Result<Option<AnalysisResult>> {
    let k = key(AnalysisKind::Umap, res_key, None)?;
    if !store.contains(&k) {
        return Ok(None);
    }
    store.read_array(&k).map(|a| Some(AnalysisResult::Umap(a)))
}

fn encode_neighbors(store: &ObjectStore<'_>, res_key: &str, result: &AnalysisResult) -> Result<()> {
    let AnalysisResult::Neighbors(graphs) = result else {
        return Err(mismatch(AnalysisKind::Neighbors, res_key, result));
    };
    for (name, matrix) in graphs {
        store.write_matrix(&key(AnalysisKind::Neighbors, res_key, Some(name.as_str()))?, matrix)?;
    }
    Ok(())
}

fn decode_neighbors(store: &ObjectStore<'_>, res_key: &str) -> Result<Option<AnalysisResult>> {
    let names = sub_keys(store, AnalysisKind::Neighbors, res_key)?;
    if names.is_empty() {
        return Ok(None);
    }
    let mut graphs = BTreeMap::new();
    for name in names {
        let k = key(AnalysisKind::Neighbors, res_key, Some(name.as_str()))?;
        let matrix = store.read_matrix(&k)?;
        graphs.insert(name, matrix);
    }
    Ok(Some(AnalysisResult::Neighbors(graphs)))
}

fn encode_cluster(store: &ObjectStore<'_>, res_key: &str, result: &AnalysisResult) -> Result<()> {
    let AnalysisResult::Cluster(table) = result else {
        return Err(mismatch(AnalysisKind::Cluster, res_key, result));
    };
    store.write_table(&key(AnalysisKind::Cluster, res_key, None)?, table, TableLayout::Columns)
}

fn decode_cluster(store: &ObjectStore<'_>, res_key: &str) -> Result<Option<AnalysisResult>> {
    read_flat_table(store, AnalysisKind::Cluster, res_key).map(|t| t.map(AnalysisResult::Cluster))
}

fn encode_gene_exp_cluster(
    store: &ObjectStore<'_>,
    res_key: &str,
    result: &AnalysisResult,
) -> Result<()> {
    let AnalysisResult::GeneExpCluster(table) = result else {
        return Err(mismatch(AnalysisKind::GeneExpCluster, res_key, result));
    };
    store.write_table(
        &key(AnalysisKind::GeneExpCluster, res_key, None)?,
        table,
        TableLayout::Matrix,
    )
}

fn decode_gene_exp_cluster(
    store: &ObjectStore<'_>,
    res_key: &str,
) -> Result<Option<AnalysisResult>> {
    read_flat_table(store, AnalysisKind::GeneExpCluster, res_key)
        .map(|t| t.map(AnalysisResult::GeneExpCluster))
}

fn encode_marker_genes(
    store: &ObjectStore<'_>,
    res_key: &str,
    result: &AnalysisResult,
) -> Result<()> {
    let AnalysisResult::MarkerGenes(markers) = result else {
        return Err(mismatch(AnalysisKind::MarkerGenes, res_key, result));
    };
    let kind = AnalysisKind::MarkerGenes;
    let mut record: Vec<String> = Vec::with_capacity(markers.clusters.len() + 1);
    for (cluster, _) in &markers.clusters {
        if cluster == PARAMETERS || cluster == CLUSTERS_RECORD {
            return Err(StereoError::InvalidInput(format!(
                "marker gene comparison '{cluster}' of '{res_key}' uses a reserved name"
            )));
        }
        record.push(cluster.clone());
    }
    if markers.parameters.is_some() {
        record.push(PARAMETERS.to_string());
    }

    store.write_strings(&key(kind, res_key, Some(CLUSTERS_RECORD))?, &record)?;
    for (cluster, table) in &markers.clusters {
        let k = key(kind, res_key, Some(cluster.as_str()))?;
        store.write_table(&k, table, TableLayout::Columns)?;
    }
    if let Some(params) = &markers.parameters {
        write_parameters(store, &key(kind, res_key, Some(PARAMETERS))?, params)?;
    }
    Ok(())
}

fn decode_marker_genes(store: &ObjectStore<'_>, res_key: &str) -> Result<Option<AnalysisResult>> {
    let kind = AnalysisKind::MarkerGenes;
    let record_key = key(kind, res_key, Some(CLUSTERS_RECORD))?;
    if !store.contains(&record_key) {
        return Ok(None);
    }
    let mut markers = MarkerGenes::default();
    for cluster in store.read_strings(&record_key)? {
        let k = key(kind, res_key, Some(cluster.as_str()))?;
        if cluster == PARAMETERS {
            markers.parameters = Some(read_parameters(store, &k)?);
        } else {
            markers.clusters.push((cluster, store.read_table(&k)?));
        }
    }
    Ok(Some(AnalysisResult::MarkerGenes(markers)))
}

fn encode_cell_communication(
    store: &ObjectStore<'_>,
    res_key: &str,
    result: &AnalysisResult,
) -> Result<()> {
    let AnalysisResult::CellCellCommunication(ccc) = result else {
        return Err(mismatch(AnalysisKind::CellCellCommunication, res_key, result));
    };
    let kind = AnalysisKind::CellCellCommunication;
    if ccc.tables.contains_key(PARAMETERS) {
        return Err(StereoError::InvalidInput(format!(
            "cell-cell communication table '{PARAMETERS}' of '{res_key}' uses a reserved name"
        )));
    }
    for (name, table) in &ccc.tables {
        store.write_table(&key(kind, res_key, Some(name.as_str()))?, table, TableLayout::Columns)?;
    }
    if let Some(params) = &ccc.parameters {
        write_parameters(store, &key(kind, res_key, Some(PARAMETERS))?, params)?;
    }
    Ok(())
}

fn decode_cell_communication(
    store: &ObjectStore<'_>,
    res_key: &str,
) -> Result<Option<AnalysisResult>> {
    let kind = AnalysisKind::CellCellCommunication;
    let names = sub_keys(store, kind, res_key)?;
    if names.is_empty() {
        return Ok(None);
    }
    let mut ccc = CellCommunication::default();
    for name in names {
        let k = key(kind, res_key, Some(name.as_str()))?;
        if name == PARAMETERS {
            ccc.parameters = Some(read_parameters(store, &k)?);
        } else {
            ccc.tables.insert(name, store.read_table(&k)?);
        }
    }
    Ok(Some(AnalysisResult::CellCellCommunication(ccc)))
}

fn encode_regulatory_network(
    store: &ObjectStore<'_>,
    res_key: &str,
    result: &AnalysisResult,
) -> Result<()> {
    let AnalysisResult::RegulatoryNetworkInference(rni) = result else {
        return Err(mismatch(AnalysisKind::RegulatoryNetworkInference, res_key, result));
    };
    let kind = AnalysisKind::RegulatoryNetworkInference;
    if rni.tables.contains_key(REGULONS) {
        return Err(StereoError::InvalidInput(format!(
            "regulatory network table '{REGULONS}' of '{res_key}' uses a reserved name"
        )));
    }
    for (name, table) in &rni.tables {
        store.write_table(&key(kind, res_key, Some(name.as_str()))?, table, TableLayout::Columns)?;
    }
    if let Some(regulons) = &rni.regulons {
        store.write_scalar(
            &key(kind, res_key, Some(REGULONS))?,
            &Scalar::Text(regulons.clone()),
        )?;
    }
    Ok(())
}

fn decode_regulatory_network(
    store: &ObjectStore<'_>,
    res_key: &str,
) -> Result<Option<AnalysisResult>> {
    let kind = AnalysisKind::RegulatoryNetworkInference;
    let names = sub_keys(store, kind, res_key)?;
    if names.is_empty() {
        return Ok(None);
    }
    let mut rni = RegulatoryNetwork::default();
    for name in names {
        let k = key(kind, res_key, Some(name.as_str()))?;
        if name == REGULONS {
            rni.regulons = Some(store.read_text(&k)?);
        } else {
            rni.tables.insert(name, store.read_table(&k)?);
        }
    }
    Ok(Some(AnalysisResult::RegulatoryNetworkInference(rni)))
}

fn read_flat_table(
    store: &ObjectStore<'_>,
    kind: AnalysisKind,
    res_key: &str,
) -> Result<Option<Table>> {
    let k = key(kind, res_key, None)?;
    if !store.contains(&k) {
        return Ok(None);
    }
    store.read_table(&k).map(Some)
}

/// Store run parameters as a `name`/`value`/`dtype` table.
fn write_parameters(store: &ObjectStore<'_>, key: &str, params: &[(String, Scalar)]) -> Result<()> {
    let table = Table::with_row_numbers(params.len())
        .with_column(
            "name",
            ColumnData::Strings(params.iter().map(|(n, _)| n.clone()).collect()),
        )?
        .with_column(
            "value",
            ColumnData::Strings(params.iter().map(|(_, v)| v.to_string()).collect()),
        )?
        .with_column(
            "dtype",
            ColumnData::Strings(params.iter().map(|(_, v)| v.dtype().to_string()).collect()),
        )?;
    store.write_table(key, &table, TableLayout::Columns)
}

fn read_parameters(store: &ObjectStore<'_>, key: &str) -> Result<Vec<(String, Scalar)>> {
    let table = store.read_table(key)?;
    let text = |name: &str| -> Result<Vec<String>> {
        table
            .column(name)
            .map(|c| c.to_text())
            .ok_or_else(|| StereoError::Parse(format!("parameters '{key}' lack a '{name}' column")))
    };
    let names = text("name")?;
    let values = text("value")?;
    let dtypes = table
        .column("dtype")
        .map(|c| c.to_text())
        .unwrap_or_else(|| vec!["str".to_string(); names.len()]);

    names
        .into_iter()
        .zip(values)
        .zip(dtypes)
        .map(|((name, value), dtype)| Ok((name, Scalar::parse_typed(&dtype, &value)?)))
        .collect()
}
