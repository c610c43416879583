//! Single-dataset container files.
//!
//! A container holds one [`StereoExpData`] as addressed members of the root
//! group: `sn`, `genes`, `cells`, `position`, `exp_matrix`, `bin_type`,
//! `bin_size` and `merged`, the `@raw` variants of the raw snapshot, and the
//! `key_record` catalog followed by one member per stored result object.
//! The root carries a `version` and a `domain` attribute.
//!
//! A merged dataset is written as one file per batch unless batch splitting
//! is turned off in [`WriteOptions`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hdf5::{File, Group};
use tracing::{debug, info};

use stereo_core::{Result, StereoError};
use stereo_omics::{
    ColumnData, KeyRecord, RawSnapshot, SampleNames, Scalar, StereoExpData, Table,
};

use crate::codec::{h5err, open_file, read_attr_str, write_attr_str};
use crate::config::WriteOptions;
use crate::key::ObjectKey;
use crate::results::{read_results, write_results};
use crate::store::{ObjectStore, TableLayout};

/// Container format version stamped on the root group.
pub const FORMAT_VERSION: i64 = 1;
/// Domain tag of single-dataset containers.
pub const EXP_DATA_DOMAIN: &str = "stereo_exp_data";

const SN: &str = "sn";
const GENES: &str = "genes";
const CELLS: &str = "cells";
const POSITION: &str = "position";
const EXP_MATRIX: &str = "exp_matrix";
const BIN_TYPE: &str = "bin_type";
const BIN_SIZE: &str = "bin_size";
const MERGED: &str = "merged";
/// Batch id recorded for a dataset with a single sample id.
const SINGLE_SAMPLE_BATCH: &str = "-1";

/// Write `data` to the path named by `options` (or by the dataset).
///
/// Returns the paths written: one, or one per batch when a merged dataset is
/// split. Per-batch files are named `{stem}-{sample}{ext}` and written one
/// after another; a failure leaves the earlier ones in place.
///
/// # Errors
///
/// Returns [`StereoError::Config`] before touching any file when no output
/// path is set, and [`StereoError::MissingResult`] when the key record lists
/// a result the dataset does not hold.
pub fn write_h5ad(data: &StereoExpData, options: &WriteOptions) -> Result<Vec<PathBuf>> {
    let output = options.resolve_output(data)?;

    if data.merged && options.split_batches {
        let mut written = Vec::new();
        for (batch, part) in data.split_batches()? {
            let sample = match &part.sn {
                Some(SampleNames::Single(sn)) => sn.clone(),
                _ => batch.clone(),
            };
            let path = batch_output(&output, &sample);
            info!(batch = %batch, path = %path.display(), "writing batch");
            let batch_options = WriteOptions {
                output: Some(path),
                split_batches: false,
                ..options.clone()
            };
            written.extend(write_h5ad(&part, &batch_options)?);
        }
        return Ok(written);
    }

    let file = File::create(&output).map_err(|e| {
        StereoError::Storage(format!("cannot create {}: {e}", output.display()))
    })?;
    stamp(&file, EXP_DATA_DOMAIN)?;
    write_exp_data(
        &file,
        data,
        options.use_raw,
        options.use_result,
        options.effective_key_record(data),
    )?;
    debug!(path = %output.display(), "wrote container");
    Ok(vec![output])
}

/// Read a container written by [`write_h5ad`].
pub fn read_h5ad<P: AsRef<Path>>(path: P) -> Result<StereoExpData> {
    let path = path.as_ref();
    let file = open_file(path, false)?;
    check_domain(&file, EXP_DATA_DOMAIN)?;
    let mut data = read_exp_data(&file)?;
    data.output = Some(path.to_path_buf());
    Ok(data)
}

/// `out.h5ad` + `D1` → `out-D1.h5ad`.
pub fn batch_output(output: &Path, sample: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{stem}-{sample}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{sample}"),
    };
    output.with_file_name(name)
}

/// Stamp the format version and domain tag on a container root.
pub(crate) fn stamp(group: &Group, domain: &str) -> Result<()> {
    group
        .new_attr::<i64>()
        .create("version")
        .and_then(|a| a.write_scalar(&FORMAT_VERSION))
        .map_err(h5err)?;
    write_attr_str!(group, "domain", domain)?;
    Ok(())
}

/// Reject a container stamped with another domain. Unstamped files pass.
pub(crate) fn check_domain(group: &Group, expected: &str) -> Result<()> {
    match read_attr_str(group, "domain") {
        Some(domain) if domain != expected => Err(StereoError::Parse(format!(
            "container holds '{domain}', expected '{expected}'"
        ))),
        _ => Ok(()),
    }
}

/// Write one dataset into `group`.
pub(crate) fn write_exp_data(
    group: &Group,
    data: &StereoExpData,
    use_raw: bool,
    use_result: bool,
    key_record: &KeyRecord,
) -> Result<()> {
    let store = ObjectStore::new(group);

    if let Some(sn) = &data.sn {
        store.write_table(SN, &sn_table(sn)?, TableLayout::Matrix)?;
    }
    store.write_table(GENES, &data.genes().with_intervals_as_text(), TableLayout::Columns)?;
    store.write_table(CELLS, &data.cells().with_intervals_as_text(), TableLayout::Columns)?;
    store.write_array(POSITION, data.position())?;
    store.write_matrix(EXP_MATRIX, data.exp_matrix())?;
    store.write_scalar(BIN_TYPE, &Scalar::Text(data.bin_type.as_str().to_string()))?;
    store.write_scalar(BIN_SIZE, &Scalar::Int(i64::from(data.bin_size)))?;
    store.write_scalar(MERGED, &Scalar::Bool(data.merged))?;

    if use_raw {
        if let Some(raw) = data.raw() {
            write_raw(&store, data, raw)?;
        }
    }
    if use_result {
        write_results(&store, data.results(), key_record)?;
    }
    Ok(())
}

/// Write the raw snapshot, skipping tables equal to the current ones.
fn write_raw(store: &ObjectStore<'_>, data: &StereoExpData, raw: &RawSnapshot) -> Result<()> {
    let same_genes = raw.gene_names() == data.gene_names();
    let same_cells = raw.cell_names() == data.cell_names();
    if !same_genes {
        store.write_table(
            &raw_key(GENES)?,
            &raw.genes().with_intervals_as_text(),
            TableLayout::Columns,
        )?;
    }
    if !same_cells {
        store.write_table(
            &raw_key(CELLS)?,
            &raw.cells().with_intervals_as_text(),
            TableLayout::Columns,
        )?;
        store.write_array(&raw_key(POSITION)?, raw.position())?;
    }
    store.write_matrix(&raw_key(EXP_MATRIX)?, raw.exp_matrix())?;
    debug!(same_genes, same_cells, "wrote raw snapshot");
    Ok(())
}

/// Read one dataset from `group`. Optional members that are absent are
/// left at their defaults.
pub(crate) fn read_exp_data(group: &Group) -> Result<StereoExpData> {
    let store = ObjectStore::new(group);

    let mut data = StereoExpData::new(
        store.read_table(GENES)?,
        store.read_table(CELLS)?,
        store.read_array(POSITION)?,
        store.read_matrix(EXP_MATRIX)?,
    )?;
    if store.contains(BIN_TYPE) {
        data.bin_type = store.read_text(BIN_TYPE)?.parse()?;
    }
    if store.contains(BIN_SIZE) {
        data.bin_size = match store.read_scalar(BIN_SIZE)? {
            Scalar::Int(v) => u32::try_from(v)
                .map_err(|_| StereoError::Parse(format!("bin size {v} out of range")))?,
            other => {
                return Err(StereoError::Parse(format!(
                    "bin size is a {} scalar, expected int",
                    other.dtype()
                )))
            }
        };
    }
    if store.contains(MERGED) {
        data.merged = store.read_bool(MERGED)?;
    }
    if store.contains(SN) {
        data.sn = Some(parse_sn_table(&store.read_table(SN)?)?);
    }

    let raw_matrix = raw_key(EXP_MATRIX)?;
    if store.contains(&raw_matrix) {
        let genes = read_raw_table(&store, GENES, data.genes())?;
        let cells = read_raw_table(&store, CELLS, data.cells())?;
        let position_key = raw_key(POSITION)?;
        let position = if store.contains(&position_key) {
            store.read_array(&position_key)?
        } else {
            data.position().clone()
        };
        let raw = RawSnapshot::new(genes, cells, position, store.read_matrix(&raw_matrix)?)?;
        data.set_raw(raw);
    }

    let (record, results) = read_results(&store)?;
    *data.key_record_mut() = record;
    for (res_key, result) in results {
        data.insert_result_unrecorded(&res_key, result);
    }
    Ok(data)
}

fn raw_key(field: &str) -> Result<String> {
    ObjectKey::raw(field).map(|k| k.to_string())
}

fn read_raw_table(store: &ObjectStore<'_>, field: &str, current: &Table) -> Result<Table> {
    let key = raw_key(field)?;
    if store.contains(&key) {
        store.read_table(&key)
    } else {
        Ok(current.clone())
    }
}

/// Sample ids as a `batch`/`sn` table; a single id is recorded under batch `-1`.
fn sn_table(sn: &SampleNames) -> Result<Table> {
    let pairs: Vec<(String, String)> = match sn {
        SampleNames::Single(s) => vec![(SINGLE_SAMPLE_BATCH.to_string(), s.clone())],
        SampleNames::PerBatch(map) => map.iter().map(|(b, s)| (b.clone(), s.clone())).collect(),
    };
    Table::with_row_numbers(pairs.len())
        .with_column(
            "batch",
            ColumnData::Strings(pairs.iter().map(|(b, _)| b.clone()).collect()),
        )?
        .with_column(
            "sn",
            ColumnData::Strings(pairs.into_iter().map(|(_, s)| s).collect()),
        )
}

fn parse_sn_table(table: &Table) -> Result<SampleNames> {
    let column = |name: &str| {
        table
            .column(name)
            .map(|c| c.to_text())
            .ok_or_else(|| StereoError::Parse(format!("sn table lacks a '{name}' column")))
    };
    let batches = column("batch")?;
    let samples = column("sn")?;
    if let ([batch], [sample]) = (batches.as_slice(), samples.as_slice()) {
        if batch == SINGLE_SAMPLE_BATCH {
            return Ok(SampleNames::Single(sample.clone()));
        }
    }
    Ok(SampleNames::PerBatch(
        batches.into_iter().zip(samples).collect::<BTreeMap<_, _>>(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use stereo_omics::{
        AnalysisResult, BinType, MatrixData, SparseFormat, SparseMatrix, BATCH_COLUMN,
    };
    use tempfile::{tempdir, TempDir};

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.h5ad");
        (dir, path)
    }

    fn sample_data(format: Option<SparseFormat>) -> StereoExpData {
        let dense = array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0]];
        let exp = match format {
            Some(f) => MatrixData::Sparse(SparseMatrix::from_dense(f, &dense)),
            None => MatrixData::Dense(dense),
        };
        let genes = Table::new("gene_name", vec!["Gapdh".into(), "Actb".into(), "Mt-co1".into()])
            .with_column("n_cells", ColumnData::Integer(vec![1, 1, 1]))
            .unwrap();
        let cells = Table::new("cell_name", vec!["c1".into(), "c2".into()])
            .with_column("total_counts", ColumnData::Numeric(vec![3.0, 3.0]))
            .unwrap();
        let mut data =
            StereoExpData::new(genes, cells, array![[10.0, 20.0], [30.0, 40.0]], exp).unwrap();
        data.bin_type = BinType::CellBins;
        data.bin_size = 50;
        data.sn = Some(SampleNames::Single("SS200000135TL_D1".into()));
        data
    }

    fn merged_data() -> StereoExpData {
        let dense = array![[1.0, 0.0], [0.0, 2.0], [3.0, 0.0]];
        let cells = Table::new("cell_name", vec!["a".into(), "b".into(), "c".into()])
            .with_column(
                BATCH_COLUMN,
                ColumnData::Strings(vec!["0".into(), "1".into(), "0".into()]),
            )
            .unwrap();
        let mut data = StereoExpData::new(
            Table::new("gene_name", vec!["g1".into(), "g2".into()]),
            cells,
            Array2::zeros((3, 2)),
            MatrixData::Sparse(SparseMatrix::from_dense(SparseFormat::Csr, &dense)),
        )
        .unwrap();
        data.merged = true;
        data.sn = Some(SampleNames::PerBatch(BTreeMap::from([
            ("0".to_string(), "D1".to_string()),
            ("1".to_string(), "B5".to_string()),
        ])));
        data
    }

    #[test]
    fn roundtrip_every_storage() {
        for format in [None, Some(SparseFormat::Csr), Some(SparseFormat::Csc)] {
            let (_tmp, path) = temp_path();
            let data = sample_data(format);
            let written = write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();
            assert_eq!(written, vec![path.clone()]);

            let back = read_h5ad(&path).unwrap();
            assert_eq!(back.genes(), data.genes());
            assert_eq!(back.cells(), data.cells());
            assert_eq!(back.position(), data.position());
            assert_eq!(back.exp_matrix(), data.exp_matrix());
            assert_eq!(back.exp_matrix().sparse_format(), format);
            assert_eq!(back.bin_type, BinType::CellBins);
            assert_eq!(back.bin_size, 50);
            assert!(!back.merged);
            assert_eq!(back.sn, data.sn);
        }
    }

    #[test]
    fn root_is_stamped() {
        let (_tmp, path) = temp_path();
        write_h5ad(&sample_data(None), &WriteOptions::to_path(&path)).unwrap();
        let file = File::open(&path).unwrap();
        let version = file.attr("version").unwrap().read_scalar::<i64>().unwrap();
        assert_eq!(version, FORMAT_VERSION);
        assert_eq!(read_attr_str(&file, "domain").as_deref(), Some(EXP_DATA_DOMAIN));
    }

    #[test]
    fn raw_equal_tables_are_omitted() {
        let (_tmp, path) = temp_path();
        let mut data = sample_data(Some(SparseFormat::Csr));
        data.snapshot_raw();
        write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();

        let file = File::open(&path).unwrap();
        let store = ObjectStore::new(&file);
        assert!(!store.contains("genes@raw"));
        assert!(!store.contains("cells@raw"));
        assert!(!store.contains("position@raw"));
        assert!(store.contains("exp_matrix@raw"));

        let back = read_h5ad(&path).unwrap();
        assert_eq!(back.raw(), data.raw());
    }

    #[test]
    fn raw_with_different_cells() {
        let (_tmp, path) = temp_path();
        let mut data = sample_data(None);
        let raw = RawSnapshot::new(
            data.genes().clone(),
            Table::new("cell_name", vec!["c0".into(), "c1".into(), "c2".into()]),
            Array2::zeros((3, 2)),
            MatrixData::Dense(Array2::ones((3, 3))),
        )
        .unwrap();
        data.set_raw(raw);
        write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();

        let file = File::open(&path).unwrap();
        let store = ObjectStore::new(&file);
        assert!(!store.contains("genes@raw"));
        assert!(store.contains("cells@raw"));
        assert!(store.contains("position@raw"));

        let back = read_h5ad(&path).unwrap();
        assert_eq!(back.raw().unwrap().cell_names(), &["c0", "c1", "c2"]);
        assert_eq!(back.raw().unwrap().gene_names(), data.gene_names());
    }

    #[test]
    fn raw_skipped_when_disabled() {
        let (_tmp, path) = temp_path();
        let mut data = sample_data(None);
        data.snapshot_raw();
        let options = WriteOptions {
            use_raw: false,
            ..WriteOptions::to_path(&path)
        };
        write_h5ad(&data, &options).unwrap();
        assert!(read_h5ad(&path).unwrap().raw().is_none());
    }

    #[test]
    fn catalog_filtering_through_file() {
        let (_tmp, path) = temp_path();
        let mut data = sample_data(None);
        data.add_result("pca", AnalysisResult::Pca(array![[0.1], [0.2]]));
        data.key_record_mut().insert("invented", "pca");
        write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();

        let back = read_h5ad(&path).unwrap();
        assert_eq!(back.key_record().get("pca").unwrap(), &["pca"]);
        assert!(back.key_record().get("invented").is_none());
        assert_eq!(back.result("pca"), data.result("pca"));
    }

    #[test]
    fn caller_key_record_selects_results() {
        let (_tmp, path) = temp_path();
        let mut data = sample_data(None);
        data.add_result("pca", AnalysisResult::Pca(array![[0.1], [0.2]]));
        data.add_result("umap", AnalysisResult::Umap(array![[1.0, 1.0], [2.0, 2.0]]));
        let options = WriteOptions {
            key_record: Some(KeyRecord::new().with("umap", "umap")),
            ..WriteOptions::to_path(&path)
        };
        write_h5ad(&data, &options).unwrap();

        let back = read_h5ad(&path).unwrap();
        assert!(back.result("pca").is_none());
        assert!(back.result("umap").is_some());
    }

    #[test]
    fn missing_result_aborts_write() {
        let (_tmp, path) = temp_path();
        let mut data = sample_data(None);
        data.key_record_mut().insert("pca", "X");
        let err = write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap_err();
        assert!(matches!(err, StereoError::MissingResult(ref k) if k == "X"));

        let file = File::open(&path).unwrap();
        assert!(!ObjectStore::new(&file).contains("key_record"));
    }

    #[test]
    fn missing_output_is_a_config_error() {
        let err = write_h5ad(&sample_data(None), &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, StereoError::Config(_)));
        let err = write_h5ad(&merged_data(), &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, StereoError::Config(_)));
    }

    #[test]
    fn merged_data_splits_per_batch() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.h5");
        let written = write_h5ad(&merged_data(), &WriteOptions::to_path(&output)).unwrap();
        assert_eq!(
            written,
            vec![dir.path().join("out-D1.h5"), dir.path().join("out-B5.h5")]
        );
        assert!(!output.exists());

        let first = read_h5ad(&written[0]).unwrap();
        assert!(!first.merged);
        assert_eq!(first.n_cells(), 2);
        assert_eq!(first.sn, Some(SampleNames::Single("D1".into())));
        let second = read_h5ad(&written[1]).unwrap();
        assert_eq!(second.n_cells(), 1);
    }

    #[test]
    fn merged_data_without_split() {
        let (_tmp, path) = temp_path();
        let data = merged_data();
        let options = WriteOptions {
            split_batches: false,
            ..WriteOptions::to_path(&path)
        };
        write_h5ad(&data, &options).unwrap();
        let back = read_h5ad(&path).unwrap();
        assert!(back.merged);
        assert_eq!(back.sn, data.sn);
        assert_eq!(back.n_cells(), 3);
    }

    #[test]
    fn empty_dataset_roundtrip() {
        let (_tmp, path) = temp_path();
        let data = StereoExpData::new(
            Table::new("gene_name", vec!["g1".into()]),
            Table::new("cell_name", vec![]),
            Array2::zeros((0, 2)),
            MatrixData::Sparse(SparseMatrix::new(SparseFormat::Csr, 0, 1)),
        )
        .unwrap();
        write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();

        let file = File::open(&path).unwrap();
        let store = ObjectStore::new(&file);
        assert!(store.contains("exp_matrix"));
        assert!(store.contains("cells"));

        let back = read_h5ad(&path).unwrap();
        assert_eq!(back.shape(), (0, 1));
        assert_eq!(back.n_genes(), 1);
    }

    #[test]
    fn zero_gene_roundtrip() {
        let matrices = [
            MatrixData::Dense(Array2::zeros((2, 0))),
            MatrixData::Sparse(SparseMatrix::new(SparseFormat::Csc, 2, 0)),
        ];
        for exp in matrices {
            let (_tmp, path) = temp_path();
            let data = StereoExpData::new(
                Table::new("gene_name", vec![]),
                Table::new("cell_name", vec!["c1".into(), "c2".into()]),
                array![[0.0, 0.0], [1.0, 1.0]],
                exp.clone(),
            )
            .unwrap();
            write_h5ad(&data, &WriteOptions::to_path(&path)).unwrap();

            let file = File::open(&path).unwrap();
            let store = ObjectStore::new(&file);
            assert!(store.contains("genes"));
            assert!(store.contains("exp_matrix"));

            let back = read_h5ad(&path).unwrap();
            assert_eq!(back.shape(), (2, 0));
            assert_eq!(back.n_genes(), 0);
            assert_eq!(back.exp_matrix(), &exp);
            assert_eq!(back.cells().index(), data.cells().index());
        }
    }

    #[test]
    fn batch_output_names() {
        assert_eq!(
            batch_output(Path::new("/tmp/out.h5ad"), "D1"),
            PathBuf::from("/tmp/out-D1.h5ad")
        );
        assert_eq!(batch_output(Path::new("out"), "D1"), PathBuf::from("out-D1"));
    }

    #[test]
    fn nonexistent_file_error() {
        let err = read_h5ad("/nonexistent/path/file.h5ad").unwrap_err();
        assert!(matches!(err, StereoError::Io(_)));
    }
}
