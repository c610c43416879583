//! GEF count files: a compact per-gene expression layout.
//!
//! [`write_mid_gef`] stores a dataset's raw (mid) counts under
//! `geneExp/bin{N}` as two compound tables:
//!
//! - `expression`: `(x: u32, y: u32, count: u16)`, one record per non-zero
//!   entry, grouped by gene in gene order
//! - `gene`: `(gene: S32, offset: u32, count: u32)`, where gene `i` owns
//!   `expression[offset .. offset + count]`
//!
//! [`patch_cluster_ids`] rewrites the `clusterID` field of an existing
//! `cellBin/cell` table in place.

use std::collections::HashMap;
use std::path::Path;

use hdf5::types::{FixedAscii, TypeDescriptor};
use hdf5::File;
use ndarray::Array1;
use tracing::{debug, info, warn};

use stereo_core::{Result, StereoError};
use stereo_omics::{AnalysisResult, Scalar, StereoExpData};

use crate::codec::{h5err, open_file, write_attr_str};

/// Format version stamped on GEF files.
pub const GEF_VERSION: u32 = 2;
/// Omics tag stamped on GEF files.
pub const GEF_OMICS: &str = "Transcriptomics";
/// Byte width of the gene name field.
pub const GENE_NAME_LEN: usize = 32;

const GENE_EXP_GROUP: &str = "geneExp";
const CELL_BIN_GROUP: &str = "cellBin";
const CELL_DATASET: &str = "cell";
const CLUSTER_ID_FIELD: &str = "clusterID";

/// One non-zero count at a spatial position.
#[derive(hdf5::H5Type, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ExpressionRecord {
    pub x: u32,
    pub y: u32,
    pub count: u16,
}

/// A gene and the run of expression records it owns.
#[derive(hdf5::H5Type, Clone, Debug, PartialEq)]
#[repr(C)]
pub struct GeneRecord {
    pub gene: FixedAscii<GENE_NAME_LEN>,
    pub offset: u32,
    pub count: u32,
}

/// The contents of one `geneExp/bin{N}` group.
#[derive(Debug, Clone, PartialEq)]
pub struct GefBin {
    pub expression: Vec<ExpressionRecord>,
    pub genes: Vec<GeneRecord>,
}

/// Coordinates read from `cellBin/cell`; other fields are left alone.
#[derive(hdf5::H5Type, Clone, Copy, Debug)]
#[repr(C)]
struct CellCoordinate {
    x: i32,
    y: i32,
}

/// The one field overwritten by a cluster patch.
#[derive(hdf5::H5Type, Clone, Copy, Debug)]
#[repr(C)]
#[allow(non_snake_case)]
struct CellClusterId {
    clusterID: u16,
}

/// Pack a cell's coordinates into its 64-bit id: x high, y low.
pub fn cell_id(x: i32, y: i32) -> u64 {
    ((x as u32 as u64) << 32) | (y as u32 as u64)
}

/// Build the per-gene layout without touching disk.
///
/// # Errors
///
/// Counts must be integers in `0..=65535` and coordinates non-negative
/// integers that fit in `u32`. Gene names must be ASCII; longer names are
/// cut to 32 bytes.
pub fn build_gef_bin(data: &StereoExpData) -> Result<GefBin> {
    let csc = data.exp_matrix().to_csc();
    let position = data.position();
    if position.ncols() < 2 {
        return Err(StereoError::ShapeMismatch(format!(
            "positions have {} columns, expected x and y",
            position.ncols()
        )));
    }

    let mut expression = Vec::with_capacity(csc.nnz());
    let mut genes = Vec::with_capacity(data.n_genes());
    for (j, name) in data.gene_names().iter().enumerate() {
        let offset = expression.len();
        let (rows, values) = csc.major_slice(j);
        for (&row, &value) in rows.iter().zip(values) {
            if value == 0.0 {
                continue;
            }
            expression.push(ExpressionRecord {
                x: coordinate(position[[row, 0]])?,
                y: coordinate(position[[row, 1]])?,
                count: count(value, name)?,
            });
        }
        genes.push(GeneRecord {
            gene: gene_name(name)?,
            offset: to_u32(offset, "expression offset")?,
            count: to_u32(expression.len() - offset, "gene run length")?,
        });
    }
    Ok(GefBin { expression, genes })
}

/// Write the dataset's counts to a new GEF file at `output`.
///
/// The dataset's `attr` entries are copied onto the `expression` table.
pub fn write_mid_gef<P: AsRef<Path>>(data: &StereoExpData, output: P) -> Result<()> {
    info!(
        "the GEF file holds one mid-count expression matrix; \
         make sure the expression matrix is not normalized"
    );
    let bin = build_gef_bin(data)?;
    let output = output.as_ref();

    let file = File::create(output)
        .map_err(|e| StereoError::Storage(format!("cannot create {}: {e}", output.display())))?;
    let bin_group = file
        .create_group(GENE_EXP_GROUP)
        .and_then(|g| g.create_group(&format!("bin{}", data.bin_size)))
        .map_err(h5err)?;

    let expression = bin_group
        .new_dataset_builder()
        .with_data(&Array1::from(bin.expression))
        .create("expression")
        .map_err(h5err)?;
    bin_group
        .new_dataset_builder()
        .with_data(&Array1::from(bin.genes))
        .create("gene")
        .map_err(h5err)?;

    for (key, value) in &data.attr {
        match value {
            Scalar::Bool(v) => expression
                .new_attr::<bool>()
                .create(key.as_str())
                .and_then(|a| a.write_scalar(v)),
            Scalar::Int(v) => expression
                .new_attr::<i64>()
                .create(key.as_str())
                .and_then(|a| a.write_scalar(v)),
            Scalar::Float(v) => expression
                .new_attr::<f64>()
                .create(key.as_str())
                .and_then(|a| a.write_scalar(v)),
            Scalar::Text(v) => {
                write_attr_str!(expression, key.as_str(), v)?;
                Ok(())
            }
        }
        .map_err(h5err)?;
    }

    file.new_attr::<u32>()
        .create("version")
        .and_then(|a| a.write_scalar(&GEF_VERSION))
        .map_err(h5err)?;
    write_attr_str!(file, "omics", GEF_OMICS)?;
    debug!(path = %output.display(), bin_size = data.bin_size, "wrote GEF");
    Ok(())
}

/// Read back one `geneExp/bin{N}` group.
pub fn read_gef_bin<P: AsRef<Path>>(path: P, bin_size: u32) -> Result<GefBin> {
    let path = path.as_ref();
    let file = open_file(path, false)?;
    let group = file
        .group(&format!("{GENE_EXP_GROUP}/bin{bin_size}"))
        .map_err(|_| StereoError::KeyNotFound(format!("{GENE_EXP_GROUP}/bin{bin_size}")))?;
    let expression = group
        .dataset("expression")
        .and_then(|ds| ds.read_1d::<ExpressionRecord>())
        .map_err(h5err)?
        .to_vec();
    let genes = group
        .dataset("gene")
        .and_then(|ds| ds.read_1d::<GeneRecord>())
        .map_err(h5err)?
        .to_vec();
    Ok(GefBin { expression, genes })
}

/// Cell id → 1-based cluster id, from a `cluster` result.
///
/// The result table's `bins` column holds packed cell ids and its `group`
/// column 0-based cluster numbers.
pub fn cluster_assignment(data: &StereoExpData, res_key: &str) -> Result<HashMap<u64, u16>> {
    let result = data
        .result(res_key)
        .ok_or_else(|| StereoError::MissingResult(res_key.to_string()))?;
    let AnalysisResult::Cluster(table) = result else {
        return Err(StereoError::KindMismatch(format!(
            "'{res_key}' holds a {} result, expected cluster",
            result.kind()
        )));
    };
    let column = |name: &str| {
        table
            .column(name)
            .map(|c| c.to_text())
            .ok_or_else(|| StereoError::Parse(format!("cluster result lacks a '{name}' column")))
    };

    let mut assignment = HashMap::new();
    for (bin, group) in column("bins")?.iter().zip(column("group")?) {
        let id = bin
            .parse::<u64>()
            .map_err(|e| StereoError::Parse(format!("cell id '{bin}': {e}")))?;
        let group = group
            .parse::<u16>()
            .map_err(|e| StereoError::Parse(format!("cluster '{group}': {e}")))?;
        let cluster = group.checked_add(1).ok_or_else(|| {
            StereoError::InvalidInput(format!("cluster {group} does not fit in a u16 id"))
        })?;
        assignment.insert(id, cluster);
    }
    Ok(assignment)
}

/// Overwrite the `clusterID` field of `cellBin/cell` in place.
///
/// Each cell's id is [`cell_id`] of its coordinates; cells missing from
/// `assignment` get 0. Everything is read and checked before the single
/// write. Returns the number of cells that received a cluster.
///
/// # Errors
///
/// Fails without modifying the file if it has no `cellBin/cell` table or
/// the table lacks `x`, `y` or `clusterID`.
pub fn patch_cluster_ids<P: AsRef<Path>>(
    path: P,
    assignment: &HashMap<u64, u16>,
) -> Result<usize> {
    let path = path.as_ref();
    let file = open_file(path, true)?;
    let cells = file
        .group(CELL_BIN_GROUP)
        .and_then(|g| g.dataset(CELL_DATASET))
        .map_err(|_| StereoError::KeyNotFound(format!("{CELL_BIN_GROUP}/{CELL_DATASET}")))?;

    let descriptor = cells
        .dtype()
        .and_then(|t| t.to_descriptor())
        .map_err(h5err)?;
    let TypeDescriptor::Compound(compound) = descriptor else {
        return Err(StereoError::InvalidInput(format!(
            "{CELL_BIN_GROUP}/{CELL_DATASET} is not a compound table"
        )));
    };
    for field in ["x", "y", CLUSTER_ID_FIELD] {
        if !compound.fields.iter().any(|f| f.name == field) {
            return Err(StereoError::InvalidInput(format!(
                "{CELL_BIN_GROUP}/{CELL_DATASET} has no '{field}' field"
            )));
        }
    }

    let coords = cells.read_1d::<CellCoordinate>().map_err(h5err)?;
    let mut assigned = 0;
    let ids: Array1<CellClusterId> = coords
        .iter()
        .map(|c| {
            let cluster = assignment.get(&cell_id(c.x, c.y)).copied().unwrap_or(0);
            if cluster != 0 {
                assigned += 1;
            }
            CellClusterId { clusterID: cluster }
        })
        .collect();
    cells.write(&ids).map_err(h5err)?;
    debug!(cells = ids.len(), assigned, "patched cluster ids");
    Ok(assigned)
}

/// Patch a GEF file with the clusters of result `res_key` of `data`.
pub fn update_gef<P: AsRef<Path>>(
    data: &StereoExpData,
    gef_file: P,
    res_key: &str,
) -> Result<usize> {
    let assignment = cluster_assignment(data, res_key)?;
    patch_cluster_ids(gef_file, &assignment)
}

fn coordinate(v: f64) -> Result<u32> {
    if v.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&v) {
        return Err(StereoError::InvalidInput(format!(
            "coordinate {v} is not a non-negative integer"
        )));
    }
    Ok(v as u32)
}

fn count(v: f64, gene: &str) -> Result<u16> {
    if v.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&v) {
        return Err(StereoError::InvalidInput(format!(
            "count {v} of gene '{gene}' is not a mid count in 0..=65535"
        )));
    }
    Ok(v as u16)
}

fn to_u32(v: usize, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| StereoError::InvalidInput(format!("{what} {v} exceeds u32")))
}

fn gene_name(name: &str) -> Result<FixedAscii<GENE_NAME_LEN>> {
    if !name.is_ascii() {
        return Err(StereoError::InvalidInput(format!(
            "gene name '{name}' is not ASCII"
        )));
    }
    let bytes = name.as_bytes();
    if bytes.len() > GENE_NAME_LEN {
        warn!(gene = name, "gene name longer than {GENE_NAME_LEN} bytes, truncating");
    }
    FixedAscii::from_ascii(&bytes[..bytes.len().min(GENE_NAME_LEN)])
        .map_err(|e| StereoError::InvalidInput(format!("gene name '{name}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use stereo_omics::{ColumnData, MatrixData, SparseFormat, SparseMatrix, Table};
    use tempfile::{tempdir, TempDir};

    fn temp_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.gef");
        (dir, path)
    }

    fn counts_data(dense: ndarray::Array2<f64>) -> StereoExpData {
        let (n_cells, n_genes) = dense.dim();
        let position =
            ndarray::Array2::from_shape_fn((n_cells, 2), |(i, j)| (i * 10 + j * 5) as f64);
        StereoExpData::new(
            Table::new("gene_name", (0..n_genes).map(|g| format!("gene{g}")).collect()),
            Table::new("cell_name", (0..n_cells).map(|c| format!("c{c}")).collect()),
            position,
            MatrixData::Sparse(SparseMatrix::from_dense(SparseFormat::Csr, &dense)),
        )
        .unwrap()
    }

    #[test]
    fn offsets_are_contiguous() {
        let data = counts_data(array![
            [1.0, 0.0, 3.0, 0.0],
            [0.0, 0.0, 2.0, 0.0],
            [4.0, 0.0, 1.0, 7.0]
        ]);
        let bin = build_gef_bin(&data).unwrap();
        assert_eq!(bin.expression.len(), 6);
        assert_eq!(bin.genes[0].offset, 0);
        for pair in bin.genes.windows(2) {
            assert_eq!(pair[1].offset, pair[0].offset + pair[0].count);
        }
        let last = bin.genes.last().unwrap();
        assert_eq!((last.offset + last.count) as usize, bin.expression.len());
        assert_eq!(bin.genes[1].count, 0);

        // gene2 rows 0, 1, 2 in cell order
        let run = &bin.expression[2..5];
        assert_eq!(run[0], ExpressionRecord { x: 0, y: 5, count: 3 });
        assert_eq!(run[2], ExpressionRecord { x: 20, y: 25, count: 1 });
    }

    #[test]
    fn file_layout_and_attributes() {
        let (_tmp, path) = temp_path();
        let mut data = counts_data(array![[1.0, 2.0], [0.0, 5.0]]);
        data.bin_size = 50;
        data.attr = vec![
            ("minX".into(), Scalar::Int(100)),
            ("resolution".into(), Scalar::Float(500.0)),
        ];
        write_mid_gef(&data, &path).unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(file.attr("version").unwrap().read_scalar::<u32>().unwrap(), 2);
        let expression = file.dataset("geneExp/bin50/expression").unwrap();
        assert_eq!(expression.attr("minX").unwrap().read_scalar::<i64>().unwrap(), 100);

        let bin = read_gef_bin(&path, 50).unwrap();
        assert_eq!(bin, build_gef_bin(&data).unwrap());
        assert_eq!(bin.genes[1].gene.as_str(), "gene1");
        assert!(read_gef_bin(&path, 100).is_err());
    }

    #[test]
    fn empty_tables_are_written() {
        let all_zero = counts_data(ndarray::Array2::zeros((2, 3)));
        let no_genes = counts_data(ndarray::Array2::zeros((2, 0)));
        for (data, n_genes) in [(all_zero, 3), (no_genes, 0)] {
            let (_tmp, path) = temp_path();
            write_mid_gef(&data, &path).unwrap();

            let file = File::open(&path).unwrap();
            assert!(file.dataset("geneExp/bin100/expression").is_ok());
            assert!(file.dataset("geneExp/bin100/gene").is_ok());

            let bin = read_gef_bin(&path, 100).unwrap();
            assert!(bin.expression.is_empty());
            assert_eq!(bin.genes.len(), n_genes);
            assert!(bin.genes.iter().all(|g| g.offset == 0 && g.count == 0));
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let (_tmp, path) = temp_path();
        assert!(matches!(read_gef_bin(&path, 100).unwrap_err(), StereoError::Io(_)));
        let err = patch_cluster_ids(&path, &HashMap::new()).unwrap_err();
        assert!(matches!(err, StereoError::Io(_)));
    }

    #[test]
    fn rejects_non_count_values() {
        for bad in [2.5, -1.0, 70_000.0] {
            let data = counts_data(array![[bad]]);
            assert!(build_gef_bin(&data).is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_negative_coordinates() {
        let base = counts_data(array![[1.0]]);
        let data = StereoExpData::new(
            base.genes().clone(),
            base.cells().clone(),
            array![[-1.0, 0.0]],
            base.exp_matrix().clone(),
        )
        .unwrap();
        assert!(build_gef_bin(&data).is_err());
    }

    #[test]
    fn long_gene_names_are_truncated() {
        let long = "G".repeat(40);
        let data = StereoExpData::new(
            Table::new("gene_name", vec![long]),
            Table::new("cell_name", vec!["c".into()]),
            array![[0.0, 0.0]],
            MatrixData::Dense(array![[1.0]]),
        )
        .unwrap();
        let bin = build_gef_bin(&data).unwrap();
        assert_eq!(bin.genes[0].gene.as_str(), "G".repeat(32));
    }

    #[test]
    fn cell_id_packing() {
        assert_eq!(cell_id(1, 2), (1u64 << 32) | 2);
        assert_eq!(cell_id(0, 0), 0);
        assert_eq!(cell_id(0, -1), u32::MAX as u64);
    }

    #[derive(hdf5::H5Type, Clone, Copy, Debug, PartialEq)]
    #[repr(C)]
    #[allow(non_snake_case)]
    struct TestCell {
        x: i32,
        y: i32,
        offset: u32,
        clusterID: u16,
    }

    fn write_cell_bin(path: &Path, with_cluster_field: bool) {
        let file = File::create(path).unwrap();
        let group = file.create_group("cellBin").unwrap();
        if with_cluster_field {
            let cells = Array1::from(vec![
                TestCell { x: 1, y: 2, offset: 0, clusterID: 9 },
                TestCell { x: 3, y: 4, offset: 5, clusterID: 9 },
                TestCell { x: 5, y: 6, offset: 8, clusterID: 9 },
            ]);
            group.new_dataset_builder().with_data(&cells).create("cell").unwrap();
        } else {
            let cells = Array1::from(vec![CellCoordinate { x: 1, y: 2 }]);
            group.new_dataset_builder().with_data(&cells).create("cell").unwrap();
        }
    }

    fn read_cells(path: &Path) -> Vec<TestCell> {
        File::open(path)
            .unwrap()
            .dataset("cellBin/cell")
            .unwrap()
            .read_1d::<TestCell>()
            .unwrap()
            .to_vec()
    }

    #[test]
    fn patch_is_idempotent() {
        let (_tmp, path) = temp_path();
        write_cell_bin(&path, true);
        let assignment = HashMap::from([(cell_id(1, 2), 3u16), (cell_id(5, 6), 1u16)]);

        assert_eq!(patch_cluster_ids(&path, &assignment).unwrap(), 2);
        let once = read_cells(&path);
        assert_eq!(
            once.iter().map(|c| c.clusterID).collect::<Vec<_>>(),
            vec![3, 0, 1]
        );
        assert_eq!(once[1].offset, 5);

        patch_cluster_ids(&path, &assignment).unwrap();
        assert_eq!(read_cells(&path), once);
    }

    #[test]
    fn patch_requires_cluster_field() {
        let (_tmp, path) = temp_path();
        write_cell_bin(&path, false);
        let err = patch_cluster_ids(&path, &HashMap::new()).unwrap_err();
        assert!(matches!(err, StereoError::InvalidInput(_)));
    }

    #[test]
    fn patch_missing_table() {
        let (_tmp, path) = temp_path();
        File::create(&path).unwrap();
        let err = patch_cluster_ids(&path, &HashMap::new()).unwrap_err();
        assert!(matches!(err, StereoError::KeyNotFound(_)));
    }

    #[test]
    fn assignment_from_cluster_result() {
        let mut data = counts_data(array![[1.0]]);
        let table = Table::with_row_numbers(2)
            .with_column(
                "bins",
                ColumnData::Strings(vec![cell_id(1, 2).to_string(), cell_id(5, 6).to_string()]),
            )
            .unwrap()
            .with_column(
                "group",
                ColumnData::Categorical {
                    codes: vec![1, 0],
                    categories: vec!["0".into(), "2".into()],
                },
            )
            .unwrap();
        data.add_result("leiden", AnalysisResult::Cluster(table));

        let assignment = cluster_assignment(&data, "leiden").unwrap();
        assert_eq!(assignment[&cell_id(1, 2)], 3);
        assert_eq!(assignment[&cell_id(5, 6)], 1);
        assert!(matches!(
            cluster_assignment(&data, "louvain").unwrap_err(),
            StereoError::MissingResult(_)
        ));
    }

    #[test]
    fn update_gef_end_to_end() {
        let (_tmp, path) = temp_path();
        write_cell_bin(&path, true);
        let mut data = counts_data(array![[1.0]]);
        let table = Table::with_row_numbers(1)
            .with_column("bins", ColumnData::Integer(vec![cell_id(3, 4) as i64]))
            .unwrap()
            .with_column("group", ColumnData::Integer(vec![4]))
            .unwrap();
        data.add_result("leiden", AnalysisResult::Cluster(table));

        assert_eq!(update_gef(&data, &path, "leiden").unwrap(), 1);
        let cells = read_cells(&path);
        assert_eq!(
            cells.iter().map(|c| c.clusterID).collect::<Vec<_>>(),
            vec![0, 5, 0]
        );
    }
}
