//! Multi-slice container files.
//!
//! Layout: each slice under `slice/slice_{i}` in slice order, the merged view
//! (if any) under `slice_merged`, then the `names` list, the `obs` and `var`
//! tables and the `var_type` and `relationship` tags at the root. Slices are
//! written without their raw snapshots; their key records and results are
//! kept.

use std::path::Path;

use hdf5::File;
use tracing::debug;

use stereo_core::{Result, StereoError};
use stereo_omics::{MsData, Scalar};

use crate::codec::open_file;
use crate::h5ad::{check_domain, read_exp_data, stamp, write_exp_data};
use crate::store::{ObjectStore, TableLayout};

/// Domain tag of multi-slice containers.
pub const MS_DATA_DOMAIN: &str = "stereo_ms_data";

const SLICE_GROUP: &str = "slice";
const MERGED_GROUP: &str = "slice_merged";
const NAMES: &str = "names";
const OBS: &str = "obs";
const VAR: &str = "var";
const VAR_TYPE: &str = "var_type";
const RELATIONSHIP: &str = "relationship";

fn slice_path(i: usize) -> String {
    format!("{SLICE_GROUP}/slice_{i}")
}

/// Write a multi-slice container, truncating any existing file.
///
/// # Errors
///
/// Returns an error before creating the file if slice names are not unique
/// or do not match the slice count.
pub fn write_h5ms<P: AsRef<Path>>(ms_data: &MsData, output: P) -> Result<()> {
    ms_data.validate()?;
    let output = output.as_ref();
    let file = File::create(output)
        .map_err(|e| StereoError::Storage(format!("cannot create {}: {e}", output.display())))?;
    stamp(&file, MS_DATA_DOMAIN)?;
    let store = ObjectStore::new(&file);

    store.subgroup(SLICE_GROUP)?;
    for (i, data) in ms_data.data_list.iter().enumerate() {
        let group = store.subgroup(&slice_path(i))?;
        write_exp_data(&group, data, false, true, data.key_record())?;
        debug!(slice = i, name = %ms_data.names[i], "wrote slice");
    }
    if let Some(merged) = &ms_data.merged_data {
        let group = store.create_group(MERGED_GROUP)?;
        write_exp_data(&group, merged, false, true, merged.key_record())?;
    }

    store.write_strings(NAMES, &ms_data.names)?;
    store.write_table(OBS, &ms_data.obs.with_intervals_as_text(), TableLayout::Columns)?;
    store.write_table(VAR, &ms_data.var.with_intervals_as_text(), TableLayout::Columns)?;
    store.write_scalar(VAR_TYPE, &Scalar::Text(ms_data.var_type.clone()))?;
    store.write_scalar(RELATIONSHIP, &Scalar::Text(ms_data.relationship.clone()))?;
    Ok(())
}

/// Read a container written by [`write_h5ms`].
pub fn read_h5ms<P: AsRef<Path>>(path: P) -> Result<MsData> {
    let path = path.as_ref();
    let file = open_file(path, false)?;
    check_domain(&file, MS_DATA_DOMAIN)?;
    let store = ObjectStore::new(&file);

    let names = store.read_strings(NAMES)?;
    let slices = store.open_group(SLICE_GROUP)?;
    let slice_store = ObjectStore::new(&slices);
    let mut data_list = Vec::with_capacity(names.len());
    for i in 0..names.len() {
        let key = format!("slice_{i}");
        data_list.push(read_exp_data(&slice_store.open_group(&key)?)?);
    }

    let mut ms_data = MsData::new(data_list).with_names(names)?;
    if store.contains(MERGED_GROUP) {
        ms_data.merged_data = Some(read_exp_data(&store.open_group(MERGED_GROUP)?)?);
    }
    if store.contains(OBS) {
        ms_data.obs = store.read_table(OBS)?;
    }
    if store.contains(VAR) {
        ms_data.var = store.read_table(VAR)?;
    }
    if store.contains(VAR_TYPE) {
        ms_data.var_type = store.read_text(VAR_TYPE)?;
    }
    if store.contains(RELATIONSHIP) {
        ms_data.relationship = store.read_text(RELATIONSHIP)?;
    }
    Ok(ms_data)
}
