//! The `key_record` catalog: which result keys of which kind a container holds.
//!
//! The catalog is a group with one string dataset per analysis kind, listing
//! that kind's result keys in order. Kinds outside [`AnalysisKind`] are
//! dropped with a warning on write and on read; they never fail the call.

use tracing::warn;

use stereo_core::Result;
use stereo_omics::{AnalysisKind, KeyRecord};

use crate::store::ObjectStore;

/// Member name of the catalog group.
pub const CATALOG_KEY: &str = "key_record";

/// Split a record into its recognized entries, warning once per dropped kind.
fn filter_record(record: &KeyRecord) -> Vec<(AnalysisKind, Vec<String>)> {
    let (known, unknown) = record.recognized();
    for name in unknown {
        warn!(
            kind = %name,
            supported = ?AnalysisKind::ALL.map(|k| k.as_str()),
            "analysis kind is not recognized, dropping it from the key record"
        );
    }
    known
}

/// Persist the recognized part of `record`; returns what was written.
pub fn write_catalog(
    store: &ObjectStore<'_>,
    record: &KeyRecord,
) -> Result<Vec<(AnalysisKind, Vec<String>)>> {
    let known = filter_record(record);
    let group = store.create_group(CATALOG_KEY)?;
    let catalog = ObjectStore::new(&group);
    for (kind, keys) in &known {
        catalog.write_strings(kind.as_str(), keys)?;
    }
    Ok(known)
}

/// Read the catalog back.
///
/// # Errors
///
/// Returns [`stereo_core::StereoError::KeyNotFound`] if the container has no catalog.
pub fn read_catalog(store: &ObjectStore<'_>) -> Result<KeyRecord> {
    let group = store.open_group(CATALOG_KEY)?;
    let catalog = ObjectStore::new(&group);
    let mut record = KeyRecord::new();
    for name in catalog.list_keys("")? {
        if name.parse::<AnalysisKind>().is_err() {
            warn!(kind = %name, "ignoring unrecognized kind in stored key record");
            continue;
        }
        record.set(&name, catalog.read_strings(&name)?);
    }
    Ok(record)
}
