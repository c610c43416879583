//! Multi-slice container: several datasets persisted together.
//!
//! [`MsData`] holds an ordered list of slices, each with a unique display
//! name, an optional merged view and container-level observation/variable
//! tables. Adding, removing and renaming slices is left to callers; this type
//! only checks that the state it holds can be written.

use std::collections::HashSet;

use stereo_core::{Result, StereoError, Summarizable};

use crate::exp_data::StereoExpData;
use crate::table::Table;

/// Several spatial datasets plus an optional merged view.
#[derive(Debug, Clone, PartialEq)]
pub struct MsData {
    /// Slices in display order.
    pub data_list: Vec<StereoExpData>,
    /// Display name of each slice, parallel to `data_list`.
    pub names: Vec<String>,
    /// Merged view over all slices, if one was built.
    pub merged_data: Option<StereoExpData>,
    /// Per-observation metadata across slices.
    pub obs: Table,
    /// Per-variable metadata across slices.
    pub var: Table,
    /// How variables were combined, e.g. `intersect` or `union`.
    pub var_type: String,
    /// How slices relate, e.g. `other`, `continuous` or `time_series`.
    pub relationship: String,
}

impl MsData {
    /// Create a container whose slice names are their positions (`"0"`, `"1"`, ...).
    pub fn new(data_list: Vec<StereoExpData>) -> Self {
        let names = (0..data_list.len()).map(|i| i.to_string()).collect();
        Self {
            data_list,
            names,
            merged_data: None,
            obs: Table::new("cell_name", Vec::new()),
            var: Table::new("gene_name", Vec::new()),
            var_type: "intersect".to_string(),
            relationship: "other".to_string(),
        }
    }

    /// Replace the slice names.
    ///
    /// # Errors
    ///
    /// Returns an error if the names are not unique or there is not exactly
    /// one per slice.
    pub fn with_names(mut self, names: Vec<String>) -> Result<Self> {
        self.names = names;
        self.validate()?;
        Ok(self)
    }

    /// Number of slices.
    pub fn len(&self) -> usize {
        self.data_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_list.is_empty()
    }

    /// Look up a slice by display name.
    pub fn get(&self, name: &str) -> Option<&StereoExpData> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.data_list.get(i))
    }

    /// Iterate over `(name, slice)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StereoExpData)> {
        self.names.iter().map(String::as_str).zip(self.data_list.iter())
    }

    /// Check that names are unique and that there is one per slice.
    pub fn validate(&self) -> Result<()> {
        if self.names.len() != self.data_list.len() {
            return Err(StereoError::ShapeMismatch(format!(
                "{} slice names for {} slices",
                self.names.len(),
                self.data_list.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(StereoError::InvalidInput(format!(
                "duplicate slice name '{dup}'"
            )));
        }
        Ok(())
    }
}

impl Summarizable for MsData {
    fn summary(&self) -> String {
        format!(
            "MsData: {} slices [{}], relationship {}{}",
            self.len(),
            self.names.join(", "),
            self.relationship,
            if self.merged_data.is_some() { ", merged view" } else { "" }
        )
    }
}
