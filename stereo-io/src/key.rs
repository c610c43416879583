//! Addressed object keys.
//!
//! Every object in a container is a direct member whose name encodes what it
//! holds. Names are `@`-joined:
//!
//! | Form | Example |
//! |------|---------|
//! | field | `exp_matrix` |
//! | raw field | `exp_matrix@raw` |
//! | flat result | `leiden@cluster` |
//! | sub-keyed result, sub-key first | `connectivities@neighbors@neighbors` |
//! | sub-keyed result, result key first | `ccc@significant@cell_cell_communication` |
//!
//! The wire string is parsed once into an [`ObjectKey`] and rendered back
//! with [`fmt::Display`], so the qualifier order lives in one place.

use std::fmt;
use std::str::FromStr;

use stereo_core::{Result, StereoError};
use stereo_omics::AnalysisKind;

const SEPARATOR: char = '@';
const RAW_QUALIFIER: &str = "raw";

/// Where the sub-key goes in a three-part result key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKeyLayout {
    /// `{res}@{kind}`, no sub-key.
    Flat,
    /// `{sub}@{res}@{kind}`.
    SubFirst,
    /// `{res}@{sub}@{kind}`.
    ResultFirst,
}

/// Sub-key placement used by each analysis kind.
pub fn layout_of(kind: AnalysisKind) -> SubKeyLayout {
    match kind {
        AnalysisKind::Neighbors | AnalysisKind::MarkerGenes => SubKeyLayout::SubFirst,
        AnalysisKind::CellCellCommunication | AnalysisKind::RegulatoryNetworkInference => {
            SubKeyLayout::ResultFirst
        }
        _ => SubKeyLayout::Flat,
    }
}

/// A parsed container member name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// A core dataset field such as `genes` or `key_record`.
    Field(String),
    /// The raw-snapshot variant of a core field.
    Raw(String),
    /// One object of an analysis result.
    Result {
        kind: AnalysisKind,
        result_key: String,
        sub_key: Option<String>,
    },
}

impl ObjectKey {
    /// A core field key.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or contains `@` or `/`.
    pub fn field(name: &str) -> Result<Self> {
        check_part(name)?;
        Ok(ObjectKey::Field(name.to_string()))
    }

    /// The `@raw` key of a core field.
    pub fn raw(name: &str) -> Result<Self> {
        check_part(name)?;
        Ok(ObjectKey::Raw(name.to_string()))
    }

    /// A result key. `sub_key` must be present exactly when the kind's
    /// layout calls for one.
    pub fn result(kind: AnalysisKind, result_key: &str, sub_key: Option<&str>) -> Result<Self> {
        check_part(result_key)?;
        if let Some(sub) = sub_key {
            check_part(sub)?;
        }
        match (layout_of(kind), sub_key) {
            (SubKeyLayout::Flat, Some(sub)) => {
                return Err(StereoError::InvalidInput(format!(
                    "{kind} results take no sub-key, got '{sub}'"
                )))
            }
            (SubKeyLayout::SubFirst | SubKeyLayout::ResultFirst, None) => {
                return Err(StereoError::InvalidInput(format!(
                    "{kind} results need a sub-key"
                )))
            }
            _ => {}
        }
        Ok(ObjectKey::Result {
            kind,
            result_key: result_key.to_string(),
            sub_key: sub_key.map(str::to_string),
        })
    }

    /// The analysis kind of a result key.
    pub fn kind(&self) -> Option<AnalysisKind> {
        match self {
            ObjectKey::Result { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this key addresses part of result `result_key` of `kind`.
    pub fn belongs_to(&self, kind: AnalysisKind, result_key: &str) -> bool {
        matches!(
            self,
            ObjectKey::Result { kind: k, result_key: r, .. } if *k == kind && r == result_key
        )
    }

    /// The sub-key of a nested result key.
    pub fn sub_key(&self) -> Option<&str> {
        match self {
            ObjectKey::Result { sub_key, .. } => sub_key.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKey::Field(name) => f.write_str(name),
            ObjectKey::Raw(name) => write!(f, "{name}{SEPARATOR}{RAW_QUALIFIER}"),
            ObjectKey::Result {
                kind,
                result_key,
                sub_key: None,
            } => write!(f, "{result_key}{SEPARATOR}{kind}"),
            ObjectKey::Result {
                kind,
                result_key,
                sub_key: Some(sub),
            } => match layout_of(*kind) {
                SubKeyLayout::ResultFirst => {
                    write!(f, "{result_key}{SEPARATOR}{sub}{SEPARATOR}{kind}")
                }
                _ => write!(f, "{sub}{SEPARATOR}{result_key}{SEPARATOR}{kind}"),
            },
        }
    }
}

impl FromStr for ObjectKey {
    type Err = StereoError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        match parts.as_slice() {
            [field] => ObjectKey::field(field),
            [field, RAW_QUALIFIER] => ObjectKey::raw(field),
            [res, kind] => ObjectKey::result(parse_kind(kind, s)?, res, None),
            [a, b, kind] => {
                let kind = parse_kind(kind, s)?;
                match layout_of(kind) {
                    SubKeyLayout::ResultFirst => ObjectKey::result(kind, a, Some(*b)),
                    _ => ObjectKey::result(kind, b, Some(*a)),
                }
            }
            _ => Err(StereoError::Parse(format!(
                "key '{s}' has too many '{SEPARATOR}' qualifiers"
            ))),
        }
    }
}

fn parse_kind(tag: &str, key: &str) -> Result<AnalysisKind> {
    tag.parse::<AnalysisKind>()
        .map_err(|_| StereoError::Parse(format!("key '{key}' ends in unknown qualifier '{tag}'")))
}

fn check_part(part: &str) -> Result<()> {
    if part.is_empty() {
        return Err(StereoError::InvalidInput("empty key component".into()));
    }
    if part.contains(SEPARATOR) || part.contains('/') {
        return Err(StereoError::InvalidInput(format!(
            "key component '{part}' must not contain '{SEPARATOR}' or '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ObjectKey {
        s.parse().unwrap()
    }

    #[test]
    fn fields_and_raw() {
        assert_eq!(parse("genes"), ObjectKey::Field("genes".into()));
        assert_eq!(parse("exp_matrix@raw"), ObjectKey::Raw("exp_matrix".into()));
        assert_eq!(ObjectKey::raw("cells").unwrap().to_string(), "cells@raw");
    }

    #[test]
    fn flat_result() {
        let key = parse("leiden@cluster");
        assert_eq!(
            key,
            ObjectKey::Result {
                kind: AnalysisKind::Cluster,
                result_key: "leiden".into(),
                sub_key: None
            }
        );
        assert_eq!(key.to_string(), "leiden@cluster");
    }

    #[test]
    fn sub_key_first_kinds() {
        let key = parse("connectivities@neighbors@neighbors");
        assert!(key.belongs_to(AnalysisKind::Neighbors, "neighbors"));
        assert_eq!(key.sub_key(), Some("connectivities"));

        let key =
            ObjectKey::result(AnalysisKind::MarkerGenes, "mg", Some("clusters_record")).unwrap();
        assert_eq!(key.to_string(), "clusters_record@mg@marker_genes");
    }

    #[test]
    fn result_key_first_kinds() {
        let key = parse("ccc@significant@cell_cell_communication");
        assert!(key.belongs_to(AnalysisKind::CellCellCommunication, "ccc"));
        assert_eq!(key.sub_key(), Some("significant"));
        assert_eq!(key.to_string(), "ccc@significant@cell_cell_communication");

        let key = ObjectKey::result(
            AnalysisKind::RegulatoryNetworkInference,
            "rni",
            Some("regulons"),
        )
        .unwrap();
        assert_eq!(key.to_string(), "rni@regulons@regulatory_network_inference");
    }

    #[test]
    fn layout_is_enforced() {
        assert!(ObjectKey::result(AnalysisKind::Pca, "pca", Some("x")).is_err());
        assert!(ObjectKey::result(AnalysisKind::Neighbors, "n", None).is_err());
        assert!("a@b@pca".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn rejects_bad_components() {
        assert!("a@tsne".parse::<ObjectKey>().is_err());
        assert!("a@b@c@hvg".parse::<ObjectKey>().is_err());
        assert!(ObjectKey::field("").is_err());
        assert!(ObjectKey::result(AnalysisKind::Pca, "a/b", None).is_err());
        assert!(ObjectKey::field("x@y").is_err());
    }
}
