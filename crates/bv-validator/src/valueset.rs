//! Enumerated value index.
//!
//! Resolves the allowed values and binding strength for an element, keyed
//! by (FHIR version, resource type, element name). `None` from
//! [`EnumIndex::allowed_values`] means the value set is not indexed by the
//! engine; depending on the binding strength the structural walk then emits
//! an advisory skip instead of a membership check.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::types::FhirVersion;

/// FHIR binding strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "required" => Some(Self::Required),
            "extensible" => Some(Self::Extensible),
            "preferred" => Some(Self::Preferred),
            "example" => Some(Self::Example),
            _ => None,
        }
    }
}

impl fmt::Display for BindingStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingStrength::Required => write!(f, "required"),
            BindingStrength::Extensible => write!(f, "extensible"),
            BindingStrength::Preferred => write!(f, "preferred"),
            BindingStrength::Example => write!(f, "example"),
        }
    }
}

/// Read-only enumerated-value lookup.
///
/// Shared across requests; implementations must be safe for concurrent
/// reads. Tests inject in-memory indexes.
pub trait EnumIndex: Send + Sync {
    /// Ordered allowed values, or `None` when the set is not indexed.
    fn allowed_values(
        &self,
        version: FhirVersion,
        resource_type: &str,
        element_name: &str,
    ) -> Option<&[String]>;

    fn binding_strength(
        &self,
        version: FhirVersion,
        resource_type: &str,
        element_name: &str,
    ) -> Option<BindingStrength>;
}

#[derive(Debug, Clone, Deserialize)]
struct EnumEntry {
    strength: BindingStrength,
    #[serde(default)]
    values: Option<Vec<String>>,
}

/// Index backed by a prebuilt map, loaded from a JSON definition.
#[derive(Debug, Default)]
pub struct StaticEnumIndex {
    // (version, resource type, element name) -> entry
    entries: HashMap<(FhirVersion, String, String), EnumEntry>,
}

static ENUMS: &str = include_str!("../resources/enums.json");

impl StaticEnumIndex {
    /// Parse an index from JSON shaped
    /// `{ "R4": { "Patient": { "gender": { "strength": ..., "values": [...] } } } }`.
    pub fn from_json(json: &str) -> Result<Self> {
        type Raw = HashMap<String, HashMap<String, HashMap<String, EnumEntry>>>;
        let raw: Raw = bv_foundation::json::parse(json)?;

        let mut entries = HashMap::new();
        for (version, resources) in raw {
            let version = match version.as_str() {
                "R4" => FhirVersion::R4,
                "R5" => FhirVersion::R5,
                _ => continue,
            };
            for (resource_type, elements) in resources {
                for (element_name, entry) in elements {
                    entries.insert((version, resource_type.clone(), element_name), entry);
                }
            }
        }
        Ok(Self { entries })
    }

    /// The built-in index from the embedded resource.
    pub fn builtin() -> Result<Self> {
        Self::from_json(ENUMS)
    }

    /// Register an entry. `values: None` marks the set as not indexed.
    pub fn insert(
        &mut self,
        version: FhirVersion,
        resource_type: &str,
        element_name: &str,
        strength: BindingStrength,
        values: Option<Vec<&str>>,
    ) {
        self.entries.insert(
            (version, resource_type.to_string(), element_name.to_string()),
            EnumEntry {
                strength,
                values: values.map(|v| v.into_iter().map(str::to_string).collect()),
            },
        );
    }

    fn entry(
        &self,
        version: FhirVersion,
        resource_type: &str,
        element_name: &str,
    ) -> Option<&EnumEntry> {
        self.entries
            .get(&(version, resource_type.to_string(), element_name.to_string()))
    }
}

impl EnumIndex for StaticEnumIndex {
    fn allowed_values(
        &self,
        version: FhirVersion,
        resource_type: &str,
        element_name: &str,
    ) -> Option<&[String]> {
        self.entry(version, resource_type, element_name)
            .and_then(|e| e.values.as_deref())
    }

    fn binding_strength(
        &self,
        version: FhirVersion,
        resource_type: &str,
        element_name: &str,
    ) -> Option<BindingStrength> {
        self.entry(version, resource_type, element_name)
            .map(|e| e.strength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_bundle_type() {
        let index = StaticEnumIndex::builtin().unwrap();
        let values = index
            .allowed_values(FhirVersion::R4, "Bundle", "type")
            .expect("bundle type indexed");
        assert!(values.iter().any(|v| v == "collection"));
        assert_eq!(
            index.binding_strength(FhirVersion::R4, "Bundle", "type"),
            Some(BindingStrength::Required)
        );
    }

    #[test]
    fn test_unindexed_element_is_none() {
        let index = StaticEnumIndex::builtin().unwrap();
        assert!(index
            .allowed_values(FhirVersion::R4, "Patient", "noSuchElement")
            .is_none());
    }

    #[test]
    fn test_insert_without_values() {
        let mut index = StaticEnumIndex::default();
        index.insert(
            FhirVersion::R4,
            "Observation",
            "interpretation",
            BindingStrength::Preferred,
            None,
        );
        assert!(index
            .allowed_values(FhirVersion::R4, "Observation", "interpretation")
            .is_none());
        assert_eq!(
            index.binding_strength(FhirVersion::R4, "Observation", "interpretation"),
            Some(BindingStrength::Preferred)
        );
    }

    #[test]
    fn test_strength_parse() {
        assert_eq!(
            BindingStrength::parse("extensible"),
            Some(BindingStrength::Extensible)
        );
        assert_eq!(BindingStrength::parse("mandatory"), None);
    }
}
