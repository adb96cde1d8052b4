//! Schema catalog: immutable FHIR type trees keyed by resource type.
//!
//! Schema nodes are built once (from the embedded resource or from an
//! injected definition) and shared read-only across requests. The walk in
//! [`crate::validator`] is driven entirely by these trees plus the raw
//! JSON; no parsed object graph exists.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::FhirVersion;

/// An immutable tree node describing one FHIR element.
///
/// Invariants: `max == "*"` iff cardinality is unbounded; `min <= max` when
/// finite; child names are unique within a node except for `value[x]`
/// polymorphism where several siblings share the `value` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaNode {
    pub element_name: String,
    /// Dotted, human-readable path (e.g. `Patient.name.family`).
    pub path: String,
    /// FHIR type name: `id`, `code`, `string`, `Reference`, a resource
    /// type, ...
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub min: u32,
    #[serde(default = "default_max")]
    pub max: String,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub value_set_url: Option<String>,
    #[serde(default)]
    pub binding_strength: Option<String>,
    #[serde(default)]
    pub children: Vec<SchemaNode>,
}

fn default_max() -> String {
    "1".to_string()
}

impl SchemaNode {
    pub fn is_unbounded(&self) -> bool {
        self.max == "*"
    }

    /// Upper cardinality bound, `None` when unbounded.
    pub fn max_count(&self) -> Option<usize> {
        if self.is_unbounded() {
            None
        } else {
            self.max.parse().ok()
        }
    }

    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children.iter().find(|c| c.element_name == name)
    }

    /// The polymorphic `value[x]` siblings of this node, if any.
    pub fn value_children(&self) -> impl Iterator<Item = &SchemaNode> {
        self.children
            .iter()
            .filter(|c| c.element_name.starts_with("value"))
    }
}

/// Read-only lookup of schema trees by resource type name.
///
/// Shared across requests; implementations must be safe for concurrent
/// reads. Tests inject in-memory catalogs.
pub trait SchemaCatalog: Send + Sync {
    fn get(&self, resource_type: &str) -> Option<&SchemaNode>;
}

/// Catalog backed by a prebuilt map, loaded from a JSON definition.
#[derive(Debug)]
pub struct StaticSchemaCatalog {
    nodes: HashMap<String, SchemaNode>,
}

static SCHEMA_R4: &str = include_str!("../resources/schema-r4.json");
static SCHEMA_R5: &str = include_str!("../resources/schema-r5.json");

impl StaticSchemaCatalog {
    /// Parse a catalog from a JSON array of schema trees.
    pub fn from_json(json: &str) -> Result<Self> {
        let roots: Vec<SchemaNode> = bv_foundation::json::parse(json)?;
        Ok(Self::from_nodes(roots))
    }

    pub fn from_nodes(roots: Vec<SchemaNode>) -> Self {
        let nodes = roots
            .into_iter()
            .map(|node| (node.element_name.clone(), node))
            .collect();
        Self { nodes }
    }

    /// The built-in catalog for a FHIR version, from the embedded resource.
    pub fn builtin(version: FhirVersion) -> Result<Self> {
        let json = match version {
            FhirVersion::R4 => SCHEMA_R4,
            FhirVersion::R5 => SCHEMA_R5,
        };
        Self::from_json(json)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

impl SchemaCatalog for StaticSchemaCatalog {
    fn get(&self, resource_type: &str) -> Option<&SchemaNode> {
        self.nodes.get(resource_type)
    }
}
