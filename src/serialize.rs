//! JSON form of a node tree.
//!
//! Each node becomes an object with its type name, the attributes holding
//! non-default values and its children keyed by slot name. References are
//! written as the target's id and resolve lazily once the tree is loaded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{DomError, Result};
use crate::node::Node;
use crate::schema::TypeCatalog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ChildRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildRecord {
    List(Vec<NodeRecord>),
    Single(Box<NodeRecord>),
}

pub fn to_record(node: &Node) -> Result<NodeRecord> {
    let mut attributes = BTreeMap::new();
    for def in node.node_type().attributes() {
        if let Some(value) = node.get_local_attribute(def)? {
            attributes.insert(def.name().to_string(), value.to_json());
        }
    }
    let mut children = BTreeMap::new();
    for def in node.node_type().children() {
        let records = node.get_children(def)?.iter().map(to_record).collect::<Result<Vec<_>>>()?;
        if def.is_list() {
            if !records.is_empty() {
                children.insert(def.name().to_string(), ChildRecord::List(records));
            }
        } else if let Some(record) = records.into_iter().next() {
            children.insert(def.name().to_string(), ChildRecord::Single(Box::new(record)));
        }
    }
    Ok(NodeRecord { type_name: node.node_type().name().to_string(), attributes, children })
}

pub fn to_json_string(node: &Node) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_record(node)?)?)
}

/// Rebuilds a detached tree. Unknown attributes are skipped with a warning;
/// unknown types, unknown child slots and ill-typed values are errors.
pub fn from_record(catalog: &TypeCatalog, record: &NodeRecord) -> Result<Node> {
    let node = catalog.create_node(&record.type_name).map_err(|e| DomError::Serialization(e.to_string()))?;
    let node_type = node.node_type().clone();
    for (name, json) in &record.attributes {
        let Some(def) = node_type.attribute_definition(name) else {
            warn!(node_type = %node_type, attribute = %name, "skipping unknown attribute");
            continue;
        };
        let value = def
            .value_type()
            .from_json(json)
            .map_err(|e| DomError::Serialization(format!("attribute '{}' of {}: {}", name, node_type, e)))?;
        node.set_attribute(&def, value)?;
    }
    for (name, child) in &record.children {
        let def = node_type
            .child_definition(name)
            .ok_or_else(|| DomError::Serialization(format!("type '{}' has no child '{}'", node_type, name)))?;
        match (child, def.is_list()) {
            (ChildRecord::List(records), true) => {
                let list = node.get_child_list(&def)?;
                for record in records {
                    list.push(&from_record(catalog, record)?)?;
                }
            }
            (ChildRecord::Single(record), false) => node.set_child(&def, Some(&from_record(catalog, record)?))?,
            _ => {
                return Err(DomError::Serialization(format!(
                    "child '{}' of {} does not match its multiplicity",
                    name, node_type
                )));
            }
        }
    }
    Ok(node)
}

/// Parses a document and reports references that point at no node in it.
pub fn from_json_str(catalog: &TypeCatalog, text: &str) -> Result<Node> {
    let record: NodeRecord = serde_json::from_str(text)?;
    let root = from_record(catalog, &record)?;
    for owner in root.subtree() {
        for (def, reference) in owner.references() {
            if reference.resolve(&owner).is_none() {
                warn!(owner = %owner, attribute = def.name(), target = reference.id(), "unresolved reference");
            }
        }
    }
    Ok(root)
}
