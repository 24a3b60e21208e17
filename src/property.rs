//! Property descriptors: the flat, editor-facing view of a node type.
//!
//! A type's descriptors come from its property annotations (its own first,
//! then inherited ones; a name seen once is not repeated). A type without
//! any annotations in its lineage gets one descriptor per attribute and per
//! child slot. Annotations that name no member of the type are logged and
//! skipped. Descriptors are computed once per type.

use std::collections::HashSet;
use std::rc::Rc;

use tracing::warn;

use crate::datatype::{AttributeType, AttributeValue};
use crate::error::{DomError, Result};
use crate::node::Node;
use crate::schema::{AttributeDef, ChildDef, NodeType};

/// Declared on a type to shape one of its properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyAnnotation {
    /// A member name, or `child/attribute` for an attribute of a single child.
    pub path: String,
    pub display_name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub read_only: bool,
}

impl PropertyAnnotation {
    pub fn new(path: &str) -> Self {
        Self { path: path.to_string(), ..Self::default() }
    }
    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }
    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum PropertyKind {
    Attribute(AttributeDef),
    Child(ChildDef),
    ChildAttribute { child: ChildDef, attribute: AttributeDef },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Attribute(AttributeValue),
    Child(Option<Node>),
    Children(Vec<Node>),
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    display_name: String,
    category: Option<String>,
    description: Option<String>,
    read_only: bool,
    kind: PropertyKind,
}

impl PropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }
    /// Attribute type, for attribute-backed properties.
    pub fn value_type(&self) -> Option<AttributeType> {
        match &self.kind {
            PropertyKind::Attribute(def) | PropertyKind::ChildAttribute { attribute: def, .. } => {
                Some(def.value_type())
            }
            PropertyKind::Child(_) => None,
        }
    }
    /// Current value on `node`. A child attribute whose child is missing reads as `Null`.
    pub fn get_value(&self, node: &Node) -> Result<PropertyValue> {
        match &self.kind {
            PropertyKind::Attribute(def) => Ok(PropertyValue::Attribute(node.get_attribute(def)?)),
            PropertyKind::Child(def) if def.is_list() => Ok(PropertyValue::Children(node.get_children(def)?)),
            PropertyKind::Child(def) => Ok(PropertyValue::Child(node.get_child(def)?)),
            PropertyKind::ChildAttribute { child, attribute } => match node.get_child(child)? {
                Some(child) => Ok(PropertyValue::Attribute(child.get_attribute(attribute)?)),
                None => Ok(PropertyValue::Attribute(AttributeValue::Null)),
            },
        }
    }
    pub fn set_value(&self, node: &Node, value: PropertyValue) -> Result<()> {
        if self.read_only {
            return Err(DomError::InvalidOperation(format!("property '{}' is read-only", self.name)));
        }
        match (&self.kind, value) {
            (PropertyKind::Attribute(def), PropertyValue::Attribute(value)) => node.set_attribute(def, value),
            (PropertyKind::Child(def), PropertyValue::Child(child)) => node.set_child(def, child.as_ref()),
            (PropertyKind::Child(def), PropertyValue::Children(children)) => {
                let list = node.get_child_list(def)?;
                list.clear()?;
                children.iter().try_for_each(|child| list.push(child))
            }
            (PropertyKind::ChildAttribute { child, attribute }, PropertyValue::Attribute(value)) => {
                match node.get_child(child)? {
                    Some(child) => child.set_attribute(attribute, value),
                    None => Err(DomError::InvalidOperation(format!(
                        "property '{}' has no '{}' child to set",
                        self.name,
                        child.name()
                    ))),
                }
            }
            (_, value) => Err(DomError::InvalidArgument(format!(
                "property '{}' cannot take {:?}",
                self.name, value
            ))),
        }
    }
    /// Whether the value differs from its default and is worth persisting.
    pub fn can_reset(&self, node: &Node) -> Result<bool> {
        match &self.kind {
            PropertyKind::Attribute(def) => Ok(!node.is_attribute_default(def)?),
            PropertyKind::Child(def) => Ok(!node.get_children(def)?.is_empty()),
            PropertyKind::ChildAttribute { child, attribute } => match node.get_child(child)? {
                Some(child) => Ok(!child.is_attribute_default(attribute)?),
                None => Ok(false),
            },
        }
    }
    /// Restores the default value; children are removed.
    pub fn reset_value(&self, node: &Node) -> Result<()> {
        if self.read_only {
            return Err(DomError::InvalidOperation(format!("property '{}' is read-only", self.name)));
        }
        match &self.kind {
            PropertyKind::Attribute(def) => node.reset_attribute(def),
            PropertyKind::Child(def) if def.is_list() => node.get_child_list(def)?.clear(),
            PropertyKind::Child(def) => node.set_child(def, None),
            PropertyKind::ChildAttribute { child, attribute } => match node.get_child(child)? {
                Some(child) => child.reset_attribute(attribute),
                None => Ok(()),
            },
        }
    }
}

/// Descriptors of `node_type`, computed on first use.
pub fn descriptors(node_type: &NodeType) -> Rc<[PropertyDescriptor]> {
    Rc::clone(node_type.data().properties.get_or_init(|| build(node_type)))
}

impl Node {
    pub fn properties(&self) -> Rc<[PropertyDescriptor]> {
        descriptors(self.node_type())
    }
    pub fn property(&self, name: &str) -> Option<PropertyDescriptor> {
        self.properties().iter().find(|p| p.name() == name).cloned()
    }
}

fn build(node_type: &NodeType) -> Rc<[PropertyDescriptor]> {
    let annotated = node_type.lineage().any(|t| !t.data().annotations.is_empty());
    if !annotated {
        let attributes = node_type.attributes().iter().map(|def| plain(def.name(), PropertyKind::Attribute(def.clone())));
        let children = node_type.children().iter().map(|def| plain(def.name(), PropertyKind::Child(def.clone())));
        return attributes.chain(children).collect();
    }
    let mut seen = HashSet::new();
    let mut descriptors = Vec::new();
    for t in node_type.lineage() {
        for annotation in &t.data().annotations {
            if seen.contains(&annotation.path) {
                continue;
            }
            match resolve(node_type, annotation) {
                Ok(descriptor) => {
                    seen.insert(annotation.path.clone());
                    descriptors.push(descriptor);
                }
                Err(e) => warn!(error = %e, declared_on = t.name(), "skipping property annotation"),
            }
        }
    }
    descriptors.into()
}

fn plain(name: &str, kind: PropertyKind) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.to_string(),
        display_name: name.to_string(),
        category: None,
        description: None,
        read_only: false,
        kind,
    }
}

fn resolve(node_type: &NodeType, annotation: &PropertyAnnotation) -> Result<PropertyDescriptor> {
    let missing = |what: &str| {
        DomError::Annotation(format!(
            "type '{}' has no {} for property '{}'",
            node_type,
            what,
            annotation.path
        ))
    };
    let kind = match annotation.path.split_once('/') {
        None => match node_type.attribute_definition(&annotation.path) {
            Some(def) => PropertyKind::Attribute(def),
            None => PropertyKind::Child(node_type.child_definition(&annotation.path).ok_or_else(|| missing("member"))?),
        },
        Some((child_name, attribute_name)) => {
            let child = node_type.child_definition(child_name).ok_or_else(|| missing("child"))?;
            if child.is_list() {
                return Err(DomError::Annotation(format!(
                    "property '{}' goes through list child '{}'",
                    annotation.path, child_name
                )));
            }
            let attribute = node_type
                .child_type(&child)
                .attribute_definition(attribute_name)
                .ok_or_else(|| missing("child attribute"))?;
            PropertyKind::ChildAttribute { child, attribute }
        }
    };
    let name = annotation.path.clone();
    Ok(PropertyDescriptor {
        display_name: annotation.display_name.clone().unwrap_or_else(|| name.clone()),
        category: annotation.category.clone(),
        description: annotation.description.clone(),
        read_only: annotation.read_only,
        kind,
        name,
    })
}
