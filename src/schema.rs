//! Type metadata: node types with single inheritance, attribute and child
//! definitions, tags and adapter registrations.
//!
//! Types are declared on a [`SchemaBuilder`] and frozen into a [`TypeCatalog`]
//! by [`SchemaBuilder::build`]. After that nothing about a type can change,
//! which is what lets definitions be compared and cached cheaply:
//! a derived type that redeclares an inherited attribute keeps the inherited
//! slot, so both definitions compare equal and a node of the derived type
//! answers to either of them.

use std::any::{Any, TypeId};
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;

use crate::adapt::AdapterCreator;
use crate::datatype::{AttributeRule, AttributeType, AttributeValue};
use crate::error::{DomError, Result};
use crate::node::Node;
use crate::property::{PropertyAnnotation, PropertyDescriptor};

pub type NameHasher = BuildHasherDefault<SeaHasher>;

/// Every catalog has this root type, which all other types derive from
/// unless they name another base.
pub const BASE_TYPE_NAME: &str = "Object";

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap();
}

static NEXT_CATALOG: AtomicU64 = AtomicU64::new(1);

// ------------- Definitions -------------

#[derive(Debug)]
pub struct AttributeInfo {
    name: String,
    value_type: AttributeType,
    default: AttributeValue,
    rules: Vec<AttributeRule>,
    index: usize,
    owning_type: String,
    defining_type: usize,
    catalog: u64,
}

impl AttributeInfo {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn value_type(&self) -> AttributeType {
        self.value_type
    }
    pub fn default_value(&self) -> &AttributeValue {
        &self.default
    }
    pub fn rules(&self) -> &[AttributeRule] {
        &self.rules
    }
    /// Slot in the attribute table of the declaring type and all its descendants.
    pub fn index(&self) -> usize {
        self.index
    }
    /// Name of the type whose declaration produced this definition.
    pub fn owning_type_name(&self) -> &str {
        &self.owning_type
    }
}

/// Handle to an attribute definition. Two handles are equal when they are
/// equivalent: same catalog, same originally-defining type and same slot.
#[derive(Clone)]
pub struct AttributeDef(Rc<AttributeInfo>);

impl Deref for AttributeDef {
    type Target = AttributeInfo;
    fn deref(&self) -> &AttributeInfo {
        &self.0
    }
}
impl PartialEq for AttributeDef {
    fn eq(&self, other: &Self) -> bool {
        self.catalog == other.catalog && self.defining_type == other.defining_type && self.index == other.index
    }
}
impl Eq for AttributeDef {}
impl Hash for AttributeDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.catalog.hash(state);
        self.defining_type.hash(state);
        self.index.hash(state);
    }
}
impl fmt::Debug for AttributeDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}: {}", self.owning_type, self.name, self.value_type)
    }
}
impl fmt::Display for AttributeDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug)]
pub struct ChildInfo {
    name: String,
    target: usize,
    target_name: String,
    is_list: bool,
    index: usize,
    owning_type: String,
    defining_type: usize,
    catalog: u64,
}

impl ChildInfo {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_list(&self) -> bool {
        self.is_list
    }
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn target_type_name(&self) -> &str {
        &self.target_name
    }
    pub fn owning_type_name(&self) -> &str {
        &self.owning_type
    }
}

/// Handle to a child slot definition, compared the same way as [`AttributeDef`].
#[derive(Clone)]
pub struct ChildDef(Rc<ChildInfo>);

impl Deref for ChildDef {
    type Target = ChildInfo;
    fn deref(&self) -> &ChildInfo {
        &self.0
    }
}
impl PartialEq for ChildDef {
    fn eq(&self, other: &Self) -> bool {
        self.catalog == other.catalog && self.defining_type == other.defining_type && self.index == other.index
    }
}
impl Eq for ChildDef {}
impl Hash for ChildDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.catalog.hash(state);
        self.defining_type.hash(state);
        self.index.hash(state);
    }
}
impl fmt::Debug for ChildDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let list = if self.is_list { "[]" } else { "" };
        write!(f, "{}.{}: {}{}", self.owning_type, self.name, self.target_name, list)
    }
}
impl fmt::Display for ChildDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ------------- Builder -------------

/// Declaration of an attribute, before the catalog is frozen.
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    pub name: String,
    pub value_type: AttributeType,
    pub default: Option<AttributeValue>,
    pub rules: Vec<AttributeRule>,
}

impl AttributeSpec {
    pub fn new(name: &str, value_type: AttributeType) -> Self {
        Self { name: name.to_string(), value_type, default: None, rules: Vec::new() }
    }
    pub fn with_default(mut self, default: impl Into<AttributeValue>) -> Self {
        self.default = Some(default.into());
        self
    }
    pub fn with_rule(mut self, rule: AttributeRule) -> Self {
        self.rules.push(rule);
        self
    }
}

#[derive(Debug, Clone)]
struct ChildSpec {
    name: String,
    target: String,
    is_list: bool,
}

/// Declaration of one node type, reached through [`SchemaBuilder::define_type`].
pub struct TypeSpec {
    name: String,
    base: Option<String>,
    is_abstract: bool,
    attributes: Vec<AttributeSpec>,
    children: Vec<ChildSpec>,
    id_attribute: Option<String>,
    creators: Vec<AdapterCreator>,
    annotations: Vec<PropertyAnnotation>,
    tags: HashMap<TypeId, Rc<dyn Any>, NameHasher>,
}

impl TypeSpec {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base: None,
            is_abstract: false,
            attributes: Vec::new(),
            children: Vec::new(),
            id_attribute: None,
            creators: Vec::new(),
            annotations: Vec::new(),
            tags: HashMap::default(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn base(&mut self, base: &str) -> &mut Self {
        self.base = Some(base.to_string());
        self
    }
    pub fn set_abstract(&mut self) -> &mut Self {
        self.is_abstract = true;
        self
    }
    pub fn attribute(&mut self, name: &str, value_type: AttributeType) -> &mut Self {
        self.attributes.push(AttributeSpec::new(name, value_type));
        self
    }
    pub fn attribute_with_default(
        &mut self,
        name: &str,
        value_type: AttributeType,
        default: impl Into<AttributeValue>,
    ) -> &mut Self {
        self.attributes.push(AttributeSpec::new(name, value_type).with_default(default));
        self
    }
    pub fn attribute_spec(&mut self, spec: AttributeSpec) -> &mut Self {
        self.attributes.push(spec);
        self
    }
    pub fn child(&mut self, name: &str, target: &str) -> &mut Self {
        self.children.push(ChildSpec { name: name.to_string(), target: target.to_string(), is_list: false });
        self
    }
    pub fn child_list(&mut self, name: &str, target: &str) -> &mut Self {
        self.children.push(ChildSpec { name: name.to_string(), target: target.to_string(), is_list: true });
        self
    }
    /// Names the text attribute holding the node's unique id.
    pub fn id_attribute(&mut self, name: &str) -> &mut Self {
        self.id_attribute = Some(name.to_string());
        self
    }
    pub fn adapter(&mut self, creator: AdapterCreator) -> &mut Self {
        self.creators.push(creator);
        self
    }
    pub fn property(&mut self, annotation: PropertyAnnotation) -> &mut Self {
        self.annotations.push(annotation);
        self
    }
    pub fn tag<T: Any>(&mut self, tag: T) -> &mut Self {
        self.tags.insert(TypeId::of::<T>(), Rc::new(tag));
        self
    }
}

/// Collects type declarations; see [`SchemaBuilder::build`].
pub struct SchemaBuilder {
    types: Vec<TypeSpec>,
    by_name: HashMap<String, usize, NameHasher>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        let mut by_name = HashMap::default();
        by_name.insert(BASE_TYPE_NAME.to_string(), 0);
        Self { types: vec![TypeSpec::new(BASE_TYPE_NAME)], by_name }
    }
    pub fn define_type(&mut self, name: &str) -> Result<&mut TypeSpec> {
        if self.by_name.contains_key(name) {
            return Err(DomError::Schema(format!("type '{}' is declared twice", name)));
        }
        self.by_name.insert(name.to_string(), self.types.len());
        self.types.push(TypeSpec::new(name));
        let last = self.types.len() - 1;
        Ok(&mut self.types[last])
    }
    pub fn type_mut(&mut self, name: &str) -> Option<&mut TypeSpec> {
        let index = *self.by_name.get(name)?;
        self.types.get_mut(index)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Validates every declaration and freezes the result.
    ///
    /// Fails with a schema error on undeclared base or child types, cyclic
    /// inheritance, duplicate member names within one type, malformed names,
    /// ill-typed defaults and id attributes that are missing or not text.
    pub fn build(self) -> Result<TypeCatalog> {
        let SchemaBuilder { types: specs, by_name } = self;
        let count = specs.len();
        for spec in &specs {
            if !NAME.is_match(&spec.name) {
                return Err(DomError::Schema(format!("'{}' is not a valid type name", spec.name)));
            }
        }
        let mut bases: Vec<Option<usize>> = Vec::with_capacity(count);
        for (i, spec) in specs.iter().enumerate() {
            let base = match &spec.base {
                Some(name) => Some(*by_name.get(name).ok_or_else(|| {
                    DomError::Schema(format!("type '{}' derives from undeclared type '{}'", spec.name, name))
                })?),
                None if i == 0 => None,
                None => Some(0),
            };
            bases.push(base);
        }
        // depth doubles as the cycle check: a chain longer than the number of types loops
        let mut depths = Vec::with_capacity(count);
        for (i, spec) in specs.iter().enumerate() {
            let mut depth = 0;
            let mut current = bases[i];
            while let Some(c) = current {
                depth += 1;
                if depth > count {
                    return Err(DomError::Schema(format!("type '{}' has a cyclic inheritance chain", spec.name)));
                }
                current = bases[c];
            }
            depths.push(depth);
        }
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|i| depths[*i]);

        let catalog = NEXT_CATALOG.fetch_add(1, Ordering::Relaxed);
        let mut next_creator = 0;
        let mut frozen: Vec<Option<TypeData>> = (0..count).map(|_| None).collect();
        let mut specs: Vec<Option<TypeSpec>> = specs.into_iter().map(Some).collect();
        for i in order {
            let spec = specs[i]
                .take()
                .ok_or_else(|| DomError::Schema("type visited twice while freezing".to_string()))?;
            let (mut attributes, mut attribute_index, mut children, mut child_index, mut id_attribute) =
                match bases[i].and_then(|b| frozen[b].as_ref()) {
                    Some(base) => (
                        base.attributes.clone(),
                        base.attribute_index.clone(),
                        base.children.clone(),
                        base.child_index.clone(),
                        base.id_attribute.clone(),
                    ),
                    None => (Vec::new(), HashMap::default(), Vec::new(), HashMap::default(), None),
                };

            let mut seen = HashSet::new();
            for a in spec.attributes {
                if !NAME.is_match(&a.name) {
                    return Err(DomError::Schema(format!("'{}' is not a valid attribute name", a.name)));
                }
                if !seen.insert(a.name.clone()) {
                    return Err(DomError::Schema(format!(
                        "attribute '{}' is declared twice in type '{}'",
                        a.name, spec.name
                    )));
                }
                let default = a.default.unwrap_or_else(|| a.value_type.default_value());
                if !a.value_type.accepts(&default) {
                    return Err(DomError::Schema(format!(
                        "default {} of attribute '{}' in type '{}' is not a {}",
                        default.kind_name(),
                        a.name,
                        spec.name,
                        a.value_type
                    )));
                }
                let inherited = attribute_index.get(&a.name).copied();
                let (index, defining_type) = match inherited {
                    Some(j) => {
                        let base: &AttributeDef = &attributes[j];
                        if base.value_type != a.value_type {
                            return Err(DomError::Schema(format!(
                                "attribute '{}' in type '{}' redeclares a {} as {}",
                                a.name, spec.name, base.value_type, a.value_type
                            )));
                        }
                        (j, base.defining_type)
                    }
                    None => (attributes.len(), i),
                };
                let def = AttributeDef(Rc::new(AttributeInfo {
                    name: a.name.clone(),
                    value_type: a.value_type,
                    default,
                    rules: a.rules,
                    index,
                    owning_type: spec.name.clone(),
                    defining_type,
                    catalog,
                }));
                if index < attributes.len() {
                    attributes[index] = def;
                } else {
                    attribute_index.insert(a.name, index);
                    attributes.push(def);
                }
            }

            let mut seen = HashSet::new();
            for c in spec.children {
                if !NAME.is_match(&c.name) {
                    return Err(DomError::Schema(format!("'{}' is not a valid child name", c.name)));
                }
                if !seen.insert(c.name.clone()) {
                    return Err(DomError::Schema(format!(
                        "child '{}' is declared twice in type '{}'",
                        c.name, spec.name
                    )));
                }
                let target = *by_name.get(&c.target).ok_or_else(|| {
                    DomError::Schema(format!(
                        "child '{}' of type '{}' refers to undeclared type '{}'",
                        c.name, spec.name, c.target
                    ))
                })?;
                let inherited = child_index.get(&c.name).copied();
                let (index, defining_type) = match inherited {
                    Some(j) => {
                        let base: &ChildDef = &children[j];
                        if base.is_list != c.is_list {
                            return Err(DomError::Schema(format!(
                                "child '{}' in type '{}' changes its multiplicity",
                                c.name, spec.name
                            )));
                        }
                        (j, base.defining_type)
                    }
                    None => (children.len(), i),
                };
                let def = ChildDef(Rc::new(ChildInfo {
                    name: c.name.clone(),
                    target,
                    target_name: c.target,
                    is_list: c.is_list,
                    index,
                    owning_type: spec.name.clone(),
                    defining_type,
                    catalog,
                }));
                if index < children.len() {
                    children[index] = def;
                } else {
                    child_index.insert(c.name, index);
                    children.push(def);
                }
            }

            if let Some(name) = &spec.id_attribute {
                let def = attribute_index.get(name).map(|j| attributes[*j].clone()).ok_or_else(|| {
                    DomError::Schema(format!("id attribute '{}' is not an attribute of type '{}'", name, spec.name))
                })?;
                if def.value_type != AttributeType::Text {
                    return Err(DomError::Schema(format!(
                        "id attribute '{}' of type '{}' must be a string",
                        name, spec.name
                    )));
                }
                id_attribute = Some(def);
            }

            let mut creators = Vec::with_capacity(spec.creators.len());
            for mut creator in spec.creators {
                creator.assign_id(next_creator);
                next_creator += 1;
                creators.push(Rc::new(creator));
            }

            frozen[i] = Some(TypeData {
                name: spec.name,
                base: bases[i],
                is_abstract: spec.is_abstract,
                attributes,
                attribute_index,
                children,
                child_index,
                id_attribute,
                creators,
                annotations: spec.annotations,
                tags: spec.tags,
                creator_cache: RefCell::new(HashMap::default()),
                properties: OnceCell::new(),
            });
        }
        let types = frozen
            .into_iter()
            .map(|t| t.ok_or_else(|| DomError::Schema("type was never frozen".to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(TypeCatalog(Rc::new(CatalogData { id: catalog, types, by_name, next_serial: Cell::new(1) })))
    }
}

// ------------- Frozen catalog -------------

pub(crate) struct TypeData {
    pub(crate) name: String,
    base: Option<usize>,
    is_abstract: bool,
    attributes: Vec<AttributeDef>,
    attribute_index: HashMap<String, usize, NameHasher>,
    children: Vec<ChildDef>,
    child_index: HashMap<String, usize, NameHasher>,
    id_attribute: Option<AttributeDef>,
    pub(crate) creators: Vec<Rc<AdapterCreator>>,
    pub(crate) annotations: Vec<PropertyAnnotation>,
    tags: HashMap<TypeId, Rc<dyn Any>, NameHasher>,
    pub(crate) creator_cache: RefCell<HashMap<TypeId, Rc<[Rc<AdapterCreator>]>, NameHasher>>,
    pub(crate) properties: OnceCell<Rc<[PropertyDescriptor]>>,
}

pub(crate) struct CatalogData {
    id: u64,
    types: Vec<TypeData>,
    by_name: HashMap<String, usize, NameHasher>,
    next_serial: Cell<u64>,
}

/// The frozen set of node types produced by a [`SchemaBuilder`].
#[derive(Clone)]
pub struct TypeCatalog(Rc<CatalogData>);

impl TypeCatalog {
    pub fn node_type(&self, name: &str) -> Option<NodeType> {
        let index = *self.0.by_name.get(name)?;
        Some(NodeType { catalog: Rc::clone(&self.0), index })
    }
    pub fn base_type(&self) -> NodeType {
        NodeType { catalog: Rc::clone(&self.0), index: 0 }
    }
    pub fn types(&self) -> Vec<NodeType> {
        (0..self.0.types.len()).map(|index| NodeType { catalog: Rc::clone(&self.0), index }).collect()
    }
    pub fn len(&self) -> usize {
        self.0.types.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.types.is_empty()
    }
    /// Creates a detached node of a named, concrete type.
    pub fn create_node(&self, type_name: &str) -> Result<Node> {
        let node_type = self
            .node_type(type_name)
            .ok_or_else(|| DomError::InvalidArgument(format!("unknown type '{}'", type_name)))?;
        if node_type.is_abstract() {
            return Err(DomError::InvalidOperation(format!("type '{}' is abstract", type_name)));
        }
        Ok(Node::new(&node_type))
    }
}

impl fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.0.types.iter().map(|t| &t.name)).finish()
    }
}

/// Handle to a frozen node type.
#[derive(Clone)]
pub struct NodeType {
    catalog: Rc<CatalogData>,
    index: usize,
}

impl NodeType {
    pub(crate) fn data(&self) -> &TypeData {
        &self.catalog.types[self.index]
    }
    pub(crate) fn next_serial(&self) -> u64 {
        let serial = self.catalog.next_serial.get();
        self.catalog.next_serial.set(serial + 1);
        serial
    }
    pub fn name(&self) -> &str {
        &self.data().name
    }
    pub fn catalog(&self) -> TypeCatalog {
        TypeCatalog(Rc::clone(&self.catalog))
    }
    pub fn base_type(&self) -> Option<NodeType> {
        self.data().base.map(|index| NodeType { catalog: Rc::clone(&self.catalog), index })
    }
    /// This type followed by its ancestors, most-derived first.
    pub fn lineage(&self) -> TypeLineage {
        TypeLineage { next: Some(self.clone()) }
    }
    pub fn is_abstract(&self) -> bool {
        self.data().is_abstract
    }
    /// True when `other` is this type or derives from it.
    pub fn is_assignable_from(&self, other: &NodeType) -> bool {
        other.lineage().any(|t| t == *self)
    }
    /// All attribute definitions, inherited ones first, indexed by slot.
    pub fn attributes(&self) -> &[AttributeDef] {
        &self.data().attributes
    }
    pub fn children(&self) -> &[ChildDef] {
        &self.data().children
    }
    pub fn attribute_definition(&self, name: &str) -> Option<AttributeDef> {
        let data = self.data();
        data.attribute_index.get(name).map(|i| data.attributes[*i].clone())
    }
    pub fn child_definition(&self, name: &str) -> Option<ChildDef> {
        let data = self.data();
        data.child_index.get(name).map(|i| data.children[*i].clone())
    }
    pub fn is_valid_attribute(&self, def: &AttributeDef) -> bool {
        self.attributes().get(def.index).is_some_and(|own| own == def)
    }
    pub fn is_valid_child(&self, def: &ChildDef) -> bool {
        self.children().get(def.index).is_some_and(|own| own == def)
    }
    pub fn id_attribute(&self) -> Option<&AttributeDef> {
        self.data().id_attribute.as_ref()
    }
    /// Type of the nodes a child slot accepts.
    pub fn child_type(&self, def: &ChildDef) -> NodeType {
        NodeType { catalog: Rc::clone(&self.catalog), index: def.target }
    }
    /// Nearest tag of type `T` along the lineage.
    pub fn tag<T: Any>(&self) -> Option<Rc<T>> {
        self.lineage().find_map(|t| {
            t.data().tags.get(&TypeId::of::<T>()).and_then(|tag| Rc::clone(tag).downcast::<T>().ok())
        })
    }
    /// Adapter creators providing a capability, most-derived type first.
    pub(crate) fn creators_for(&self, capability: TypeId) -> Rc<[Rc<AdapterCreator>]> {
        let data = self.data();
        if let Some(cached) = data.creator_cache.borrow().get(&capability) {
            return Rc::clone(cached);
        }
        let found: Vec<Rc<AdapterCreator>> = self
            .lineage()
            .flat_map(|t| {
                t.data().creators.iter().filter(|c| c.provides(capability)).cloned().collect::<Vec<_>>()
            })
            .collect();
        let found: Rc<[Rc<AdapterCreator>]> = found.into();
        data.creator_cache.borrow_mut().insert(capability, Rc::clone(&found));
        found
    }
    pub(crate) fn eager_creators(&self) -> Vec<Rc<AdapterCreator>> {
        self.lineage()
            .flat_map(|t| t.data().creators.iter().filter(|c| c.is_eager()).cloned().collect::<Vec<_>>())
            .collect()
    }
}

impl PartialEq for NodeType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.catalog, &other.catalog) && self.index == other.index
    }
}
impl Eq for NodeType {}
impl Hash for NodeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.catalog.id.hash(state);
        self.index.hash(state);
    }
}
impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub struct TypeLineage {
    next: Option<NodeType>,
}

impl Iterator for TypeLineage {
    type Item = NodeType;
    fn next(&mut self) -> Option<NodeType> {
        let current = self.next.take()?;
        self.next = current.base_type();
        Some(current)
    }
}
