//! Nodes: typed attribute storage and the parent/child tree.
//!
//! A [`Node`] is a cheap, clonable handle. Parents own their children; the
//! back-pointer from child to parent is weak, so dropping the last handle
//! to a detached subtree frees it. Attribute values are stored sparsely:
//! a slot holds a value only when it differs from the definition's default.
//!
//! Every mutation raises a "before" and an "after" event (see [`crate::event`]).
//! Handlers of the "before" events see the tree as it was.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::rc::{Rc, Weak};

use seahash::SeaHasher;
use tracing::trace;

use crate::datatype::AttributeValue;
use crate::error::{DomError, Result};
use crate::event::{self, AttributeEvent, ChildEvent, EventKind, HandlerList, NodeEvents, Subscription};
use crate::reference::NodeRef;
use crate::schema::{AttributeDef, ChildDef, NodeType};

pub type NodeHasher = BuildHasherDefault<SeaHasher>;

/// Original-to-copy map filled by [`Node::copy_with_map`].
pub type CopyMap = HashMap<Node, Node, NodeHasher>;

enum ChildSlot {
    Single(Option<Node>),
    List(Vec<Node>),
}

pub(crate) struct NodeInner {
    node_type: NodeType,
    serial: u64,
    parent: RefCell<Weak<NodeInner>>,
    slot: Cell<Option<usize>>,
    attributes: RefCell<Vec<Option<AttributeValue>>>,
    children: RefCell<Vec<ChildSlot>>,
    pub(crate) events: NodeEvents,
    pub(crate) adapters: RefCell<Vec<(usize, Rc<dyn Any>)>>,
}

#[derive(Clone)]
pub struct Node(pub(crate) Rc<NodeInner>);

/// Non-owning node handle, held by adapters and recorded operations.
#[derive(Clone, Default)]
pub struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "Weak({})", node),
            None => write!(f, "Weak(dropped)"),
        }
    }
}

impl Node {
    pub fn new(node_type: &NodeType) -> Node {
        let attributes = vec![None; node_type.attributes().len()];
        let children = node_type
            .children()
            .iter()
            .map(|def| if def.is_list() { ChildSlot::List(Vec::new()) } else { ChildSlot::Single(None) })
            .collect();
        Node(Rc::new(NodeInner {
            node_type: node_type.clone(),
            serial: node_type.next_serial(),
            parent: RefCell::new(Weak::new()),
            slot: Cell::new(None),
            attributes: RefCell::new(attributes),
            children: RefCell::new(children),
            events: NodeEvents::default(),
            adapters: RefCell::new(Vec::new()),
        }))
    }
    pub fn node_type(&self) -> &NodeType {
        &self.0.node_type
    }
    /// Catalog-wide creation number, stable for the node's lifetime.
    pub fn serial(&self) -> u64 {
        self.0.serial
    }
    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.0))
    }

    // ------------- Attributes -------------

    /// The node type's own definition for the slot of `def`, which carries the
    /// default and rules of the most-derived declaration.
    fn own_attribute(&self, def: &AttributeDef) -> Result<&AttributeDef> {
        match self.node_type().attributes().get(def.index()) {
            Some(own) if own == def => Ok(own),
            _ => Err(DomError::InvalidArgument(format!(
                "attribute '{}' is not valid for type '{}'",
                def.name(),
                self.node_type()
            ))),
        }
    }
    /// Stored value, or the default.
    pub fn get_attribute(&self, def: &AttributeDef) -> Result<AttributeValue> {
        let own = self.own_attribute(def)?;
        Ok(self.0.attributes.borrow()[own.index()].clone().unwrap_or_else(|| own.default_value().clone()))
    }
    /// Stored value only; `None` when the attribute holds its default.
    pub fn get_local_attribute(&self, def: &AttributeDef) -> Result<Option<AttributeValue>> {
        let own = self.own_attribute(def)?;
        Ok(self.0.attributes.borrow()[own.index()].clone())
    }
    pub fn is_attribute_default(&self, def: &AttributeDef) -> Result<bool> {
        Ok(self.get_local_attribute(def)?.is_none())
    }
    pub fn set_attribute(&self, def: &AttributeDef, value: impl Into<AttributeValue>) -> Result<()> {
        let value = value.into();
        let own = self.own_attribute(def)?.clone();
        if !own.value_type().accepts(&value) {
            return Err(DomError::InvalidArgument(format!(
                "attribute '{}' expects {} but got {}",
                own.name(),
                own.value_type(),
                value.kind_name()
            )));
        }
        if !value.is_finite() {
            return Err(DomError::InvalidArgument(format!("attribute '{}' only takes finite numbers", own.name())));
        }
        if let Some(rule) = own.rules().iter().find(|r| !r.accepts(&value)) {
            return Err(DomError::InvalidArgument(format!(
                "value '{}' breaks rule {} of attribute '{}'",
                value,
                rule,
                own.name()
            )));
        }
        let old_value = self.get_attribute(&own)?;
        if old_value == value {
            return Ok(());
        }
        let event = AttributeEvent { node: self.clone(), def: own.clone(), old_value, new_value: value };
        self.bubble(&event, event::attribute_changing)?;
        {
            let stored = if event.new_value == *own.default_value() { None } else { Some(event.new_value.clone()) };
            self.0.attributes.borrow_mut()[own.index()] = stored;
        }
        trace!(node = %self, attribute = own.name(), value = %event.new_value, "attribute set");
        self.bubble(&event, event::attribute_changed)
    }
    /// Restores the default, raising the usual events if the value changes.
    pub fn reset_attribute(&self, def: &AttributeDef) -> Result<()> {
        let own = self.own_attribute(def)?.clone();
        self.set_attribute(&own, own.default_value().clone())
    }
    /// Sets the value only while the attribute still holds its default.
    pub fn set_attribute_if_default(&self, def: &AttributeDef, value: impl Into<AttributeValue>) -> Result<bool> {
        if self.is_attribute_default(def)? {
            self.set_attribute(def, value)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
    fn named_attribute(&self, name: &str) -> Result<AttributeDef> {
        self.node_type().attribute_definition(name).ok_or_else(|| {
            DomError::InvalidArgument(format!("type '{}' has no attribute '{}'", self.node_type(), name))
        })
    }
    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.get_attribute(&self.named_attribute(name)?)
    }
    pub fn set_attribute_named(&self, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        self.set_attribute(&self.named_attribute(name)?, value)
    }
    /// Value of the type's id attribute, if it has one and it is not empty.
    pub fn get_id(&self) -> Option<String> {
        let def = self.node_type().id_attribute()?;
        match self.0.attributes.borrow()[def.index()].as_ref() {
            Some(AttributeValue::Text(id)) if !id.is_empty() => Some(id.clone()),
            Some(_) => None,
            None => def.default_value().as_str().filter(|id| !id.is_empty()).map(str::to_string),
        }
    }

    // ------------- Tree -------------

    pub fn parent(&self) -> Option<Node> {
        self.0.parent.borrow().upgrade().map(Node)
    }
    /// The slot this node occupies in its parent.
    pub fn child_def(&self) -> Option<ChildDef> {
        let parent = self.parent()?;
        let slot = self.0.slot.get()?;
        parent.node_type().children().get(slot).cloned()
    }
    pub fn root(&self) -> Node {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }
    /// This node followed by its ancestors.
    pub fn lineage(&self) -> Lineage {
        Lineage { next: Some(self.clone()) }
    }
    /// Ancestors only, nearest first.
    pub fn ancestry(&self) -> Lineage {
        Lineage { next: self.parent() }
    }
    /// Pre-order traversal starting with this node.
    pub fn subtree(&self) -> Subtree {
        Subtree { stack: vec![self.clone()] }
    }
    pub fn is_descendant_of(&self, node: &Node) -> bool {
        self.ancestry().any(|a| a == *node)
    }
    /// Children of every slot, in slot order.
    pub fn children(&self) -> Vec<Node> {
        let mut all = Vec::new();
        for slot in self.0.children.borrow().iter() {
            match slot {
                ChildSlot::Single(Some(child)) => all.push(child.clone()),
                ChildSlot::Single(None) => {}
                ChildSlot::List(list) => all.extend(list.iter().cloned()),
            }
        }
        all
    }
    fn check_child(&self, def: &ChildDef) -> Result<()> {
        if self.node_type().is_valid_child(def) {
            Ok(())
        } else {
            Err(DomError::InvalidArgument(format!(
                "child '{}' is not valid for type '{}'",
                def.name(),
                self.node_type()
            )))
        }
    }
    fn check_new_child(&self, def: &ChildDef, child: &Node) -> Result<()> {
        let target = self.node_type().child_type(def);
        if !target.is_assignable_from(child.node_type()) {
            return Err(DomError::InvalidArgument(format!(
                "child '{}' expects {} but got {}",
                def.name(),
                target,
                child.node_type()
            )));
        }
        if child.parent().is_some() {
            return Err(DomError::InvalidOperation(format!("{} already has a parent", child)));
        }
        if child == self || self.is_descendant_of(child) {
            return Err(DomError::InvalidOperation(format!("cannot insert {} beneath itself", child)));
        }
        Ok(())
    }
    pub fn get_children(&self, def: &ChildDef) -> Result<Vec<Node>> {
        self.check_child(def)?;
        Ok(self.slot_children(def))
    }
    fn slot_children(&self, def: &ChildDef) -> Vec<Node> {
        match &self.0.children.borrow()[def.index()] {
            ChildSlot::Single(child) => child.iter().cloned().collect(),
            ChildSlot::List(list) => list.clone(),
        }
    }
    pub fn get_child(&self, def: &ChildDef) -> Result<Option<Node>> {
        self.check_child(def)?;
        if def.is_list() {
            return Err(DomError::InvalidOperation(format!("child '{}' is a list", def.name())));
        }
        Ok(self.single_child(def))
    }
    fn single_child(&self, def: &ChildDef) -> Option<Node> {
        match &self.0.children.borrow()[def.index()] {
            ChildSlot::Single(child) => child.clone(),
            ChildSlot::List(_) => None,
        }
    }
    /// Fills, replaces or (with `None`) empties a single child slot.
    pub fn set_child(&self, def: &ChildDef, child: Option<&Node>) -> Result<()> {
        self.check_child(def)?;
        if def.is_list() {
            return Err(DomError::InvalidOperation(format!("child '{}' is a list", def.name())));
        }
        let current = self.single_child(def);
        if current.as_ref() == child {
            return Ok(());
        }
        if let Some(new_child) = child {
            self.check_new_child(def, new_child)?;
        }
        if let Some(old_child) = current {
            let event = ChildEvent { parent: self.clone(), child: old_child.clone(), def: def.clone(), index: 0 };
            self.bubble(&event, event::child_removing)?;
            // a handler may already have emptied the slot
            if self.single_child(def).as_ref() == Some(&old_child) {
                self.0.children.borrow_mut()[def.index()] = ChildSlot::Single(None);
                old_child.detach();
                trace!(parent = %self, child = %old_child, slot = def.name(), "child removed");
                self.bubble(&event, event::child_removed)?;
            }
        }
        if let Some(new_child) = child {
            let event = ChildEvent { parent: self.clone(), child: new_child.clone(), def: def.clone(), index: 0 };
            self.bubble(&event, event::child_inserting)?;
            self.check_new_child(def, new_child)?;
            if self.single_child(def).is_some() {
                return Err(DomError::InvalidOperation(format!(
                    "child '{}' was filled while inserting {}",
                    def.name(),
                    new_child
                )));
            }
            self.0.children.borrow_mut()[def.index()] = ChildSlot::Single(Some(new_child.clone()));
            new_child.attach(self, def);
            trace!(parent = %self, child = %new_child, slot = def.name(), "child inserted");
            self.bubble(&event, event::child_inserted)?;
        }
        Ok(())
    }
    /// Handle to a list slot.
    pub fn get_child_list(&self, def: &ChildDef) -> Result<ChildList> {
        self.check_child(def)?;
        if !def.is_list() {
            return Err(DomError::InvalidOperation(format!("child '{}' is not a list", def.name())));
        }
        Ok(ChildList { parent: self.clone(), def: def.clone() })
    }
    fn list_len(&self, def: &ChildDef) -> usize {
        match &self.0.children.borrow()[def.index()] {
            ChildSlot::List(list) => list.len(),
            ChildSlot::Single(_) => 0,
        }
    }
    fn list_position(&self, def: &ChildDef, child: &Node) -> Option<usize> {
        match &self.0.children.borrow()[def.index()] {
            ChildSlot::List(list) => list.iter().position(|c| c == child),
            ChildSlot::Single(_) => None,
        }
    }
    fn list_child(&self, def: &ChildDef, index: usize) -> Option<Node> {
        match &self.0.children.borrow()[def.index()] {
            ChildSlot::List(list) => list.get(index).cloned(),
            ChildSlot::Single(_) => None,
        }
    }
    fn insert_child(&self, def: &ChildDef, index: usize, child: &Node) -> Result<()> {
        self.check_new_child(def, child)?;
        let len = self.list_len(def);
        if index > len {
            return Err(DomError::InvalidArgument(format!(
                "index {} is out of range for '{}' with {} children",
                index,
                def.name(),
                len
            )));
        }
        let event = ChildEvent { parent: self.clone(), child: child.clone(), def: def.clone(), index };
        self.bubble(&event, event::child_inserting)?;
        self.check_new_child(def, child)?;
        let index = index.min(self.list_len(def));
        if let ChildSlot::List(list) = &mut self.0.children.borrow_mut()[def.index()] {
            list.insert(index, child.clone());
        }
        child.attach(self, def);
        trace!(parent = %self, child = %child, slot = def.name(), index, "child inserted");
        self.bubble(&ChildEvent { index, ..event }, event::child_inserted)
    }
    fn remove_child_at(&self, def: &ChildDef, index: usize) -> Result<Node> {
        let child = self.list_child(def, index).ok_or_else(|| {
            DomError::InvalidArgument(format!(
                "index {} is out of range for '{}' with {} children",
                index,
                def.name(),
                self.list_len(def)
            ))
        })?;
        let event = ChildEvent { parent: self.clone(), child: child.clone(), def: def.clone(), index };
        self.bubble(&event, event::child_removing)?;
        let Some(index) = self.list_position(def, &child) else {
            return Ok(child);
        };
        if let ChildSlot::List(list) = &mut self.0.children.borrow_mut()[def.index()] {
            list.remove(index);
        }
        child.detach();
        trace!(parent = %self, child = %child, slot = def.name(), index, "child removed");
        self.bubble(&ChildEvent { index, ..event }, event::child_removed)?;
        Ok(child)
    }
    /// Detaches this node from its parent; a no-op for roots.
    pub fn remove_from_parent(&self) -> Result<()> {
        let (Some(parent), Some(def)) = (self.parent(), self.child_def()) else {
            return Ok(());
        };
        if def.is_list() {
            if let Some(index) = parent.list_position(&def, self) {
                parent.remove_child_at(&def, index)?;
            }
            Ok(())
        } else {
            parent.set_child(&def, None)
        }
    }
    fn attach(&self, parent: &Node, def: &ChildDef) {
        *self.0.parent.borrow_mut() = Rc::downgrade(&parent.0);
        self.0.slot.set(Some(def.index()));
    }
    fn detach(&self) {
        *self.0.parent.borrow_mut() = Weak::new();
        self.0.slot.set(None);
    }

    // ------------- Events -------------

    fn bubble<E>(&self, event: &E, select: fn(&NodeEvents) -> &HandlerList<E>) -> Result<()> {
        for node in self.lineage() {
            select(&node.0.events).raise(event)?;
        }
        Ok(())
    }
    pub fn on_attribute_changing(&self, handler: impl Fn(&AttributeEvent) -> Result<()> + 'static) -> Subscription {
        let id = self.0.events.attribute_changing.add(Rc::new(handler));
        Subscription { kind: EventKind::AttributeChanging, id }
    }
    pub fn on_attribute_changed(&self, handler: impl Fn(&AttributeEvent) -> Result<()> + 'static) -> Subscription {
        let id = self.0.events.attribute_changed.add(Rc::new(handler));
        Subscription { kind: EventKind::AttributeChanged, id }
    }
    pub fn on_child_inserting(&self, handler: impl Fn(&ChildEvent) -> Result<()> + 'static) -> Subscription {
        let id = self.0.events.child_inserting.add(Rc::new(handler));
        Subscription { kind: EventKind::ChildInserting, id }
    }
    pub fn on_child_inserted(&self, handler: impl Fn(&ChildEvent) -> Result<()> + 'static) -> Subscription {
        let id = self.0.events.child_inserted.add(Rc::new(handler));
        Subscription { kind: EventKind::ChildInserted, id }
    }
    pub fn on_child_removing(&self, handler: impl Fn(&ChildEvent) -> Result<()> + 'static) -> Subscription {
        let id = self.0.events.child_removing.add(Rc::new(handler));
        Subscription { kind: EventKind::ChildRemoving, id }
    }
    pub fn on_child_removed(&self, handler: impl Fn(&ChildEvent) -> Result<()> + 'static) -> Subscription {
        let id = self.0.events.child_removed.add(Rc::new(handler));
        Subscription { kind: EventKind::ChildRemoved, id }
    }
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.0.events.remove(subscription)
    }

    // ------------- Copying -------------

    /// Deep-copies the given subtrees. See [`Node::copy_with_map`].
    pub fn copy(originals: &[Node]) -> Vec<Node> {
        let mut map = CopyMap::default();
        Node::copy_with_map(originals, &mut map)
    }
    /// Deep-copies the given subtrees into new detached roots and records
    /// every original-to-copy pair in `map`.
    ///
    /// Copies get fresh identity, the same attribute values and recursively
    /// copied children. A reference whose target was copied in the same call
    /// is redirected to that target's copy; any other reference keeps
    /// pointing at its original target. No events are raised.
    pub fn copy_with_map(originals: &[Node], map: &mut CopyMap) -> Vec<Node> {
        map.clear();
        let copies: Vec<Node> = originals.iter().map(|original| original.copy_into(map)).collect();
        for (original, copy) in map.iter() {
            for def in original.node_type().attributes() {
                let Some(AttributeValue::Reference(reference)) = original.0.attributes.borrow()[def.index()].clone()
                else {
                    continue;
                };
                let Some(target) = reference.resolve(original) else {
                    continue;
                };
                if let Some(target_copy) = map.get(&target) {
                    let redirected = NodeRef::bound(reference.id(), target_copy);
                    copy.0.attributes.borrow_mut()[def.index()] = Some(AttributeValue::Reference(redirected));
                }
            }
        }
        copies
    }
    fn copy_into(&self, map: &mut CopyMap) -> Node {
        let copy = Node::new(self.node_type());
        *copy.0.attributes.borrow_mut() = self.0.attributes.borrow().clone();
        for def in self.node_type().children() {
            for child in self.slot_children(def) {
                let child_copy = child.copy_into(map);
                match &mut copy.0.children.borrow_mut()[def.index()] {
                    ChildSlot::Single(slot) => *slot = Some(child_copy.clone()),
                    ChildSlot::List(list) => list.push(child_copy.clone()),
                }
                child_copy.attach(&copy, def);
            }
        }
        map.insert(self.clone(), copy.clone());
        copy
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Node {}
impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.0), state)
    }
}
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get_id() {
            Some(id) => write!(f, "{}#{}({})", self.node_type(), self.serial(), id),
            None => write!(f, "{}#{}", self.node_type(), self.serial()),
        }
    }
}
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// ------------- Traversal -------------

pub struct Lineage {
    next: Option<Node>,
}

impl Iterator for Lineage {
    type Item = Node;
    fn next(&mut self) -> Option<Node> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

pub struct Subtree {
    stack: Vec<Node>,
}

impl Iterator for Subtree {
    type Item = Node;
    fn next(&mut self) -> Option<Node> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().into_iter().rev());
        Some(node)
    }
}

// ------------- Child lists -------------

/// Live view of one list slot. Every mutation goes through the parent and
/// raises the usual events.
#[derive(Clone, Debug)]
pub struct ChildList {
    parent: Node,
    def: ChildDef,
}

impl ChildList {
    pub fn parent(&self) -> &Node {
        &self.parent
    }
    pub fn def(&self) -> &ChildDef {
        &self.def
    }
    pub fn len(&self) -> usize {
        self.parent.list_len(&self.def)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<Node> {
        self.parent.list_child(&self.def, index)
    }
    pub fn to_vec(&self) -> Vec<Node> {
        self.parent.slot_children(&self.def)
    }
    pub fn iter(&self) -> std::vec::IntoIter<Node> {
        self.to_vec().into_iter()
    }
    pub fn index_of(&self, child: &Node) -> Option<usize> {
        self.parent.list_position(&self.def, child)
    }
    pub fn contains(&self, child: &Node) -> bool {
        self.index_of(child).is_some()
    }
    pub fn push(&self, child: &Node) -> Result<()> {
        self.parent.insert_child(&self.def, self.len(), child)
    }
    pub fn insert(&self, index: usize, child: &Node) -> Result<()> {
        self.parent.insert_child(&self.def, index, child)
    }
    pub fn remove_at(&self, index: usize) -> Result<Node> {
        self.parent.remove_child_at(&self.def, index)
    }
    pub fn remove(&self, child: &Node) -> Result<bool> {
        match self.index_of(child) {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }
    /// Removes every child, last first.
    pub fn clear(&self) -> Result<()> {
        while let Some(last) = self.len().checked_sub(1) {
            self.remove_at(last)?;
        }
        Ok(())
    }
}

impl IntoIterator for &ChildList {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
