//! References between nodes.
//!
//! A reference attribute stores a [`NodeRef`]: the target's id plus a weak
//! cache of the target itself. Resolution is lazy. A live cached target
//! whose id still matches wins; otherwise the id is looked up from the
//! owner's root, through an [`IdIndex`] when the root has one or by walking
//! the tree otherwise.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use bimap::BiMap;
use tracing::{debug, warn};

use crate::adapt::{AdapterCreator, NodeAdapter};
use crate::datatype::{AttributeType, AttributeValue};
use crate::error::{DomError, Result};
use crate::event::{HandlerList, Subscription};
use crate::node::{Node, NodeHasher, WeakNode};
use crate::schema::AttributeDef;
use crate::transaction::{TransactionContext, TransactionObserver};

#[derive(Clone)]
pub struct NodeRef {
    id: String,
    target: RefCell<WeakNode>,
}

impl NodeRef {
    /// An unresolved reference to whatever node carries `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), target: RefCell::new(WeakNode::default()) }
    }
    /// A reference already bound to `node`, which must have an id.
    pub fn to(node: &Node) -> Result<Self> {
        let id = node
            .get_id()
            .ok_or_else(|| DomError::InvalidArgument(format!("{} has no id and cannot be referenced", node)))?;
        Ok(Self::bound(&id, node))
    }
    pub(crate) fn bound(id: &str, node: &Node) -> Self {
        Self { id: id.to_string(), target: RefCell::new(node.downgrade()) }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    /// Finds the target as seen from `owner`, the node holding the reference.
    pub fn resolve(&self, owner: &Node) -> Option<Node> {
        let cached = self.target.borrow().upgrade();
        if let Some(target) = cached {
            if target.get_id().as_deref() == Some(self.id.as_str()) {
                return Some(target);
            }
        }
        let root = owner.root();
        let found = match root.try_as::<IdIndex>() {
            Some(index) => index.find(&self.id),
            None => root.subtree().find(|n| n.get_id().as_deref() == Some(self.id.as_str())),
        };
        if let Some(target) = &found {
            *self.target.borrow_mut() = target.downgrade();
        }
        found
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bound = self.target.borrow().upgrade().is_some();
        write!(f, "NodeRef({}{})", self.id, if bound { "" } else { ", unbound" })
    }
}

impl Node {
    /// Resolved target of a reference attribute; `None` for a null reference
    /// or one whose id matches no node.
    pub fn get_reference(&self, def: &AttributeDef) -> Result<Option<Node>> {
        match self.get_attribute(def)? {
            AttributeValue::Reference(reference) => Ok(reference.resolve(self)),
            AttributeValue::Null => Ok(None),
            other => Err(DomError::InvalidArgument(format!(
                "attribute '{}' holds a {} rather than a reference",
                def.name(),
                other.kind_name()
            ))),
        }
    }
    pub fn set_reference(&self, def: &AttributeDef, target: Option<&Node>) -> Result<()> {
        match target {
            Some(target) => self.set_attribute(def, NodeRef::to(target)?),
            None => self.set_attribute(def, AttributeValue::Null),
        }
    }
    /// Reference attributes holding a value.
    pub fn references(&self) -> Vec<(AttributeDef, NodeRef)> {
        self.node_type()
            .attributes()
            .iter()
            .filter(|def| def.value_type() == AttributeType::Reference)
            .filter_map(|def| match self.get_local_attribute(def) {
                Ok(Some(AttributeValue::Reference(reference))) => Some((def.clone(), reference)),
                _ => None,
            })
            .collect()
    }
}

// ------------- Id index -------------

/// Root-level adapter mapping ids to nodes in both directions.
pub struct IdIndex {
    adapter: NodeAdapter,
    ids: RefCell<BiMap<String, u64>>,
    nodes: RefCell<HashMap<u64, WeakNode, NodeHasher>>,
    /// Ids held by more than one node; only the first holder is indexed.
    shadowed: RefCell<HashSet<String>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl IdIndex {
    pub fn attach(node: &Node) -> Rc<IdIndex> {
        let index = Rc::new(IdIndex {
            adapter: NodeAdapter::new(node),
            ids: RefCell::new(BiMap::new()),
            nodes: RefCell::new(HashMap::default()),
            shadowed: RefCell::new(HashSet::new()),
            subscriptions: RefCell::new(Vec::new()),
        });
        index.add_subtree(node);
        let weak = Rc::downgrade(&index);
        let inserted = {
            let weak = weak.clone();
            node.on_child_inserted(move |e| {
                if let Some(index) = weak.upgrade() {
                    index.add_subtree(&e.child);
                }
                Ok(())
            })
        };
        let removed = {
            let weak = weak.clone();
            node.on_child_removed(move |e| {
                if let Some(index) = weak.upgrade() {
                    index.remove_subtree(&e.child);
                }
                Ok(())
            })
        };
        let renamed = node.on_attribute_changed(move |e| {
            let is_id = e.node.node_type().id_attribute() == Some(&e.def);
            if let (true, Some(index)) = (is_id, weak.upgrade()) {
                index.remove(&e.node);
                index.add(&e.node);
            }
            Ok(())
        });
        *index.subscriptions.borrow_mut() = vec![inserted, removed, renamed];
        index
    }
    pub fn creator() -> AdapterCreator {
        AdapterCreator::new("id index", |node: &Node| IdIndex::attach(node))
    }
    fn add(&self, node: &Node) {
        let Some(id) = node.get_id() else {
            return;
        };
        let inserted = self.ids.borrow_mut().insert_no_overwrite(id, node.serial());
        if let Err((id, _)) = inserted {
            warn!(node = %node, id = %id, "duplicate id is not indexed");
            self.shadowed.borrow_mut().insert(id);
            return;
        }
        self.nodes.borrow_mut().insert(node.serial(), node.downgrade());
    }
    fn remove(&self, node: &Node) {
        let freed = self.ids.borrow_mut().remove_by_right(&node.serial());
        if let Some((id, _)) = freed {
            self.nodes.borrow_mut().remove(&node.serial());
            if self.shadowed.borrow().contains(&id) {
                self.promote(&id);
            }
        }
    }
    /// Indexes the next holder of a freed id that others also carry.
    fn promote(&self, id: &str) {
        let Ok(root) = self.adapter.node() else {
            return;
        };
        let holders: Vec<Node> = root.subtree().filter(|n| n.get_id().as_deref() == Some(id)).collect();
        if holders.len() <= 1 {
            self.shadowed.borrow_mut().remove(id);
        }
        if let Some(next) = holders.first() {
            debug!(node = %next, id = %id, "id passed to its next holder");
            self.add(next);
        }
    }
    fn add_subtree(&self, node: &Node) {
        for n in node.subtree() {
            self.add(&n);
        }
    }
    fn remove_subtree(&self, node: &Node) {
        for n in node.subtree() {
            self.remove(&n);
        }
    }
    pub fn find(&self, id: &str) -> Option<Node> {
        let serial = *self.ids.borrow().get_by_left(id)?;
        self.nodes.borrow().get(&serial)?.upgrade()
    }
    pub fn contains(&self, id: &str) -> bool {
        self.ids.borrow().contains_left(id)
    }
    pub fn id_of(&self, node: &Node) -> Option<String> {
        self.ids.borrow().get_by_right(&node.serial()).cloned()
    }
    pub fn len(&self) -> usize {
        self.ids.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// `base` if unused, otherwise `base` followed by the smallest free number.
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

impl Drop for IdIndex {
    fn drop(&mut self) {
        if let Ok(node) = self.adapter.node() {
            for subscription in self.subscriptions.borrow().iter() {
                node.unsubscribe(*subscription);
            }
        }
    }
}

// ------------- Reference validation -------------

/// A reference left pointing at a node that was removed from the document.
#[derive(Debug, Clone)]
pub struct DanglingReference {
    pub owner: Node,
    pub def: AttributeDef,
    pub target_id: String,
}

/// Checks, at the end of every transaction, whether references in the
/// subtree point at nodes removed by that transaction. Each one is reported
/// to the `on_dangling` handlers and, unless turned off, its owner is
/// removed from the tree as part of the same transaction.
pub struct ReferenceValidator {
    adapter: NodeAdapter,
    removed: RefCell<Vec<Node>>,
    remove_owners: Cell<bool>,
    dangling: HandlerList<DanglingReference>,
    subscription: RefCell<Option<Subscription>>,
}

impl ReferenceValidator {
    pub fn attach(node: &Node) -> Rc<ReferenceValidator> {
        let validator = Rc::new(ReferenceValidator {
            adapter: NodeAdapter::new(node),
            removed: RefCell::new(Vec::new()),
            remove_owners: Cell::new(true),
            dangling: HandlerList::default(),
            subscription: RefCell::new(None),
        });
        match node.try_as::<TransactionContext>() {
            Some(context) => {
                let observer: Weak<dyn TransactionObserver> = Rc::downgrade(&validator) as Weak<dyn TransactionObserver>;
                context.add_observer(observer);
                let weak = Rc::downgrade(&validator);
                let subscription = node.on_child_removed(move |e| {
                    if let Some(validator) = weak.upgrade() {
                        validator.removed.borrow_mut().push(e.child.clone());
                    }
                    Ok(())
                });
                *validator.subscription.borrow_mut() = Some(subscription);
            }
            None => warn!(node = %node, "reference validator has no transaction context to watch"),
        }
        validator
    }
    pub fn creator() -> AdapterCreator {
        AdapterCreator::new("reference validator", |node: &Node| ReferenceValidator::attach(node)).eager()
    }
    pub fn set_remove_owners(&self, remove: bool) {
        self.remove_owners.set(remove);
    }
    pub fn on_dangling(&self, handler: impl Fn(&DanglingReference) -> Result<()> + 'static) -> u64 {
        self.dangling.add(Rc::new(handler))
    }
    /// References in the subtree whose targets are among `removed`.
    fn find_dangling(&self, removed: &[Node]) -> Result<Vec<DanglingReference>> {
        let owner_root = self.adapter.node()?;
        let gone: Vec<&Node> = removed.iter().filter(|n| !n.is_descendant_of(&owner_root)).collect();
        let mut serials = HashSet::new();
        let mut ids = HashSet::new();
        for node in gone.iter().flat_map(|n| n.subtree()) {
            serials.insert(node.serial());
            if let Some(id) = node.get_id() {
                ids.insert(id);
            }
        }
        if serials.is_empty() {
            return Ok(Vec::new());
        }
        let mut dangling = Vec::new();
        for owner in owner_root.subtree() {
            for (def, reference) in owner.references() {
                let points_at_removed = match reference.resolve(&owner) {
                    Some(target) => serials.contains(&target.serial()),
                    None => ids.contains(reference.id()),
                };
                if points_at_removed {
                    dangling.push(DanglingReference { owner: owner.clone(), def, target_id: reference.id().to_string() });
                }
            }
        }
        Ok(dangling)
    }
}

impl TransactionObserver for ReferenceValidator {
    fn beginning(&self, _name: &str) -> Result<()> {
        self.removed.borrow_mut().clear();
        Ok(())
    }
    fn ending(&self, _context: &TransactionContext) -> Result<()> {
        // removing owners can strand further references, so repeat until quiet
        loop {
            let removed = self.removed.take();
            if removed.is_empty() {
                return Ok(());
            }
            for reference in self.find_dangling(&removed)? {
                debug!(owner = %reference.owner, target = %reference.target_id, "dangling reference");
                self.dangling.raise(&reference)?;
                if self.remove_owners.get() && reference.owner.parent().is_some() {
                    reference.owner.remove_from_parent()?;
                }
            }
        }
    }
    fn cancelled(&self, _name: &str) {
        self.removed.borrow_mut().clear();
    }
}

impl Drop for ReferenceValidator {
    fn drop(&mut self) {
        if let (Ok(node), Some(subscription)) = (self.adapter.node(), self.subscription.borrow_mut().take()) {
            node.unsubscribe(subscription);
        }
    }
}
