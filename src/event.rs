//! Change notification primitives.
//!
//! Nodes keep one [`HandlerList`] per event kind. Raising an event delivers it
//! to the node's handlers and then to every ancestor's handlers, so a handler
//! attached to a document root observes the whole document. Handlers are
//! snapshotted before delivery, which makes subscribing or unsubscribing from
//! inside a handler safe.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::datatype::AttributeValue;
use crate::error::Result;
use crate::node::Node;
use crate::schema::{AttributeDef, ChildDef};

pub type Handler<E> = Rc<dyn Fn(&E) -> Result<()>>;

pub struct HandlerList<E> {
    next: Cell<u64>,
    entries: RefCell<Vec<(u64, Handler<E>)>>,
}

impl<E> Default for HandlerList<E> {
    fn default() -> Self {
        Self { next: Cell::new(1), entries: RefCell::new(Vec::new()) }
    }
}

impl<E> HandlerList<E> {
    pub fn add(&self, handler: Handler<E>) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        self.entries.borrow_mut().push((id, handler));
        id
    }
    pub fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(i, _)| *i != id);
        entries.len() != before
    }
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
    pub fn snapshot(&self) -> Vec<Handler<E>> {
        self.entries.borrow().iter().map(|(_, h)| Rc::clone(h)).collect()
    }
    /// Calls every handler registered at the time of the call; the first
    /// error stops delivery.
    pub fn raise(&self, event: &E) -> Result<()> {
        for handler in self.snapshot() {
            handler(event)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AttributeChanging,
    AttributeChanged,
    ChildInserting,
    ChildInserted,
    ChildRemoving,
    ChildRemoved,
}

/// Returned by every subscription; hand it back to `Node::unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub(crate) kind: EventKind,
    pub(crate) id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Debug, Clone)]
pub struct AttributeEvent {
    pub node: Node,
    pub def: AttributeDef,
    pub old_value: AttributeValue,
    pub new_value: AttributeValue,
}

#[derive(Debug, Clone)]
pub struct ChildEvent {
    pub parent: Node,
    pub child: Node,
    pub def: ChildDef,
    /// Position in a list slot; always 0 for single slots.
    pub index: usize,
}

#[derive(Default)]
pub(crate) struct NodeEvents {
    pub(crate) attribute_changing: HandlerList<AttributeEvent>,
    pub(crate) attribute_changed: HandlerList<AttributeEvent>,
    pub(crate) child_inserting: HandlerList<ChildEvent>,
    pub(crate) child_inserted: HandlerList<ChildEvent>,
    pub(crate) child_removing: HandlerList<ChildEvent>,
    pub(crate) child_removed: HandlerList<ChildEvent>,
}

impl NodeEvents {
    pub(crate) fn remove(&self, subscription: Subscription) -> bool {
        match subscription.kind {
            EventKind::AttributeChanging => self.attribute_changing.remove(subscription.id),
            EventKind::AttributeChanged => self.attribute_changed.remove(subscription.id),
            EventKind::ChildInserting => self.child_inserting.remove(subscription.id),
            EventKind::ChildInserted => self.child_inserted.remove(subscription.id),
            EventKind::ChildRemoving => self.child_removing.remove(subscription.id),
            EventKind::ChildRemoved => self.child_removed.remove(subscription.id),
        }
    }
}

// selectors handed to Node::bubble
pub(crate) fn attribute_changing(events: &NodeEvents) -> &HandlerList<AttributeEvent> {
    &events.attribute_changing
}
pub(crate) fn attribute_changed(events: &NodeEvents) -> &HandlerList<AttributeEvent> {
    &events.attribute_changed
}
pub(crate) fn child_inserting(events: &NodeEvents) -> &HandlerList<ChildEvent> {
    &events.child_inserting
}
pub(crate) fn child_inserted(events: &NodeEvents) -> &HandlerList<ChildEvent> {
    &events.child_inserted
}
pub(crate) fn child_removing(events: &NodeEvents) -> &HandlerList<ChildEvent> {
    &events.child_removing
}
pub(crate) fn child_removed(events: &NodeEvents) -> &HandlerList<ChildEvent> {
    &events.child_removed
}
