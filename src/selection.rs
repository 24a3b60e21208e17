//! Selection: which nodes of a document the user is working on.

use std::cell::RefCell;
use std::rc::Rc;

use crate::adapt::{AdapterCreator, NodeAdapter};
use crate::error::Result;
use crate::event::{HandlerList, Subscription};
use crate::node::{Node, WeakNode};

/// Capability probed by history contexts to snapshot and restore selection
/// around transactions.
pub trait SelectionContext {
    fn selection(&self) -> Vec<Node>;
    fn set_selection(&self, items: Vec<Node>);
}

/// Raised after the selection changed.
#[derive(Debug, Clone)]
pub struct SelectionChanged {
    pub selection: Vec<Node>,
}

/// Selection adapter. Holds its items weakly and forgets items that leave
/// the adapted node's subtree.
pub struct Selection {
    adapter: NodeAdapter,
    items: RefCell<Vec<WeakNode>>,
    changed: HandlerList<SelectionChanged>,
    subscription: RefCell<Option<Subscription>>,
}

impl Selection {
    pub fn attach(node: &Node) -> Rc<Selection> {
        let selection = Rc::new(Selection {
            adapter: NodeAdapter::new(node),
            items: RefCell::new(Vec::new()),
            changed: HandlerList::default(),
            subscription: RefCell::new(None),
        });
        let weak = Rc::downgrade(&selection);
        let subscription = node.on_child_removed(move |_| match weak.upgrade() {
            Some(selection) => selection.prune(),
            None => Ok(()),
        });
        *selection.subscription.borrow_mut() = Some(subscription);
        selection
    }
    pub fn creator() -> AdapterCreator {
        AdapterCreator::new("selection", |node: &Node| Selection::attach(node))
            .exposes(|s: Rc<Selection>| s as Rc<dyn SelectionContext>)
    }
    fn prune(&self) -> Result<()> {
        let owner = self.adapter.node()?;
        let before = self.items.borrow().len();
        self.items.borrow_mut().retain(|item| {
            item.upgrade().is_some_and(|n| n == owner || n.is_descendant_of(&owner))
        });
        if self.items.borrow().len() != before {
            self.changed.raise(&SelectionChanged { selection: self.selection() })?;
        }
        Ok(())
    }
    pub fn len(&self) -> usize {
        self.selection().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn contains(&self, node: &Node) -> bool {
        self.selection().contains(node)
    }
    /// The most recently selected node.
    pub fn last_selected(&self) -> Option<Node> {
        self.selection().pop()
    }
    pub fn select(&self, items: &[Node]) {
        self.set_selection(items.to_vec());
    }
    pub fn add(&self, node: &Node) {
        if !self.contains(node) {
            self.items.borrow_mut().push(node.downgrade());
            self.notify();
        }
    }
    pub fn remove(&self, node: &Node) {
        let before = self.items.borrow().len();
        self.items.borrow_mut().retain(|item| item.upgrade().as_ref() != Some(node));
        if self.items.borrow().len() != before {
            self.notify();
        }
    }
    pub fn clear(&self) {
        self.set_selection(Vec::new());
    }
    pub fn on_changed(&self, handler: impl Fn(&SelectionChanged) -> Result<()> + 'static) -> u64 {
        self.changed.add(Rc::new(handler))
    }
    fn notify(&self) {
        let event = SelectionChanged { selection: self.selection() };
        if let Err(e) = self.changed.raise(&event) {
            tracing::warn!(error = %e, "selection handler failed");
        }
    }
}

impl SelectionContext for Selection {
    fn selection(&self) -> Vec<Node> {
        self.items.borrow().iter().filter_map(WeakNode::upgrade).collect()
    }
    fn set_selection(&self, items: Vec<Node>) {
        let mut unique: Vec<Node> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        *self.items.borrow_mut() = unique.iter().map(Node::downgrade).collect();
        self.notify();
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        if let (Ok(node), Some(subscription)) = (self.adapter.node(), self.subscription.borrow_mut().take()) {
            node.unsubscribe(subscription);
        }
    }
}
