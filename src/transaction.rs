//! Transactions: grouping tree mutations into named, reversible units.
//!
//! A [`TransactionContext`] watches the subtree of the node it is attached to
//! and, while a transaction is open, records every mutation as a primitive
//! [`Operation`]. Observers ([`TransactionObserver`]) are told when a
//! transaction begins, is about to end, has ended (receiving the recorded
//! operations) or was cancelled.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::datatype::AttributeValue;
use crate::error::{DomError, Result};
use crate::event::{AttributeEvent, ChildEvent, Subscription};
use crate::node::{Node, WeakNode};
use crate::schema::{AttributeDef, ChildDef};

// ------------- Operations -------------

/// An attribute change. The new value stays mutable so later changes of the
/// same attribute can be folded into it.
#[derive(Debug)]
pub struct AttributeChange {
    node: WeakNode,
    serial: u64,
    def: AttributeDef,
    old_value: AttributeValue,
    new_value: RefCell<AttributeValue>,
}

impl AttributeChange {
    pub fn node(&self) -> Option<Node> {
        self.node.upgrade()
    }
    pub fn serial(&self) -> u64 {
        self.serial
    }
    pub fn def(&self) -> &AttributeDef {
        &self.def
    }
    pub fn old_value(&self) -> &AttributeValue {
        &self.old_value
    }
    pub fn new_value(&self) -> AttributeValue {
        self.new_value.borrow().clone()
    }
    pub fn set_new_value(&self, value: AttributeValue) {
        *self.new_value.borrow_mut() = value;
    }
}

/// A child insertion or removal. The child is held strongly so a removed
/// subtree survives for as long as it can be restored.
#[derive(Debug, Clone)]
pub struct ChildChange {
    parent: WeakNode,
    child: Node,
    def: ChildDef,
    index: usize,
}

impl ChildChange {
    pub fn parent(&self) -> Option<Node> {
        self.parent.upgrade()
    }
    pub fn child(&self) -> &Node {
        &self.child
    }
    pub fn def(&self) -> &ChildDef {
        &self.def
    }
    pub fn index(&self) -> usize {
        self.index
    }
    fn live_parent(&self) -> Result<Node> {
        self.parent.upgrade().ok_or_else(|| {
            DomError::InvalidOperation(format!("the parent of {} no longer exists", self.child))
        })
    }
    fn insert(&self) -> Result<()> {
        let parent = self.live_parent()?;
        if self.def.is_list() {
            parent.get_child_list(&self.def)?.insert(self.index, &self.child)
        } else {
            parent.set_child(&self.def, Some(&self.child))
        }
    }
    fn remove(&self) -> Result<()> {
        let parent = self.live_parent()?;
        if self.def.is_list() {
            let list = parent.get_child_list(&self.def)?;
            // prefer the recorded position, fall back to wherever the child is now
            match list.get(self.index) {
                Some(child) if child == self.child => list.remove_at(self.index).map(|_| ()),
                _ => list.remove(&self.child).map(|_| ()),
            }
        } else {
            parent.set_child(&self.def, None)
        }
    }
}

#[derive(Debug, Clone)]
pub enum Operation {
    AttributeChanged(Rc<AttributeChange>),
    ChildInserted(ChildChange),
    ChildRemoved(ChildChange),
}

impl Operation {
    fn attribute(event: &AttributeEvent) -> Self {
        Operation::AttributeChanged(Rc::new(AttributeChange {
            node: event.node.downgrade(),
            serial: event.node.serial(),
            def: event.def.clone(),
            old_value: event.old_value.clone(),
            new_value: RefCell::new(event.new_value.clone()),
        }))
    }
    fn child(event: &ChildEvent) -> ChildChange {
        ChildChange {
            parent: event.parent.downgrade(),
            child: event.child.clone(),
            def: event.def.clone(),
            index: event.index,
        }
    }
    /// Re-applies the change.
    pub fn apply(&self) -> Result<()> {
        match self {
            Operation::AttributeChanged(change) => {
                let node = change.node().ok_or_else(|| {
                    DomError::InvalidOperation(format!("node #{} no longer exists", change.serial))
                })?;
                node.set_attribute(&change.def, change.new_value())
            }
            Operation::ChildInserted(change) => change.insert(),
            Operation::ChildRemoved(change) => change.remove(),
        }
    }
    /// Reverses the change.
    pub fn revert(&self) -> Result<()> {
        match self {
            Operation::AttributeChanged(change) => {
                let node = change.node().ok_or_else(|| {
                    DomError::InvalidOperation(format!("node #{} no longer exists", change.serial))
                })?;
                node.set_attribute(&change.def, change.old_value.clone())
            }
            Operation::ChildInserted(change) => change.remove(),
            Operation::ChildRemoved(change) => change.insert(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::AttributeChanged(c) => {
                write!(f, "set #{}.{} {} -> {}", c.serial, c.def.name(), c.old_value, c.new_value.borrow())
            }
            Operation::ChildInserted(c) => write!(f, "insert {} into {}[{}]", c.child, c.def.name(), c.index),
            Operation::ChildRemoved(c) => write!(f, "remove {} from {}[{}]", c.child, c.def.name(), c.index),
        }
    }
}

// ------------- Context -------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction,
    /// Observers are running their end-of-transaction checks; their
    /// mutations are still recorded.
    Committing,
    Cancelling,
}

pub trait TransactionObserver {
    fn beginning(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    /// Runs before the operations are handed out; mutations made here are
    /// part of the transaction.
    fn ending(&self, _context: &TransactionContext) -> Result<()> {
        Ok(())
    }
    /// Receives the recorded operations of a committed transaction.
    fn ended(&self, _name: &str, _operations: &mut Vec<Operation>) -> Result<()> {
        Ok(())
    }
    fn cancelled(&self, _name: &str) {}
}

pub struct TransactionContext {
    node: WeakNode,
    state: Cell<TransactionState>,
    name: RefCell<Option<String>>,
    operations: RefCell<Vec<Operation>>,
    require_transactions: Cell<bool>,
    observers: RefCell<Vec<Weak<dyn TransactionObserver>>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl TransactionContext {
    /// Starts recording mutations made anywhere in `node`'s subtree.
    pub fn attach(node: &Node) -> Rc<TransactionContext> {
        let context = Rc::new(TransactionContext {
            node: node.downgrade(),
            state: Cell::new(TransactionState::Idle),
            name: RefCell::new(None),
            operations: RefCell::new(Vec::new()),
            require_transactions: Cell::new(false),
            observers: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
        });
        let weak = Rc::downgrade(&context);
        let subscriptions = vec![
            node.on_attribute_changed(Self::recorder(&weak, Operation::attribute)),
            node.on_child_inserted(Self::recorder(&weak, |e: &ChildEvent| Operation::ChildInserted(Operation::child(e)))),
            node.on_child_removed(Self::recorder(&weak, |e: &ChildEvent| Operation::ChildRemoved(Operation::child(e)))),
        ];
        *context.subscriptions.borrow_mut() = subscriptions;
        context
    }
    fn recorder<E: 'static>(
        context: &Weak<TransactionContext>,
        operation: impl Fn(&E) -> Operation + 'static,
    ) -> impl Fn(&E) -> Result<()> + 'static {
        let context = context.clone();
        move |event: &E| match context.upgrade() {
            Some(context) => context.record(operation(event)),
            None => Ok(()),
        }
    }
    fn record(&self, operation: Operation) -> Result<()> {
        match self.state.get() {
            TransactionState::InTransaction | TransactionState::Committing => {
                self.operations.borrow_mut().push(operation);
                Ok(())
            }
            TransactionState::Cancelling => Ok(()),
            TransactionState::Idle if self.require_transactions.get() => Err(DomError::InvalidOperation(format!(
                "{} was changed outside of a transaction",
                operation
            ))),
            TransactionState::Idle => Ok(()),
        }
    }
    pub fn node(&self) -> Option<Node> {
        self.node.upgrade()
    }
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }
    pub fn in_transaction(&self) -> bool {
        self.state.get() != TransactionState::Idle
    }
    pub fn transaction_name(&self) -> Option<String> {
        self.name.borrow().clone()
    }
    /// Number of operations recorded so far in the open transaction.
    pub fn operation_count(&self) -> usize {
        self.operations.borrow().len()
    }
    pub fn require_transactions(&self) -> bool {
        self.require_transactions.get()
    }
    /// When set, any mutation of the subtree outside a transaction fails.
    pub fn set_require_transactions(&self, require: bool) {
        self.require_transactions.set(require);
    }
    pub fn add_observer(&self, observer: Weak<dyn TransactionObserver>) {
        self.observers.borrow_mut().push(observer);
    }
    fn observers(&self) -> Vec<Rc<dyn TransactionObserver>> {
        let mut observers = self.observers.borrow_mut();
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn begin(&self, name: &str) -> Result<()> {
        if self.state.get() != TransactionState::Idle {
            return Err(DomError::InvalidOperation(format!(
                "cannot begin '{}': already in transaction '{}'",
                name,
                self.transaction_name().unwrap_or_default()
            )));
        }
        self.state.set(TransactionState::InTransaction);
        *self.name.borrow_mut() = Some(name.to_string());
        self.operations.borrow_mut().clear();
        debug!(transaction = name, "transaction begun");
        for observer in self.observers() {
            if let Err(e) = observer.beginning(name) {
                self.abandon();
                return Err(e);
            }
        }
        Ok(())
    }
    /// Commits the open transaction and hands its operations to observers.
    pub fn end(&self) -> Result<()> {
        if self.state.get() != TransactionState::InTransaction {
            return Err(DomError::InvalidOperation("no transaction to end".to_string()));
        }
        let name = self.transaction_name().unwrap_or_default();
        self.state.set(TransactionState::Committing);
        for observer in self.observers() {
            if let Err(e) = observer.ending(self) {
                self.abandon();
                return Err(e);
            }
        }
        let mut operations = self.operations.take();
        debug!(transaction = %name, operations = operations.len(), "transaction committed");
        let mut result = Ok(());
        for observer in self.observers() {
            if let Err(e) = observer.ended(&name, &mut operations) {
                result = Err(e);
                break;
            }
        }
        self.reset();
        result
    }
    /// Rolls the open transaction back, reverting its operations newest first.
    pub fn cancel(&self) -> Result<()> {
        if self.state.get() != TransactionState::InTransaction {
            return Err(DomError::InvalidOperation("no transaction to cancel".to_string()));
        }
        self.state.set(TransactionState::Cancelling);
        let operations = self.operations.take();
        let mut result = Ok(());
        for operation in operations.iter().rev() {
            if let Err(e) = operation.revert() {
                result = Err(e);
                break;
            }
        }
        self.finish_cancelled();
        result
    }
    /// Drops the open transaction, leaving its changes applied and unrecorded.
    fn abandon(&self) {
        self.state.set(TransactionState::Cancelling);
        self.operations.borrow_mut().clear();
        self.finish_cancelled();
    }
    fn finish_cancelled(&self) {
        let name = self.transaction_name().unwrap_or_default();
        for observer in self.observers() {
            observer.cancelled(&name);
        }
        debug!(transaction = %name, "transaction cancelled");
        self.reset();
    }
    fn reset(&self) {
        self.state.set(TransactionState::Idle);
        *self.name.borrow_mut() = None;
    }
    /// Runs `action` inside a transaction named `name`.
    ///
    /// If `action` fails, the changes it already made stay applied, nothing
    /// is recorded and the error is returned.
    pub fn do_transaction<F>(&self, name: &str, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.begin(name)?;
        match action() {
            Ok(()) => self.end(),
            Err(e) => {
                if self.state.get() == TransactionState::InTransaction {
                    self.abandon();
                }
                Err(e)
            }
        }
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if let Some(node) = self.node.upgrade() {
            for subscription in self.subscriptions.borrow().iter() {
                node.unsubscribe(*subscription);
            }
        }
    }
}
