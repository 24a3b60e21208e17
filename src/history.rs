//! Undo/redo history built on transactions.
//!
//! A [`HistoryContext`] turns every committed transaction of its subtree into
//! a [`Command`] on a [`CommandHistory`]. Consecutive changes of the same
//! attribute that commit within the merge window are folded into the
//! earlier command, so dragging a slider leaves one undo step behind.
//! Several contexts can share one history through a [`GlobalHistoryContext`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::adapt::{AdapterCreator, NodeAdapter};
use crate::error::{DomError, Result};
use crate::event::HandlerList;
use crate::node::{Node, NodeHasher, WeakNode};
use crate::schema::AttributeDef;
use crate::selection::SelectionContext;
use crate::settings::HistorySettings;
use crate::transaction::{AttributeChange, Operation, TransactionContext, TransactionObserver};

// ------------- Clocks -------------

/// Time source for the merge window.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Cell::new(start) }
    }
    pub fn advance(&self, by: TimeDelta) {
        self.now.set(self.now.get() + by);
    }
    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

// ------------- Commands -------------

pub trait Command {
    fn description(&self) -> &str;
    fn undo(&self) -> Result<()>;
    fn redo(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    CommandDone(String),
    CommandUndone(String),
    CommandRedone(String),
    /// The oldest command fell off a history bounded by `max_depth`.
    CommandDropped(String),
    DirtyChanged(bool),
}

struct HistoryState {
    commands: Vec<Rc<dyn Command>>,
    current: usize,
    clean: Option<usize>,
    max_depth: usize,
}

/// Linear undo stack. Commands before `current` are done, the rest are
/// redoable until a new command truncates them.
pub struct CommandHistory {
    state: RefCell<HistoryState>,
    events: HandlerList<HistoryEvent>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::with_max_depth(0)
    }
    /// A history keeping at most `max_depth` commands; 0 keeps everything.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            state: RefCell::new(HistoryState { commands: Vec::new(), current: 0, clean: Some(0), max_depth }),
            events: HandlerList::default(),
        }
    }
    pub fn len(&self) -> usize {
        self.state.borrow().commands.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Number of commands currently done.
    pub fn current(&self) -> usize {
        self.state.borrow().current
    }
    pub fn can_undo(&self) -> bool {
        self.current() > 0
    }
    pub fn can_redo(&self) -> bool {
        let state = self.state.borrow();
        state.current < state.commands.len()
    }
    pub fn undo_description(&self) -> Option<String> {
        let state = self.state.borrow();
        let index = state.current.checked_sub(1)?;
        Some(state.commands[index].description().to_string())
    }
    pub fn redo_description(&self) -> Option<String> {
        let state = self.state.borrow();
        state.commands.get(state.current).map(|c| c.description().to_string())
    }
    pub fn descriptions(&self) -> Vec<String> {
        self.state.borrow().commands.iter().map(|c| c.description().to_string()).collect()
    }
    pub fn dirty(&self) -> bool {
        let state = self.state.borrow();
        state.clean != Some(state.current)
    }
    /// `false` marks the current position as the clean checkpoint;
    /// `true` forces dirty until the next checkpoint.
    pub fn set_dirty(&self, dirty: bool) {
        let before = self.dirty();
        {
            let mut state = self.state.borrow_mut();
            state.clean = if dirty { None } else { Some(state.current) };
        }
        self.notify_dirty(before);
    }
    pub fn subscribe(&self, handler: impl Fn(&HistoryEvent) -> Result<()> + 'static) -> u64 {
        self.events.add(Rc::new(handler))
    }
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.events.remove(id)
    }
    fn raise(&self, event: HistoryEvent) {
        if let Err(e) = self.events.raise(&event) {
            warn!(error = %e, ?event, "history handler failed");
        }
    }
    fn notify_dirty(&self, before: bool) {
        let after = self.dirty();
        if after != before {
            self.raise(HistoryEvent::DirtyChanged(after));
        }
    }
    /// Pushes an already executed command, discarding anything redoable.
    pub fn add(&self, command: Rc<dyn Command>) {
        let before = self.dirty();
        let description = command.description().to_string();
        let dropped = {
            let mut state = self.state.borrow_mut();
            let current = state.current;
            state.commands.truncate(current);
            if state.clean.is_some_and(|clean| clean > current) {
                state.clean = None;
            }
            state.commands.push(command);
            state.current += 1;
            if state.max_depth > 0 && state.commands.len() > state.max_depth {
                let oldest = state.commands.remove(0);
                state.current -= 1;
                state.clean = state.clean.and_then(|clean| clean.checked_sub(1));
                Some(oldest.description().to_string())
            } else {
                None
            }
        };
        debug!(command = %description, "command added");
        self.raise(HistoryEvent::CommandDone(description));
        if let Some(oldest) = dropped {
            debug!(command = %oldest, "oldest command dropped");
            self.raise(HistoryEvent::CommandDropped(oldest));
        }
        self.notify_dirty(before);
    }
    /// Undoes the last done command; a no-op when there is none.
    pub fn undo(&self) -> Result<()> {
        let command = {
            let state = self.state.borrow();
            match state.current.checked_sub(1) {
                Some(index) => Rc::clone(&state.commands[index]),
                None => return Ok(()),
            }
        };
        let before = self.dirty();
        command.undo()?;
        self.state.borrow_mut().current -= 1;
        debug!(command = command.description(), "command undone");
        self.raise(HistoryEvent::CommandUndone(command.description().to_string()));
        self.notify_dirty(before);
        Ok(())
    }
    /// Redoes the next undone command; a no-op when there is none.
    pub fn redo(&self) -> Result<()> {
        let command = {
            let state = self.state.borrow();
            match state.commands.get(state.current) {
                Some(command) => Rc::clone(command),
                None => return Ok(()),
            }
        };
        let before = self.dirty();
        command.redo()?;
        self.state.borrow_mut().current += 1;
        debug!(command = command.description(), "command redone");
        self.raise(HistoryEvent::CommandRedone(command.description().to_string()));
        self.notify_dirty(before);
        Ok(())
    }
    /// Forgets every command. The emptied history counts as clean.
    pub fn clear(&self) {
        let before = self.dirty();
        {
            let mut state = self.state.borrow_mut();
            state.commands.clear();
            state.current = 0;
            state.clean = Some(0);
        }
        self.notify_dirty(before);
    }
}

/// The command recorded for one transaction.
struct TransactionCommand {
    context: Weak<HistoryContext>,
    description: String,
    operations: Vec<Operation>,
    selection: Option<(Vec<WeakNode>, Vec<WeakNode>)>,
}

impl TransactionCommand {
    fn context(&self) -> Result<Rc<HistoryContext>> {
        self.context
            .upgrade()
            .ok_or_else(|| DomError::InvalidOperation(format!("the context of '{}' no longer exists", self.description)))
    }
    /// Runs the replay as a transaction the context does not record, even
    /// when the history is driven directly rather than through the context.
    fn replay(&self, context: &HistoryContext, action: impl FnOnce() -> Result<()>) -> Result<()> {
        let was_replaying = context.undoing_or_redoing();
        context.set_undoing_or_redoing(true);
        let result = context.transactions.do_transaction(&self.description, action);
        context.set_undoing_or_redoing(was_replaying);
        result
    }
    fn restore_selection(context: &HistoryContext, items: &[WeakNode]) {
        if let Some(selection) = context.selection.borrow().as_ref() {
            selection.set_selection(items.iter().filter_map(WeakNode::upgrade).collect());
        }
    }
}

impl Command for TransactionCommand {
    fn description(&self) -> &str {
        &self.description
    }
    fn undo(&self) -> Result<()> {
        let context = self.context()?;
        self.replay(&context, || self.operations.iter().rev().try_for_each(Operation::revert))?;
        if let Some((before, _)) = &self.selection {
            Self::restore_selection(&context, before);
        }
        Ok(())
    }
    fn redo(&self) -> Result<()> {
        let context = self.context()?;
        self.replay(&context, || self.operations.iter().try_for_each(Operation::apply))?;
        if let Some((_, after)) = &self.selection {
            Self::restore_selection(&context, after);
        }
        Ok(())
    }
}

// ------------- History context -------------

type PendingKey = (u64, AttributeDef);

pub struct HistoryContext {
    this: Weak<HistoryContext>,
    adapter: NodeAdapter,
    transactions: Rc<TransactionContext>,
    history: RefCell<Rc<CommandHistory>>,
    history_subscription: Cell<Option<u64>>,
    pending: RefCell<HashMap<PendingKey, Rc<AttributeChange>, NodeHasher>>,
    merge_window: Cell<TimeDelta>,
    clock: RefCell<Rc<dyn Clock>>,
    last_commit: Cell<Option<DateTime<Utc>>>,
    recording: Cell<bool>,
    undoing_or_redoing: Cell<bool>,
    selection: RefCell<Option<Rc<dyn SelectionContext>>>,
    selection_before: RefCell<Option<Vec<WeakNode>>>,
}

impl HistoryContext {
    pub fn attach(node: &Node, settings: &HistorySettings) -> Rc<HistoryContext> {
        let transactions = TransactionContext::attach(node);
        transactions.set_require_transactions(settings.require_transactions);
        let history = Rc::new(CommandHistory::with_max_depth(settings.max_depth));
        let context = Rc::new_cyclic(|this: &Weak<HistoryContext>| {
            let observer: Weak<dyn TransactionObserver> = this.clone();
            transactions.add_observer(observer);
            HistoryContext {
                this: this.clone(),
                adapter: NodeAdapter::new(node),
                transactions,
                history: RefCell::new(history),
                history_subscription: Cell::new(None),
                pending: RefCell::new(HashMap::default()),
                merge_window: Cell::new(TimeDelta::milliseconds(settings.merge_window_ms as i64)),
                clock: RefCell::new(Rc::new(SystemClock)),
                last_commit: Cell::new(None),
                recording: Cell::new(true),
                undoing_or_redoing: Cell::new(false),
                selection: RefCell::new(None),
                selection_before: RefCell::new(None),
            }
        });
        context.watch_history();
        *context.selection.borrow_mut() = node.try_as::<dyn SelectionContext>();
        context
    }
    /// Creator registering a history context together with its transaction
    /// context as two capabilities of one adapter.
    pub fn creator(settings: HistorySettings) -> AdapterCreator {
        AdapterCreator::new("history", move |node: &Node| HistoryContext::attach(node, &settings))
            .exposes(|h: Rc<HistoryContext>| h.transaction_context())
            .eager()
    }
    fn watch_history(&self) {
        let this = self.this.clone();
        let id = self.history().subscribe(move |event| {
            // merging into an undone or dropped command would lose the edit
            if let (HistoryEvent::CommandUndone(_) | HistoryEvent::CommandDropped(_), Some(context)) =
                (event, this.upgrade())
            {
                context.pending.borrow_mut().clear();
            }
            Ok(())
        });
        self.history_subscription.set(Some(id));
    }
    pub fn node(&self) -> Result<Node> {
        self.adapter.node()
    }
    pub fn transaction_context(&self) -> Rc<TransactionContext> {
        Rc::clone(&self.transactions)
    }
    pub fn history(&self) -> Rc<CommandHistory> {
        Rc::clone(&self.history.borrow())
    }
    /// Replaces the history commands are recorded on.
    pub fn set_history(&self, history: Rc<CommandHistory>) {
        if let Some(id) = self.history_subscription.take() {
            self.history().unsubscribe(id);
        }
        *self.history.borrow_mut() = history;
        self.pending.borrow_mut().clear();
        self.watch_history();
    }
    pub fn do_transaction<F>(&self, name: &str, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.transactions.do_transaction(name, action)
    }
    pub fn in_transaction(&self) -> bool {
        self.transactions.in_transaction()
    }
    pub fn merge_window(&self) -> TimeDelta {
        self.merge_window.get()
    }
    pub fn set_merge_window(&self, window: TimeDelta) {
        self.merge_window.set(window);
    }
    pub fn set_clock(&self, clock: Rc<dyn Clock>) {
        *self.clock.borrow_mut() = clock;
    }
    pub fn recording(&self) -> bool {
        self.recording.get()
    }
    /// While off, committed transactions leave no command behind.
    pub fn set_recording(&self, recording: bool) {
        self.recording.set(recording);
    }
    pub fn undoing_or_redoing(&self) -> bool {
        self.undoing_or_redoing.get()
    }
    pub(crate) fn set_undoing_or_redoing(&self, flag: bool) {
        self.undoing_or_redoing.set(flag);
    }
    pub fn can_undo(&self) -> bool {
        self.history().can_undo()
    }
    pub fn can_redo(&self) -> bool {
        self.history().can_redo()
    }
    pub fn undo_description(&self) -> Option<String> {
        self.history().undo_description()
    }
    pub fn redo_description(&self) -> Option<String> {
        self.history().redo_description()
    }
    pub fn dirty(&self) -> bool {
        self.history().dirty()
    }
    pub fn set_dirty(&self, dirty: bool) {
        self.history().set_dirty(dirty);
    }
    fn global_context(&self) -> Option<Rc<GlobalHistoryContext>> {
        self.adapter.node().ok()?.lineage().find_map(|n| n.try_as::<GlobalHistoryContext>())
    }
    fn replay(&self, step: impl FnOnce(&CommandHistory) -> Result<()>) -> Result<()> {
        let global = self.global_context();
        self.set_undoing_or_redoing(true);
        if let Some(global) = &global {
            global.synchronize(true);
        }
        let history = self.history();
        let result = step(history.as_ref());
        self.set_undoing_or_redoing(false);
        if let Some(global) = &global {
            global.synchronize(false);
        }
        result
    }
    pub fn undo(&self) -> Result<()> {
        self.replay(CommandHistory::undo)
    }
    pub fn redo(&self) -> Result<()> {
        self.replay(CommandHistory::redo)
    }
    fn snapshot_selection(&self) -> Option<Vec<WeakNode>> {
        let selection = self.selection.borrow();
        selection.as_ref().map(|s| s.selection().iter().map(Node::downgrade).collect())
    }
}

impl TransactionObserver for HistoryContext {
    fn beginning(&self, _name: &str) -> Result<()> {
        *self.selection_before.borrow_mut() = self.snapshot_selection();
        Ok(())
    }
    fn ended(&self, name: &str, operations: &mut Vec<Operation>) -> Result<()> {
        if self.undoing_or_redoing.get() || !self.recording.get() {
            return Ok(());
        }
        let now = self.clock.borrow().now();
        let lapsed = self.last_commit.get().is_none_or(|last| now - last > self.merge_window.get());
        self.last_commit.set(Some(now));
        {
            let mut pending = self.pending.borrow_mut();
            if lapsed {
                pending.clear();
            }
            operations.retain(|operation| match operation {
                Operation::AttributeChanged(change) => {
                    let key = (change.serial(), change.def().clone());
                    match pending.get(&key) {
                        Some(earlier) => {
                            earlier.set_new_value(change.new_value());
                            false
                        }
                        None => {
                            pending.insert(key, Rc::clone(change));
                            true
                        }
                    }
                }
                _ => true,
            });
        }
        if operations.is_empty() {
            debug!(transaction = name, "transaction merged into an earlier command");
            return Ok(());
        }
        let before = self.selection_before.borrow_mut().take();
        let selection = before.zip(self.snapshot_selection());
        self.history().add(Rc::new(TransactionCommand {
            context: self.this.clone(),
            description: name.to_string(),
            operations: std::mem::take(operations),
            selection,
        }));
        Ok(())
    }
    fn cancelled(&self, _name: &str) {
        self.selection_before.borrow_mut().take();
    }
}

impl Drop for HistoryContext {
    fn drop(&mut self) {
        if let Some(id) = self.history_subscription.take() {
            self.history.borrow().unsubscribe(id);
        }
    }
}

// ------------- Global history -------------

/// Shares one [`CommandHistory`] among the history contexts of several
/// sub-documents and keeps their undo/redo flags in step, so replaying a
/// command recorded by one context is not re-recorded by another.
pub struct GlobalHistoryContext {
    adapter: NodeAdapter,
    history: Rc<CommandHistory>,
    participants: RefCell<Vec<Weak<HistoryContext>>>,
}

impl GlobalHistoryContext {
    pub fn attach(node: &Node, settings: &HistorySettings) -> Rc<GlobalHistoryContext> {
        Rc::new(GlobalHistoryContext {
            adapter: NodeAdapter::new(node),
            history: Rc::new(CommandHistory::with_max_depth(settings.max_depth)),
            participants: RefCell::new(Vec::new()),
        })
    }
    pub fn creator(settings: HistorySettings) -> AdapterCreator {
        AdapterCreator::new("global history", move |node: &Node| GlobalHistoryContext::attach(node, &settings))
    }
    pub fn history(&self) -> Rc<CommandHistory> {
        Rc::clone(&self.history)
    }
    /// Makes `context` record onto the shared history.
    pub fn adopt(&self, context: &Rc<HistoryContext>) {
        context.set_history(Rc::clone(&self.history));
        let mut participants = self.participants.borrow_mut();
        participants.retain(|p| p.strong_count() > 0);
        if !participants.iter().any(|p| p.as_ptr() == Rc::as_ptr(context)) {
            participants.push(Rc::downgrade(context));
        }
    }
    /// Adopts every history context found in the adapted node's subtree.
    pub fn adopt_subtree(&self) -> Result<usize> {
        let node = self.adapter.node()?;
        let contexts: Vec<Rc<HistoryContext>> = node.subtree().filter_map(|n| n.try_as::<HistoryContext>()).collect();
        for context in &contexts {
            self.adopt(context);
        }
        Ok(contexts.len())
    }
    pub fn participants(&self) -> Vec<Rc<HistoryContext>> {
        self.participants.borrow().iter().filter_map(Weak::upgrade).collect()
    }
    pub(crate) fn synchronize(&self, undoing_or_redoing: bool) {
        for participant in self.participants() {
            participant.set_undoing_or_redoing(undoing_or_redoing);
        }
    }
    fn replay(&self, step: impl FnOnce(&CommandHistory) -> Result<()>) -> Result<()> {
        self.synchronize(true);
        let result = step(self.history.as_ref());
        self.synchronize(false);
        result
    }
    pub fn undo(&self) -> Result<()> {
        self.replay(CommandHistory::undo)
    }
    pub fn redo(&self) -> Result<()> {
        self.replay(CommandHistory::redo)
    }
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }
    pub fn dirty(&self) -> bool {
        self.history.dirty()
    }
    pub fn set_dirty(&self, dirty: bool) {
        self.history.set_dirty(dirty);
    }
}
