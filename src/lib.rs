//! Schemadom – a schema-driven document object model for editing applications.
//!
//! Schemadom centers on the *node*: a typed element of a document tree whose
//! shape is fixed by a catalog of node types, where:
//! * A [`schema::NodeType`] declares attributes, child slots and a base type
//!   it inherits them from.
//! * A [`schema::AttributeDef`] names a typed value with a default and
//!   optional value rules.
//! * A [`schema::ChildDef`] names a single or list slot accepting nodes of
//!   one type (or types derived from it).
//! * A [`node::Node`] stores its non-default attribute values and owns its
//!   children; the child-to-parent link is weak.
//!
//! Behaviour is attached to nodes through *adapters* rather than subclassing:
//! every type registers [`adapt::AdapterCreator`]s and a node answers
//! `try_as::<T>()` with the first adapter (created on demand, cached per node)
//! that provides capability `T`.
//!
//! ## Modules
//! * [`schema`] – Type declarations, the frozen [`schema::TypeCatalog`] and definition handles.
//! * [`datatype`] – Attribute value types, values and value rules.
//! * [`node`] – Attribute storage, the node tree, traversal and deep copy.
//! * [`event`] – Change events, raised on a node and every ancestor.
//! * [`adapt`] – The adapter registry and lookup.
//! * [`reference`] – Id-based references, the id index and dangling-reference repair.
//! * [`transaction`] – Transactions recording reversible operations.
//! * [`history`] – Undo/redo commands, per-document and shared histories.
//! * [`selection`] – Selection, snapshotted around transactions.
//! * [`property`] – Property descriptors for property editors.
//! * [`loader`] – The schema language (grammar in `schema.pest`).
//! * [`serialize`] – JSON form of a tree.
//! * [`persist`] – SQLite document store with a hash-chained revision ledger.
//! * [`document`] – A named root with dirty tracking, save and load.
//! * [`settings`] – Layered configuration.
//!
//! ## Transactions & History
//! Mutations made inside `do_transaction` are recorded as operations. When
//! the transaction commits, a [`history::HistoryContext`] turns them into one
//! undoable command; changes to one attribute that commit in quick succession
//! merge into a single command. A failing action ends the transaction early
//! and leaves its changes applied, but nothing is recorded.
//!
//! ## Quick Start
//! ```
//! use schemadom::datatype::AttributeType;
//! use schemadom::history::HistoryContext;
//! use schemadom::schema::SchemaBuilder;
//! use schemadom::settings::HistorySettings;
//!
//! let mut builder = SchemaBuilder::new();
//! builder.define_type("State").unwrap().attribute("label", AttributeType::Text);
//! builder
//!     .define_type("Machine")
//!     .unwrap()
//!     .child_list("states", "State")
//!     .adapter(HistoryContext::creator(HistorySettings::default()));
//! let catalog = builder.build().unwrap();
//!
//! let machine = catalog.create_node("Machine").unwrap();
//! machine.initialize_adapters();
//! let history = machine.cast::<HistoryContext>().unwrap();
//! let states = machine.node_type().child_definition("states").unwrap();
//! let state = catalog.create_node("State").unwrap();
//! history
//!     .do_transaction("Add state", || machine.get_child_list(&states)?.push(&state))
//!     .unwrap();
//! assert_eq!(machine.get_children(&states).unwrap().len(), 1);
//! history.undo().unwrap();
//! assert!(machine.get_children(&states).unwrap().is_empty());
//! ```
//!
//! ## Threading
//! Documents are single-threaded: handles are `Rc`-based and interior
//! mutability uses `Cell`/`RefCell`. Keep a document on the thread that
//! created it.

pub mod adapt;
pub mod datatype;
pub mod document;
pub mod error;
pub mod event;
pub mod history;
pub mod loader;
pub mod node;
pub mod persist;
pub mod property;
pub mod reference;
pub mod schema;
pub mod selection;
pub mod serialize;
pub mod settings;
pub mod transaction;

pub use error::{DomError, Result};
