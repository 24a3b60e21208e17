#![allow(dead_code)]

use std::rc::Rc;

use schemadom::history::{HistoryContext, ManualClock};
use schemadom::loader::load_schema;
use schemadom::node::Node;
use schemadom::reference::{IdIndex, ReferenceValidator};
use schemadom::schema::{AttributeDef, ChildDef, SchemaBuilder, TypeCatalog};
use schemadom::selection::Selection;
use schemadom::settings::HistorySettings;

/// A small state machine editor: states, transitions between them and an
/// optional comment on the machine.
pub const FSM_SCHEMA: &str = r#"
type Machine {
    attribute title: string = "Untitled";
    child states: State[];
    child transitions: Transition[];
    child comment: Comment;
}

type State {
    attribute id: string;
    attribute name: string = "State";
    attribute size: int = 64 where range(0, 1000);
    id id;
}

type Transition {
    attribute label: string;
    attribute source: reference;
    attribute target: reference;
}

type Comment {
    attribute text: string;
}
"#;

pub fn fsm_builder() -> SchemaBuilder {
    load_schema(FSM_SCHEMA).expect("fsm schema parses")
}

pub fn fsm_catalog() -> TypeCatalog {
    fsm_builder().build().expect("fsm schema builds")
}

/// The fsm schema with history, selection, id index and reference repair
/// attached to machines.
pub fn editing_catalog(settings: HistorySettings) -> TypeCatalog {
    let mut builder = fsm_builder();
    builder
        .type_mut("Machine")
        .expect("machine type")
        .adapter(HistoryContext::creator(settings))
        .adapter(Selection::creator())
        .adapter(IdIndex::creator())
        .adapter(ReferenceValidator::creator());
    builder.build().expect("editing schema builds")
}

pub struct Fsm {
    pub catalog: TypeCatalog,
    pub machine: Node,
    pub history: Rc<HistoryContext>,
    pub clock: Rc<ManualClock>,
}

impl Fsm {
    pub fn attribute(&self, type_name: &str, name: &str) -> AttributeDef {
        attribute(&self.catalog, type_name, name)
    }
    pub fn child(&self, type_name: &str, name: &str) -> ChildDef {
        child(&self.catalog, type_name, name)
    }
    /// Adds a state with the given id in its own transaction.
    pub fn add_state(&self, id: &str) -> Node {
        let state = self.catalog.create_node("State").expect("state");
        state.set_attribute(&self.attribute("State", "id"), id).expect("id");
        let states = self.child("Machine", "states");
        self.history
            .do_transaction(&format!("Add {}", id), || self.machine.get_child_list(&states)?.push(&state))
            .expect("add state");
        state
    }
    /// Adds a transition between two states in its own transaction.
    pub fn connect(&self, source: &Node, target: &Node) -> Node {
        let transition = self.catalog.create_node("Transition").expect("transition");
        transition.set_reference(&self.attribute("Transition", "source"), Some(source)).expect("source");
        transition.set_reference(&self.attribute("Transition", "target"), Some(target)).expect("target");
        let transitions = self.child("Machine", "transitions");
        self.history
            .do_transaction("Connect", || self.machine.get_child_list(&transitions)?.push(&transition))
            .expect("connect");
        transition
    }
}

pub fn editing_machine() -> Fsm {
    editing_machine_with(HistorySettings::default())
}

pub fn editing_machine_with(settings: HistorySettings) -> Fsm {
    let catalog = editing_catalog(settings);
    let machine = catalog.create_node("Machine").expect("machine");
    machine.initialize_adapters();
    let history = machine.cast::<HistoryContext>().expect("history context");
    let clock = Rc::new(ManualClock::default());
    history.set_clock(clock.clone());
    Fsm { catalog, machine, history, clock }
}

pub fn attribute(catalog: &TypeCatalog, type_name: &str, name: &str) -> AttributeDef {
    catalog
        .node_type(type_name)
        .and_then(|t| t.attribute_definition(name))
        .unwrap_or_else(|| panic!("{}.{} is declared", type_name, name))
}

pub fn child(catalog: &TypeCatalog, type_name: &str, name: &str) -> ChildDef {
    catalog
        .node_type(type_name)
        .and_then(|t| t.child_definition(name))
        .unwrap_or_else(|| panic!("{}.{} is declared", type_name, name))
}
