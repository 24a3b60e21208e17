mod common;

use std::cell::RefCell;
use std::rc::Rc;

use schemadom::DomError;
use schemadom::datatype::AttributeValue;
use schemadom::node::Node;
use schemadom::schema::TypeCatalog;

use common::{attribute, child, fsm_catalog};

fn setup() -> (TypeCatalog, Node) {
    let catalog = fsm_catalog();
    let machine = catalog.create_node("Machine").expect("machine");
    (catalog, machine)
}

#[test]
fn attributes_default_until_set() {
    let (catalog, _) = setup();
    let state = catalog.create_node("State").expect("state");
    let name = attribute(&catalog, "State", "name");
    let size = attribute(&catalog, "State", "size");
    assert_eq!(state.get_attribute(&name).expect("name"), AttributeValue::Text("State".into()));
    assert_eq!(state.get_attribute(&size).expect("size"), AttributeValue::Int(64));
    assert!(state.is_attribute_default(&name).expect("default"));

    state.set_attribute(&name, "Idle").expect("set name");
    assert_eq!(state.get_attribute(&name).expect("name"), AttributeValue::Text("Idle".into()));
    assert_eq!(state.get_local_attribute(&name).expect("local"), Some(AttributeValue::Text("Idle".into())));

    // setting the default again clears local storage
    state.set_attribute(&name, "State").expect("reset name");
    assert!(state.is_attribute_default(&name).expect("default"));
    assert_eq!(state.get_local_attribute(&name).expect("local"), None);

    assert!(state.set_attribute_if_default(&size, 80).expect("first"));
    assert!(!state.set_attribute_if_default(&size, 90).expect("second"));
    assert_eq!(state.attribute("size").expect("size"), AttributeValue::Int(80));
}

#[test]
fn values_are_checked_against_type_and_rules() {
    let (catalog, _) = setup();
    let state = catalog.create_node("State").expect("state");
    let size = attribute(&catalog, "State", "size");
    assert!(matches!(state.set_attribute(&size, "big"), Err(DomError::InvalidArgument(_))));
    assert!(matches!(state.set_attribute(&size, 5000), Err(DomError::InvalidArgument(_))), "range rule");
    assert_eq!(state.get_attribute(&size).expect("size"), AttributeValue::Int(64), "rejected values are not stored");
    assert!(matches!(state.set_attribute_named("colour", 1), Err(DomError::InvalidArgument(_))));
}

#[test]
fn ids_come_from_the_id_attribute() {
    let (catalog, _) = setup();
    let state = catalog.create_node("State").expect("state");
    assert_eq!(state.get_id(), None, "an empty id is no id");
    state.set_attribute_named("id", "s1").expect("id");
    assert_eq!(state.get_id().as_deref(), Some("s1"));
    let comment = catalog.create_node("Comment").expect("comment");
    assert_eq!(comment.get_id(), None);
}

#[test]
fn remove_from_parent_detaches() {
    let (catalog, machine) = setup();
    let states = child(&catalog, "Machine", "states");
    let list = machine.get_child_list(&states).expect("states");
    let first = catalog.create_node("State").expect("state");
    let second = catalog.create_node("State").expect("state");
    list.push(&first).expect("push");
    list.push(&second).expect("push");
    assert_eq!(first.parent(), Some(machine.clone()));
    assert_eq!(first.child_def(), Some(states.clone()));

    first.remove_from_parent().expect("remove");
    assert_eq!(first.parent(), None);
    assert!(!list.contains(&first));
    assert_eq!(list.to_vec(), vec![second.clone()]);
    // removing a root is a no-op
    first.remove_from_parent().expect("no-op");

    let comment_slot = child(&catalog, "Machine", "comment");
    let comment = catalog.create_node("Comment").expect("comment");
    machine.set_child(&comment_slot, Some(&comment)).expect("set comment");
    comment.remove_from_parent().expect("remove comment");
    assert_eq!(machine.get_child(&comment_slot).expect("slot"), None);
}

#[test]
fn attached_nodes_cannot_be_reparented() {
    let (catalog, machine) = setup();
    let states = child(&catalog, "Machine", "states");
    let state = catalog.create_node("State").expect("state");
    machine.get_child_list(&states).expect("states").push(&state).expect("push");

    let other = catalog.create_node("Machine").expect("machine");
    let result = other.get_child_list(&states).expect("states").push(&state);
    assert!(matches!(result, Err(DomError::InvalidOperation(_))));
    assert_eq!(state.parent(), Some(machine.clone()));

    let comment_slot = child(&catalog, "Machine", "comment");
    assert!(matches!(machine.get_child_list(&comment_slot), Err(DomError::InvalidOperation(_))));
    assert!(matches!(machine.get_child(&states), Err(DomError::InvalidOperation(_))));
}

#[test]
fn single_slots_replace_their_child() {
    let (catalog, machine) = setup();
    let slot = child(&catalog, "Machine", "comment");
    let first = catalog.create_node("Comment").expect("comment");
    let second = catalog.create_node("Comment").expect("comment");
    machine.set_child(&slot, Some(&first)).expect("first");
    machine.set_child(&slot, Some(&second)).expect("second");
    assert_eq!(machine.get_child(&slot).expect("slot"), Some(second.clone()));
    assert_eq!(first.parent(), None, "the replaced child is detached");
    machine.set_child(&slot, None).expect("empty");
    assert_eq!(second.parent(), None);
}

#[test]
fn traversal_orders() {
    let (catalog, machine) = setup();
    let states = machine.get_child_list(&child(&catalog, "Machine", "states")).expect("states");
    let a = catalog.create_node("State").expect("a");
    let b = catalog.create_node("State").expect("b");
    states.push(&a).expect("a");
    states.insert(0, &b).expect("b first");
    let comment = catalog.create_node("Comment").expect("comment");
    machine.set_child(&child(&catalog, "Machine", "comment"), Some(&comment)).expect("comment");

    assert_eq!(states.index_of(&a), Some(1));
    let subtree: Vec<Node> = machine.subtree().collect();
    assert_eq!(subtree, vec![machine.clone(), b.clone(), a.clone(), comment.clone()]);
    assert_eq!(a.lineage().collect::<Vec<_>>(), vec![a.clone(), machine.clone()]);
    assert_eq!(a.ancestry().collect::<Vec<_>>(), vec![machine.clone()]);
    assert_eq!(a.root(), machine);
    assert!(a.is_descendant_of(&machine));
    assert!(!machine.is_descendant_of(&a));
    assert!(matches!(states.insert(9, &catalog.create_node("State").expect("c")), Err(DomError::InvalidArgument(_))));

    states.clear().expect("clear");
    assert!(states.is_empty());
    assert_eq!(machine.children(), vec![comment]);
}

#[test]
fn events_bubble_to_ancestors() {
    let (catalog, machine) = setup();
    let seen = Rc::new(RefCell::new(Vec::<String>::new()));
    let log = seen.clone();
    machine.on_attribute_changed(move |e| {
        log.borrow_mut().push(format!("{} {} -> {}", e.def.name(), e.old_value, e.new_value));
        Ok(())
    });
    let log = seen.clone();
    let inserted = machine.on_child_inserted(move |e| {
        log.borrow_mut().push(format!("inserted into {}[{}]", e.def.name(), e.index));
        Ok(())
    });

    let state = catalog.create_node("State").expect("state");
    let name = attribute(&catalog, "State", "name");
    state.set_attribute(&name, "Detached").expect("not observed");
    machine.get_child_list(&child(&catalog, "Machine", "states")).expect("states").push(&state).expect("push");
    state.set_attribute(&name, "Idle").expect("observed");
    state.set_attribute(&name, "Idle").expect("unchanged values raise nothing");

    assert!(machine.unsubscribe(inserted));
    assert!(!machine.unsubscribe(inserted), "a subscription is removed once");
    assert_eq!(*seen.borrow(), vec!["inserted into states[0]".to_string(), "name Detached -> Idle".to_string()]);
}

#[test]
fn changing_handlers_see_the_old_tree() {
    let (catalog, machine) = setup();
    let state = catalog.create_node("State").expect("state");
    let states = child(&catalog, "Machine", "states");
    let observed = Rc::new(RefCell::new(None));
    let slot = observed.clone();
    let list_def = states.clone();
    machine.on_child_inserting(move |e| {
        *slot.borrow_mut() = Some(e.parent.get_children(&list_def)?.len());
        Ok(())
    });
    machine.get_child_list(&states).expect("states").push(&state).expect("push");
    assert_eq!(*observed.borrow(), Some(0));
}

#[test]
fn handler_errors_propagate_after_the_change() {
    let (catalog, machine) = setup();
    machine.on_attribute_changed(|_| Err(DomError::InvalidOperation("vetoed too late".into())));
    let title = attribute(&catalog, "Machine", "title");
    assert!(machine.set_attribute(&title, "Mine").is_err());
    assert_eq!(machine.get_attribute(&title).expect("title"), AttributeValue::Text("Mine".into()));
}

#[test]
fn handlers_may_mutate_the_tree() {
    let (catalog, machine) = setup();
    let title = attribute(&catalog, "Machine", "title");
    let size = attribute(&catalog, "State", "size");
    let counted = title.clone();
    machine.on_child_inserted(move |e| {
        let count = e.parent.get_children(&e.def)?.len();
        e.parent.set_attribute(&counted, format!("{} states", count))
    });
    let states = machine.get_child_list(&child(&catalog, "Machine", "states")).expect("states");
    for _ in 0..3 {
        let state = catalog.create_node("State").expect("state");
        states.push(&state).expect("push");
        state.set_attribute(&size, 10).expect("size");
    }
    assert_eq!(machine.get_attribute(&title).expect("title"), AttributeValue::Text("3 states".into()));
}
