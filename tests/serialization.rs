mod common;

use schemadom::DomError;
use schemadom::datatype::AttributeValue;
use schemadom::loader::load_schema;
use schemadom::serialize::{ChildRecord, from_json_str, from_record, to_json_string, to_record};

use common::{attribute, child, fsm_catalog};

#[test]
fn only_local_values_are_written() {
    let catalog = fsm_catalog();
    let machine = catalog.create_node("Machine").expect("machine");
    let state = catalog.create_node("State").expect("state");
    state.set_attribute_named("id", "s1").expect("id");
    machine.get_child_list(&child(&catalog, "Machine", "states")).expect("states").push(&state).expect("push");

    let record = to_record(&machine).expect("record");
    assert_eq!(record.type_name, "Machine");
    assert!(record.attributes.is_empty(), "the title still holds its default");
    match record.children.get("states") {
        Some(ChildRecord::List(states)) => {
            assert_eq!(states.len(), 1);
            assert_eq!(states[0].attributes.keys().collect::<Vec<_>>(), vec!["id"]);
        }
        other => panic!("unexpected states record {:?}", other),
    }
    assert!(!record.children.contains_key("comment"));
}

#[test]
fn documents_survive_a_round_trip() {
    let catalog = fsm_catalog();
    let machine = catalog.create_node("Machine").expect("machine");
    machine.set_attribute_named("title", "Door").expect("title");
    let states = machine.get_child_list(&child(&catalog, "Machine", "states")).expect("states");
    for id in ["open", "closed"] {
        let state = catalog.create_node("State").expect("state");
        state.set_attribute_named("id", id).expect("id");
        states.push(&state).expect("push");
    }
    let transition = catalog.create_node("Transition").expect("transition");
    transition.set_attribute_named("label", "shut").expect("label");
    transition.set_reference(&attribute(&catalog, "Transition", "source"), states.get(0).as_ref()).expect("source");
    transition.set_reference(&attribute(&catalog, "Transition", "target"), states.get(1).as_ref()).expect("target");
    machine.get_child_list(&child(&catalog, "Machine", "transitions")).expect("transitions").push(&transition).expect("push");
    let comment = catalog.create_node("Comment").expect("comment");
    comment.set_attribute_named("text", "a \"quoted\" note").expect("text");
    machine.set_child(&child(&catalog, "Machine", "comment"), Some(&comment)).expect("comment");

    let json = to_json_string(&machine).expect("json");
    let loaded = from_json_str(&catalog, &json).expect("parse");
    assert_eq!(to_record(&loaded).expect("record"), to_record(&machine).expect("record"));

    let loaded_transition = &loaded.get_children(&child(&catalog, "Machine", "transitions")).expect("transitions")[0];
    let target = loaded_transition
        .get_reference(&attribute(&catalog, "Transition", "target"))
        .expect("target")
        .expect("resolves inside the loaded tree");
    assert_eq!(target.get_id().as_deref(), Some("closed"));
    assert_eq!(target.root(), loaded);
}

#[test]
fn unknown_attributes_are_skipped() {
    let catalog = fsm_catalog();
    let json = r#"{ "type": "State", "attributes": { "id": "s1", "colour": "red" } }"#;
    let state = from_json_str(&catalog, json).expect("parse");
    assert_eq!(state.attribute("id").expect("id"), AttributeValue::Text("s1".into()));
}

#[test]
fn malformed_documents_are_rejected() {
    let catalog = fsm_catalog();
    let unknown_type = r#"{ "type": "Robot" }"#;
    assert!(matches!(from_json_str(&catalog, unknown_type), Err(DomError::Serialization(_))));
    let unknown_child = r#"{ "type": "Machine", "children": { "robots": [] } }"#;
    assert!(matches!(from_json_str(&catalog, unknown_child), Err(DomError::Serialization(_))));
    let wrong_multiplicity = r#"{ "type": "Machine", "children": { "comment": [] } }"#;
    assert!(matches!(from_json_str(&catalog, wrong_multiplicity), Err(DomError::Serialization(_))));
    let wrong_value = r#"{ "type": "State", "attributes": { "size": "large" } }"#;
    assert!(matches!(from_json_str(&catalog, wrong_value), Err(DomError::Serialization(_))));
    assert!(from_json_str(&catalog, "not json").is_err());

    let record = serde_json::from_str(r#"{ "type": "State", "attributes": { "size": 5000 } }"#).expect("record");
    assert!(matches!(from_record(&catalog, &record), Err(DomError::InvalidArgument(_))), "rules still apply");
}

#[test]
fn non_finite_floats_are_refused_before_they_reach_a_document() {
    let catalog = load_schema("type Gauge { attribute level: float; attribute samples: float[]; }")
        .expect("parse")
        .build()
        .expect("build");
    let gauge = catalog.create_node("Gauge").expect("gauge");
    assert!(matches!(gauge.set_attribute_named("level", f64::INFINITY), Err(DomError::InvalidArgument(_))));
    assert!(matches!(gauge.set_attribute_named("level", f64::NAN), Err(DomError::InvalidArgument(_))));
    assert!(matches!(
        gauge.set_attribute_named("samples", vec![1.0, f64::NEG_INFINITY]),
        Err(DomError::InvalidArgument(_))
    ));
    assert_eq!(gauge.attribute("level").expect("level"), AttributeValue::Float(0.0));

    gauge.set_attribute_named("level", 2.5).expect("finite level");
    gauge.set_attribute_named("samples", vec![1.0, -3.25]).expect("finite samples");
    let json = to_json_string(&gauge).expect("json");
    let loaded = from_json_str(&catalog, &json).expect("saved gauges load again");
    assert_eq!(to_record(&loaded).expect("record"), to_record(&gauge).expect("record"));
}
