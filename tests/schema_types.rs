use std::collections::HashSet;

use schemadom::DomError;
use schemadom::datatype::{AttributeType, AttributeValue};
use schemadom::schema::{BASE_TYPE_NAME, SchemaBuilder, TypeCatalog};

fn setup() -> TypeCatalog {
    let mut builder = SchemaBuilder::new();
    builder
        .define_type("A")
        .expect("A")
        .set_abstract()
        .attribute_with_default("x", AttributeType::Int, 1)
        .attribute("label", AttributeType::Text)
        .tag("from A");
    builder
        .define_type("B")
        .expect("B")
        .base("A")
        .attribute_with_default("x", AttributeType::Int, 2)
        .attribute("y", AttributeType::Float)
        .tag(42_u32);
    builder.define_type("C").expect("C").base("B").child_list("items", "A").child("other", "C");
    builder.define_type("Unrelated").expect("Unrelated");
    builder.build().expect("catalog builds")
}

#[test]
fn inherited_definitions_are_equivalent() {
    let catalog = setup();
    let a = catalog.node_type("A").expect("A");
    let b = catalog.node_type("B").expect("B");
    let from_a = a.attribute_definition("x").expect("A.x");
    let from_b = b.attribute_definition("x").expect("B.x");
    assert_eq!(from_a, from_b, "a redeclared attribute stays equivalent to the inherited one");
    let set: HashSet<_> = [from_a.clone(), from_b.clone()].into_iter().collect();
    assert_eq!(set.len(), 1, "equivalent definitions hash alike");
    assert_eq!(from_a.index(), from_b.index());
    assert_eq!(from_b.owning_type_name(), "B");
    assert_eq!(from_b.default_value(), &AttributeValue::Int(2));
}

#[test]
fn derived_nodes_answer_to_base_definitions() {
    let catalog = setup();
    let node = catalog.create_node("B").expect("B node");
    let from_a = catalog.node_type("A").and_then(|t| t.attribute_definition("x")).expect("A.x");
    assert_eq!(node.get_attribute(&from_a).expect("x"), AttributeValue::Int(2), "the most-derived default applies");
    node.set_attribute(&from_a, 7).expect("set through the base definition");
    let from_b = node.node_type().attribute_definition("x").expect("B.x");
    assert_eq!(node.get_attribute(&from_b).expect("x"), AttributeValue::Int(7));
}

#[test]
fn lineage_and_assignability() {
    let catalog = setup();
    let a = catalog.node_type("A").expect("A");
    let c = catalog.node_type("C").expect("C");
    let names: Vec<String> = c.lineage().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["C", "B", "A", BASE_TYPE_NAME]);
    assert!(a.is_assignable_from(&c));
    assert!(!c.is_assignable_from(&a));
    assert!(catalog.base_type().is_assignable_from(&a));
    // attributes of all ancestors, inherited slots first
    let attributes: Vec<&str> = c.attributes().iter().map(|d| d.name()).collect();
    assert_eq!(attributes, vec!["x", "label", "y"]);
}

#[test]
fn abstract_types_cannot_be_instantiated() {
    let catalog = setup();
    assert!(matches!(catalog.create_node("A"), Err(DomError::InvalidOperation(_))));
    assert!(matches!(catalog.create_node("Nope"), Err(DomError::InvalidArgument(_))));
    assert!(catalog.create_node("B").is_ok());
}

#[test]
fn child_slots_accept_derived_types_only() {
    let catalog = setup();
    let parent = catalog.create_node("C").expect("C");
    let items = parent.node_type().child_definition("items").expect("items");
    let list = parent.get_child_list(&items).expect("list");
    list.push(&catalog.create_node("B").expect("B")).expect("B derives from A");
    list.push(&catalog.create_node("C").expect("C")).expect("C derives from A");
    let stranger = catalog.create_node("Unrelated").expect("Unrelated");
    assert!(matches!(list.push(&stranger), Err(DomError::InvalidArgument(_))));
    assert_eq!(list.len(), 2);
}

#[test]
fn definitions_of_other_types_are_rejected() {
    let catalog = setup();
    let node = catalog.create_node("Unrelated").expect("node");
    let y = catalog.node_type("B").and_then(|t| t.attribute_definition("y")).expect("B.y");
    assert!(matches!(node.get_attribute(&y), Err(DomError::InvalidArgument(_))));
    assert!(matches!(node.set_attribute(&y, 1.5), Err(DomError::InvalidArgument(_))));
    let other = setup();
    let foreign = other.node_type("B").and_then(|t| t.attribute_definition("y")).expect("B.y");
    let b = catalog.create_node("B").expect("B");
    assert!(b.get_attribute(&foreign).is_err(), "definitions are scoped to their catalog");
}

#[test]
fn tags_are_found_along_the_lineage() {
    let catalog = setup();
    let c = catalog.node_type("C").expect("C");
    assert_eq!(c.tag::<u32>().as_deref(), Some(&42));
    assert_eq!(c.tag::<&str>().as_deref(), Some(&"from A"));
    assert!(c.tag::<i64>().is_none());
}

#[test]
fn invalid_schemas_fail_to_build() {
    let expect_schema_error = |builder: SchemaBuilder, why: &str| match builder.build() {
        Err(DomError::Schema(_)) => {}
        Err(other) => panic!("{}: wrong error {}", why, other),
        Ok(_) => panic!("{}: schema should not build", why),
    };

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").base("Missing");
    expect_schema_error(builder, "undeclared base");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").base("B");
    builder.define_type("B").expect("B").base("A");
    expect_schema_error(builder, "cyclic inheritance");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").attribute("x", AttributeType::Int).attribute("x", AttributeType::Int);
    expect_schema_error(builder, "duplicate attribute");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").attribute_with_default("x", AttributeType::Int, "one");
    expect_schema_error(builder, "ill-typed default");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").attribute("n", AttributeType::Int).id_attribute("n");
    expect_schema_error(builder, "numeric id attribute");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").attribute("x", AttributeType::Int);
    builder.define_type("B").expect("B").base("A").attribute("x", AttributeType::Text);
    expect_schema_error(builder, "redeclared with another type");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A").child("c", "Nowhere");
    expect_schema_error(builder, "undeclared child type");

    let mut builder = SchemaBuilder::new();
    builder.define_type("9lives").expect("declared");
    expect_schema_error(builder, "malformed type name");

    let mut builder = SchemaBuilder::new();
    builder.define_type("A").expect("A");
    assert!(matches!(builder.define_type("A"), Err(DomError::Schema(_))), "types are declared once");
}
