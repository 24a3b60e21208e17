use std::cell::Cell;
use std::rc::Rc;

use schemadom::DomError;
use schemadom::adapt::{AdapterCreator, NodeAdapter};
use schemadom::datatype::AttributeType;
use schemadom::node::Node;
use schemadom::schema::{SchemaBuilder, TypeCatalog};

trait Describe {
    fn describe(&self) -> String;
}

struct Outline {
    base: NodeAdapter,
}

impl Describe for Outline {
    fn describe(&self) -> String {
        match self.base.node() {
            Ok(node) => format!("outline of {}", node.node_type()),
            Err(_) => "outline of nothing".to_string(),
        }
    }
}

struct Round;

impl Describe for Round {
    fn describe(&self) -> String {
        "round".to_string()
    }
}

struct Part {
    base: NodeAdapter,
}

/// Built with a sibling adapter already in hand.
struct Labelled {
    outline: Rc<Outline>,
}

struct Audit;

fn setup() -> (TypeCatalog, Rc<Cell<usize>>) {
    let audits = Rc::new(Cell::new(0));
    let counter = audits.clone();
    let mut builder = SchemaBuilder::new();
    builder
        .define_type("Shape")
        .expect("Shape")
        .attribute("name", AttributeType::Text)
        .child_list("parts", "Part")
        .adapter(
            AdapterCreator::new("outline", |node: &Node| Rc::new(Outline { base: NodeAdapter::new(node) }))
                .exposes(|o: Rc<Outline>| o as Rc<dyn Describe>),
        )
        .adapter(AdapterCreator::new("labelled", |node: &Node| {
            let outline = node.try_as::<Outline>().expect("outline is registered");
            Rc::new(Labelled { outline })
        }));
    builder
        .define_type("Circle")
        .expect("Circle")
        .base("Shape")
        .adapter(AdapterCreator::new("round", |_: &Node| Rc::new(Round)).exposes(|r: Rc<Round>| r as Rc<dyn Describe>))
        .adapter(
            AdapterCreator::new("audit", move |_: &Node| {
                counter.set(counter.get() + 1);
                Rc::new(Audit)
            })
            .eager(),
        );
    builder
        .define_type("Part")
        .expect("Part")
        .adapter(AdapterCreator::new("part", |node: &Node| Rc::new(Part { base: NodeAdapter::new(node) })));
    (builder.build().expect("catalog builds"), audits)
}

#[test]
fn missing_capabilities() {
    let (catalog, _) = setup();
    let part = catalog.create_node("Part").expect("part");
    assert!(part.try_as::<Outline>().is_none());
    assert!(!part.is::<dyn Describe>());
    assert!(matches!(part.cast::<Round>(), Err(DomError::Adaptation(_))));
}

#[test]
fn adapters_are_created_once_per_node() {
    let (catalog, _) = setup();
    let shape = catalog.create_node("Shape").expect("shape");
    let first = shape.cast::<Outline>().expect("outline");
    let second = shape.cast::<Outline>().expect("outline");
    assert!(Rc::ptr_eq(&first, &second));

    let other = catalog.create_node("Shape").expect("shape");
    assert!(!Rc::ptr_eq(&first, &other.cast::<Outline>().expect("outline")));
}

#[test]
fn trait_capabilities() {
    let (catalog, _) = setup();
    let shape = catalog.create_node("Shape").expect("shape");
    let described = shape.cast::<dyn Describe>().expect("describe");
    assert_eq!(described.describe(), "outline of Shape");
}

#[test]
fn derived_types_take_precedence() {
    let (catalog, _) = setup();
    let circle = catalog.create_node("Circle").expect("circle");
    assert_eq!(circle.cast::<dyn Describe>().expect("describe").describe(), "round");
    let all: Vec<String> = circle.as_all::<dyn Describe>().iter().map(|d| d.describe()).collect();
    assert_eq!(all, vec!["round".to_string(), "outline of Circle".to_string()]);
    // inherited concrete capabilities remain reachable
    assert!(circle.is::<Outline>());
}

#[test]
fn adapters_may_depend_on_siblings() {
    let (catalog, _) = setup();
    let shape = catalog.create_node("Shape").expect("shape");
    let labelled = shape.cast::<Labelled>().expect("labelled");
    let outline = shape.cast::<Outline>().expect("outline");
    assert!(Rc::ptr_eq(&labelled.outline, &outline));
}

#[test]
fn eager_adapters_are_built_on_initialization() {
    let (catalog, audits) = setup();
    let circle = catalog.create_node("Circle").expect("circle");
    assert_eq!(audits.get(), 0, "nothing is built before it is needed");
    circle.initialize_adapters();
    assert_eq!(audits.get(), 1);
    circle.initialize_adapters();
    assert!(circle.is::<Audit>());
    assert_eq!(audits.get(), 1, "initialization reuses existing adapters");
}

#[test]
fn node_adapters_reach_parent_capabilities() {
    let (catalog, _) = setup();
    let shape = catalog.create_node("Shape").expect("shape");
    let part = catalog.create_node("Part").expect("part");
    let parts = shape.node_type().child_definition("parts").expect("parts");
    shape.get_child_list(&parts).expect("parts").push(&part).expect("push");

    let adapter = part.cast::<Part>().expect("part adapter");
    assert_eq!(adapter.base.node().expect("node"), part);
    let outline = adapter.base.parent_as::<Outline>().expect("parent outline");
    assert!(Rc::ptr_eq(&outline, &shape.cast::<Outline>().expect("outline")));
    assert!(adapter.base.adapt::<Part>().is_some());

    part.remove_from_parent().expect("detach");
    assert!(adapter.base.parent_as::<Outline>().is_none());
}

#[test]
fn dropped_nodes_leave_adapters_dangling() {
    let (catalog, _) = setup();
    let shape = catalog.create_node("Shape").expect("shape");
    let outline = shape.cast::<Outline>().expect("outline");
    drop(shape);
    assert!(matches!(outline.base.node(), Err(DomError::InvalidOperation(_))));
    assert_eq!(outline.describe(), "outline of nothing");
}
