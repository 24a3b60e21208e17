use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use schemadom::history::HistoryContext;
use schemadom::loader::load_schema;
use schemadom::node::Node;
use schemadom::reference::IdIndex;
use schemadom::schema::TypeCatalog;
use schemadom::serialize::{from_json_str, to_json_string};
use schemadom::settings::HistorySettings;

const SCHEMA: &str = r#"
type Machine {
    attribute title: string = "Untitled";
    child states: State[];
}

type State {
    attribute id: string;
    attribute size: int = 64 where range(0, 1000);
    id id;
}
"#;

fn catalog() -> TypeCatalog {
    let mut builder = load_schema(SCHEMA).expect("schema parses");
    builder
        .type_mut("Machine")
        .expect("machine")
        .adapter(HistoryContext::creator(HistorySettings::default()))
        .adapter(IdIndex::creator());
    builder.build().expect("schema builds")
}

fn machine_with_states(catalog: &TypeCatalog, count: usize) -> Node {
    let machine = catalog.create_node("Machine").expect("machine");
    let states = machine
        .get_child_list(&machine.node_type().child_definition("states").expect("states"))
        .expect("list");
    for n in 0..count {
        let state = catalog.create_node("State").expect("state");
        state.set_attribute_named("id", format!("s{}", n)).expect("id");
        state.set_attribute_named("size", (n % 1000) as i64).expect("size");
        states.push(&state).expect("push");
    }
    machine
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let catalog = catalog();

    let state = catalog.create_node("State").expect("state");
    let size = state.node_type().attribute_definition("size").expect("size");
    let mut n = 0_i64;
    c.bench_function("set attribute", |b| {
        b.iter(|| {
            n = (n + 1) % 1000;
            state.set_attribute(&size, black_box(n)).expect("set")
        })
    });

    let machine = machine_with_states(&catalog, 100);
    machine.initialize_adapters();
    let history = machine.cast::<HistoryContext>().expect("history");
    let states = machine.node_type().child_definition("states").expect("states");
    let extra = catalog.create_node("State").expect("state");
    extra.set_attribute_named("id", "extra").expect("id");
    c.bench_function("transaction and undo", |b| {
        b.iter(|| {
            history
                .do_transaction("Add", || machine.get_child_list(&states)?.push(&extra))
                .expect("add");
            history.undo().expect("undo");
        })
    });

    let index = machine.cast::<IdIndex>().expect("index");
    c.bench_function("find by id 100", |b| b.iter(|| index.find(black_box("s57"))));

    for count in [10, 1000] {
        let machine = machine_with_states(&catalog, count);
        let json = to_json_string(&machine).expect("json");
        c.bench_function(&format!("to json {}", count), |b| b.iter(|| to_json_string(black_box(&machine))));
        c.bench_function(&format!("from json {}", count), |b| {
            b.iter(|| from_json_str(&catalog, black_box(&json)))
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
