use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pflow_core::node::execute_node;
use pflow_core::store::SharedStore;
use pflow_core::testing::{EchoNode, SquareNode};
use pflow_core::Node;
use serde_json::json;

fn bench_single_node(c: &mut Criterion) {
    c.bench_function("echo_node_three_phases", |b| {
        let mut node = EchoNode::default();
        node.set_params(json!({"msg": "hello world"}).as_object().unwrap().clone())
            .unwrap();
        b.iter(|| {
            let mut shared = SharedStore::new();
            execute_node(black_box(&mut node), &mut shared).unwrap();
        });
    });

    c.bench_function("square_node_from_store", |b| {
        let mut node = SquareNode::default();
        b.iter(|| {
            let mut shared = SharedStore::new();
            shared.insert("item", json!(1234));
            execute_node(black_box(&mut node), &mut shared).unwrap();
        });
    });
}

fn bench_template_resolution(c: &mut Criterion) {
    use pflow_core::template::resolver::{resolve_param_value, Overlay};

    let store = json!({
        "fetch": {"response": {"items": [{"id": "a"}, {"id": "b"}], "total": 2}}
    });
    let root = store.as_object().unwrap();

    c.bench_function("simple_template_deep_path", |b| {
        let overlay = Overlay::of_root(root);
        let value = json!("${fetch.response.items[1].id}");
        b.iter(|| resolve_param_value(black_box(&value), &overlay, None).unwrap());
    });

    c.bench_function("complex_template_interpolation", |b| {
        let overlay = Overlay::of_root(root);
        let value = json!("got ${fetch.response.total} items, first ${fetch.response.items[0].id}");
        b.iter(|| resolve_param_value(black_box(&value), &overlay, None).unwrap());
    });
}

criterion_group!(benches, bench_single_node, bench_template_resolution);
criterion_main!(benches);
