//! Golden wire-format payloads for nested rendered trees.

use assert_json_diff::assert_json_eq;
use serde_json::{json, Map, Value};
use tidemark::{Caller, Component, Comprehension, Dyn, Iodata, Rendered, StreamAnnot, StreamInsert};

fn rendered(statics: &[&str], dynamics: Vec<Dyn>, fingerprint: u128) -> Rendered {
    Rendered {
        statics: statics.iter().map(|s| s.to_string()).collect(),
        dynamics,
        fingerprint,
        root: None,
        caller: Caller::Unavailable,
    }
}

#[test]
fn nested_tree_round_trips_to_the_differ_shape() {
    let comprehension = Comprehension {
        statics: vec!["x:".into(), " ".into()],
        dynamics: vec![
            vec![Dyn::Iodata(Iodata::from("1"))],
            vec![Dyn::Iodata(Iodata::from("2"))],
        ],
        fingerprint: 0x2,
        stream: None,
    };
    let inner = rendered(&["[", "]"], vec![Dyn::Iodata(Iodata::from("i"))], 0x3);
    let outer = Rendered {
        root: Some(true),
        ..rendered(
            &["a", "b", "c", "d"],
            vec![
                Dyn::Nil,
                Dyn::Comprehension(Box::new(comprehension)),
                Dyn::Rendered(Box::new(inner)),
            ],
            0x1,
        )
    };

    assert_json_eq!(
        outer.to_wire(),
        json!({
            "s": ["a", "b", "c", "d"],
            "f": format!("{:032x}", 1),
            "r": true,
            "1": {
                "s": ["x:", " "],
                "f": format!("{:032x}", 2),
                "d": [["1"], ["2"]],
            },
            "2": {
                "s": ["[", "]"],
                "f": format!("{:032x}", 3),
                "0": "i",
            },
        })
    );
}

#[test]
fn component_payload_carries_assigns_and_changed() {
    let mut assigns = Map::new();
    assigns.insert("who".into(), json!("Ana"));
    assigns.insert(
        "hello".into(),
        json!([{"__slot__": "hello", "inner_block": {"__inner_block__": "00000000000000ff"}}]),
    );
    let mut changed = Map::new();
    changed.insert("who".into(), Value::Bool(true));

    let component = Component {
        id: "greeter-1".into(),
        component_ref: "Greeter".into(),
        assigns,
        changed: Some(changed),
    };
    let wire = component.to_wire();
    assert_json_eq!(wire["component"], json!("Greeter"));
    assert_json_eq!(wire["assigns"]["who"], json!("Ana"));
    assert_json_eq!(wire["assigns"]["__changed__"], json!({"who": true}));
}

#[test]
fn stream_annotation_layouts() {
    let without_reset = StreamAnnot {
        stream_ref: "rows".into(),
        inserts: vec![StreamInsert {
            id: "rows-1".into(),
            at: -1,
            limit: None,
        }],
        deletes: vec![],
        reset: None,
    };
    assert_json_eq!(without_reset.to_wire(), json!(["rows", [["rows-1", -1]], []]));

    let with_reset = StreamAnnot {
        reset: Some(false),
        ..without_reset
    };
    assert_json_eq!(
        with_reset.to_wire(),
        json!(["rows", [["rows-1", -1]], [], false])
    );
}
