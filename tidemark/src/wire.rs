//! JSON wire encoding consumed by the client differ.
//!
//! A `Rendered` becomes an object with the static list under `"s"`, each
//! computed dynamic under its zero-based index, and the fingerprint under
//! `"f"` as lowercase hex. `Nil` dynamics are omitted entirely; an absent
//! index tells the client its previous value is still valid. Comprehension
//! rows travel under `"d"`; a stream annotation, when present, under
//! `"stream"`.

use serde_json::{json, Map, Value};

use crate::rendered::{Component, Comprehension, Dyn, Rendered, StreamAnnot};

impl Rendered {
    pub fn to_wire(&self) -> Value {
        let mut out = Map::new();
        out.insert(
            "s".into(),
            Value::Array(self.statics.iter().map(|s| json!(s)).collect()),
        );
        out.insert("f".into(), json!(format!("{:032x}", self.fingerprint)));
        if let Some(root) = self.root {
            out.insert("r".into(), json!(root));
        }
        for (i, dynamic) in self.dynamics.iter().enumerate() {
            if let Some(encoded) = dynamic.to_wire() {
                out.insert(i.to_string(), encoded);
            }
        }
        Value::Object(out)
    }
}

impl Dyn {
    /// `None` for [`Dyn::Nil`]: the position is omitted from the payload.
    pub fn to_wire(&self) -> Option<Value> {
        match self {
            Dyn::Nil => None,
            Dyn::Iodata(io) => Some(json!(io.to_string())),
            Dyn::Rendered(rendered) => Some(rendered.to_wire()),
            Dyn::Comprehension(comp) => Some(comp.to_wire()),
            Dyn::Component(component) => Some(component.to_wire()),
        }
    }
}

impl Comprehension {
    pub fn to_wire(&self) -> Value {
        let mut out = Map::new();
        out.insert(
            "s".into(),
            Value::Array(self.statics.iter().map(|s| json!(s)).collect()),
        );
        out.insert("f".into(), json!(format!("{:032x}", self.fingerprint)));
        let rows: Vec<Value> = self
            .dynamics
            .iter()
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|d| d.to_wire().unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .collect();
        out.insert("d".into(), Value::Array(rows));
        if let Some(stream) = &self.stream {
            out.insert("stream".into(), stream.to_wire());
        }
        Value::Object(out)
    }
}

impl StreamAnnot {
    /// `[ref, inserts, deletes]`, with the reset flag appended only when
    /// set. The client parser accepts both layouts.
    pub fn to_wire(&self) -> Value {
        let inserts: Vec<Value> = self
            .inserts
            .iter()
            .map(|insert| match insert.limit {
                Some(limit) => json!([insert.id, insert.at, limit]),
                None => json!([insert.id, insert.at]),
            })
            .collect();
        match self.reset {
            Some(reset) => json!([self.stream_ref, inserts, self.deletes, reset]),
            None => json!([self.stream_ref, inserts, self.deletes]),
        }
    }
}

impl Component {
    pub fn to_wire(&self) -> Value {
        let mut assigns = self.assigns.clone();
        if let Some(changed) = &self.changed {
            assigns.insert("__changed__".into(), Value::Object(changed.clone()));
        }
        json!({
            "id": self.id,
            "component": self.component_ref,
            "assigns": assigns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iodata::Iodata;
    use crate::rendered::Caller;
    use assert_json_diff::assert_json_eq;

    #[test]
    fn nil_dynamics_are_omitted() {
        let r = Rendered {
            statics: vec!["a".into(), "b".into(), "c".into()],
            dynamics: vec![Dyn::Nil, Dyn::Iodata(Iodata::from("X"))],
            fingerprint: 0xabc,
            root: Some(true),
            caller: Caller::Unavailable,
        };
        let wire = r.to_wire();
        assert_json_eq!(
            wire,
            serde_json::json!({
                "s": ["a", "b", "c"],
                "f": format!("{:032x}", 0xabcu128),
                "r": true,
                "1": "X",
            })
        );
    }

    #[test]
    fn comprehension_rows_and_stream() {
        let comp = Comprehension {
            statics: vec!["x:".into(), " ".into()],
            dynamics: vec![vec![Dyn::Iodata(Iodata::from("1"))]],
            fingerprint: 1,
            stream: Some(StreamAnnot {
                stream_ref: "items".into(),
                inserts: vec![crate::rendered::StreamInsert {
                    id: "items-1".into(),
                    at: -1,
                    limit: None,
                }],
                deletes: vec![],
                reset: Some(true),
            }),
        };
        let wire = comp.to_wire();
        assert_json_eq!(
            wire["stream"],
            serde_json::json!(["items", [["items-1", -1]], [], true])
        );
        assert_json_eq!(wire["d"], serde_json::json!([["1"]]));
    }

    #[test]
    fn component_merges_changed_into_assigns() {
        let mut assigns = Map::new();
        assigns.insert("who".into(), serde_json::json!("Ana"));
        let mut changed = Map::new();
        changed.insert("who".into(), Value::Bool(true));
        let component = Component {
            id: "greeter-1".into(),
            component_ref: "greeter".into(),
            assigns,
            changed: Some(changed),
        };
        let wire = component.to_wire();
        assert_json_eq!(
            wire["assigns"]["__changed__"],
            serde_json::json!({"who": true})
        );
    }
}
