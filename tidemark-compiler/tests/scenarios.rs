//! End-to-end change-tracking scenarios.

use serde_json::json;
use tidemark::{Dyn, Iodata};
use tidemark_compiler::eval::object;
use tidemark_compiler::{compile, CompileOpts, Template};

fn template(source: &str) -> Template {
    compile(source, &CompileOpts::default()).unwrap()
}

fn iodata(text: &str) -> Dyn {
    Dyn::Iodata(Iodata::from(text))
}

#[test]
fn plain_change_tracking() {
    let t = template("Hello <%= @name %>!");

    // initial render: no changed map, everything computes
    let r = t.render(&object(json!({"name": "Ana"}))).unwrap();
    assert_eq!(r.statics, vec!["Hello ", "!"]);
    assert_eq!(r.dynamics, vec![iodata("Ana")]);

    // nothing changed: the slot is suppressed
    let r = t
        .render(&object(json!({"name": "Ana", "__changed__": {}})))
        .unwrap();
    assert_eq!(r.dynamics, vec![Dyn::Nil]);

    // the tracked key changed: recomputed
    let r = t
        .render(&object(json!({"name": "Bo", "__changed__": {"name": true}})))
        .unwrap();
    assert_eq!(r.dynamics, vec![iodata("Bo")]);
}

#[test]
fn comprehension_tracking() {
    let t = template("<%= for p <- @points do %>x:<%= p.x %> <% end %>");
    let assigns = object(json!({"points": [{"x": 1}, {"x": 2}]}));

    let r = t.render(&assigns).unwrap();
    assert_eq!(r.statics, vec!["", ""]);
    let Dyn::Comprehension(comp) = &r.dynamics[0] else {
        panic!("expected a comprehension, got {:?}", r.dynamics[0]);
    };
    assert_eq!(comp.statics, vec!["x:", " "]);
    assert_eq!(
        comp.dynamics,
        vec![vec![iodata("1")], vec![iodata("2")]]
    );

    let r = t
        .render(&object(
            json!({"points": [{"x": 1}, {"x": 2}], "__changed__": {}}),
        ))
        .unwrap();
    assert_eq!(r.dynamics, vec![Dyn::Nil]);

    let r = t
        .render(&object(
            json!({"points": [{"x": 3}], "__changed__": {"points": true}}),
        ))
        .unwrap();
    let Dyn::Comprehension(comp) = &r.dynamics[0] else {
        panic!();
    };
    assert_eq!(comp.dynamics, vec![vec![iodata("3")]]);
}

#[test]
fn conditional_branches_have_distinct_fingerprints() {
    let t = template("<%= if @flag do %><%= @a %><% else %><%= @b %><% end %>");

    let r = t
        .render(&object(json!({"flag": true, "a": "A", "b": "B"})))
        .unwrap();
    let Dyn::Rendered(then_arm) = &r.dynamics[0] else {
        panic!("expected a nested rendered");
    };
    assert_eq!(then_arm.dynamics, vec![iodata("A")]);

    // flip the flag: the other arm comes back under its own fingerprint,
    // fully rendered even though @b itself did not change
    let r = t
        .render(&object(
            json!({"flag": false, "a": "A", "b": "B", "__changed__": {"flag": true}}),
        ))
        .unwrap();
    let Dyn::Rendered(else_arm) = &r.dynamics[0] else {
        panic!("expected a nested rendered");
    };
    assert_ne!(then_arm.fingerprint, else_arm.fingerprint);
    assert_eq!(else_arm.dynamics, vec![iodata("B")]);
    assert!(else_arm.dynamics.iter().all(|d| !d.is_nil()));

    // nothing changed: the whole conditional is suppressed
    let r = t
        .render(&object(
            json!({"flag": false, "a": "A", "b": "B", "__changed__": {}}),
        ))
        .unwrap();
    assert_eq!(r.dynamics, vec![Dyn::Nil]);
}

#[test]
fn nested_path_tracking() {
    let t = template("<%= @user.profile.name %>");
    let user = json!({"profile": {"name": "X"}});

    let r = t.render(&object(json!({"user": user.clone()}))).unwrap();
    assert_eq!(r.dynamics, vec![iodata("X")]);

    // whole-assign marker: changed
    let r = t
        .render(&object(
            json!({"user": user.clone(), "__changed__": {"user": true}}),
        ))
        .unwrap();
    assert_eq!(r.dynamics, vec![iodata("X")]);

    // partial tree naming the leaf: changed
    let r = t
        .render(&object(json!({
            "user": user.clone(),
            "__changed__": {"user": {"profile": {"name": true}}}
        })))
        .unwrap();
    assert_eq!(r.dynamics, vec![iodata("X")]);

    // previous-value sentinel equal to the current value: no actual change
    let r = t
        .render(&object(json!({
            "user": user,
            "__changed__": {"user": {"profile": {"name": "X"}}}
        })))
        .unwrap();
    assert_eq!(r.dynamics, vec![Dyn::Nil]);
}

#[test]
fn root_attribute_spread() {
    let t = template("<div {@opts}>x</div>");
    let assigns = object(json!({"opts": {"class": "a", "data-id": "5"}}));

    let r = t.render(&assigns).unwrap();
    assert_eq!(r.statics.first().unwrap(), "<div");
    assert_eq!(r.statics.last().unwrap(), ">x</div>");
    assert_eq!(r.dynamics, vec![iodata(" class=\"a\" data-id=\"5\"")]);
    assert_eq!(r.to_html().unwrap(), "<div class=\"a\" data-id=\"5\">x</div>");

    let r = t
        .render(&object(
            json!({"opts": {"class": "a"}, "__changed__": {}}),
        ))
        .unwrap();
    assert_eq!(r.dynamics, vec![Dyn::Nil]);

    let r = t
        .render(&object(
            json!({"opts": {"class": "b"}, "__changed__": {"opts": true}}),
        ))
        .unwrap();
    assert_eq!(r.dynamics, vec![iodata(" class=\"b\"")]);
}

#[test]
fn component_with_slot_tracks_its_inputs() {
    let t = template("<.Greeter who={@name}><:hello>hi</:hello></.Greeter>");
    let assigns = object(json!({"name": "Ana"}));

    let r = t.render(&assigns).unwrap();
    let Dyn::Component(component) = &r.dynamics[0] else {
        panic!("expected a component, got {:?}", r.dynamics[0]);
    };
    assert_eq!(component.component_ref, "Greeter");
    assert_eq!(component.assigns.get("who"), Some(&json!("Ana")));
    let hello = component.assigns.get("hello").unwrap().as_array().unwrap();
    assert_eq!(hello.len(), 1);
    assert_eq!(hello[0]["__slot__"], json!("hello"));
    assert!(hello[0]["inner_block"]["__inner_block__"].is_string());
    // initial render: the child computes everything itself
    assert_eq!(component.changed, None);

    // neither @name nor any slot dependency changed: Nil
    let r = t
        .render(&object(json!({"name": "Ana", "__changed__": {}})))
        .unwrap();
    assert_eq!(r.dynamics, vec![Dyn::Nil]);

    // @name changed: the component is re-emitted with a per-key mark
    let r = t
        .render(&object(json!({"name": "Bo", "__changed__": {"name": true}})))
        .unwrap();
    let Dyn::Component(component) = &r.dynamics[0] else {
        panic!();
    };
    assert_eq!(
        component.changed.as_ref().unwrap().get("who"),
        Some(&json!(true))
    );
}
