//! Compile a template once, render it three times, and print the wire
//! payload each render would ship to the client differ.

use serde_json::json;
use tidemark_compiler::{compile, CompileOpts};

fn main() {
    let source = r#"<div id="profile">
  Hello <%= @user.name %>!
  <ul>
    <li :for={tag <- @tags}>{tag}</li>
  </ul>
  <%= if @admin do %><span class="badge">admin</span><% end %>
</div>"#;

    let opts = CompileOpts {
        file: "profile.html".to_string(),
        ..CompileOpts::default()
    };
    let template = compile(source, &opts).expect("template compiles");
    println!("fingerprint: {:032x}", template.fingerprint());
    println!("root: {:?}", template.root());

    // initial render: no changed map, everything computes
    let assigns = tidemark_compiler::eval::object(json!({
        "user": {"name": "Ana"},
        "tags": ["alpha", "beta"],
        "admin": true,
    }));
    let rendered = template.render(&assigns).expect("initial render");
    println!("\ninitial html:\n{}", rendered.to_html().expect("full tree"));
    println!("\ninitial wire:\n{}", rendered.to_wire());

    // nothing changed: every dynamic is omitted from the payload
    let assigns = tidemark_compiler::eval::object(json!({
        "user": {"name": "Ana"},
        "tags": ["alpha", "beta"],
        "admin": true,
        "__changed__": {},
    }));
    let rendered = template.render(&assigns).expect("tracked render");
    println!("\nno-change wire:\n{}", rendered.to_wire());

    // one nested write: only the affected slot ships
    let assigns = tidemark_compiler::eval::object(json!({
        "user": {"name": "Bo"},
        "tags": ["alpha", "beta"],
        "admin": true,
        "__changed__": {"user": {"name": "Ana"}},
    }));
    let rendered = template.render(&assigns).expect("tracked render");
    println!("\nname-change wire:\n{}", rendered.to_wire());
}
