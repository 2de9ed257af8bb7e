//! Attribute classification and runtime attribute serialization.
//!
//! At compile time every attribute of a node becomes static (emitted
//! verbatim into the static text), dynamic (an escaped expression slot), or
//! a root spread (an attribute bag evaluated at render time). The special
//! directives were already extracted by the structural analyzer.

use serde_json::Value;

use crate::eval::{to_text, EvalError};
use crate::tokenizer::{AttrEntry, AttrValue, ExprSource};
use tidemark::escape_html;

/// One classified attribute, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedAttr {
    /// Emitted verbatim with its original delimiter; `value: None` is a
    /// bare attribute like `disabled`.
    Static {
        name: String,
        value: Option<(String, char)>,
    },
    Dynamic {
        name: String,
        expr: ExprSource,
    },
    Root {
        expr: ExprSource,
    },
}

/// Attributes dropped from the output after the tokenizer consumed them.
const STRIPPED: [&str; 2] = ["phx-no-format", "phx-no-curly-interpolation"];

pub fn classify(attrs: &[AttrEntry], caller_module: Option<&str>) -> Vec<ClassifiedAttr> {
    let mut out = Vec::with_capacity(attrs.len());
    for entry in attrs {
        match entry {
            AttrEntry::Root(expr) => out.push(ClassifiedAttr::Root { expr: expr.clone() }),
            AttrEntry::Named(attr) => {
                if STRIPPED.contains(&attr.name.as_str()) {
                    continue;
                }
                match &attr.value {
                    AttrValue::None => out.push(ClassifiedAttr::Static {
                        name: attr.name.clone(),
                        value: None,
                    }),
                    AttrValue::String { value, delimiter } => {
                        let value = if attr.name == "phx-hook" {
                            expand_hook_name(value, caller_module)
                        } else {
                            value.clone()
                        };
                        out.push(ClassifiedAttr::Static {
                            name: attr.name.clone(),
                            value: Some((value, *delimiter)),
                        });
                    }
                    AttrValue::Expr(expr) => out.push(ClassifiedAttr::Dynamic {
                        name: attr.name.clone(),
                        expr: expr.clone(),
                    }),
                }
            }
        }
    }
    out
}

/// A hook name starting with `.` expands to the caller module's name.
fn expand_hook_name(value: &str, caller_module: Option<&str>) -> String {
    match (value.strip_prefix('.'), caller_module) {
        (Some(rest), Some(module)) => format!("{module}.{rest}"),
        _ => value.to_string(),
    }
}

/// Serialize one dynamic attribute value, leading space included.
///
/// `null` and `false` drop the attribute; `true` renders the bare name,
/// except for `class`, `style`, `aria*` and `data*`, which keep the
/// empty-value encoding and drop all three. A `class` list is joined with
/// spaces after filtering `null` and `false` entries.
pub fn attr_fragment(name: &str, value: &Value) -> Result<String, EvalError> {
    let empty_encoded = matches!(name, "class" | "style" | "aria" | "data")
        || name.starts_with("aria-")
        || name.starts_with("data-");

    match value {
        Value::Null | Value::Bool(false) => Ok(String::new()),
        Value::Bool(true) => {
            if empty_encoded {
                Ok(String::new())
            } else {
                Ok(format!(" {name}"))
            }
        }
        Value::Array(items) if name == "class" => {
            let mut classes = Vec::new();
            for item in items {
                if matches!(item, Value::Null | Value::Bool(false)) {
                    continue;
                }
                classes.push(to_text(item)?);
            }
            if classes.is_empty() {
                return Ok(String::new());
            }
            Ok(format!(
                " {name}=\"{}\"",
                escape_html(&classes.join(" "))
            ))
        }
        other => {
            let text = to_text(other)?;
            Ok(format!(" {name}=\"{}\"", escape_html(&text)))
        }
    }
}

/// Serialize a root spread bag. Keys come out in the map's order.
pub fn spread_fragment(map: &serde_json::Map<String, Value>) -> Result<String, EvalError> {
    let mut out = String::new();
    for (name, value) in map {
        out.push_str(&attr_fragment(name, value)?);
    }
    Ok(out)
}

/// Emit a static attribute exactly as written.
pub fn static_fragment(name: &str, value: &Option<(String, char)>) -> String {
    match value {
        None => format!(" {name}"),
        Some((value, delimiter)) => format!(" {name}={delimiter}{value}{delimiter}"),
    }
}
