//! Evaluation of template expressions against an assigns map.
//!
//! This is deliberately not a general-purpose interpreter. It covers the
//! template dialect (literals, assign and local reads, field and index
//! access, the usual operators, a couple of methods) and reports anything
//! else as outside the dialect. Values are `serde_json` values throughout;
//! truthiness follows the template rule that only `null` and `false` are
//! falsy.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use tidemark::changed::Assigns;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("undefined variable `{name}`")]
    UnboundVariable { name: String },
    #[error("assign @{name} not available in template")]
    MissingAssign { name: String },
    #[error("no field `{field}` on {value}")]
    MissingField { field: String, value: String },
    #[error("cannot {op} {detail}")]
    TypeError { op: &'static str, detail: String },
    #[error("{detail} is outside the template dialect")]
    Unsupported { detail: &'static str },
    #[error("cannot convert a map to output text")]
    MapToText,
}

/// Lexical scope during one render: the assigns plus stacked local frames
/// (template-level bindings, generator variables, `:let` parameters).
#[derive(Debug)]
pub struct Scope<'a> {
    assigns: &'a Assigns,
    frames: Vec<HashMap<String, Value>>,
}

impl<'a> Scope<'a> {
    pub fn new(assigns: &'a Assigns) -> Self {
        Self {
            assigns,
            frames: vec![HashMap::new()],
        }
    }

    pub fn assigns(&self) -> &'a Assigns {
        self.assigns
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }
}

/// Only `null` and `false` are falsy.
pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Flatten a value to output text. Arrays concatenate; maps are an error.
pub fn to_text(value: &Value) -> Result<String, EvalError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Array(items) => {
            let mut out = String::new();
            for item in items {
                out.push_str(&to_text(item)?);
            }
            Ok(out)
        }
        Value::Object(_) => Err(EvalError::MapToText),
    }
}

pub fn eval(expr: &syn::Expr, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    use syn::Expr::*;
    match expr {
        Lit(lit) => eval_lit(&lit.lit),
        Path(path) => eval_path(path, scope),
        Field(field) => eval_field(field, scope),
        Index(index) => eval_index(index, scope),
        Unary(unary) => eval_unary(unary, scope),
        Binary(binary) => eval_binary(binary, scope),
        Paren(paren) => eval(&paren.expr, scope),
        Group(group) => eval(&group.expr, scope),
        Reference(reference) => eval(&reference.expr, scope),
        Tuple(tuple) => {
            let items = tuple
                .elems
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<_, _>>()?;
            Ok(Value::Array(items))
        }
        Array(array) => {
            let items = array
                .elems
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<_, _>>()?;
            Ok(Value::Array(items))
        }
        Range(range) => eval_range(range, scope),
        If(expr_if) => {
            if truthy(&eval(&expr_if.cond, scope)?) {
                eval_block(&expr_if.then_branch, scope)
            } else if let Some((_, else_branch)) = &expr_if.else_branch {
                eval(else_branch, scope)
            } else {
                Ok(Value::Null)
            }
        }
        Block(block) => eval_block(&block.block, scope),
        Assign(assign) => {
            let syn::Expr::Path(target) = &*assign.left else {
                return Err(EvalError::Unsupported {
                    detail: "assignment to a non-variable",
                });
            };
            let Some(name) = target.path.get_ident() else {
                return Err(EvalError::Unsupported {
                    detail: "assignment to a non-variable",
                });
            };
            let value = eval(&assign.right, scope)?;
            scope.bind(name.to_string(), value);
            Ok(Value::Null)
        }
        MethodCall(call) => eval_method(call, scope),
        Macro(_) => Err(EvalError::Unsupported {
            detail: "a macro invocation",
        }),
        Call(_) => Err(EvalError::Unsupported {
            detail: "a function call",
        }),
        Closure(_) => Err(EvalError::Unsupported {
            detail: "a closure",
        }),
        Match(_) => Err(EvalError::Unsupported {
            detail: "a match expression (use a `case` block)",
        }),
        _ => Err(EvalError::Unsupported {
            detail: "this expression form",
        }),
    }
}

fn eval_lit(lit: &syn::Lit) -> Result<Value, EvalError> {
    match lit {
        syn::Lit::Str(s) => Ok(Value::String(s.value())),
        syn::Lit::Int(i) => i
            .base10_parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| EvalError::TypeError {
                op: "parse",
                detail: "an oversized integer literal".into(),
            }),
        syn::Lit::Float(f) => {
            let parsed = f.base10_parse::<f64>().map_err(|_| EvalError::TypeError {
                op: "parse",
                detail: "a malformed float literal".into(),
            })?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or(EvalError::TypeError {
                    op: "parse",
                    detail: "a non-finite float literal".into(),
                })
        }
        syn::Lit::Bool(b) => Ok(Value::Bool(b.value)),
        syn::Lit::Char(c) => Ok(Value::String(c.value().to_string())),
        _ => Err(EvalError::Unsupported {
            detail: "this literal form",
        }),
    }
}

fn eval_path(path: &syn::ExprPath, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let Some(ident) = path.path.get_ident() else {
        return Err(EvalError::Unsupported {
            detail: "a qualified path",
        });
    };
    let name = ident.to_string();
    if name == "assigns" {
        return Ok(Value::Object(scope.assigns().clone()));
    }
    scope
        .lookup(&name)
        .cloned()
        .ok_or(EvalError::UnboundVariable { name })
}

fn eval_field(field: &syn::ExprField, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let key = match &field.member {
        syn::Member::Named(ident) => ident.to_string(),
        syn::Member::Unnamed(index) => index.index.to_string(),
    };

    // `assigns.name` is an assign read: missing assigns are an error up
    // front rather than a null that surfaces later
    if let syn::Expr::Path(path) = &*field.base {
        if path.path.is_ident("assigns") {
            return scope
                .assigns()
                .get(&key)
                .cloned()
                .ok_or(EvalError::MissingAssign { name: key });
        }
    }

    let base = eval(&field.base, scope)?;
    match &base {
        Value::Object(map) => map.get(&key).cloned().ok_or(EvalError::MissingField {
            field: key,
            value: shape_of(&base).to_string(),
        }),
        Value::Array(items) => {
            let index: usize = key.parse().map_err(|_| EvalError::MissingField {
                field: key.clone(),
                value: "a list".into(),
            })?;
            items.get(index).cloned().ok_or(EvalError::MissingField {
                field: key,
                value: "a list".into(),
            })
        }
        _ => Err(EvalError::MissingField {
            field: key,
            value: shape_of(&base).to_string(),
        }),
    }
}

/// Index access is lenient: a missing key or out-of-range index is `null`.
fn eval_index(index: &syn::ExprIndex, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let base = eval(&index.expr, scope)?;
    let key = eval(&index.index, scope)?;
    match (&base, &key) {
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => {
            let slot = n.as_u64().and_then(|i| items.get(i as usize));
            Ok(slot.cloned().unwrap_or(Value::Null))
        }
        _ => Err(EvalError::TypeError {
            op: "index",
            detail: format!("{} with {}", shape_of(&base), shape_of(&key)),
        }),
    }
}

fn eval_unary(unary: &syn::ExprUnary, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let value = eval(&unary.expr, scope)?;
    match unary.op {
        syn::UnOp::Not(_) => Ok(Value::Bool(!truthy(&value))),
        syn::UnOp::Neg(_) => match &value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Number((-i).into()))
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    Number::from_f64(-f)
                        .map(Value::Number)
                        .ok_or(EvalError::TypeError {
                            op: "negate",
                            detail: shape_of(&value).to_string(),
                        })
                }
            }
            _ => Err(EvalError::TypeError {
                op: "negate",
                detail: shape_of(&value).to_string(),
            }),
        },
        _ => Err(EvalError::Unsupported {
            detail: "this unary operator",
        }),
    }
}

fn eval_binary(binary: &syn::ExprBinary, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    use syn::BinOp::*;

    // short-circuit forms first
    match binary.op {
        And(_) => {
            let left = eval(&binary.left, scope)?;
            if !truthy(&left) {
                return Ok(Value::Bool(false));
            }
            let right = eval(&binary.right, scope)?;
            return Ok(Value::Bool(truthy(&right)));
        }
        Or(_) => {
            let left = eval(&binary.left, scope)?;
            if truthy(&left) {
                return Ok(Value::Bool(true));
            }
            let right = eval(&binary.right, scope)?;
            return Ok(Value::Bool(truthy(&right)));
        }
        _ => {}
    }

    let left = eval(&binary.left, scope)?;
    let right = eval(&binary.right, scope)?;
    match binary.op {
        Add(_) => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arith(&left, &right, "add", |a, b| a + b, |a, b| a.checked_add(b)),
        },
        Sub(_) => arith(&left, &right, "subtract", |a, b| a - b, |a, b| a.checked_sub(b)),
        Mul(_) => arith(&left, &right, "multiply", |a, b| a * b, |a, b| a.checked_mul(b)),
        Div(_) => arith(&left, &right, "divide", |a, b| a / b, |a, b| a.checked_div(b)),
        Rem(_) => arith(&left, &right, "take the remainder of", |a, b| a % b, |a, b| {
            a.checked_rem(b)
        }),
        Eq(_) => Ok(Value::Bool(left == right)),
        Ne(_) => Ok(Value::Bool(left != right)),
        Lt(_) => compare(&left, &right, |o| o == std::cmp::Ordering::Less),
        Le(_) => compare(&left, &right, |o| o != std::cmp::Ordering::Greater),
        Gt(_) => compare(&left, &right, |o| o == std::cmp::Ordering::Greater),
        Ge(_) => compare(&left, &right, |o| o != std::cmp::Ordering::Less),
        _ => Err(EvalError::Unsupported {
            detail: "this binary operator",
        }),
    }
}

fn arith(
    left: &Value,
    right: &Value,
    op: &'static str,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Value, EvalError> {
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(EvalError::TypeError {
            op,
            detail: format!("{} and {}", shape_of(left), shape_of(right)),
        });
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Ok(Value::Number(result.into()));
        }
    }
    let result = float_op(a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or(EvalError::TypeError {
            op,
            detail: "values producing a non-finite result".into(),
        })
}

fn compare(
    left: &Value,
    right: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&b.as_f64().unwrap_or(f64::NAN)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match ordering {
        Some(ordering) => Ok(Value::Bool(accept(ordering))),
        None => Err(EvalError::TypeError {
            op: "compare",
            detail: format!("{} with {}", shape_of(left), shape_of(right)),
        }),
    }
}

fn eval_range(range: &syn::ExprRange, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let bound = |expr: &Option<Box<syn::Expr>>, scope: &mut Scope<'_>| match expr {
        Some(expr) => eval(expr, scope),
        None => Err(EvalError::Unsupported {
            detail: "an open-ended range",
        }),
    };
    let start = bound(&range.start, scope)?;
    let end = bound(&range.end, scope)?;
    let (Value::Number(a), Value::Number(b)) = (&start, &end) else {
        return Err(EvalError::TypeError {
            op: "enumerate",
            detail: "a non-integer range".into(),
        });
    };
    let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) else {
        return Err(EvalError::TypeError {
            op: "enumerate",
            detail: "a non-integer range".into(),
        });
    };
    let end_inclusive = match range.limits {
        syn::RangeLimits::HalfOpen(_) => b - 1,
        syn::RangeLimits::Closed(_) => b,
    };
    Ok(Value::Array((a..=end_inclusive).map(Value::from).collect()))
}

fn eval_block(block: &syn::Block, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    scope.push_frame();
    let result = eval_block_inner(block, scope);
    scope.pop_frame();
    result
}

fn eval_block_inner(block: &syn::Block, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let mut last = Value::Null;
    for stmt in &block.stmts {
        match stmt {
            syn::Stmt::Expr(expr, semi) => {
                let value = eval(expr, scope)?;
                last = if semi.is_none() { value } else { Value::Null };
            }
            syn::Stmt::Local(local) => {
                let Some(init) = &local.init else {
                    return Err(EvalError::Unsupported {
                        detail: "a `let` without an initializer",
                    });
                };
                let value = eval(&init.expr, scope)?;
                let mut bindings = Vec::new();
                if !match_pattern(&local.pat, &value, &mut bindings)? {
                    return Err(EvalError::TypeError {
                        op: "bind",
                        detail: "a refuted `let` pattern".into(),
                    });
                }
                for (name, bound) in bindings {
                    scope.bind(name, bound);
                }
            }
            _ => {
                return Err(EvalError::Unsupported {
                    detail: "this statement form",
                })
            }
        }
    }
    Ok(last)
}

fn eval_method(call: &syn::ExprMethodCall, scope: &mut Scope<'_>) -> Result<Value, EvalError> {
    let receiver = eval(&call.receiver, scope)?;
    let method = call.method.to_string();
    match (method.as_str(), call.args.len()) {
        ("len", 0) => match &receiver {
            Value::String(s) => Ok(Value::Number((s.chars().count() as i64).into())),
            Value::Array(items) => Ok(Value::Number((items.len() as i64).into())),
            Value::Object(map) => Ok(Value::Number((map.len() as i64).into())),
            _ => Err(EvalError::TypeError {
                op: "take the length of",
                detail: shape_of(&receiver).to_string(),
            }),
        },
        ("to_string", 0) => to_text(&receiver).map(Value::String),
        _ => Err(EvalError::Unsupported {
            detail: "this method call",
        }),
    }
}

/// Match a pattern against a value, collecting bindings. `Ok(false)` means
/// the pattern refuted the value.
pub fn match_pattern(
    pat: &syn::Pat,
    value: &Value,
    bindings: &mut Vec<(String, Value)>,
) -> Result<bool, EvalError> {
    match pat {
        syn::Pat::Wild(_) => Ok(true),
        syn::Pat::Ident(ident) => {
            if let Some((_, sub)) = &ident.subpat {
                if !match_pattern(sub, value, bindings)? {
                    return Ok(false);
                }
            }
            bindings.push((ident.ident.to_string(), value.clone()));
            Ok(true)
        }
        syn::Pat::Lit(lit) => Ok(eval_lit(&lit.lit)? == *value),
        syn::Pat::Tuple(tuple) => {
            let Value::Array(items) = value else {
                return Ok(false);
            };
            if tuple.elems.len() != items.len() {
                return Ok(false);
            }
            for (pat, item) in tuple.elems.iter().zip(items) {
                if !match_pattern(pat, item, bindings)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        syn::Pat::Or(or) => {
            for case in &or.cases {
                let mut attempt = Vec::new();
                if match_pattern(case, value, &mut attempt)? {
                    bindings.extend(attempt);
                    return Ok(true);
                }
            }
            Ok(false)
        }
        syn::Pat::Paren(paren) => match_pattern(&paren.pat, value, bindings),
        syn::Pat::Reference(reference) => match_pattern(&reference.pat, value, bindings),
        _ => Err(EvalError::Unsupported {
            detail: "this pattern form",
        }),
    }
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

/// Convenience for tests and callers holding a JSON object literal.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
