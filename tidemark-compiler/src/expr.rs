//! Expression embedding.
//!
//! Expression bodies are opaque to the tokenizer; this module hands them to
//! the external expression parser (`syn`) and maps failures back to template
//! positions. The `@name` assign sugar is rewritten to `assigns.name` before
//! parsing, so the analyzer and evaluator see ordinary field access.

use syn::parse::Parser as _;

use crate::errors::ParseError;
use crate::source::Pos;
use crate::tokenizer::ExprSource;
use tidemark::changed::{AssignPath, PathSeg};

/// Rewrite `@name` to `assigns.name` outside string literals.
pub fn rewrite_assign_sugar(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    let mut in_string = false;
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\\' if in_string => {
                out.push(ch);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '@' if !in_string
                && chars
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') =>
            {
                out.push_str("assigns.");
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Parse an expression body, surfacing parser failures at the template
/// position of the expression.
pub fn parse_expr(src: &ExprSource, file: &str) -> Result<syn::Expr, ParseError> {
    let rewritten = rewrite_assign_sugar(&src.code);
    syn::parse_str::<syn::Expr>(&rewritten).map_err(|err| syn_error(err, src, file))
}

/// Parse a pattern body (`:let`, case arms, generator left-hand sides).
pub fn parse_pattern(src: &ExprSource, file: &str) -> Result<syn::Pat, ParseError> {
    syn::Pat::parse_single
        .parse_str(&src.code)
        .map_err(|err| syn_error(err, src, file))
}

fn syn_error(err: syn::Error, src: &ExprSource, file: &str) -> ParseError {
    let start = err.span().start();
    let pos = if start.line <= 1 {
        Pos::new(src.pos.line, src.pos.column + start.column as u32)
    } else {
        Pos::new(src.pos.line + start.line as u32 - 1, start.column as u32 + 1)
    };
    ParseError::new(file, pos, format!("invalid expression: {err}"))
}

/// A `pattern <- enumerable` generator, as required by `:for` and the `for`
/// block head.
#[derive(Debug, Clone)]
pub struct Generator {
    pub pat: syn::Pat,
    pub pat_code: String,
    pub expr: syn::Expr,
    pub expr_code: String,
    pub pos: Pos,
}

/// Parse a generator. `Ok(None)` means the code holds no top-level `<-`,
/// which callers report as "expected a generator".
pub fn parse_generator(src: &ExprSource, file: &str) -> Result<Option<Generator>, ParseError> {
    let Some(split) = split_generator(&src.code) else {
        return Ok(None);
    };
    let (pat_code, expr_code, expr_offset) = split;
    let pat_src = ExprSource {
        code: pat_code.trim().to_string(),
        pos: src.pos,
    };
    let leading_ws = expr_code.len() - expr_code.trim_start().len();
    let expr_src = ExprSource {
        code: expr_code.trim().to_string(),
        pos: advance(src.pos, &src.code[..expr_offset + leading_ws]),
    };
    let pat = parse_pattern(&pat_src, file)?;
    let expr = parse_expr(&expr_src, file)?;
    Ok(Some(Generator {
        pat,
        pat_code: pat_src.code,
        expr,
        expr_code: expr_src.code,
        pos: src.pos,
    }))
}

/// Split on the first top-level `<-`, outside strings and brackets.
fn split_generator(code: &str) -> Option<(String, String, usize)> {
    let bytes: Vec<char> = code.chars().collect();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut i = 0;
    let mut byte_offset = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        match ch {
            '"' => in_string = !in_string,
            '\\' if in_string => {
                byte_offset += ch.len_utf8();
                i += 1;
                if i < bytes.len() {
                    byte_offset += bytes[i].len_utf8();
                    i += 1;
                }
                continue;
            }
            '(' | '[' | '{' if !in_string => depth += 1,
            ')' | ']' | '}' if !in_string => depth -= 1,
            '<' if !in_string && depth == 0 && bytes.get(i + 1) == Some(&'-') => {
                let left: String = bytes[..i].iter().collect();
                let right: String = bytes[i + 2..].iter().collect();
                return Some((left, right, byte_offset + 2));
            }
            _ => {}
        }
        byte_offset += ch.len_utf8();
        i += 1;
    }
    None
}

fn advance(mut pos: Pos, consumed: &str) -> Pos {
    for ch in consumed.chars() {
        if ch == '\n' {
            pos.line += 1;
            pos.column = 1;
        } else {
            pos.column += 1;
        }
    }
    pos
}

/// What an expression reads from the assigns, when it is nothing but an
/// access chain: the bare `assigns` handle, or a static path below one
/// assign. A dynamic accessor anywhere in the chain disqualifies it.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignRef {
    Whole,
    Path(AssignPath),
}

pub fn assign_ref(expr: &syn::Expr) -> Option<AssignRef> {
    match expr {
        syn::Expr::Path(path) => {
            if path.qself.is_none() && path.path.is_ident("assigns") {
                Some(AssignRef::Whole)
            } else {
                None
            }
        }
        syn::Expr::Field(field) => {
            let base = assign_ref(&field.base)?;
            let seg = match &field.member {
                syn::Member::Named(ident) => ident.to_string(),
                syn::Member::Unnamed(index) => index.index.to_string(),
            };
            Some(push_seg(base, seg, true))
        }
        syn::Expr::Index(index) => {
            let base = assign_ref(&index.expr)?;
            let key = literal_index(&index.index)?;
            Some(push_seg(base, key, false))
        }
        syn::Expr::Paren(paren) => assign_ref(&paren.expr),
        syn::Expr::Group(group) => assign_ref(&group.expr),
        _ => None,
    }
}

fn push_seg(base: AssignRef, seg: String, structural: bool) -> AssignRef {
    match base {
        AssignRef::Whole => AssignRef::Path(AssignPath::root(seg)),
        AssignRef::Path(mut path) => {
            path.segs.push(if structural {
                PathSeg::Struct(seg)
            } else {
                PathSeg::Access(seg)
            });
            AssignRef::Path(path)
        }
    }
}

fn literal_index(expr: &syn::Expr) -> Option<String> {
    match expr {
        syn::Expr::Lit(lit) => match &lit.lit {
            syn::Lit::Str(s) => Some(s.value()),
            syn::Lit::Int(i) => Some(i.base10_digits().to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// Fold an expression to compile-time text when it is a literal or a `+`
/// chain of string literals, so the emitted template gains a static instead
/// of a dynamic position.
pub fn const_fold(expr: &syn::Expr) -> Option<String> {
    match expr {
        syn::Expr::Lit(lit) => match &lit.lit {
            syn::Lit::Str(s) => Some(s.value()),
            syn::Lit::Int(i) => Some(i.base10_digits().to_string()),
            syn::Lit::Float(f) => Some(f.base10_digits().to_string()),
            syn::Lit::Bool(b) => Some(b.value.to_string()),
            _ => None,
        },
        syn::Expr::Binary(binary) if matches!(binary.op, syn::BinOp::Add(_)) => {
            let left = fold_str(&binary.left)?;
            let right = fold_str(&binary.right)?;
            Some(left + &right)
        }
        syn::Expr::Paren(paren) => const_fold(&paren.expr),
        syn::Expr::Group(group) => const_fold(&group.expr),
        _ => None,
    }
}

/// String-literal fold: only chains whose every leaf is a string literal.
fn fold_str(expr: &syn::Expr) -> Option<String> {
    match expr {
        syn::Expr::Lit(lit) => match &lit.lit {
            syn::Lit::Str(s) => Some(s.value()),
            _ => None,
        },
        syn::Expr::Binary(binary) if matches!(binary.op, syn::BinOp::Add(_)) => {
            let left = fold_str(&binary.left)?;
            let right = fold_str(&binary.right)?;
            Some(left + &right)
        }
        syn::Expr::Paren(paren) => fold_str(&paren.expr),
        syn::Expr::Group(group) => fold_str(&group.expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(code: &str) -> ExprSource {
        ExprSource {
            code: code.to_string(),
            pos: Pos::new(1, 1),
        }
    }

    #[test]
    fn sugar_rewrites_outside_strings() {
        assert_eq!(rewrite_assign_sugar("@name"), "assigns.name");
        assert_eq!(
            rewrite_assign_sugar("@user.profile.name"),
            "assigns.user.profile.name"
        );
        assert_eq!(rewrite_assign_sugar(r#""@name""#), r#""@name""#);
        assert_eq!(rewrite_assign_sugar("a @ b"), "a @ b");
    }

    #[test]
    fn assign_ref_tracks_static_chains() {
        let expr = parse_expr(&src("@user.profile.name"), "t").unwrap();
        let AssignRef::Path(path) = assign_ref(&expr).unwrap() else {
            panic!("expected path");
        };
        assert_eq!(path.root, "user");
        assert_eq!(
            path.segs,
            vec![
                PathSeg::Struct("profile".into()),
                PathSeg::Struct("name".into())
            ]
        );
    }

    #[test]
    fn assign_ref_literal_index() {
        let expr = parse_expr(&src(r#"@user.settings["theme"]"#), "t").unwrap();
        let AssignRef::Path(path) = assign_ref(&expr).unwrap() else {
            panic!();
        };
        assert_eq!(path.segs[1], PathSeg::Access("theme".into()));
    }

    #[test]
    fn assign_ref_rejects_dynamic_index() {
        let expr = parse_expr(&src("@user.settings[key]"), "t").unwrap();
        assert_eq!(assign_ref(&expr), None);
    }

    #[test]
    fn bare_assigns_is_whole() {
        let expr = parse_expr(&src("assigns"), "t").unwrap();
        assert_eq!(assign_ref(&expr), Some(AssignRef::Whole));
    }

    #[test]
    fn generator_splits_on_top_level_arrow() {
        let gen = parse_generator(&src("p <- @points"), "t").unwrap().unwrap();
        assert_eq!(gen.pat_code, "p");
        assert_eq!(gen.expr_code, "@points");

        let gen = parse_generator(&src("(a, b) <- @pairs"), "t").unwrap().unwrap();
        assert_eq!(gen.pat_code, "(a, b)");

        assert!(parse_generator(&src("@points"), "t").unwrap().is_none());
    }

    #[test]
    fn const_fold_literals_and_concat() {
        let fold = |code: &str| const_fold(&parse_expr(&src(code), "t").unwrap());
        assert_eq!(fold(r#""hello""#), Some("hello".into()));
        assert_eq!(fold("42"), Some("42".into()));
        assert_eq!(fold("true"), Some("true".into()));
        assert_eq!(fold(r#""a" + "b" + "c""#), Some("abc".into()));
        assert_eq!(fold(r#""a" + @x"#), None);
        assert_eq!(fold("1 + 2"), None);
        assert_eq!(fold("@name"), None);
    }

    #[test]
    fn parse_failure_reports_template_position() {
        let err = parse_expr(
            &ExprSource {
                code: "a +".into(),
                pos: Pos::new(3, 10),
            },
            "page.html",
        )
        .unwrap_err();
        assert_eq!(err.file, "page.html");
        assert_eq!(err.pos.line, 3);
        assert!(err.description.contains("invalid expression"));
    }
}
