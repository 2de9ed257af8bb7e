//! HTML tokenizer for the tag/attribute/interpolation surface.
//!
//! Runs over the text fragments produced by the EEx scanner, one fragment at
//! a time, carrying its state across the expression fragments in between.
//! Tags, comments and doctypes must close within a single text fragment: an
//! EEx tag inside them is reported with guidance to use `{…}` instead.

use crate::eex::{self, BlockKind, Marker};
use crate::errors::ParseError;
use crate::source::{Cursor, Pos};

/// An opaque expression body plus the position of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprSource {
    pub code: String,
    pub pos: Pos,
}

/// An attribute value as written.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Bare attribute: `disabled`.
    None,
    /// Quoted literal, keeping the delimiter for verbatim re-emission.
    String { value: String, delimiter: char },
    /// Braced expression: `class={…}`.
    Expr(ExprSource),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub pos: Pos,
}

/// An entry in a tag's attribute list, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrEntry {
    Named(Attribute),
    /// Spread with no name: `<div {@opts}>`.
    Root(ExprSource),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text {
        text: String,
        pos: Pos,
        pos_end: Pos,
    },
    TagOpen {
        name: String,
        attrs: Vec<AttrEntry>,
        self_closing: bool,
        pos: Pos,
    },
    TagClose {
        name: String,
        pos: Pos,
    },
    /// `{expr}` in element content, or a `<%= expr %>` / `<% expr %>` leaf.
    BodyExpr {
        expr: ExprSource,
        marker: Marker,
    },
    BlockOpen {
        kind: BlockKind,
        head: ExprSource,
        marker: Marker,
    },
    ClauseElse {
        pos: Pos,
    },
    ClauseArm {
        code: ExprSource,
    },
    BlockEnd {
        pos: Pos,
    },
    CommentHtml {
        text: String,
        pos: Pos,
    },
    /// Expression-level comment; stripped by the analyzer.
    CommentExpr {
        text: String,
        pos: Pos,
    },
    Doctype {
        text: String,
        pos: Pos,
    },
}

/// Tokenize a scanned fragment sequence into one flat token stream.
pub fn run(
    parts: Vec<eex::Part>,
    file: &str,
    indentation: u32,
) -> Result<Vec<Token>, ParseError> {
    let mut tokenizer = Tokenizer::new(file, indentation);
    let last_text = parts
        .iter()
        .rposition(|part| matches!(part, eex::Part::Text { .. }));
    for (index, part) in parts.into_iter().enumerate() {
        match part {
            eex::Part::Text { text, pos } => {
                tokenizer.fragment(&text, pos, Some(index) == last_text)?;
            }
            eex::Part::Expr { code, marker, pos } => {
                tokenizer.tokens.push(Token::BodyExpr {
                    expr: ExprSource { code, pos },
                    marker,
                });
            }
            eex::Part::BlockOpen {
                kind,
                head,
                marker,
                pos,
            } => {
                tokenizer.tokens.push(Token::BlockOpen {
                    kind,
                    head: ExprSource { code: head, pos },
                    marker,
                });
            }
            eex::Part::ClauseElse { pos } => {
                tokenizer.tokens.push(Token::ClauseElse { pos });
            }
            eex::Part::ClauseArm { code, pos } => {
                tokenizer.tokens.push(Token::ClauseArm {
                    code: ExprSource { code, pos },
                });
            }
            eex::Part::BlockEnd { pos } => {
                tokenizer.tokens.push(Token::BlockEnd { pos });
            }
            eex::Part::Comment { text, pos } => {
                tokenizer.tokens.push(Token::CommentExpr { text, pos });
            }
        }
    }
    tokenizer.finalize()
}

struct Tokenizer<'a> {
    file: &'a str,
    indentation: u32,
    tokens: Vec<Token>,
    /// While set, `{` in element content is literal text: the named tag
    /// (with its nesting depth) opted out of curly interpolation.
    curly_disabled: Option<(String, usize)>,
}

impl<'a> Tokenizer<'a> {
    fn new(file: &'a str, indentation: u32) -> Self {
        Self {
            file,
            indentation,
            tokens: Vec::new(),
            curly_disabled: None,
        }
    }

    fn err(&self, pos: Pos, description: impl Into<String>) -> ParseError {
        ParseError::new(self.file, pos, description)
    }

    fn finalize(self) -> Result<Vec<Token>, ParseError> {
        Ok(self.tokens)
    }

    fn fragment(&mut self, text: &str, pos: Pos, is_last: bool) -> Result<(), ParseError> {
        let mut cursor = Cursor::new(text, pos, self.indentation);
        let mut run = String::new();
        let mut run_pos = cursor.pos();

        macro_rules! flush {
            () => {
                if !run.is_empty() {
                    self.tokens.push(Token::Text {
                        text: std::mem::take(&mut run),
                        pos: run_pos,
                        pos_end: cursor.pos(),
                    });
                }
            };
        }

        while let Some(ch) = cursor.peek() {
            if ch == '{' && self.curly_disabled.is_none() {
                flush!();
                let expr = self.braced_expr(&mut cursor, is_last)?;
                self.tokens.push(Token::BodyExpr {
                    expr,
                    marker: Marker::Output,
                });
                run_pos = cursor.pos();
            } else if cursor.starts_with("<!--") {
                flush!();
                self.comment(&mut cursor, is_last)?;
                run_pos = cursor.pos();
            } else if cursor.starts_with("<!") {
                flush!();
                self.doctype(&mut cursor, is_last)?;
                run_pos = cursor.pos();
            } else if cursor.starts_with("</") {
                flush!();
                self.tag_close(&mut cursor, is_last)?;
                run_pos = cursor.pos();
            } else if ch == '<' {
                flush!();
                self.tag_open(&mut cursor, is_last)?;
                run_pos = cursor.pos();
            } else {
                run.push(ch);
                cursor.bump();
            }
        }
        flush!();
        Ok(())
    }

    fn comment(&mut self, cursor: &mut Cursor, is_last: bool) -> Result<(), ParseError> {
        let pos = cursor.pos();
        cursor.bump_n(4);
        match cursor.take_until("-->") {
            Some(inner) => {
                self.tokens.push(Token::CommentHtml {
                    text: format!("<!--{inner}-->"),
                    pos,
                });
                Ok(())
            }
            None if is_last => Err(self.err(pos, "unterminated comment, expected a closing `-->`")),
            None => Err(self.err(
                pos,
                "EEx expressions are not supported inside HTML comments; \
                 close the comment before the expression",
            )),
        }
    }

    fn doctype(&mut self, cursor: &mut Cursor, is_last: bool) -> Result<(), ParseError> {
        let pos = cursor.pos();
        cursor.bump_n(2);
        match cursor.take_until(">") {
            Some(inner) => {
                self.tokens.push(Token::Doctype {
                    text: format!("<!{inner}>"),
                    pos,
                });
                Ok(())
            }
            None => {
                let _ = is_last;
                Err(self.err(pos, "unterminated doctype declaration, expected a closing `>`"))
            }
        }
    }

    fn tag_close(&mut self, cursor: &mut Cursor, is_last: bool) -> Result<(), ParseError> {
        let pos = cursor.pos();
        cursor.bump_n(2);
        let name = cursor.take_while(tag_name_char);
        if name.is_empty() {
            return Err(self.err(cursor.pos(), "expected tag name after `</`"));
        }
        cursor.skip_whitespace();
        match cursor.peek() {
            Some('>') => {
                cursor.bump();
            }
            Some(other) => {
                return Err(self.err(
                    cursor.pos(),
                    format!("expected closing `>` for `</{name}`, got `{other}`"),
                ))
            }
            None => {
                return Err(self.eof_in_tag(cursor.pos(), is_last, &format!("</{name}")));
            }
        }
        self.curly_close(&name);
        self.tokens.push(Token::TagClose { name, pos });
        Ok(())
    }

    fn tag_open(&mut self, cursor: &mut Cursor, is_last: bool) -> Result<(), ParseError> {
        let pos = cursor.pos();
        cursor.bump();
        let name = cursor.take_while(tag_name_char);
        if name.is_empty() {
            return Err(self.err(cursor.pos(), "expected tag name after `<`"));
        }

        let mut attrs = Vec::new();
        loop {
            cursor.skip_whitespace();
            match cursor.peek() {
                Some('>') => {
                    cursor.bump();
                    self.curly_open(&name, &attrs, false);
                    self.tokens.push(Token::TagOpen {
                        name,
                        attrs,
                        self_closing: false,
                        pos,
                    });
                    return Ok(());
                }
                Some('/') => {
                    cursor.bump();
                    if cursor.peek() == Some('>') {
                        cursor.bump();
                        self.tokens.push(Token::TagOpen {
                            name,
                            attrs,
                            self_closing: true,
                            pos,
                        });
                        return Ok(());
                    }
                    return Err(self.err(cursor.pos(), "expected `>` after `/` in tag"));
                }
                Some('{') => {
                    let expr = self.braced_expr(cursor, is_last)?;
                    attrs.push(AttrEntry::Root(expr));
                }
                Some(ch) if attr_name_char(ch) => {
                    let attr = self.attribute(cursor, is_last)?;
                    attrs.push(AttrEntry::Named(attr));
                }
                Some(other) => {
                    return Err(self.err(
                        cursor.pos(),
                        format!("unexpected character `{other}` inside tag `<{name}`"),
                    ));
                }
                None => {
                    return Err(self.eof_in_tag(cursor.pos(), is_last, &format!("<{name}")));
                }
            }
        }
    }

    fn attribute(&mut self, cursor: &mut Cursor, is_last: bool) -> Result<Attribute, ParseError> {
        let pos = cursor.pos();
        let name = cursor.take_while(attr_name_char);
        cursor.skip_whitespace();
        if cursor.peek() != Some('=') {
            return Ok(Attribute {
                name,
                value: AttrValue::None,
                pos,
            });
        }
        cursor.bump();
        cursor.skip_whitespace();
        let value = match cursor.peek() {
            Some(delimiter @ ('"' | '\'')) => {
                let open = cursor.pos();
                cursor.bump();
                let mut value = String::new();
                loop {
                    match cursor.bump() {
                        Some(ch) if ch == delimiter => break,
                        Some(ch) => value.push(ch),
                        None => {
                            let guidance = if is_last {
                                String::new()
                            } else {
                                "; EEx expressions are not supported inside attribute \
                                 values, interpolate with `{...}` instead"
                                    .to_string()
                            };
                            return Err(self.err(
                                open,
                                format!(
                                    "unterminated attribute value for `{name}`, expected a \
                                     closing `{delimiter}`{guidance}"
                                ),
                            ));
                        }
                    }
                }
                AttrValue::String { value, delimiter }
            }
            Some('{') => AttrValue::Expr(self.braced_expr(cursor, is_last)?),
            _ => {
                return Err(self.err(
                    cursor.pos(),
                    format!(
                        "invalid value for attribute `{name}`; expected a value between \
                         quotes or an expression between braces"
                    ),
                ));
            }
        };
        Ok(Attribute { name, value, pos })
    }

    /// Scan a `{…}` expression. Brace depth is tracked; braces inside string
    /// literals and the escapes `\{` / `\}` (copied without the backslash)
    /// do not count.
    fn braced_expr(&mut self, cursor: &mut Cursor, is_last: bool) -> Result<ExprSource, ParseError> {
        let open = cursor.pos();
        cursor.bump();
        let pos = cursor.pos();
        let mut code = String::new();
        let mut depth = 1usize;
        let mut in_string = false;
        loop {
            let Some(ch) = cursor.peek() else {
                let hint = if is_last {
                    String::new()
                } else {
                    "; EEx expressions cannot appear inside `{...}`".to_string()
                };
                return Err(self.err(
                    open,
                    format!("unterminated expression, expected a closing `}}`{hint}"),
                ));
            };
            match ch {
                '"' => {
                    in_string = !in_string;
                    code.push(ch);
                    cursor.bump();
                }
                '\\' if in_string => {
                    code.push(ch);
                    cursor.bump();
                    if let Some(escaped) = cursor.bump() {
                        code.push(escaped);
                    }
                }
                '\\' if matches!(cursor.peek_at(1), Some('{' | '}')) => {
                    cursor.bump();
                    if let Some(brace) = cursor.bump() {
                        code.push(brace);
                    }
                }
                '{' if !in_string => {
                    depth += 1;
                    code.push(ch);
                    cursor.bump();
                }
                '}' if !in_string => {
                    depth -= 1;
                    cursor.bump();
                    if depth == 0 {
                        return Ok(ExprSource { code, pos });
                    }
                    code.push(ch);
                }
                _ => {
                    code.push(ch);
                    cursor.bump();
                }
            }
        }
    }

    fn eof_in_tag(&self, pos: Pos, is_last: bool, context: &str) -> ParseError {
        if is_last {
            self.err(
                pos,
                format!("unexpected end of template inside `{context}`, expected a closing `>`"),
            )
        } else {
            self.err(
                pos,
                "EEx expressions are not supported inside tags; interpolate attribute \
                 values with `{...}` instead",
            )
        }
    }

    fn curly_open(&mut self, name: &str, attrs: &[AttrEntry], self_closing: bool) {
        if self_closing {
            return;
        }
        match &mut self.curly_disabled {
            Some((disabled, depth)) => {
                if disabled == name {
                    *depth += 1;
                }
            }
            None => {
                let opts_out = matches!(name, "script" | "style")
                    || attrs.iter().any(|attr| {
                        matches!(attr, AttrEntry::Named(a) if a.name == "phx-no-curly-interpolation")
                    });
                if opts_out {
                    self.curly_disabled = Some((name.to_string(), 1));
                }
            }
        }
    }

    fn curly_close(&mut self, name: &str) {
        if let Some((disabled, depth)) = &mut self.curly_disabled {
            if disabled == name {
                *depth -= 1;
                if *depth == 0 {
                    self.curly_disabled = None;
                }
            }
        }
    }
}

fn tag_name_char(ch: char) -> bool {
    !ch.is_whitespace() && !matches!(ch, '/' | '>' | '=')
}

fn attr_name_char(ch: char) -> bool {
    !ch.is_whitespace() && !matches!(ch, '/' | '>' | '=' | '{' | '}' | '"' | '\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Vec<Token> {
        let parts = eex::scan(source, "test.html", Pos::new(1, 1), 0).unwrap();
        run(parts, "test.html", 0).unwrap()
    }

    fn tokenize_err(source: &str) -> ParseError {
        let parts = eex::scan(source, "test.html", Pos::new(1, 1), 0).unwrap();
        run(parts, "test.html", 0).unwrap_err()
    }

    #[test]
    fn plain_tag_with_attributes() {
        let tokens = tokenize(r#"<div class="box" id='main' hidden>x</div>"#);
        let Token::TagOpen { name, attrs, self_closing, pos } = &tokens[0] else {
            panic!("expected TagOpen, got {:?}", tokens[0]);
        };
        assert_eq!(name, "div");
        assert!(!self_closing);
        assert_eq!(*pos, Pos::new(1, 1));
        assert_eq!(attrs.len(), 3);
        assert!(matches!(
            &attrs[0],
            AttrEntry::Named(Attribute { name, value: AttrValue::String { value, delimiter: '"' }, .. })
                if name == "class" && value == "box"
        ));
        assert!(matches!(
            &attrs[1],
            AttrEntry::Named(Attribute { value: AttrValue::String { delimiter: '\'', .. }, .. })
        ));
        assert!(matches!(
            &attrs[2],
            AttrEntry::Named(Attribute { name, value: AttrValue::None, .. }) if name == "hidden"
        ));
        assert!(matches!(&tokens[1], Token::Text { text, .. } if text == "x"));
        assert!(matches!(&tokens[2], Token::TagClose { name, .. } if name == "div"));
    }

    #[test]
    fn attributes_arrive_in_source_order() {
        let tokens = tokenize(r#"<input a="1" b="2" c="3">"#);
        let Token::TagOpen { attrs, .. } = &tokens[0] else {
            panic!();
        };
        let names: Vec<&str> = attrs
            .iter()
            .map(|attr| match attr {
                AttrEntry::Named(a) => a.name.as_str(),
                AttrEntry::Root(_) => "{}",
            })
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn braced_interpolation_in_content() {
        let tokens = tokenize("a{@name}b");
        assert!(matches!(&tokens[0], Token::Text { text, .. } if text == "a"));
        assert!(matches!(
            &tokens[1],
            Token::BodyExpr { expr, marker: Marker::Output } if expr.code == "@name"
        ));
        assert!(matches!(&tokens[2], Token::Text { text, .. } if text == "b"));
    }

    #[test]
    fn brace_depth_and_escapes() {
        let tokens = tokenize(r#"{ map(|x| { x + 1 }) }"#);
        assert!(matches!(
            &tokens[0],
            Token::BodyExpr { expr, .. } if expr.code == " map(|x| { x + 1 }) "
        ));

        let tokens = tokenize(r#"{ \{ }"#);
        assert!(matches!(&tokens[0], Token::BodyExpr { expr, .. } if expr.code == " { "));

        let tokens = tokenize(r#"{ "}" }"#);
        assert!(matches!(&tokens[0], Token::BodyExpr { expr, .. } if expr.code == " \"}\" "));
    }

    #[test]
    fn root_attribute_spread() {
        let tokens = tokenize("<div {@opts}>x</div>");
        let Token::TagOpen { attrs, .. } = &tokens[0] else {
            panic!();
        };
        assert!(matches!(&attrs[0], AttrEntry::Root(expr) if expr.code == "@opts"));
    }

    #[test]
    fn attribute_expression_value() {
        let tokens = tokenize(r#"<a href={@url} download>x</a>"#);
        let Token::TagOpen { attrs, .. } = &tokens[0] else {
            panic!();
        };
        assert!(matches!(
            &attrs[0],
            AttrEntry::Named(Attribute { name, value: AttrValue::Expr(expr), .. })
                if name == "href" && expr.code == "@url"
        ));
    }

    #[test]
    fn comment_and_doctype_captured_verbatim() {
        let tokens = tokenize("<!doctype html><!-- a < b -->x");
        assert!(matches!(&tokens[0], Token::Doctype { text, .. } if text == "<!doctype html>"));
        assert!(matches!(
            &tokens[1],
            Token::CommentHtml { text, .. } if text == "<!-- a < b -->"
        ));
    }

    #[test]
    fn script_disables_curly_interpolation() {
        let tokens = tokenize("<script>if (a) { b() }</script>{@x}");
        assert!(matches!(
            &tokens[1],
            Token::Text { text, .. } if text == "if (a) { b() }"
        ));
        assert!(matches!(&tokens[3], Token::BodyExpr { expr, .. } if expr.code == "@x"));
    }

    #[test]
    fn phx_no_curly_interpolation_opts_out() {
        let tokens = tokenize("<code phx-no-curly-interpolation>{literal}</code>");
        assert!(matches!(
            &tokens[1],
            Token::Text { text, .. } if text == "{literal}"
        ));
    }

    #[test]
    fn eex_leaves_become_body_exprs() {
        let tokens = tokenize("Hello <%= @name %>!");
        assert!(matches!(
            &tokens[1],
            Token::BodyExpr { expr, marker: Marker::Output } if expr.code == "@name"
        ));
        let tokens = tokenize("<% seen = @x %>");
        assert!(matches!(&tokens[0], Token::BodyExpr { marker: Marker::Silent, .. }));
    }

    /// Rebuild source text from tokens; only valid for expression-free
    /// templates, where every token carries its bytes verbatim.
    fn reconstruct(tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            match token {
                Token::Text { text, .. }
                | Token::CommentHtml { text, .. }
                | Token::Doctype { text, .. } => out.push_str(text),
                Token::TagOpen {
                    name,
                    attrs,
                    self_closing,
                    ..
                } => {
                    out.push('<');
                    out.push_str(name);
                    for attr in attrs {
                        let AttrEntry::Named(attr) = attr else {
                            panic!("expression-free template");
                        };
                        out.push(' ');
                        out.push_str(&attr.name);
                        match &attr.value {
                            AttrValue::None => {}
                            AttrValue::String { value, delimiter } => {
                                out.push('=');
                                out.push(*delimiter);
                                out.push_str(value);
                                out.push(*delimiter);
                            }
                            AttrValue::Expr(_) => panic!("expression-free template"),
                        }
                    }
                    out.push_str(if *self_closing { "/>" } else { ">" });
                }
                Token::TagClose { name, .. } => {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
                other => panic!("expression-free template, got {other:?}"),
            }
        }
        out
    }

    #[test]
    fn expression_free_templates_round_trip() {
        let source =
            "<!doctype html><div class=\"a\" id='b' hidden><br/><!-- note -->text</div>";
        assert_eq!(reconstruct(&tokenize(source)), source);
    }

    #[test]
    fn empty_tag_name_fails() {
        let err = tokenize_err("<>");
        assert!(err.description.contains("expected tag name"));
        let err = tokenize_err("</>");
        assert!(err.description.contains("expected tag name"));
    }

    #[test]
    fn unterminated_comment_fails_with_position() {
        let err = tokenize_err("a\n<!-- oops");
        assert!(err.description.contains("unterminated comment"));
        assert_eq!(err.pos, Pos::new(2, 1));
    }

    #[test]
    fn unterminated_attribute_value_fails() {
        let err = tokenize_err(r#"<div class="open>x</div>"#);
        assert!(err.description.contains("unterminated attribute value"));
    }

    #[test]
    fn eex_inside_attribute_value_gives_guidance() {
        let err = tokenize_err(r#"<div class="a <%= @b %> c">x</div>"#);
        assert!(err.description.contains("interpolate with `{...}`"), "{}", err.description);
    }

    #[test]
    fn eex_inside_tag_gives_guidance() {
        let err = tokenize_err("<div <%= @attrs %>>x</div>");
        assert!(err.description.contains("not supported inside tags"));
    }

    #[test]
    fn missing_closing_angle_fails() {
        let err = tokenize_err("<div class={@c}");
        assert!(err.description.contains("unexpected end of template"));
    }

    #[test]
    fn unquoted_attribute_value_fails() {
        let err = tokenize_err("<div class=box>x</div>");
        assert!(err.description.contains("between quotes"));
    }

    #[test]
    fn unterminated_braced_expression_points_at_the_brace() {
        let err = tokenize_err("ab{@x");
        assert!(err.description.contains("unterminated expression"));
        assert_eq!(err.pos, Pos::new(1, 3));
    }
}
