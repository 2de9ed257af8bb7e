//! Structural analysis: token stream to node tree.
//!
//! Open and close tags are matched on a LIFO stack; EEx blocks form their
//! own frames and must nest properly with tags. Classification of raw tag
//! names is delegated to the [`TagHandler`] so the analyzer itself carries
//! no HTML profile.

use tracing::warn;

use crate::eex::{BlockKind, Marker};
use crate::errors::ParseError;
use crate::source::Pos;
use crate::tag_handler::{TagHandler, TagKind};
use crate::tokenizer::{AttrEntry, AttrValue, ExprSource, Token};

/// Slot name reserved for a component's default body.
pub const INNER_BLOCK: &str = "inner_block";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text {
        text: String,
        pos: Pos,
    },
    /// A leaf interpolation. `Marker::Silent` means the expression is
    /// evaluated for its bindings only and produces no output.
    RawExpr {
        expr: ExprSource,
        marker: Marker,
    },
    Tag {
        name: String,
        attrs: Vec<AttrEntry>,
        special: SpecialAttrs,
        children: Vec<Node>,
        pos: Pos,
        close_pos: Option<Pos>,
    },
    VoidTag {
        name: String,
        attrs: Vec<AttrEntry>,
        special: SpecialAttrs,
        pos: Pos,
    },
    LocalComponent {
        name: String,
        attrs: Vec<AttrEntry>,
        special: SpecialAttrs,
        slots: Vec<Node>,
        children: Vec<Node>,
        pos: Pos,
        close_pos: Option<Pos>,
    },
    RemoteComponent {
        module_path: Vec<String>,
        fn_name: String,
        attrs: Vec<AttrEntry>,
        special: SpecialAttrs,
        slots: Vec<Node>,
        children: Vec<Node>,
        pos: Pos,
        close_pos: Option<Pos>,
    },
    Slot {
        name: String,
        attrs: Vec<AttrEntry>,
        special: SpecialAttrs,
        children: Vec<Node>,
        pos: Pos,
        close_pos: Option<Pos>,
    },
    Block(EexBlock),
}

/// Compiler-level control flow: `if` / `unless` / `case` / `cond` / `for`
/// with a `do` block.
#[derive(Debug, Clone, PartialEq)]
pub struct EexBlock {
    pub kind: BlockKind,
    pub head: ExprSource,
    pub marker: Marker,
    pub clauses: Vec<Clause>,
    pub pos: Pos,
    pub close_pos: Pos,
}

/// One body of a block. `pattern` is `None` for the implicit first clause
/// of `if`/`unless`/`for` and for `else`; `case`/`cond` arms carry their
/// pattern (or condition) source.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub pattern: Option<ExprSource>,
    pub body: Vec<Node>,
    pub pos: Pos,
}

/// The four special directives, extracted from the attribute list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialAttrs {
    pub r#if: Option<ExprSource>,
    pub r#for: Option<ExprSource>,
    pub r#let: Option<ExprSource>,
    pub key: Option<ExprSource>,
}

impl Node {
    pub fn pos(&self) -> Pos {
        match self {
            Node::Text { pos, .. }
            | Node::Tag { pos, .. }
            | Node::VoidTag { pos, .. }
            | Node::LocalComponent { pos, .. }
            | Node::RemoteComponent { pos, .. }
            | Node::Slot { pos, .. } => *pos,
            Node::RawExpr { expr, .. } => expr.pos,
            Node::Block(block) => block.pos,
        }
    }

    /// Whitespace-only literal text, ignorable for root detection and slot
    /// grouping.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text { text, .. } if text.trim().is_empty())
    }
}

pub fn build(
    tokens: Vec<Token>,
    file: &str,
    handler: &dyn TagHandler,
) -> Result<Vec<Node>, ParseError> {
    let mut builder = Builder {
        file,
        handler,
        frames: Vec::new(),
        root: Vec::new(),
    };
    for token in tokens {
        builder.token(token)?;
    }
    builder.finish()
}

enum Frame {
    Element {
        raw_name: String,
        kind: TagKind,
        attrs: Vec<AttrEntry>,
        pos: Pos,
        children: Vec<Node>,
    },
    Block {
        kind: BlockKind,
        head: ExprSource,
        marker: Marker,
        pos: Pos,
        clauses: Vec<Clause>,
        current_pattern: Option<ExprSource>,
        current_pos: Pos,
        current_body: Vec<Node>,
        saw_else: bool,
    },
}

struct Builder<'a> {
    file: &'a str,
    handler: &'a dyn TagHandler,
    frames: Vec<Frame>,
    root: Vec<Node>,
}

impl<'a> Builder<'a> {
    fn err(&self, pos: Pos, description: impl Into<String>) -> ParseError {
        ParseError::new(self.file, pos, description)
    }

    fn push_node(&mut self, node: Node) {
        match self.frames.last_mut() {
            Some(Frame::Element { children, .. }) => children.push(node),
            Some(Frame::Block { current_body, .. }) => current_body.push(node),
            None => self.root.push(node),
        }
    }

    fn token(&mut self, token: Token) -> Result<(), ParseError> {
        match token {
            Token::Text { text, pos, .. } => {
                self.push_node(Node::Text { text, pos });
                Ok(())
            }
            Token::CommentHtml { text, pos } => {
                // HTML comments ship with the output as literal text
                self.push_node(Node::Text { text, pos });
                Ok(())
            }
            Token::Doctype { text, pos } => {
                self.push_node(Node::Text { text, pos });
                Ok(())
            }
            Token::CommentExpr { .. } => Ok(()),
            Token::BodyExpr { expr, marker } => {
                self.push_node(Node::RawExpr { expr, marker });
                Ok(())
            }
            Token::TagOpen {
                name,
                attrs,
                self_closing,
                pos,
            } => self.tag_open(name, attrs, self_closing, pos),
            Token::TagClose { name, pos } => self.tag_close(name, pos),
            Token::BlockOpen { kind, head, marker } => {
                let pos = head.pos;
                self.frames.push(Frame::Block {
                    kind,
                    head,
                    marker,
                    pos,
                    clauses: Vec::new(),
                    current_pattern: None,
                    current_pos: pos,
                    current_body: Vec::new(),
                    saw_else: false,
                });
                Ok(())
            }
            Token::ClauseElse { pos } => self.clause_else(pos),
            Token::ClauseArm { code } => self.clause_arm(code),
            Token::BlockEnd { pos } => self.block_end(pos),
        }
    }

    fn tag_open(
        &mut self,
        name: String,
        attrs: Vec<AttrEntry>,
        self_closing: bool,
        pos: Pos,
    ) -> Result<(), ParseError> {
        let kind = self.handler.classify(&name);
        let attrs = self.handler.handle_attributes(&name, attrs);

        if kind == TagKind::Slot {
            let in_component = matches!(
                self.frames.last(),
                Some(Frame::Element {
                    kind: TagKind::LocalComponent | TagKind::RemoteComponent,
                    ..
                })
            );
            if !in_component {
                return Err(self.err(
                    pos,
                    format!(
                        "invalid slot entry <{name}>: slots can only be direct \
                         children of a component"
                    ),
                ));
            }
            if &name[1..] == INNER_BLOCK {
                return Err(self.err(pos, "the slot name `inner_block` is reserved"));
            }
        }

        if kind == TagKind::VoidTag {
            // `<br>` and `<br/>` are the same element; neither pushes
            let node = self.element_node(&name, kind, attrs, pos, None)?;
            self.push_node(node);
            return Ok(());
        }
        if self_closing {
            let node = self.element_node(&name, kind, attrs, pos, None)?;
            self.push_node(node);
            return Ok(());
        }
        self.frames.push(Frame::Element {
            raw_name: name,
            kind,
            attrs,
            pos,
            children: Vec::new(),
        });
        Ok(())
    }

    fn tag_close(&mut self, name: String, pos: Pos) -> Result<(), ParseError> {
        match self.frames.last() {
            Some(Frame::Element { raw_name, .. }) if *raw_name == name => {
                let Some(Frame::Element {
                    raw_name,
                    kind,
                    attrs,
                    pos: open_pos,
                    children,
                }) = self.frames.pop()
                else {
                    unreachable!()
                };
                let node =
                    self.element_node_with_children(&raw_name, kind, attrs, open_pos, children, Some(pos))?;
                self.push_node(node);
                Ok(())
            }
            Some(Frame::Element {
                raw_name,
                pos: open_pos,
                ..
            }) => Err(self.err(
                pos,
                format!(
                    "unmatched closing tag. Expected </{raw_name}> for <{raw_name}> \
                     at line {}, got </{name}>",
                    open_pos.line
                ),
            )),
            Some(Frame::Block { kind, pos: open_pos, .. }) => Err(self.err(
                pos,
                format!(
                    "unexpected closing tag </{name}>: the `{}` block started at \
                     line {} must be closed with <% end %> first",
                    kind.keyword(),
                    open_pos.line
                ),
            )),
            None => {
                if self.handler.classify(&name) == TagKind::VoidTag {
                    Err(self.err(
                        pos,
                        format!("void element <{name}> cannot have a closing tag"),
                    ))
                } else {
                    Err(self.err(pos, format!("missing opening tag for </{name}>")))
                }
            }
        }
    }

    fn clause_else(&mut self, pos: Pos) -> Result<(), ParseError> {
        enum Outcome {
            Ok,
            DuplicateElse,
            WrongKind(BlockKind),
            NoEnclosing,
        }

        let outcome = match self.frames.last_mut() {
            Some(Frame::Block {
                kind: BlockKind::If | BlockKind::Unless,
                clauses,
                current_pattern,
                current_pos,
                current_body,
                saw_else,
                ..
            }) => {
                if *saw_else {
                    Outcome::DuplicateElse
                } else {
                    clauses.push(Clause {
                        pattern: current_pattern.take(),
                        body: std::mem::take(current_body),
                        pos: *current_pos,
                    });
                    *current_pos = pos;
                    *saw_else = true;
                    Outcome::Ok
                }
            }
            Some(Frame::Block { kind, .. }) => Outcome::WrongKind(*kind),
            _ => Outcome::NoEnclosing,
        };

        match outcome {
            Outcome::Ok => Ok(()),
            Outcome::DuplicateElse => Err(self.err(pos, "duplicate <% else %> clause")),
            Outcome::WrongKind(kind) => Err(self.err(
                pos,
                format!("<% else %> is not valid in a `{}` block", kind.keyword()),
            )),
            Outcome::NoEnclosing => {
                Err(self.err(pos, "<% else %> without an enclosing <% if %> block"))
            }
        }
    }

    fn clause_arm(&mut self, code: ExprSource) -> Result<(), ParseError> {
        let pos = code.pos;
        match self.frames.last_mut() {
            Some(Frame::Block {
                kind: BlockKind::Case | BlockKind::Cond,
                clauses,
                current_pattern,
                current_pos,
                current_body,
                ..
            }) => {
                if current_pattern.is_none() {
                    // content before the first clause must be blank
                    if current_body.iter().any(|n| !n.is_blank_text()) {
                        return Err(self.err(
                            pos,
                            "unexpected content before the first `->` clause",
                        ));
                    }
                    current_body.clear();
                } else {
                    clauses.push(Clause {
                        pattern: current_pattern.take(),
                        body: std::mem::take(current_body),
                        pos: *current_pos,
                    });
                }
                *current_pattern = Some(code);
                *current_pos = pos;
                Ok(())
            }
            _ => Err(self.err(
                pos,
                "a `->` clause is only valid inside a `case` or `cond` block",
            )),
        }
    }

    fn block_end(&mut self, pos: Pos) -> Result<(), ParseError> {
        match self.frames.last() {
            Some(Frame::Block { .. }) => {}
            Some(Frame::Element { raw_name, pos: open_pos, .. }) => {
                return Err(self.err(
                    pos,
                    format!(
                        "unexpected <% end %>: the tag <{raw_name}> at line {} must \
                         be closed first",
                        open_pos.line
                    ),
                ));
            }
            None => return Err(self.err(pos, "unexpected <% end %> with no open block")),
        }
        let Some(Frame::Block {
            kind,
            head,
            marker,
            pos: open_pos,
            mut clauses,
            current_pattern,
            current_pos,
            current_body,
            ..
        }) = self.frames.pop()
        else {
            unreachable!()
        };

        match kind {
            BlockKind::Case | BlockKind::Cond if current_pattern.is_none() => {
                if current_body.iter().any(|n| !n.is_blank_text()) || clauses.is_empty() {
                    return Err(self.err(
                        open_pos,
                        format!(
                            "a `{}` block expects at least one `->` clause",
                            kind.keyword()
                        ),
                    ));
                }
            }
            _ => {
                clauses.push(Clause {
                    pattern: current_pattern,
                    body: current_body,
                    pos: current_pos,
                });
            }
        }

        self.push_node(Node::Block(EexBlock {
            kind,
            head,
            marker,
            clauses,
            pos: open_pos,
            close_pos: pos,
        }));
        Ok(())
    }

    fn element_node(
        &self,
        raw_name: &str,
        kind: TagKind,
        attrs: Vec<AttrEntry>,
        pos: Pos,
        close_pos: Option<Pos>,
    ) -> Result<Node, ParseError> {
        self.element_node_with_children(raw_name, kind, attrs, pos, Vec::new(), close_pos)
    }

    fn element_node_with_children(
        &self,
        raw_name: &str,
        kind: TagKind,
        attrs: Vec<AttrEntry>,
        pos: Pos,
        children: Vec<Node>,
        close_pos: Option<Pos>,
    ) -> Result<Node, ParseError> {
        let is_component = matches!(kind, TagKind::LocalComponent | TagKind::RemoteComponent);
        let (attrs, special) =
            self.extract_special(attrs, pos, is_component || kind == TagKind::Slot)?;
        self.validate_attrs(raw_name, &attrs, pos)?;

        match kind {
            TagKind::Tag => Ok(Node::Tag {
                name: raw_name.to_string(),
                attrs,
                special,
                children,
                pos,
                close_pos,
            }),
            TagKind::VoidTag => Ok(Node::VoidTag {
                name: raw_name.to_string(),
                attrs,
                special,
                pos,
            }),
            TagKind::LocalComponent => {
                let name = raw_name[1..].to_string();
                if name.is_empty() {
                    return Err(self.err(pos, "expected a component name after `.`"));
                }
                let (slots, children) = partition_slots(children);
                Ok(Node::LocalComponent {
                    name,
                    attrs,
                    special,
                    slots,
                    children,
                    pos,
                    close_pos,
                })
            }
            TagKind::RemoteComponent => {
                let segments: Vec<&str> = raw_name.split('.').collect();
                let (fn_name, module_path) = match segments.split_last() {
                    Some((last, path))
                        if !path.is_empty()
                            && last.chars().next().is_some_and(|c| c.is_ascii_lowercase()) =>
                    {
                        (last.to_string(), path.iter().map(|s| s.to_string()).collect())
                    }
                    _ => {
                        return Err(self.err(
                            pos,
                            format!(
                                "invalid remote component <{raw_name}>: expected a module \
                                 path followed by a lowercase function name, like \
                                 <Catalog.Card.entry>"
                            ),
                        ));
                    }
                };
                let (slots, children) = partition_slots(children);
                Ok(Node::RemoteComponent {
                    module_path,
                    fn_name,
                    attrs,
                    special,
                    slots,
                    children,
                    pos,
                    close_pos,
                })
            }
            TagKind::Slot => Ok(Node::Slot {
                name: raw_name[1..].to_string(),
                attrs,
                special,
                children,
                pos,
                close_pos,
            }),
        }
    }

    /// Pull the four special directives out of the attribute list.
    fn extract_special(
        &self,
        attrs: Vec<AttrEntry>,
        pos: Pos,
        lets_allowed: bool,
    ) -> Result<(Vec<AttrEntry>, SpecialAttrs), ParseError> {
        let mut special = SpecialAttrs::default();
        let mut rest = Vec::with_capacity(attrs.len());
        for entry in attrs {
            let AttrEntry::Named(attr) = entry else {
                rest.push(entry);
                continue;
            };
            let slot = match attr.name.as_str() {
                ":if" => Some(&mut special.r#if),
                ":for" => Some(&mut special.r#for),
                ":let" => Some(&mut special.r#let),
                ":key" => Some(&mut special.key),
                _ => None,
            };
            let Some(slot) = slot else {
                rest.push(AttrEntry::Named(attr));
                continue;
            };
            if slot.is_some() {
                return Err(self.err(
                    attr.pos,
                    format!("cannot define multiple `{}` attributes", attr.name),
                ));
            }
            let AttrValue::Expr(expr) = attr.value else {
                return Err(self.err(
                    attr.pos,
                    format!("`{}` must be an expression between {{...}}", attr.name),
                ));
            };
            if attr.name == ":let" && !lets_allowed {
                return Err(self.err(
                    attr.pos,
                    "`:let` is only supported on components and slots",
                ));
            }
            *slot = Some(expr);
        }

        if special.key.is_some() && special.r#for.is_none() {
            return Err(self.err(pos, "`:key` requires a `:for` generator on the same tag"));
        }
        if let Some(generator) = &special.r#for {
            match crate::expr::parse_generator(generator, self.file)? {
                Some(_) => {}
                None => {
                    return Err(self.err(
                        generator.pos,
                        "`:for` expects a generator, like `item <- @items`",
                    ));
                }
            }
        }
        if let Some(let_pat) = &special.r#let {
            crate::expr::parse_pattern(let_pat, self.file)?;
        }

        Ok((rest, special))
    }

    fn validate_attrs(
        &self,
        raw_name: &str,
        attrs: &[AttrEntry],
        pos: Pos,
    ) -> Result<(), ParseError> {
        let named = |name: &str| {
            attrs.iter().find_map(|entry| match entry {
                AttrEntry::Named(attr) if attr.name == name => Some(attr),
                _ => None,
            })
        };
        let has_root = attrs.iter().any(|e| matches!(e, AttrEntry::Root(_)));
        let has_id = named("id").is_some() || has_root;

        for requires_id in ["phx-update", "phx-hook"] {
            if named(requires_id).is_some() && !has_id {
                return Err(self.err(
                    pos,
                    format!(
                        "attribute \"{requires_id}\" requires the \"id\" attribute to be set"
                    ),
                ));
            }
        }

        if let Some(update) = named("phx-update") {
            if let AttrValue::String { value, .. } = &update.value {
                match value.as_str() {
                    "ignore" | "stream" | "replace" => {}
                    "append" | "prepend" => {
                        warn!(
                            file = self.file,
                            line = update.pos.line,
                            "phx-update=\"{value}\" is deprecated, use streams instead"
                        );
                    }
                    other => {
                        return Err(self.err(
                            update.pos,
                            format!(
                                "invalid value for phx-update: expected one of \
                                 ignore/stream/replace, got: {other}"
                            ),
                        ));
                    }
                }
            }
        }

        if raw_name == "input" {
            if let Some(name_attr) = named("name") {
                if matches!(&name_attr.value, AttrValue::String { value, .. } if value == "id") {
                    warn!(
                        file = self.file,
                        line = name_attr.pos.line,
                        "setting the \"name\" attribute to \"id\" on an input will \
                         override the form container id and break change patching"
                    );
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Node>, ParseError> {
        if let Some(frame) = self.frames.pop() {
            return Err(match frame {
                Frame::Element { raw_name, pos, .. } => self.err(
                    pos,
                    format!("end of template reached without closing tag </{raw_name}>"),
                ),
                Frame::Block { kind, pos, .. } => self.err(
                    pos,
                    format!(
                        "missing <% end %> for the `{}` block",
                        kind.keyword()
                    ),
                ),
            });
        }
        Ok(self.root)
    }
}

fn partition_slots(children: Vec<Node>) -> (Vec<Node>, Vec<Node>) {
    let mut slots = Vec::new();
    let mut rest = Vec::new();
    for child in children {
        match child {
            node @ Node::Slot { .. } => slots.push(node),
            other => rest.push(other),
        }
    }
    (slots, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_handler::HtmlTagHandler;
    use crate::{eex, tokenizer};

    fn parse(source: &str) -> Result<Vec<Node>, ParseError> {
        let parts = eex::scan(source, "test.html", Pos::new(1, 1), 0)?;
        let tokens = tokenizer::run(parts, "test.html", 0)?;
        build(tokens, "test.html", &HtmlTagHandler)
    }

    fn parse_ok(source: &str) -> Vec<Node> {
        parse(source).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        parse(source).unwrap_err()
    }

    #[test]
    fn nested_tags_build_a_tree() {
        let nodes = parse_ok("<div><span>x</span></div>");
        let Node::Tag { name, children, close_pos, .. } = &nodes[0] else {
            panic!();
        };
        assert_eq!(name, "div");
        assert_eq!(close_pos.unwrap(), Pos::new(1, 20));
        assert!(matches!(&children[0], Node::Tag { name, .. } if name == "span"));
    }

    #[test]
    fn void_tags_never_push() {
        let nodes = parse_ok("<br><br/><input name=\"q\">");
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| matches!(n, Node::VoidTag { .. })));
    }

    #[test]
    fn void_close_is_an_error() {
        let err = parse_err("<br></br>");
        assert!(err.description.contains("cannot have a closing tag"));
    }

    #[test]
    fn mismatched_close_mentions_both_tags() {
        let err = parse_err("<div>\n<p>x</div>");
        assert!(err.description.contains("</p>"), "{}", err.description);
        assert!(err.description.contains("line 2"));
        assert!(err.description.contains("</div>"));
    }

    #[test]
    fn stray_close_reports_missing_opening() {
        let err = parse_err("x</div>");
        assert!(err.description.contains("missing opening tag for </div>"));
        assert_eq!(err.pos, Pos::new(1, 2));
    }

    #[test]
    fn unclosed_tag_reported_at_open() {
        let err = parse_err("<div><p>x</p>");
        assert!(err.description.contains("</div>"));
        assert_eq!(err.pos, Pos::new(1, 1));
    }

    #[test]
    fn components_split_slots_from_children() {
        let nodes = parse_ok("<.card title={@t}><:header>h</:header>body</.card>");
        let Node::LocalComponent { name, slots, children, .. } = &nodes[0] else {
            panic!("got {:?}", nodes[0]);
        };
        assert_eq!(name, "card");
        assert_eq!(slots.len(), 1);
        assert!(matches!(&slots[0], Node::Slot { name, .. } if name == "header"));
        assert!(matches!(&children[0], Node::Text { text, .. } if text == "body"));
    }

    #[test]
    fn remote_component_path_splits() {
        let nodes = parse_ok("<Catalog.Card.entry id=\"1\"/>");
        let Node::RemoteComponent { module_path, fn_name, .. } = &nodes[0] else {
            panic!();
        };
        assert_eq!(module_path, &["Catalog", "Card"]);
        assert_eq!(fn_name, "entry");

        let err = parse_err("<Catalog/>");
        assert!(err.description.contains("lowercase function name"));
    }

    #[test]
    fn slot_outside_component_fails() {
        let err = parse_err("<div><:header>x</:header></div>");
        assert!(err.description.contains("direct children of a component"));
        let err = parse_err("<:header>x</:header>");
        assert!(err.description.contains("direct children of a component"));
    }

    #[test]
    fn inner_block_slot_name_is_reserved() {
        let err = parse_err("<.card><:inner_block>x</:inner_block></.card>");
        assert!(err.description.contains("reserved"));
    }

    #[test]
    fn if_block_with_else() {
        let nodes = parse_ok("<%= if @flag do %>a<% else %>b<% end %>");
        let Node::Block(block) = &nodes[0] else { panic!() };
        assert_eq!(block.kind, BlockKind::If);
        assert_eq!(block.clauses.len(), 2);
        assert!(matches!(&block.clauses[0].body[0], Node::Text { text, .. } if text == "a"));
        assert!(matches!(&block.clauses[1].body[0], Node::Text { text, .. } if text == "b"));
    }

    #[test]
    fn case_block_arms() {
        let nodes = parse_ok("<%= case @n do %> <% 1 -> %>one<% _ -> %>other<% end %>");
        let Node::Block(block) = &nodes[0] else { panic!() };
        assert_eq!(block.clauses.len(), 2);
        assert_eq!(block.clauses[0].pattern.as_ref().unwrap().code, "1");
        assert_eq!(block.clauses[1].pattern.as_ref().unwrap().code, "_");
    }

    #[test]
    fn case_requires_clauses() {
        let err = parse_err("<%= case @n do %>loose<% end %>");
        assert!(err.description.contains("at least one"));
        let err = parse_err("<%= case @n do %>loose<% 1 -> %>one<% end %>");
        assert!(err.description.contains("before the first"));
    }

    #[test]
    fn block_and_tag_nesting_is_enforced() {
        let err = parse_err("<%= if @x do %><div><% end %></div>");
        assert!(err.description.contains("must be closed first"));
        let err = parse_err("<div><%= if @x do %>y</div><% end %>");
        assert!(err.description.contains("block started at line 1"));
    }

    #[test]
    fn dangling_clauses_fail() {
        assert!(parse_err("<% else %>").description.contains("without an enclosing"));
        assert!(parse_err("<% end %>").description.contains("no open block"));
        assert!(parse_err("<% x -> %>").description.contains("case"));
        assert!(parse_err("<%= for a <- @x do %>b<% else %>c<% end %>")
            .description
            .contains("not valid in a `for`"));
    }

    #[test]
    fn missing_end_is_reported_at_the_block() {
        let err = parse_err("<%= if @x do %>a");
        assert!(err.description.contains("missing <% end %>"));
    }

    #[test]
    fn special_attrs_are_extracted() {
        let nodes = parse_ok("<div :if={@show} :for={x <- @xs} :key={x}>v</div>");
        let Node::Tag { attrs, special, .. } = &nodes[0] else { panic!() };
        assert!(attrs.is_empty());
        assert!(special.r#if.is_some());
        assert!(special.r#for.is_some());
        assert!(special.key.is_some());
    }

    #[test]
    fn duplicate_special_attr_fails() {
        let err = parse_err("<div :if={@a} :if={@b}>x</div>");
        assert!(err.description.contains("multiple `:if`"));
    }

    #[test]
    fn key_requires_for() {
        let err = parse_err("<div :key={@k}>x</div>");
        assert!(err.description.contains("`:key` requires"));
    }

    #[test]
    fn for_requires_generator() {
        let err = parse_err("<div :for={@items}>x</div>");
        assert!(err.description.contains("expects a generator"));
    }

    #[test]
    fn let_only_on_components_and_slots() {
        let err = parse_err("<div :let={x}>y</div>");
        assert!(err.description.contains("only supported on components"));
        assert!(parse("<.card :let={x}>y</.card>").is_ok());
    }

    #[test]
    fn phx_update_requires_id() {
        let err = parse_err("<div phx-update=\"stream\">x</div>");
        assert!(err.description.contains("requires the \"id\""));
        assert!(parse("<div id=\"a\" phx-update=\"stream\">x</div>").is_ok());
        assert!(parse("<div {@rest} phx-update=\"stream\">x</div>").is_ok());
    }

    #[test]
    fn phx_update_value_is_validated() {
        let err = parse_err("<div id=\"a\" phx-update=\"bogus\">x</div>");
        assert!(err.description.contains("invalid value for phx-update"));
        // deprecated values are accepted with a warning
        assert!(parse("<div id=\"a\" phx-update=\"append\">x</div>").is_ok());
    }

    #[test]
    fn handler_can_transform_attributes() {
        use crate::tokenizer::Attribute;

        struct DefaultClass;
        impl TagHandler for DefaultClass {
            fn handle_attributes(&self, tag: &str, mut attrs: Vec<AttrEntry>) -> Vec<AttrEntry> {
                if tag == "div" && attrs.is_empty() {
                    attrs.push(AttrEntry::Named(Attribute {
                        name: "class".into(),
                        value: AttrValue::String {
                            value: "default".into(),
                            delimiter: '"',
                        },
                        pos: Pos::new(1, 1),
                    }));
                }
                attrs
            }
        }

        let parts = eex::scan("<div>x</div>", "t", Pos::new(1, 1), 0).unwrap();
        let tokens = tokenizer::run(parts, "t", 0).unwrap();
        let nodes = build(tokens, "t", &DefaultClass).unwrap();
        let Node::Tag { attrs, .. } = &nodes[0] else { panic!() };
        assert_eq!(attrs.len(), 1);
        assert!(matches!(
            &attrs[0],
            AttrEntry::Named(attr) if attr.name == "class"
        ));
    }

    #[test]
    fn expression_comments_are_stripped() {
        let nodes = parse_ok("a<%!-- gone --%>b");
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| matches!(n, Node::Text { .. })));
    }

    #[test]
    fn html_comments_become_text() {
        let nodes = parse_ok("<!-- kept -->");
        assert!(matches!(&nodes[0], Node::Text { text, .. } if text == "<!-- kept -->"));
    }
}
