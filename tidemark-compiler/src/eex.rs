//! EEx-style fragment scanner.
//!
//! The first pass over a template splits the source at `<% %>` tags so the
//! HTML tokenizer can run over the text pieces (a text fragment, an
//! expression fragment, more text). Expression bodies stay opaque here;
//! block heads (`if … do`, `for … do`, `case … do`, `cond do`, `unless … do`),
//! clause separators (`else`, `pattern ->`) and `end` are recognized
//! syntactically so the structural analyzer can pair them.

use crate::errors::ParseError;
use crate::source::{Cursor, Pos};

/// Whether an expression's result reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// `<%= … %>`: the value is emitted.
    Output,
    /// `<% … %>`: evaluated for its bindings only.
    Silent,
}

/// Control-flow construct opened by a block head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    Unless,
    For,
    Case,
    Cond,
}

impl BlockKind {
    pub fn keyword(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
            BlockKind::For => "for",
            BlockKind::Case => "case",
            BlockKind::Cond => "cond",
        }
    }
}

/// One scanned fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text { text: String, pos: Pos },
    Expr { code: String, marker: Marker, pos: Pos },
    BlockOpen { kind: BlockKind, head: String, marker: Marker, pos: Pos },
    ClauseElse { pos: Pos },
    ClauseArm { code: String, pos: Pos },
    BlockEnd { pos: Pos },
    Comment { text: String, pos: Pos },
}

pub fn scan(source: &str, file: &str, start: Pos, indentation: u32) -> Result<Vec<Part>, ParseError> {
    let mut cursor = Cursor::new(source, start, indentation);
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut text_pos = cursor.pos();

    loop {
        if cursor.starts_with("<%%") {
            // escaped delimiter: emits a literal `<%`
            cursor.bump_n(3);
            text.push_str("<%");
            continue;
        }
        if cursor.starts_with("<%") {
            if !text.is_empty() {
                parts.push(Part::Text {
                    text: std::mem::take(&mut text),
                    pos: text_pos,
                });
            }
            let tag_pos = cursor.pos();
            parts.push(scan_tag(&mut cursor, file, tag_pos)?);
            text_pos = cursor.pos();
            continue;
        }
        match cursor.bump() {
            Some(ch) => text.push(ch),
            None => break,
        }
    }
    if !text.is_empty() {
        parts.push(Part::Text { text, pos: text_pos });
    }
    Ok(parts)
}

fn scan_tag(cursor: &mut Cursor, file: &str, pos: Pos) -> Result<Part, ParseError> {
    if cursor.starts_with("<%!--") {
        cursor.bump_n(5);
        let Some(text) = cursor.take_until("--%>") else {
            return Err(ParseError::new(
                file,
                pos,
                "unterminated expression comment, expected a closing `--%>`",
            ));
        };
        return Ok(Part::Comment { text, pos });
    }
    if cursor.starts_with("<%#") {
        cursor.bump_n(3);
        let Some(text) = cursor.take_until("%>") else {
            return Err(ParseError::new(
                file,
                pos,
                "unterminated expression comment, expected a closing `%>`",
            ));
        };
        return Ok(Part::Comment { text, pos });
    }

    cursor.bump_n(2);
    let marker = if cursor.starts_with("=") {
        cursor.bump();
        Marker::Output
    } else {
        Marker::Silent
    };
    let Some(code) = cursor.take_until("%>") else {
        return Err(ParseError::new(
            file,
            pos,
            "unterminated expression, expected a closing `%>`",
        ));
    };
    Ok(classify(code.trim(), marker, pos))
}

fn classify(code: &str, marker: Marker, pos: Pos) -> Part {
    if code == "end" {
        return Part::BlockEnd { pos };
    }
    if code == "else" {
        return Part::ClauseElse { pos };
    }
    if let Some(head) = code.strip_suffix("->") {
        return Part::ClauseArm {
            code: head.trim().to_string(),
            pos,
        };
    }
    if let Some((kind, head)) = block_head(code) {
        return Part::BlockOpen {
            kind,
            head,
            marker,
            pos,
        };
    }
    Part::Expr {
        code: code.to_string(),
        marker,
        pos,
    }
}

/// A block head is `<kw> <head…> do` where the final `do` stands alone.
fn block_head(code: &str) -> Option<(BlockKind, String)> {
    let rest = code.strip_suffix("do")?;
    if !rest.is_empty() && !rest.ends_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_end();
    for kind in [
        BlockKind::If,
        BlockKind::Unless,
        BlockKind::For,
        BlockKind::Case,
        BlockKind::Cond,
    ] {
        let kw = kind.keyword();
        if rest == kw {
            return Some((kind, String::new()));
        }
        if let Some(head) = rest.strip_prefix(kw) {
            if head.starts_with(char::is_whitespace) {
                return Some((kind, head.trim().to_string()));
            }
        }
    }
    None
}
