//! Tag classification, pluggable per HTML profile.
//!
//! The structural analyzer never hardcodes what a raw tag name means; it
//! asks a [`TagHandler`]. The default profile follows the convention that a
//! leading `.` names a local component, a leading uppercase letter a remote
//! component, and a leading `:` a slot.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::tokenizer::AttrEntry;

/// What a raw tag name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Tag,
    VoidTag,
    LocalComponent,
    RemoteComponent,
    Slot,
}

/// Elements whose closing tag is forbidden.
static VOID_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "area", "base", "br", "col", "hr", "img", "input", "link", "meta", "param", "command",
        "keygen", "source",
    ]
    .into_iter()
    .collect()
});

pub trait TagHandler {
    fn classify(&self, name: &str) -> TagKind {
        if let Some(rest) = name.strip_prefix('.') {
            let _ = rest;
            return TagKind::LocalComponent;
        }
        if name.starts_with(':') {
            return TagKind::Slot;
        }
        if name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            return TagKind::RemoteComponent;
        }
        if self.void(name) {
            TagKind::VoidTag
        } else {
            TagKind::Tag
        }
    }

    fn void(&self, name: &str) -> bool {
        VOID_TAGS.contains(name)
    }

    /// Transform a tag's attribute list before structural validation: a
    /// profile may inject defaults or rewrite names. The default passes
    /// the list through untouched.
    fn handle_attributes(&self, _tag: &str, attrs: Vec<AttrEntry>) -> Vec<AttrEntry> {
        attrs
    }

    /// Optional prefix/suffix wrapped around a compiled template body,
    /// e.g. debug annotations. `None` disables the wrapping.
    fn annotate_body(&self) -> Option<(String, String)> {
        None
    }

    /// Optional annotation emitted at a component call site.
    fn annotate_caller(&self, _file: &str, _line: u32) -> Option<String> {
        None
    }
}

/// The standard HTML5 profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlTagHandler;

impl TagHandler for HtmlTagHandler {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convention_classification() {
        let handler = HtmlTagHandler;
        assert_eq!(handler.classify("div"), TagKind::Tag);
        assert_eq!(handler.classify("br"), TagKind::VoidTag);
        assert_eq!(handler.classify(".greeter"), TagKind::LocalComponent);
        assert_eq!(handler.classify("Catalog.Card.entry"), TagKind::RemoteComponent);
        assert_eq!(handler.classify(":header"), TagKind::Slot);
    }

    #[test]
    fn void_list_is_fixed() {
        let handler = HtmlTagHandler;
        for name in ["area", "base", "br", "col", "hr", "img", "input", "link", "meta"] {
            assert!(handler.void(name), "{name} should be void");
        }
        assert!(!handler.void("div"));
        assert!(!handler.void("span"));
    }
}
