//! Compile-time and render-time error types.

use thiserror::Error;

use crate::source::{frame, Pos};

/// A fatal template compilation error: lex, structural, or semantic.
///
/// Carries the position inside the compilation unit and a rendered code
/// frame. All compile errors abort the template; none are retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{file}:{pos}: {description}\n{snippet}")]
pub struct ParseError {
    pub file: String,
    pub pos: Pos,
    pub description: String,
    pub snippet: String,
}

impl ParseError {
    pub fn new(file: &str, pos: Pos, description: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            pos,
            description: description.into(),
            snippet: String::new(),
        }
    }

    /// Attach the code frame for `source`, whose first line is `start_line`.
    pub fn with_frame(mut self, source: &str, start_line: u32, indentation: u32) -> Self {
        self.snippet = frame(source, start_line, indentation, self.pos);
        self
    }
}

/// A failure while executing a compiled template against an assigns map.
///
/// These are designed errors raised from the compiled output, not compiler
/// bugs: an expression outside the template dialect, a missing assign, a
/// `:let` pattern that rejected its argument.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("{file}:{pos}: {source} in `{expr}`")]
    Eval {
        file: String,
        pos: Pos,
        expr: String,
        source: crate::eval::EvalError,
    },
    #[error(
        "{file}:{pos}: no clause matched the `{head}` value {value}; \
         add a catch-all `<% _ -> %>` clause"
    )]
    NoClauseMatched {
        file: String,
        pos: Pos,
        head: String,
        value: String,
    },
    #[error(
        "{file}:{pos}: the pattern `{pattern}` does not match the generator \
         element {value}"
    )]
    GeneratorMismatch {
        file: String,
        pos: Pos,
        pattern: String,
        value: String,
    },
    #[error(
        "cannot match the `:let` pattern `{pattern}` against the argument \
         {value} given to the inner block"
    )]
    LetMismatch { pattern: String, value: String },
    #[error("{file}:{pos}: a `:for` generator expects a list, got {value}")]
    BadEnumerable {
        file: String,
        pos: Pos,
        value: String,
    },
    #[error("{file}:{pos}: a root attribute spread expects a map, got {value}")]
    BadAttributeSpread {
        file: String,
        pos: Pos,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_includes_frame() {
        let err = ParseError::new("app.html", Pos::new(1, 6), "missing closing `>`")
            .with_frame("<div class", 1, 0);
        let text = err.to_string();
        assert!(text.starts_with("app.html:1:6: missing closing `>`"));
        assert!(text.contains("<div class"));
        assert!(text.contains('^'));
    }
}
