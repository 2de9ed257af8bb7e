//! Compiler from HTML+expression templates to change-tracked render
//! programs.
//!
//! The pipeline is pure and single-threaded: an EEx-style scanner splits
//! the source into text and expression fragments, the HTML tokenizer turns
//! the text into tags and interpolations, the structural analyzer builds a
//! validated node tree, and the change-tracking engine lowers the tree into
//! a [`Template`]: statics, per-dynamic IR guarded by taint-analysis keys,
//! and a structural fingerprint. Executing the template against an assigns
//! map yields a [`tidemark::Rendered`] for the wire differ.
//!
//! ```
//! use tidemark_compiler::{compile, CompileOpts};
//!
//! let template = compile("Hello <%= @name %>!", &CompileOpts::default()).unwrap();
//! let assigns = tidemark_compiler::eval::object(serde_json::json!({"name": "Ana"}));
//! let rendered = template.render(&assigns).unwrap();
//! assert_eq!(rendered.to_html().unwrap(), "Hello Ana!");
//! ```

use std::sync::Arc;

pub mod attrs;
pub mod calls;
pub mod eex;
mod engine;
pub mod errors;
pub mod eval;
pub mod expr;
pub mod source;
pub mod taint;
pub mod tag_handler;
pub mod template;
pub mod tokenizer;
pub mod tree;

pub use calls::{CallRegistry, ComponentCall};
pub use errors::{ParseError, RenderError};
pub use source::Pos;
pub use tag_handler::{HtmlTagHandler, TagHandler, TagKind};
pub use template::Template;

/// Options for one compilation unit.
#[derive(Clone)]
pub struct CompileOpts {
    /// File name reported in errors and caller metadata.
    pub file: String,
    /// Line of the template's first character inside `file`.
    pub line: u32,
    /// Column shift applied to every line (templates embedded mid-file).
    pub indentation: u32,
    /// Module compiling the template; expands `.`-prefixed hook names and
    /// lands in the caller metadata.
    pub caller_module: Option<String>,
    /// Compute the single-static-root hint. Disable for embedded fragments
    /// whose root hint is meaningless to the differ.
    pub detect_root: bool,
    /// Tag classification profile.
    pub handler: Arc<dyn TagHandler + Send + Sync>,
    /// Component-call metadata sink, when a later validation pass wants it.
    pub registry: Option<Arc<CallRegistry>>,
}

impl Default for CompileOpts {
    fn default() -> Self {
        Self {
            file: "nofile".to_string(),
            line: 1,
            indentation: 0,
            caller_module: None,
            detect_root: true,
            handler: Arc::new(HtmlTagHandler),
            registry: None,
        }
    }
}

/// Compile a template source into a [`Template`].
///
/// All parse, structural and semantic errors are fatal and carry the
/// position plus a code frame into the source.
pub fn compile(source: &str, opts: &CompileOpts) -> Result<Template, ParseError> {
    let start = Pos::new(opts.line, opts.indentation + 1);
    let result = (|| {
        let parts = eex::scan(source, &opts.file, start, opts.indentation)?;
        let tokens = tokenizer::run(parts, &opts.file, opts.indentation)?;
        let nodes = tree::build(tokens, &opts.file, opts.handler.as_ref())?;
        engine::Compiler::new(opts).compile(&nodes)
    })();
    result.map_err(|err| {
        if err.snippet.is_empty() {
            err.with_frame(source, opts.line, opts.indentation)
        } else {
            err
        }
    })
}
