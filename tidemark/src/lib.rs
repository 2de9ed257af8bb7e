//! Runtime value model for change-tracked template rendering.
//!
//! A compiled template does not produce a flat string. It produces a
//! [`Rendered`] value that keeps literal text (`statics`) separate from the
//! recomputed parts (`dynamics`), so a wire differ can ship only the
//! positions that actually changed since the previous render. A dynamic
//! position that did not change is [`Dyn::Nil`]; the differ treats it as
//! "previous value still valid" and omits it from the payload.
//!
//! The types in this crate are what the differ consumes. The compiler that
//! produces them lives in the `tidemark-compiler` crate.

pub mod changed;
pub mod escape;
pub mod fingerprint;
pub mod iodata;
pub mod rendered;
pub mod wire;

pub use changed::{changed_map, AssignPath, Assigns, PathSeg, CHANGED_KEY};
pub use escape::escape_html;
pub use fingerprint::FingerprintHasher;
pub use iodata::Iodata;
pub use rendered::{
    Caller, Component, Comprehension, Dyn, HtmlError, Rendered, StreamAnnot, StreamInsert,
};
