//! The structured output of one template render.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::iodata::Iodata;

/// One render of a compiled template: `N + 1` statics interleaved with `N`
/// dynamics, starting and ending with a static. The fingerprint identifies
/// the static shape; the differ only diffs two `Rendered` values whose
/// fingerprints match.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub statics: Vec<String>,
    pub dynamics: Vec<Dyn>,
    pub fingerprint: u128,
    /// Whether the template's output is a single static element wrapping
    /// everything. `None` for nested sub-templates, where the hint is
    /// meaningless to the differ.
    pub root: Option<bool>,
    pub caller: Caller,
}

/// A dynamic position inside a [`Rendered`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dyn {
    /// Unchanged since the previous render; the differ keeps its old value.
    Nil,
    /// Flat output bytes (escaped expression result, attribute fragment).
    Iodata(Iodata),
    /// A nested template (control-flow arm, conditional wrapper).
    Rendered(Box<Rendered>),
    /// A `for` comprehension.
    Comprehension(Box<Comprehension>),
    /// A component invocation, resolved by the component runtime.
    Component(Box<Component>),
}

/// A comprehension shares one static list across all iterations; each row of
/// `dynamics` holds the per-iteration values. Iterations are not
/// change-tracked individually: when the comprehension is computed at all,
/// every row is computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub statics: Vec<String>,
    pub dynamics: Vec<Vec<Dyn>>,
    pub fingerprint: u128,
    pub stream: Option<StreamAnnot>,
}

/// Stream bookkeeping attached to a comprehension whose enumerable was a
/// stream: the differ applies `inserts` and `deletes` against the container
/// identified by `stream_ref` instead of replacing the whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamAnnot {
    pub stream_ref: String,
    pub inserts: Vec<StreamInsert>,
    pub deletes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInsert {
    pub id: String,
    pub at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// A component placeholder. The parent computes the per-key `changed`
/// sub-map for stateless invocations; stateful components defer all
/// tracking to their own engine and carry `changed: None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: String,
    pub component_ref: String,
    pub assigns: Map<String, Value>,
    pub changed: Option<Map<String, Value>>,
}

/// Where a template was compiled from, carried for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Known {
        module: Option<String>,
        file: String,
        line: u32,
    },
    Unavailable,
}

/// Raised when a [`Rendered`] tree cannot be flattened to HTML.
#[derive(Debug, Error, PartialEq)]
pub enum HtmlError {
    #[error(
        "cannot convert a component to HTML outside of a template render; \
         components are resolved by the component runtime"
    )]
    LooseComponent,
    #[error(
        "cannot convert an unchanged placeholder to HTML; render with \
         change tracking disabled to materialize every dynamic"
    )]
    NilDynamic,
}

impl Rendered {
    /// Flatten to an HTML string by interleaving statics and dynamics.
    ///
    /// Fails on a [`Dyn::Nil`] (the tree was rendered with change tracking
    /// and holds placeholders) and on a loose [`Dyn::Component`].
    pub fn to_html(&self) -> Result<String, HtmlError> {
        Ok(self.to_iodata()?.into_string())
    }

    fn to_iodata(&self) -> Result<Iodata, HtmlError> {
        let mut out = Iodata::Empty;
        for (i, static_part) in self.statics.iter().enumerate() {
            out.push(Iodata::from(static_part.as_str()));
            if let Some(dynamic) = self.dynamics.get(i) {
                out.push(dynamic.to_iodata()?);
            }
        }
        Ok(out)
    }
}

impl Dyn {
    pub fn is_nil(&self) -> bool {
        matches!(self, Dyn::Nil)
    }

    fn to_iodata(&self) -> Result<Iodata, HtmlError> {
        match self {
            Dyn::Nil => Err(HtmlError::NilDynamic),
            Dyn::Iodata(io) => Ok(io.clone()),
            Dyn::Rendered(rendered) => rendered.to_iodata(),
            Dyn::Comprehension(comp) => comp.to_iodata(),
            Dyn::Component(_) => Err(HtmlError::LooseComponent),
        }
    }
}

impl Comprehension {
    fn to_iodata(&self) -> Result<Iodata, HtmlError> {
        let mut out = Iodata::Empty;
        for row in &self.dynamics {
            for (i, static_part) in self.statics.iter().enumerate() {
                out.push(Iodata::from(static_part.as_str()));
                if let Some(dynamic) = row.get(i) {
                    out.push(dynamic.to_iodata()?);
                }
            }
        }
        Ok(out)
    }
}
