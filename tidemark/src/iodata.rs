//! Iodata: a tree of byte chunks that concatenates without copying.
//!
//! Rendered output is assembled from many small pieces (escaped expression
//! results, attribute fragments, nested renders). Building one big `String`
//! per fragment would copy every byte once per nesting level; an iodata
//! tree defers the copy until the final flatten.

use bytes::Bytes;

/// A tree of UTF-8 byte chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iodata {
    /// No bytes at all. Renders as the empty string.
    Empty,
    /// A single contiguous chunk.
    Bytes(Bytes),
    /// A sequence of sub-trees, rendered in order.
    Concat(Vec<Iodata>),
}

impl Iodata {
    /// Wrap a static string without copying.
    pub fn from_static(s: &'static str) -> Self {
        if s.is_empty() {
            Iodata::Empty
        } else {
            Iodata::Bytes(Bytes::from_static(s.as_bytes()))
        }
    }

    /// Total byte length across the tree.
    pub fn len(&self) -> usize {
        match self {
            Iodata::Empty => 0,
            Iodata::Bytes(b) => b.len(),
            Iodata::Concat(parts) => parts.iter().map(Iodata::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append another tree. `Empty` on either side collapses.
    pub fn push(&mut self, other: Iodata) {
        if matches!(other, Iodata::Empty) {
            return;
        }
        match self {
            Iodata::Empty => *self = other,
            Iodata::Concat(parts) => parts.push(other),
            Iodata::Bytes(_) => {
                let head = std::mem::replace(self, Iodata::Empty);
                *self = Iodata::Concat(vec![head, other]);
            }
        }
    }

    /// Flatten into a `String` in a single pass.
    pub fn into_string(self) -> String {
        let mut out = String::with_capacity(self.len());
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Iodata::Empty => {}
            Iodata::Bytes(b) => out.push_str(&String::from_utf8_lossy(b)),
            Iodata::Concat(parts) => {
                for part in parts {
                    part.write_to(out);
                }
            }
        }
    }
}

impl From<String> for Iodata {
    fn from(s: String) -> Self {
        if s.is_empty() {
            Iodata::Empty
        } else {
            Iodata::Bytes(Bytes::from(s))
        }
    }
}

impl From<&str> for Iodata {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Iodata::Empty
        } else {
            Iodata::Bytes(Bytes::copy_from_slice(s.as_bytes()))
        }
    }
}

impl std::fmt::Display for Iodata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = String::with_capacity(self.len());
        self.write_to(&mut buf);
        f.write_str(&buf)
    }
}
