//! HTML escaping for dynamic output.
//!
//! Static template text is emitted verbatim; only expression results pass
//! through here before they reach the wire.

use std::borrow::Cow;

/// Escape `&`, `<`, `>`, `"` and `'` for safe interpolation into element
/// content or a quoted attribute value. Borrows when nothing needs escaping.
pub fn escape_html(input: &str) -> Cow<'_, str> {
    let first = input
        .bytes()
        .position(|b| matches!(b, b'&' | b'<' | b'>' | b'"' | b'\''));
    let Some(first) = first else {
        return Cow::Borrowed(input);
    };

    let mut out = String::with_capacity(input.len() + 8);
    out.push_str(&input[..first]);
    for ch in input[first..].chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}
