//! Changed-map lookups.
//!
//! Every render receives, alongside the assigns themselves, an auxiliary
//! changed map under the `__changed__` key. A present key means the assign
//! differs from the previous render. The value under a key is either `true`
//! (changed, no further detail) or the *previous* value of the assign: a
//! partial tree the tracked-path walk below compares against the current
//! value in lockstep, so that a nested write like `user.profile.name` can be
//! detected without diffing the whole assign.

use serde_json::{Map, Value};

/// The assigns collection delivered to a compiled template.
pub type Assigns = Map<String, Value>;

/// Key under which the changed map travels inside the assigns.
pub const CHANGED_KEY: &str = "__changed__";

/// One accessor step below a root assign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSeg {
    /// Field access: `@user.profile`.
    Struct(String),
    /// Literal index access: `@user["settings"]` or `@rows[0]`.
    Access(String),
}

impl PathSeg {
    pub fn key(&self) -> &str {
        match self {
            PathSeg::Struct(k) | PathSeg::Access(k) => k,
        }
    }
}

/// A root assign name plus a chain of accessors, as recorded by taint
/// analysis at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignPath {
    pub root: String,
    pub segs: Vec<PathSeg>,
}

impl AssignPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            root: name.into(),
            segs: Vec::new(),
        }
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_strict_parent_of(&self, other: &AssignPath) -> bool {
        self.root == other.root
            && self.segs.len() < other.segs.len()
            && other.segs.starts_with(&self.segs)
    }
}

impl std::fmt::Display for AssignPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.root)?;
        for seg in &self.segs {
            match seg {
                PathSeg::Struct(k) => write!(f, ".{k}")?,
                PathSeg::Access(k) => write!(f, "[{k:?}]")?,
            }
        }
        Ok(())
    }
}

/// Extract the changed map from the assigns. `None` means initial render:
/// the key is absent or `null`, and every dynamic must be computed.
pub fn changed_map(assigns: &Assigns) -> Option<&Map<String, Value>> {
    match assigns.get(CHANGED_KEY) {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Resolve the current value of a path against the assigns.
pub fn resolve<'a>(assigns: &'a Assigns, path: &AssignPath) -> Option<&'a Value> {
    let mut cur = assigns.get(&path.root)?;
    for seg in &path.segs {
        cur = lookup(cur, seg)?;
    }
    Some(cur)
}

/// Decide whether a tracked path must be considered changed for this render.
///
/// A single-element path only tests membership in the top-level changed map.
/// A nested path walks the changed tree and the current assigns in lockstep:
/// any divergence (a `true` marker, a missing branch, a non-container where
/// the path continues) counts as changed, and at the leaf the previous value
/// is compared against the current one; equal values mean no actual change.
pub fn path_changed(assigns: &Assigns, changed: &Map<String, Value>, path: &AssignPath) -> bool {
    let Some(mut old) = changed.get(&path.root) else {
        return false;
    };
    if path.segs.is_empty() {
        return true;
    }

    let mut cur = assigns.get(&path.root);
    for seg in &path.segs {
        if old == &Value::Bool(true) {
            return true;
        }
        match (lookup(old, seg), cur.and_then(|c| lookup(c, seg))) {
            (Some(next_old), Some(next_cur)) => {
                old = next_old;
                cur = Some(next_cur);
            }
            _ => return true,
        }
    }
    old == &Value::Bool(true) || Some(old) != cur
}

/// Compute the changed marker a parent attaches to a component key whose
/// value is the given tracked path: `None` omits the key (unchanged),
/// `Some(true)` marks it changed, and `Some(map)` forwards the previous
/// value as a partial sub-map so the child can track nested fields.
pub fn change_mark(
    assigns: &Assigns,
    changed: &Map<String, Value>,
    path: &AssignPath,
) -> Option<Value> {
    let mut old = changed.get(&path.root)?;
    let mut cur = assigns.get(&path.root);
    for seg in &path.segs {
        if old == &Value::Bool(true) {
            return Some(Value::Bool(true));
        }
        match (lookup(old, seg), cur.and_then(|c| lookup(c, seg))) {
            (Some(next_old), Some(next_cur)) => {
                old = next_old;
                cur = Some(next_cur);
            }
            _ => return Some(Value::Bool(true)),
        }
    }
    if old == &Value::Bool(true) {
        return Some(Value::Bool(true));
    }
    match cur {
        Some(current) if old == current => None,
        _ if old.is_object() => Some(old.clone()),
        _ => Some(Value::Bool(true)),
    }
}

fn lookup<'a>(value: &'a Value, seg: &PathSeg) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(seg.key()),
        Value::Array(items) => match seg {
            PathSeg::Access(k) => items.get(k.parse::<usize>().ok()?),
            PathSeg::Struct(_) => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assigns(value: Value) -> Assigns {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn user_path() -> AssignPath {
        AssignPath {
            root: "user".into(),
            segs: vec![
                PathSeg::Struct("profile".into()),
                PathSeg::Struct("name".into()),
            ],
        }
    }

    #[test]
    fn membership_for_single_element_path() {
        let a = assigns(json!({"name": "Ana"}));
        let path = AssignPath::root("name");
        assert!(path_changed(&a, &obj(json!({"name": true})), &path));
        assert!(!path_changed(&a, &obj(json!({})), &path));
        assert!(!path_changed(&a, &obj(json!({"other": true})), &path));
    }

    #[test]
    fn nested_walk_scenarios() {
        let a = assigns(json!({"user": {"profile": {"name": "X"}}}));
        let path = user_path();

        // whole-assign marker
        assert!(path_changed(&a, &obj(json!({"user": true})), &path));
        // partial tree with a true leaf
        assert!(path_changed(
            &a,
            &obj(json!({"user": {"profile": {"name": true}}})),
            &path
        ));
        // previous value equal to current: no actual change
        assert!(!path_changed(
            &a,
            &obj(json!({"user": {"profile": {"name": "X"}}})),
            &path
        ));
        // previous value differs
        assert!(path_changed(
            &a,
            &obj(json!({"user": {"profile": {"name": "Y"}}})),
            &path
        ));
        // branch missing on the old side diverges
        assert!(path_changed(
            &a,
            &obj(json!({"user": {"settings": true}})),
            &path
        ));
    }

    #[test]
    fn change_mark_forwards_partial_maps() {
        let a = assigns(json!({"user": {"profile": {"name": "X"}}}));
        let path = AssignPath::root("user");

        assert_eq!(
            change_mark(&a, &obj(json!({"user": true})), &path),
            Some(Value::Bool(true))
        );
        assert_eq!(change_mark(&a, &obj(json!({})), &path), None);
        // equal previous value: omitted
        assert_eq!(
            change_mark(
                &a,
                &obj(json!({"user": {"profile": {"name": "X"}}})),
                &path
            ),
            None
        );
        // differing previous map is forwarded verbatim
        assert_eq!(
            change_mark(&a, &obj(json!({"user": {"profile": true}})), &path),
            Some(json!({"profile": true}))
        );
    }

    #[test]
    fn strict_parent_prefix() {
        let parent = AssignPath::root("user");
        let child = user_path();
        assert!(parent.is_strict_parent_of(&child));
        assert!(!child.is_strict_parent_of(&parent));
        assert!(!parent.is_strict_parent_of(&AssignPath::root("user")));
    }

    #[test]
    fn resolve_walks_objects_and_arrays() {
        let a = assigns(json!({"rows": [{"id": 1}, {"id": 2}]}));
        let path = AssignPath {
            root: "rows".into(),
            segs: vec![PathSeg::Access("1".into()), PathSeg::Struct("id".into())],
        };
        assert_eq!(resolve(&a, &path), Some(&json!(2)));
    }
}
