//! # Path Resolution
//!
//! Documents are trees of string-keyed maps and integer-indexed
//! sequences terminating in scalar leaves. A path walks the tree one
//! key at a time; resolution yields the immediate parent container and
//! the terminal key so callers can read, write, or delete that exact
//! slot.

use serde_json::Value;

use super::errors::{OtError, OtResult};

/// Sentinel sequence index meaning "the position after the last
/// element" for insert/move targets, and "count back from the end"
/// for removals.
pub const END: i64 = -1;

/// One step of a path: a map field or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKey {
    Field(String),
    Index(i64),
}

impl PathKey {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }
}

/// An ordered sequence of keys from the document root.
pub type Path = Vec<PathKey>;

/// Decode a wire-format path (a JSON array of strings and integers).
pub fn decode_path(value: &Value) -> OtResult<Path> {
    let Some(elems) = value.as_array() else {
        return Err(OtError::InvalidPath(format!(
            "path must be an array, got {value}"
        )));
    };
    let mut path = Path::with_capacity(elems.len());
    for elem in elems {
        match elem {
            Value::String(s) => path.push(PathKey::Field(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => path.push(PathKey::Index(i)),
                None => {
                    return Err(OtError::InvalidPath(format!(
                        "non-integer path index {n}"
                    )))
                }
            },
            other => {
                return Err(OtError::InvalidPath(format!(
                    "path element must be a string or integer, got {other}"
                )))
            }
        }
    }
    Ok(path)
}

/// A resolved terminal slot: the parent container and the key that
/// addresses the slot within it. The parent stays owned by the
/// document being mutated; the slot handle never outlives one apply
/// call.
pub struct Slot<'a> {
    pub container: &'a mut Value,
    pub key: PathKey,
}

impl Slot<'_> {
    /// The current value at the slot, if any.
    pub fn current(&self) -> Option<&Value> {
        match (&*self.container, &self.key) {
            (Value::Object(map), PathKey::Field(f)) => map.get(f),
            (Value::Array(arr), PathKey::Index(i)) if *i >= 0 => arr.get(*i as usize),
            _ => None,
        }
    }
}

/// Outcome of walking a path.
pub enum Resolution<'a> {
    Found(Slot<'a>),
    /// An intermediate slot was absent and create mode was off.
    /// Callers interpret this as a no-op for remove/move.
    NotFound,
}

/// Walk `path` from the root of `doc`.
///
/// In create mode, absent map entries along the way are materialized
/// as an empty map or sequence, chosen by inspecting the *next* key's
/// kind. Descending through a scalar is an `InvalidPath` error;
/// applying an integer key to a map or a string key to a sequence is a
/// `PathTypeMismatch`.
pub fn resolve<'a>(doc: &'a mut Value, path: &[PathKey], create: bool) -> OtResult<Resolution<'a>> {
    let Some((last, inner)) = path.split_last() else {
        return Err(OtError::InvalidPath("empty path".into()));
    };

    let mut current = doc;
    for (depth, key) in inner.iter().enumerate() {
        current = match current {
            Value::Object(map) => match key {
                PathKey::Field(f) => {
                    if create {
                        let next = inner.get(depth + 1).unwrap_or(last);
                        map.entry(f.clone()).or_insert_with(|| empty_container(next))
                    } else {
                        match map.get_mut(f) {
                            Some(v) => v,
                            None => return Ok(Resolution::NotFound),
                        }
                    }
                }
                PathKey::Index(i) => {
                    return Err(OtError::PathTypeMismatch(format!(
                        "integer key {i} into a map at depth {depth}"
                    )))
                }
            },
            Value::Array(arr) => match key {
                PathKey::Index(i) => {
                    if *i >= 0 && (*i as usize) < arr.len() {
                        &mut arr[*i as usize]
                    } else if create {
                        return Err(OtError::InvalidPath(format!(
                            "cannot materialize sequence element {i} at depth {depth}"
                        )));
                    } else {
                        return Ok(Resolution::NotFound);
                    }
                }
                PathKey::Field(f) => {
                    return Err(OtError::PathTypeMismatch(format!(
                        "string key '{f}' into a sequence at depth {depth}"
                    )))
                }
            },
            _ => {
                return Err(OtError::InvalidPath(format!(
                    "cannot descend through a leaf at depth {depth}"
                )))
            }
        };
    }

    // Terminal: the parent container must match the terminal key kind.
    match (&*current, last) {
        (Value::Object(_), PathKey::Field(_)) | (Value::Array(_), PathKey::Index(_)) => {
            Ok(Resolution::Found(Slot {
                container: current,
                key: last.clone(),
            }))
        }
        (Value::Object(_), PathKey::Index(i)) => Err(OtError::PathTypeMismatch(format!(
            "integer key {i} addresses a map"
        ))),
        (Value::Array(_), PathKey::Field(f)) => Err(OtError::PathTypeMismatch(format!(
            "string key '{f}' addresses a sequence"
        ))),
        _ => Err(OtError::InvalidPath(
            "terminal parent is a scalar leaf".into(),
        )),
    }
}

fn empty_container(next: &PathKey) -> Value {
    match next {
        PathKey::Field(_) => Value::Object(Default::default()),
        PathKey::Index(_) => Value::Array(Default::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_path() {
        let path = decode_path(&json!(["a", 0, "b", -1])).unwrap();
        assert_eq!(
            path,
            vec![
                PathKey::field("a"),
                PathKey::Index(0),
                PathKey::field("b"),
                PathKey::Index(END),
            ]
        );
    }

    #[test]
    fn test_decode_path_rejects_non_array() {
        assert!(matches!(
            decode_path(&json!("a.b")),
            Err(OtError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_resolve_existing() {
        let mut doc = json!({"a": {"b": 5}});
        let path = vec![PathKey::field("a"), PathKey::field("b")];
        match resolve(&mut doc, &path, false).unwrap() {
            Resolution::Found(slot) => assert_eq!(slot.current(), Some(&json!(5))),
            Resolution::NotFound => panic!("expected found"),
        }
    }

    #[test]
    fn test_resolve_absent_without_create() {
        let mut doc = json!({});
        let path = vec![PathKey::field("a"), PathKey::field("b")];
        assert!(matches!(
            resolve(&mut doc, &path, false).unwrap(),
            Resolution::NotFound
        ));
        // Document untouched.
        assert_eq!(doc, json!({}));
    }

    #[test]
    fn test_resolve_creates_by_next_key_kind() {
        let mut doc = json!({});
        let path = vec![
            PathKey::field("a"),
            PathKey::Index(0),
        ];
        // Intermediate "a" is created as a sequence because the next
        // key is an index.
        let res = resolve(&mut doc, &path, true).unwrap();
        assert!(matches!(res, Resolution::Found(_)));
        assert_eq!(doc, json!({"a": []}));
    }

    #[test]
    fn test_resolve_through_scalar_fails() {
        let mut doc = json!({"a": 1});
        let path = vec![PathKey::field("a"), PathKey::field("b")];
        assert!(matches!(
            resolve(&mut doc, &path, false),
            Err(OtError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_resolve_kind_mismatch() {
        let mut doc = json!({"a": [1, 2]});
        let path = vec![PathKey::field("a"), PathKey::field("b")];
        assert!(matches!(
            resolve(&mut doc, &path, false),
            Err(OtError::PathTypeMismatch(_))
        ));

        let mut doc = json!({"a": {"b": 1}});
        let path = vec![PathKey::field("a"), PathKey::Index(0)];
        assert!(matches!(
            resolve(&mut doc, &path, false),
            Err(OtError::PathTypeMismatch(_))
        ));
    }
}
