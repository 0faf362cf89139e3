//! # Component Application
//!
//! Decodes compound operations from their wire form and folds them
//! left-to-right over the evolving document. Any error aborts the
//! fold; the caller must discard the document rather than continue.

use serde_json::{json, Value};

use super::errors::{OtError, OtResult};
use super::path::{decode_path, resolve, Path, PathKey, Resolution, Slot, END};

/// One step of a compound operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    /// Create the path if missing, overwrite the slot.
    Set { path: Path, value: Value },
    /// Like set, but only writes when the slot is null or absent.
    SetNull { path: Path, value: Value },
    /// Splice values into a sequence at the terminal index.
    Insert { path: Path, values: Vec<Value> },
    /// Delete a map key, or splice `count` elements out of a sequence.
    Remove { path: Path, count: usize },
    /// Relocate within one container: sequence splice-and-reinsert, or
    /// map delete-and-set under the destination key.
    Move {
        path: Path,
        to: PathKey,
        count: usize,
    },
    /// Numeric increment; creates the path when missing.
    Inc { path: Path, by: f64 },
}

impl Component {
    /// Decode one component from its wire form, e.g.
    /// `{"op": "set", "p": ["a", "b"], "val": 5}`.
    pub fn decode(value: &Value) -> OtResult<Self> {
        let Some(obj) = value.as_object() else {
            return Err(OtError::InvalidOperationKind(format!(
                "component must be an object, got {value}"
            )));
        };
        let Some(kind) = obj.get("op").and_then(Value::as_str) else {
            return Err(OtError::InvalidOperationKind(
                "component is missing an 'op' kind".into(),
            ));
        };
        let path = decode_path(obj.get("p").unwrap_or(&Value::Null))?;

        match kind {
            "set" => Ok(Self::Set {
                path,
                value: obj.get("val").cloned().unwrap_or(Value::Null),
            }),
            "setNull" => Ok(Self::SetNull {
                path,
                value: obj.get("val").cloned().unwrap_or(Value::Null),
            }),
            "insert" => {
                let values = match obj.get("vals").and_then(Value::as_array) {
                    Some(vals) => vals.clone(),
                    None => vec![obj.get("val").cloned().unwrap_or(Value::Null)],
                };
                Ok(Self::Insert { path, values })
            }
            "remove" => Ok(Self::Remove {
                path,
                count: decode_count(obj.get("count"))?,
            }),
            "move" => {
                let to = match obj.get("to") {
                    Some(Value::String(s)) => PathKey::Field(s.clone()),
                    Some(Value::Number(n)) => match n.as_i64() {
                        Some(i) => PathKey::Index(i),
                        None => {
                            return Err(OtError::InvalidPath(format!(
                                "non-integer move target {n}"
                            )))
                        }
                    },
                    _ => {
                        return Err(OtError::InvalidPath(
                            "move requires a 'to' key or index".into(),
                        ))
                    }
                };
                Ok(Self::Move {
                    path,
                    to,
                    count: decode_count(obj.get("count"))?,
                })
            }
            "inc" => Ok(Self::Inc {
                path,
                by: obj.get("by").and_then(Value::as_f64).unwrap_or(1.0),
            }),
            other => Err(OtError::InvalidOperationKind(other.to_string())),
        }
    }
}

fn decode_count(value: Option<&Value>) -> OtResult<usize> {
    match value {
        None => Ok(1),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(n as usize),
            None => Err(OtError::InvalidPath(format!(
                "count must be a non-negative integer, got {v}"
            ))),
        },
    }
}

/// Decode a compound operation: either a single bare component or an
/// ordered list of them.
pub fn decode_op(value: &Value) -> OtResult<Vec<Component>> {
    match value {
        Value::Array(elems) => elems.iter().map(Component::decode).collect(),
        other => Ok(vec![Component::decode(other)?]),
    }
}

/// Fold a compound operation over a document, returning the final
/// document. `apply(doc, [])` returns `doc` unchanged.
pub fn apply(doc: Value, components: &[Component]) -> OtResult<Value> {
    let mut doc = doc;
    for component in components {
        apply_component(&mut doc, component)?;
    }
    Ok(doc)
}

/// Apply a single component in place, returning the prior value of
/// the written slot where one existed.
pub fn apply_component(doc: &mut Value, component: &Component) -> OtResult<Option<Value>> {
    match component {
        Component::Set { path, value } => match resolve(doc, path, true)? {
            Resolution::Found(slot) => write_slot(slot, value.clone()),
            Resolution::NotFound => Ok(None),
        },
        Component::SetNull { path, value } => match resolve(doc, path, true)? {
            Resolution::Found(slot) => {
                let occupied = matches!(slot.current(), Some(v) if !v.is_null());
                if occupied {
                    Ok(None)
                } else {
                    write_slot(slot, value.clone())
                }
            }
            Resolution::NotFound => Ok(None),
        },
        Component::Insert { path, values } => apply_insert(doc, path, values),
        Component::Remove { path, count } => apply_remove(doc, path, *count),
        Component::Move { path, to, count } => apply_move(doc, path, to, *count),
        Component::Inc { path, by } => apply_inc(doc, path, *by),
    }
}

fn write_slot(slot: Slot<'_>, value: Value) -> OtResult<Option<Value>> {
    let Slot { container, key } = slot;
    match (container, key) {
        (Value::Object(map), PathKey::Field(f)) => Ok(map.insert(f, value)),
        (Value::Array(arr), PathKey::Index(i)) => {
            let idx = sequence_index(i, arr.len())?;
            if idx < arr.len() {
                Ok(Some(std::mem::replace(&mut arr[idx], value)))
            } else {
                arr.push(value);
                Ok(None)
            }
        }
        // resolve() only hands out matching container/key pairs.
        _ => Err(OtError::InvalidPath("unresolvable slot".into())),
    }
}

fn apply_insert(doc: &mut Value, path: &Path, values: &[Value]) -> OtResult<Option<Value>> {
    let slot = match resolve(doc, path, false)? {
        Resolution::Found(slot) => slot,
        Resolution::NotFound => {
            return Err(OtError::InvalidPath("insert target not found".into()))
        }
    };
    let Slot { container, key } = slot;
    match (container, key) {
        (Value::Array(arr), PathKey::Index(i)) => {
            let idx = sequence_index(i, arr.len())?;
            if idx > arr.len() {
                return Err(OtError::InvalidPath(format!(
                    "insert index {idx} beyond sequence end {}",
                    arr.len()
                )));
            }
            for (offset, v) in values.iter().enumerate() {
                arr.insert(idx + offset, v.clone());
            }
            Ok(None)
        }
        _ => Err(OtError::PathTypeMismatch(
            "insert requires a sequence".into(),
        )),
    }
}

fn apply_remove(doc: &mut Value, path: &Path, count: usize) -> OtResult<Option<Value>> {
    let slot = match resolve(doc, path, false)? {
        Resolution::Found(slot) => slot,
        Resolution::NotFound => return Ok(None),
    };
    let Slot { container, key } = slot;
    match (container, key) {
        (Value::Object(map), PathKey::Field(f)) => Ok(map.remove(&f)),
        (Value::Array(arr), PathKey::Index(i)) => {
            let len = arr.len();
            let start = if i == END {
                len.saturating_sub(count)
            } else {
                let start = sequence_index(i, len)?;
                if start >= len {
                    // Unresolved slot: remove is a no-op.
                    return Ok(None);
                }
                start
            };
            let take = count.min(len - start);
            let removed: Vec<Value> = arr.drain(start..start + take).collect();
            Ok(Some(Value::Array(removed)))
        }
        _ => Err(OtError::InvalidPath("unresolvable slot".into())),
    }
}

fn apply_move(doc: &mut Value, path: &Path, to: &PathKey, count: usize) -> OtResult<Option<Value>> {
    let slot = match resolve(doc, path, false)? {
        Resolution::Found(slot) => slot,
        Resolution::NotFound => return Ok(None),
    };
    let Slot { container, key } = slot;
    match (container, key) {
        (Value::Object(map), PathKey::Field(f)) => {
            let PathKey::Field(dest) = to else {
                return Err(OtError::PathTypeMismatch(
                    "map move requires a string destination key".into(),
                ));
            };
            match map.remove(&f) {
                Some(v) => Ok(map.insert(dest.clone(), v)),
                None => Ok(None),
            }
        }
        (Value::Array(arr), PathKey::Index(i)) => {
            let PathKey::Index(t) = to else {
                return Err(OtError::PathTypeMismatch(
                    "sequence move requires an integer destination index".into(),
                ));
            };
            let len = arr.len();
            let src = if i == END {
                len.saturating_sub(count)
            } else {
                let src = sequence_index(i, len)?;
                if src >= len {
                    return Ok(None);
                }
                src
            };
            let take = count.min(len - src);
            let moved: Vec<Value> = arr.drain(src..src + take).collect();
            let tgt = sequence_index(*t, arr.len())?;
            if tgt > arr.len() {
                return Err(OtError::InvalidPath(format!(
                    "move target {tgt} beyond sequence end {}",
                    arr.len()
                )));
            }
            for (offset, v) in moved.into_iter().enumerate() {
                arr.insert(tgt + offset, v);
            }
            Ok(None)
        }
        _ => Err(OtError::InvalidPath("unresolvable slot".into())),
    }
}

fn apply_inc(doc: &mut Value, path: &Path, by: f64) -> OtResult<Option<Value>> {
    let slot = match resolve(doc, path, true)? {
        Resolution::Found(slot) => slot,
        Resolution::NotFound => return Ok(None),
    };
    let updated = match slot.current() {
        None | Some(Value::Null) => number(by),
        Some(Value::Number(n)) => {
            let int_sum = match (n.as_i64(), by.fract() == 0.0) {
                (Some(a), true) => a.checked_add(by as i64),
                _ => None,
            };
            match int_sum {
                Some(sum) => json!(sum),
                // Fractional amount, or the integer sum overflows.
                None => json!(n.as_f64().unwrap_or(0.0) + by),
            }
        }
        Some(other) => {
            return Err(OtError::InvalidIncrement(format!(
                "cannot increment {other}"
            )))
        }
    };
    write_slot(slot, updated)
}

/// Normalize a sequence index: `END` maps to the position after the
/// last element; any other negative index is invalid.
fn sequence_index(i: i64, len: usize) -> OtResult<usize> {
    if i == END {
        Ok(len)
    } else if i >= 0 {
        Ok(i as usize)
    } else {
        Err(OtError::InvalidPath(format!("negative sequence index {i}")))
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(value: Value) -> Vec<Component> {
        decode_op(&value).unwrap()
    }

    #[test]
    fn test_apply_empty_is_identity() {
        let doc = json!({"a": [1, 2, {"b": 3}]});
        assert_eq!(apply(doc.clone(), &[]).unwrap(), doc);
    }

    #[test]
    fn test_set_creates_nested_path() {
        let doc = apply(json!({}), &op(json!({"op": "set", "p": ["a", "b"], "val": 5}))).unwrap();
        assert_eq!(doc, json!({"a": {"b": 5}}));
    }

    #[test]
    fn test_set_then_inc_scenario() {
        let doc = apply(json!({}), &op(json!({"op": "set", "p": ["a", "b"], "val": 5}))).unwrap();
        let doc = apply(doc, &op(json!({"op": "inc", "p": ["a", "b"], "by": 3}))).unwrap();
        assert_eq!(doc, json!({"a": {"b": 8}}));
    }

    #[test]
    fn test_set_returns_prior_value() {
        let mut doc = json!({"a": 1});
        let components = op(json!({"op": "set", "p": ["a"], "val": 2}));
        let prior = apply_component(&mut doc, &components[0]).unwrap();
        assert_eq!(prior, Some(json!(1)));
        assert_eq!(doc, json!({"a": 2}));
    }

    #[test]
    fn test_set_null_only_fills_vacant() {
        let doc = json!({"a": 1, "b": null});
        let doc = apply(
            doc,
            &op(json!([
                {"op": "setNull", "p": ["a"], "val": 9},
                {"op": "setNull", "p": ["b"], "val": 9},
                {"op": "setNull", "p": ["c"], "val": 9}
            ])),
        )
        .unwrap();
        assert_eq!(doc, json!({"a": 1, "b": 9, "c": 9}));
    }

    #[test]
    fn test_insert_at_end_appends() {
        let doc = json!({"list": [1, 2]});
        let doc = apply(doc, &op(json!({"op": "insert", "p": ["list", -1], "val": 3}))).unwrap();
        assert_eq!(doc, json!({"list": [1, 2, 3]}));
    }

    #[test]
    fn test_insert_splices_multiple() {
        let doc = json!({"list": [1, 4]});
        let doc = apply(
            doc,
            &op(json!({"op": "insert", "p": ["list", 1], "vals": [2, 3]})),
        )
        .unwrap();
        assert_eq!(doc, json!({"list": [1, 2, 3, 4]}));
    }

    #[test]
    fn test_insert_requires_sequence() {
        let doc = json!({"a": {}});
        let err = apply(doc, &op(json!({"op": "insert", "p": ["a", "b"], "val": 1})));
        assert!(matches!(err, Err(OtError::PathTypeMismatch(_))));
    }

    #[test]
    fn test_remove_from_end() {
        let doc = json!({"list": [1, 2, 3, 4]});
        let doc = apply(
            doc,
            &op(json!({"op": "remove", "p": ["list", -1], "count": 2})),
        )
        .unwrap();
        assert_eq!(doc, json!({"list": [1, 2]}));
    }

    #[test]
    fn test_remove_map_key_and_unresolved_noop() {
        let doc = json!({"a": {"b": 1}});
        let doc = apply(
            doc,
            &op(json!([
                {"op": "remove", "p": ["a", "b"]},
                {"op": "remove", "p": ["missing", "x"]}
            ])),
        )
        .unwrap();
        assert_eq!(doc, json!({"a": {}}));
    }

    #[test]
    fn test_move_within_sequence() {
        let doc = json!({"list": ["a", "b", "c"]});
        let doc = apply(
            doc,
            &op(json!({"op": "move", "p": ["list", 0], "to": -1})),
        )
        .unwrap();
        assert_eq!(doc, json!({"list": ["b", "c", "a"]}));
    }

    #[test]
    fn test_move_map_key() {
        let doc = json!({"a": 1});
        let doc = apply(doc, &op(json!({"op": "move", "p": ["a"], "to": "b"}))).unwrap();
        assert_eq!(doc, json!({"b": 1}));
    }

    #[test]
    fn test_move_unresolved_noop() {
        let doc = json!({"list": []});
        let out = apply(
            doc.clone(),
            &op(json!({"op": "move", "p": ["list", 3], "to": 0})),
        )
        .unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn test_inc_absent_sets_amount() {
        let doc = apply(json!({}), &op(json!({"op": "inc", "p": ["n"], "by": 4}))).unwrap();
        assert_eq!(doc, json!({"n": 4}));
    }

    #[test]
    fn test_inc_defaults_to_one() {
        let doc = apply(json!({"n": 2}), &op(json!({"op": "inc", "p": ["n"]}))).unwrap();
        assert_eq!(doc, json!({"n": 3}));
    }

    #[test]
    fn test_inc_near_integer_boundary_widens() {
        let doc = apply(
            json!({"n": i64::MAX}),
            &op(json!({"op": "inc", "p": ["n"], "by": 1})),
        )
        .unwrap();
        // The sum no longer fits an i64; it continues as a float.
        let n = doc["n"].as_f64().unwrap();
        assert!(n >= i64::MAX as f64);
    }

    #[test]
    fn test_inc_non_numeric_fails() {
        let err = apply(
            json!({"n": "hello"}),
            &op(json!({"op": "inc", "p": ["n"]})),
        );
        assert!(matches!(err, Err(OtError::InvalidIncrement(_))));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(matches!(
            decode_op(&json!({"op": "frobnicate", "p": ["a"]})),
            Err(OtError::InvalidOperationKind(_))
        ));
    }
}
