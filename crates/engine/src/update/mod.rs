//! Update operator engine (spec.md §4.4).
//!
//! Operators are applied in the table's declared order, resolving the
//! Open Question on application order explicitly in favor of that order
//! (recorded in `DESIGN.md`). Each operator function takes the update
//! document's body for that operator and mutates the target document in
//! place.

use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::value::{Document, Timestamp, Value};

/// Equality for array operators (`$pull`/`$addToSet`): numeric coercion
/// first, then string, then boolean, then structural (spec.md §4.4).
pub fn operator_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => a == b,
    }
}

fn require_document(value: &Value, operator: &str) -> CorvidResult<&Document> {
    match value {
        Value::Document(doc) => Ok(doc),
        _ => Err(CorvidError::invalid_argument(format!("{operator} requires a document body"))),
    }
}

fn apply_set(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, value) in require_document(body, "$set")?.iter() {
        doc.set_path(path, value.clone());
    }
    Ok(())
}

fn apply_unset(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, _) in require_document(body, "$unset")?.iter() {
        doc.remove_path(path);
    }
    Ok(())
}

fn apply_inc(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, delta) in require_document(body, "$inc")?.iter() {
        let Some(delta) = delta.as_f64() else {
            return Err(CorvidError::invalid_argument("$inc amount must be numeric"));
        };
        match doc.get_path(path) {
            None => doc.set_path(path, numeric_like(delta, delta)),
            Some(current) => {
                if let Some(current) = current.as_f64() {
                    doc.set_path(path, numeric_like(current + delta, current));
                }
                // non-numeric current value: no-op, per spec.md §4.4.
            }
        }
    }
    Ok(())
}

/// Preserve integer-ness when both operands started as integers, mirroring
/// how `$inc 1` on an `I64` field should stay an `I64`.
fn numeric_like(result: f64, sample: f64) -> Value {
    if sample.fract() == 0.0 && result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Value::I64(result as i64)
    } else {
        Value::F64(result)
    }
}

fn apply_mul(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, factor) in require_document(body, "$mul")?.iter() {
        let Some(factor) = factor.as_f64() else {
            return Err(CorvidError::invalid_argument("$mul factor must be numeric"));
        };
        match doc.get_path(path) {
            None => doc.set_path(path, Value::I64(0)),
            Some(current) => {
                if let Some(current) = current.as_f64() {
                    doc.set_path(path, numeric_like(current * factor, current));
                }
            }
        }
    }
    Ok(())
}

fn apply_min_max(doc: &mut Document, body: &Value, keep_lesser: bool) -> CorvidResult<()> {
    let label = if keep_lesser { "$min" } else { "$max" };
    for (path, candidate) in require_document(body, label)?.iter() {
        match doc.get_path(path) {
            None => doc.set_path(path, candidate.clone()),
            Some(current) => {
                let (Some(c), Some(n)) = (current.as_f64(), candidate.as_f64()) else {
                    continue;
                };
                let replace = if keep_lesser { n < c } else { n > c };
                if replace {
                    doc.set_path(path, candidate.clone());
                }
            }
        }
    }
    Ok(())
}

fn apply_rename(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (from, to) in require_document(body, "$rename")?.iter() {
        let Value::String(to) = to else {
            return Err(CorvidError::invalid_argument("$rename target must be a string"));
        };
        if let Some(value) = doc.remove_path(from) {
            doc.set_path(to, value);
        }
    }
    Ok(())
}

fn apply_current_date(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, modifier) in require_document(body, "$currentDate")?.iter() {
        let now = Timestamp::now();
        let as_type = match modifier {
            Value::Document(spec) => spec.get("$type").and_then(|v| v.as_str()).unwrap_or("date").to_string(),
            Value::Bool(true) => "date".to_string(),
            _ => return Err(CorvidError::invalid_argument("$currentDate modifier is invalid")),
        };
        if as_type == "timestamp" {
            doc.set_path(path, Value::I64(now.as_secs() as i64));
        } else {
            doc.set_path(path, Value::Timestamp(now));
        }
    }
    Ok(())
}

/// Array operators read-modify-write the whole field since `Document`
/// doesn't expose a path-based mutable accessor.
fn mutate_array_field(
    doc: &mut Document,
    path: &str,
    f: impl FnOnce(&mut Vec<Value>),
) -> CorvidResult<()> {
    let mut arr = match doc.get_path(path) {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(CorvidError::invalid_argument(format!("field {path} is not an array"))),
        None => Vec::new(),
    };
    f(&mut arr);
    doc.set_path(path, Value::Array(arr));
    Ok(())
}

fn each_elements(value: &Value) -> Vec<Value> {
    match value {
        Value::Document(body) => match body.get("$each") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        other => vec![other.clone()],
    }
}

fn apply_push(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, spec) in require_document(body, "$push")?.iter() {
        let elements = each_elements(spec);
        mutate_array_field(doc, path, |arr| arr.extend(elements))?;
    }
    Ok(())
}

fn apply_add_to_set(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, spec) in require_document(body, "$addToSet")?.iter() {
        let elements = each_elements(spec);
        mutate_array_field(doc, path, |arr| {
            for candidate in elements {
                if !arr.iter().any(|existing| operator_equal(existing, &candidate)) {
                    arr.push(candidate);
                }
            }
        })?;
    }
    Ok(())
}

fn apply_pop(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, direction) in require_document(body, "$pop")?.iter() {
        let from_front = match direction.as_f64() {
            Some(n) if n < 0.0 => true,
            Some(n) if n > 0.0 => false,
            _ => return Err(CorvidError::invalid_argument("$pop requires -1 or 1")),
        };
        mutate_array_field(doc, path, |arr| {
            if arr.is_empty() {
                return;
            }
            if from_front {
                arr.remove(0);
            } else {
                arr.pop();
            }
        })?;
    }
    Ok(())
}

fn apply_pull(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, target) in require_document(body, "$pull")?.iter() {
        let target = target.clone();
        mutate_array_field(doc, path, |arr| arr.retain(|v| !operator_equal(v, &target)))?;
    }
    Ok(())
}

fn apply_pull_all(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, targets) in require_document(body, "$pullAll")?.iter() {
        let Value::Array(targets) = targets else {
            return Err(CorvidError::invalid_argument("$pullAll requires an array"));
        };
        let targets = targets.clone();
        mutate_array_field(doc, path, |arr| {
            arr.retain(|v| !targets.iter().any(|t| operator_equal(v, t)))
        })?;
    }
    Ok(())
}

fn apply_bit(doc: &mut Document, body: &Value) -> CorvidResult<()> {
    for (path, ops) in require_document(body, "$bit")?.iter() {
        let ops = require_document(ops, "$bit")?;
        let mut current = doc.get_path(path).and_then(|v| match v {
            Value::I64(i) => Some(*i),
            _ => None,
        }).unwrap_or(0);
        for key in ["and", "or", "xor"] {
            if let Some(operand) = ops.get(key) {
                let Value::I64(operand) = operand else {
                    return Err(CorvidError::invalid_argument("$bit operands must be integers"));
                };
                current = match key {
                    "and" => current & operand,
                    "or" => current | operand,
                    "xor" => current ^ operand,
                    _ => unreachable!(),
                };
            }
        }
        doc.set_path(path, Value::I64(current));
    }
    Ok(())
}

/// Apply an update document's operators to `doc` in spec.md §4.4's fixed
/// order, producing the post-update state. Direct (non-`$`) top-level
/// fields in `update` are treated as an implicit `$set`.
pub fn apply_update(doc: &mut Document, update: &Document) -> CorvidResult<()> {
    let mut implicit_set = Document::new();
    for (key, value) in update.iter() {
        if !key.starts_with('$') {
            implicit_set.set(key, value.clone());
        }
    }
    if !implicit_set.is_empty() {
        apply_set(doc, &Value::Document(implicit_set))?;
    }

    let ordered_operators: [(&str, fn(&mut Document, &Value) -> CorvidResult<()>); 13] = [
        ("$set", apply_set),
        ("$unset", apply_unset),
        ("$inc", apply_inc),
        ("$mul", apply_mul),
        ("$min", |d, b| apply_min_max(d, b, true)),
        ("$max", |d, b| apply_min_max(d, b, false)),
        ("$rename", apply_rename),
        ("$currentDate", apply_current_date),
        ("$push", apply_push),
        ("$addToSet", apply_add_to_set),
        ("$pop", apply_pop),
        ("$pull", apply_pull),
        ("$pullAll", apply_pull_all),
    ];
    for (name, apply) in ordered_operators {
        if let Some(body) = update.get(name) {
            apply(doc, body)?;
        }
    }
    if let Some(body) = update.get("$bit") {
        apply_bit(doc, body)?;
    }

    for (key, _) in update.iter() {
        if key.starts_with('$') && !KNOWN_OPERATORS.contains(&key) {
            return Err(CorvidError::invalid_argument(format!("unknown update operator {key}")));
        }
    }
    Ok(())
}

const KNOWN_OPERATORS: &[&str] = &[
    "$set", "$unset", "$inc", "$mul", "$min", "$max", "$rename", "$currentDate", "$push",
    "$addToSet", "$pop", "$pull", "$pullAll", "$bit",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(field: &str, value: Value) -> Document {
        let mut d = Document::new();
        d.set(field, value);
        d
    }

    fn update_with(op: &str, body: Document) -> Document {
        let mut u = Document::new();
        u.set(op, Value::Document(body));
        u
    }

    #[test]
    fn inc_on_missing_field_sets_value() {
        let mut doc = Document::new();
        let update = update_with("$inc", doc_with("counter", Value::I64(5)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("counter"), Some(&Value::I64(5)));
    }

    #[test]
    fn inc_on_non_numeric_is_noop() {
        let mut doc = doc_with("counter", Value::String("x".into()));
        let update = update_with("$inc", doc_with("counter", Value::I64(5)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("counter"), Some(&Value::String("x".into())));
    }

    #[test]
    fn mul_on_missing_field_sets_zero() {
        let mut doc = Document::new();
        let update = update_with("$mul", doc_with("x", Value::I64(10)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("x"), Some(&Value::I64(0)));
    }

    #[test]
    fn min_replaces_only_when_strictly_less() {
        let mut doc = doc_with("x", Value::I64(5));
        let update = update_with("$min", doc_with("x", Value::I64(10)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("x"), Some(&Value::I64(5)));

        let update = update_with("$min", doc_with("x", Value::I64(2)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("x"), Some(&Value::I64(2)));
    }

    #[test]
    fn rename_moves_value() {
        let mut doc = doc_with("old", Value::I64(1));
        let update = update_with("$rename", doc_with("old", Value::String("new".into())));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("old"), None);
        assert_eq!(doc.get("new"), Some(&Value::I64(1)));
    }

    #[test]
    fn push_with_each_appends_all() {
        let mut doc = Document::new();
        let mut push_body = Document::new();
        push_body.set("tags", Value::Document({
            let mut each = Document::new();
            each.set("$each", Value::Array(vec![Value::String("a".into()), Value::String("b".into())]));
            each
        }));
        let update = update_with("$push", push_body);
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("tags"), Some(&Value::Array(vec![Value::String("a".into()), Value::String("b".into())])));
    }

    #[test]
    fn add_to_set_skips_duplicates() {
        let mut doc = doc_with("tags", Value::Array(vec![Value::String("a".into())]));
        let update = update_with("$addToSet", doc_with("tags", Value::String("a".into())));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("tags"), Some(&Value::Array(vec![Value::String("a".into())])));
    }

    #[test]
    fn pop_negative_removes_first() {
        let mut doc = doc_with("arr", Value::Array(vec![Value::I64(1), Value::I64(2), Value::I64(3)]));
        let update = update_with("$pop", doc_with("arr", Value::I64(-1)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("arr"), Some(&Value::Array(vec![Value::I64(2), Value::I64(3)])));
    }

    #[test]
    fn pull_all_removes_every_listed_value() {
        let mut doc = doc_with("arr", Value::Array(vec![Value::I64(1), Value::I64(2), Value::I64(3)]));
        let update = update_with("$pullAll", doc_with("arr", Value::Array(vec![Value::I64(1), Value::I64(3)])));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("arr"), Some(&Value::Array(vec![Value::I64(2)])));
    }

    #[test]
    fn bit_applies_and_or_xor_in_order() {
        let mut doc = doc_with("flags", Value::I64(0b1010));
        let mut bit_ops = Document::new();
        bit_ops.set("and", Value::I64(0b1110));
        bit_ops.set("or", Value::I64(0b0001));
        let update = update_with("$bit", doc_with("flags", Value::Document(bit_ops)));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("flags"), Some(&Value::I64(0b1011)));
    }

    #[test]
    fn bare_field_acts_as_set() {
        let mut doc = Document::new();
        let mut update = Document::new();
        update.set("name", Value::String("Alice".into()));
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc.get("name"), Some(&Value::String("Alice".into())));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let mut doc = Document::new();
        let update = update_with("$frobnicate", Document::new());
        assert!(apply_update(&mut doc, &update).is_err());
    }
}
