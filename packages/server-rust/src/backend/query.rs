//! Filter matching, projection, sorting and update operators for the
//! in-memory backend. Covers what the catalog's operations need; it is not a
//! general query engine.

use std::cmp::Ordering;

use docbridge_core::{Document, Value};

use super::BackendError;

/// Resolves a dotted path (`a.b.c`) inside a document.
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

/// Sets a dotted path, creating intermediate documents as needed.
fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), BackendError> {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, tail)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Document(Document::new()));
            match child {
                Value::Document(inner) => set_path(inner, tail, value),
                other => Err(BackendError::invalid(
                    path,
                    format!("cannot descend into {}", other.type_name()),
                )),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) -> bool {
    match path.split_once('.') {
        None => doc.shift_remove(path).is_some(),
        Some((head, tail)) => match doc.get_mut(head) {
            Some(Value::Document(inner)) => unset_path(inner, tail),
            _ => false,
        },
    }
}

/// Total-ish ordering across comparable values; `None` for mixed types.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        #[allow(clippy::cast_precision_loss)]
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        #[allow(clippy::cast_precision_loss)]
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        (Value::ObjectId(x), Value::ObjectId(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b).map_or_else(|| a == b, Ordering::is_eq)
}

/// Equality against a field, where an array field matches if any element does.
fn field_equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(Value::Array(items)) if !matches!(expected, Value::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn is_operator_document(value: &Value) -> Option<&Document> {
    value
        .as_document()
        .filter(|doc| !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')))
}

/// Whether `doc` satisfies `filter`.
///
/// Supports field equality, dotted paths, `$and`/`$or`, and the operators
/// `$eq $ne $gt $gte $lt $lte $in $nin $exists`.
pub(crate) fn matches(doc: &Document, filter: &Document) -> Result<bool, BackendError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => sub_filters(key, condition)?
                .iter()
                .try_fold(true, |acc, f| Ok::<_, BackendError>(acc && matches(doc, f)?))?,
            "$or" => sub_filters(key, condition)?
                .iter()
                .try_fold(false, |acc, f| Ok::<_, BackendError>(acc || matches(doc, f)?))?,
            _ => {
                let field = get_path(doc, key);
                match is_operator_document(condition) {
                    Some(ops) => field_matches_operators(field, ops)?,
                    None => field_equals(field, condition),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(key: &str, condition: &'a Value) -> Result<Vec<&'a Document>, BackendError> {
    condition
        .as_array()
        .ok_or_else(|| BackendError::invalid(key, "expected an array of filters"))?
        .iter()
        .map(|v| {
            v.as_document()
                .ok_or_else(|| BackendError::invalid(key, "expected an array of filters"))
        })
        .collect()
}

fn field_matches_operators(field: Option<&Value>, ops: &Document) -> Result<bool, BackendError> {
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => field_equals(field, operand),
            "$ne" => !field_equals(field, operand),
            "$gt" => ordered(field, operand, Ordering::is_gt),
            "$gte" => ordered(field, operand, Ordering::is_ge),
            "$lt" => ordered(field, operand, Ordering::is_lt),
            "$lte" => ordered(field, operand, Ordering::is_le),
            "$in" => in_list(op, field, operand)?,
            "$nin" => !in_list(op, field, operand)?,
            "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
            other => return Err(BackendError::invalid(other, "unsupported query operator")),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn ordered(field: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    field
        .and_then(|value| compare(value, operand))
        .is_some_and(accept)
}

fn in_list(op: &str, field: Option<&Value>, operand: &Value) -> Result<bool, BackendError> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| BackendError::invalid(op, "expected an array"))?;
    Ok(candidates.iter().any(|candidate| field_equals(field, candidate)))
}

/// True when one dotted path is a strict ancestor of the other.
fn paths_collide(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.strip_prefix(short).is_some_and(|rest| rest.starts_with('.'))
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless
/// explicitly excluded.
///
/// Overlapping paths such as `a` and `a.b` are rejected, as a document
/// server does.
pub(crate) fn project(doc: &Document, projection: &Document) -> Result<Document, BackendError> {
    let truthy = |v: &Value| match v {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        _ => true,
    };

    let paths: Vec<&String> = projection.keys().collect();
    for (i, path) in paths.iter().enumerate() {
        if let Some(other) = paths[i + 1..].iter().find(|other| paths_collide(path, other)) {
            return Err(BackendError::invalid(
                "projection",
                format!("path collision between {path} and {other}"),
            ));
        }
    }

    let inclusive = projection
        .iter()
        .any(|(k, v)| k != "_id" && truthy(v));

    if inclusive {
        let mut out = Document::new();
        let keep_id = projection.get("_id").map_or(true, truthy);
        if keep_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for (path, flag) in projection {
            if path != "_id" && truthy(flag) {
                if let Some(value) = get_path(doc, path) {
                    set_path(&mut out, path, value.clone())?;
                }
            }
        }
        Ok(out)
    } else {
        let mut out = doc.clone();
        for path in projection.keys() {
            unset_path(&mut out, path);
        }
        Ok(out)
    }
}

/// Sorts documents by a `{field: 1 | -1}` specification.
pub(crate) fn sort(docs: &mut [Document], spec: &Document) {
    docs.sort_by(|a, b| {
        for (path, direction) in spec {
            let descending = direction.as_i64().is_some_and(|d| d < 0);
            let ord = match (get_path(a, path), get_path(b, path)) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// True when the update document is made of `$` operators rather than being
/// a replacement.
pub(crate) fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Applies `$set`, `$unset` and `$inc`. Returns whether the document changed.
pub(crate) fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, BackendError> {
    let before = doc.clone();
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| BackendError::invalid(op, "expected a document"))?;
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let next = match (get_path(doc, path), delta) {
                        (None, d @ (Value::Int(_) | Value::Float(_))) => d.clone(),
                        (Some(Value::Int(x)), Value::Int(d)) => Value::Int(x.saturating_add(*d)),
                        #[allow(clippy::cast_precision_loss)]
                        (Some(Value::Int(x)), Value::Float(d)) => Value::Float(*x as f64 + d),
                        #[allow(clippy::cast_precision_loss)]
                        (Some(Value::Float(x)), Value::Int(d)) => Value::Float(x + *d as f64),
                        (Some(Value::Float(x)), Value::Float(d)) => Value::Float(x + d),
                        _ => return Err(BackendError::invalid(path, "$inc needs numeric operands")),
                    };
                    set_path(doc, path, next)?;
                }
            }
            other => return Err(BackendError::invalid(other, "unsupported update operator")),
        }
    }
    Ok(*doc != before)
}

/// Seed document for an upsert: the filter's plain equality fields.
///
/// Fails when two equality paths conflict, e.g. `{"a": 1, "a.b": 2}`.
pub(crate) fn upsert_seed(filter: &Document) -> Result<Document, BackendError> {
    let mut seed = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        let value = match is_operator_document(condition) {
            Some(ops) => match ops.get("$eq") {
                Some(v) => v.clone(),
                None => continue,
            },
            None => condition.clone(),
        };
        set_path(&mut seed, key, value)?;
    }
    Ok(seed)
}
