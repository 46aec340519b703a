use serde_json::{Value, json};

pub type DocumentId = u64;

/// Resolve a dotted path, returning `Value::Null` when any segment is missing.
///
/// Arrays along the path are traversed element-wise, so `"stockItems.quantity"`
/// on a document holding an array of stock items yields the array of their
/// quantities.
pub fn resolve_field(doc: &Value, path: &str) -> Value {
    let parts: Vec<&str> = path.split('.').collect();
    resolve_parts(doc, &parts)
}

fn resolve_parts(current: &Value, parts: &[&str]) -> Value {
    let Some((head, rest)) = parts.split_first() else {
        return current.clone();
    };
    match current {
        Value::Object(map) => match map.get(*head) {
            Some(v) => resolve_parts(v, rest),
            None => Value::Null,
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_parts(item, parts))
                .filter(|v| !v.is_null())
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Borrowing lookup without array traversal; `None` means the field is absent.
pub fn field_ref<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// True when every segment before the last one resolves to an object.
pub fn parent_is_object(doc: &Value, path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((parent, _)) => field_ref(doc, parent).is_some_and(Value::is_object),
        None => doc.is_object(),
    }
}

pub fn set_field(doc: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, part) in parts.iter().enumerate() {
        let Value::Object(map) = current else {
            return;
        };
        if i == parts.len() - 1 {
            map.insert(part.to_string(), value);
            return;
        }
        if !map.get(*part).is_some_and(Value::is_object) {
            map.insert(part.to_string(), json!({}));
        }
        let Some(next) = map.get_mut(*part) else {
            return;
        };
        current = next;
    }
}

pub fn remove_field(doc: &mut Value, path: &str) {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    };
    let mut current = &mut *doc;
    if let Some(parent) = parent {
        for part in parent.split('.') {
            match current {
                Value::Object(map) => match map.get_mut(part) {
                    Some(v) => current = v,
                    None => return,
                },
                _ => return,
            }
        }
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

pub fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
