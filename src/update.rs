use serde_json::{Map, Value, json};

use crate::document::{remove_field, set_field};
use crate::error::{Error, Result};

/// Fields owned by the store and the tenant scope; patches may never touch them.
const PROTECTED_FIELDS: &[&str] = &["_id", "organizationId", "createdAt"];

/// Apply `$set` / `$unset` operators to `doc`, in the order they appear.
pub fn apply_update(doc: &mut Value, update: &Value) -> Result<()> {
    let obj = update
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("update must be an object".into()))?;

    for (op, fields) in obj {
        let fields = fields
            .as_object()
            .ok_or_else(|| Error::InvalidQuery(format!("{op} value must be an object")))?;
        check_protected(fields)?;
        match op.as_str() {
            "$set" => apply_set(doc, fields),
            "$unset" => apply_unset(doc, fields),
            _ => {
                return Err(Error::InvalidQuery(format!(
                    "unknown update operator: {op}"
                )));
            }
        }
    }
    Ok(())
}

/// Turn a flat patch into an update document: `null` values unset the field,
/// everything else is set.
pub fn patch_to_update(patch: &Value) -> Result<Value> {
    let obj = patch
        .as_object()
        .ok_or_else(|| Error::InvalidDocument("patch must be a JSON object".into()))?;
    let mut set = Map::new();
    let mut unset = Map::new();
    for (path, value) in obj {
        if value.is_null() {
            unset.insert(path.clone(), json!(""));
        } else {
            set.insert(path.clone(), value.clone());
        }
    }
    let mut update = Map::new();
    if !set.is_empty() {
        update.insert("$set".into(), Value::Object(set));
    }
    if !unset.is_empty() {
        update.insert("$unset".into(), Value::Object(unset));
    }
    Ok(Value::Object(update))
}

fn check_protected(fields: &Map<String, Value>) -> Result<()> {
    for path in fields.keys() {
        let root = path.split('.').next().unwrap_or(path);
        if PROTECTED_FIELDS.contains(&root) {
            return Err(Error::InvalidDocument(format!(
                "field '{path}' cannot be modified"
            )));
        }
    }
    Ok(())
}

fn apply_set(doc: &mut Value, fields: &Map<String, Value>) {
    for (path, value) in fields {
        set_field(doc, path, value.clone());
    }
}

fn apply_unset(doc: &mut Value, fields: &Map<String, Value>) {
    for path in fields.keys() {
        remove_field(doc, path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrite_existing() {
        let mut doc = json!({"name": "Widget", "price": 5});
        apply_update(&mut doc, &json!({"$set": {"price": 7}})).unwrap();
        assert_eq!(doc["price"], 7);
    }

    #[test]
    fn unset_removes_field() {
        let mut doc = json!({"name": "Widget", "description": "old"});
        apply_update(&mut doc, &json!({"$unset": {"description": ""}})).unwrap();
        assert!(doc.get("description").is_none());
    }

    #[test]
    fn tenant_field_is_protected() {
        let mut doc = json!({"organizationId": "org1"});
        let err = apply_update(&mut doc, &json!({"$set": {"organizationId": "org2"}}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
        assert_eq!(doc["organizationId"], "org1");
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let mut doc = json!({"count": 1});
        assert!(apply_update(&mut doc, &json!({"$inc": {"count": 1}})).is_err());
    }

    #[test]
    fn patch_splits_nulls_into_unset() {
        let update = patch_to_update(&json!({"name": "New", "description": null})).unwrap();
        assert_eq!(
            update,
            json!({"$set": {"name": "New"}, "$unset": {"description": ""}})
        );
    }
}
