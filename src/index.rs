use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::document::{DocumentId, field_ref};
use crate::value::IndexValue;

/// Composite unique index, e.g. `(organizationId, sku)`.
///
/// Sparse: documents where any indexed field is missing or null are not
/// indexed, so optional fields such as `barcode` only collide when set.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    pub fields: Vec<String>,
    tree: BTreeMap<Vec<IndexValue>, BTreeSet<DocumentId>>,
}

impl UniqueIndex {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            tree: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> String {
        self.fields.join("_")
    }

    fn key(&self, data: &Value) -> Option<Vec<IndexValue>> {
        self.fields
            .iter()
            .map(|f| match field_ref(data, f) {
                None | Some(Value::Null) => None,
                Some(v) => Some(IndexValue::from_json(v)),
            })
            .collect()
    }

    /// True if another document already holds this key.
    pub fn conflicts(&self, data: &Value, exclude_id: Option<DocumentId>) -> bool {
        let Some(key) = self.key(data) else {
            return false;
        };
        self.tree
            .get(&key)
            .is_some_and(|ids| ids.iter().any(|id| Some(*id) != exclude_id))
    }

    pub fn insert_value(&mut self, id: DocumentId, data: &Value) {
        if let Some(key) = self.key(data) {
            self.tree.entry(key).or_default().insert(id);
        }
    }

    pub fn remove_value(&mut self, id: DocumentId, data: &Value) {
        if let Some(key) = self.key(data) {
            if let Some(set) = self.tree.get_mut(&key) {
                set.remove(&id);
                if set.is_empty() {
                    self.tree.remove(&key);
                }
            }
        }
    }
}
