use std::collections::BTreeMap;

use serde_json::Value;

use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::index::UniqueIndex;
use crate::query::{self, Query};
use crate::update::apply_update;

/// An in-memory collection of JSON documents keyed by an assigned `_id`.
///
/// Documents iterate in `_id` order, which is insertion order.
pub struct Collection {
    name: String,
    docs: BTreeMap<DocumentId, Value>,
    unique_indexes: Vec<UniqueIndex>,
    next_id: DocumentId,
}

impl Collection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            docs: BTreeMap::new(),
            unique_indexes: Vec::new(),
            next_id: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // -----------------------------------------------------------------------
    // Index management
    // -----------------------------------------------------------------------

    /// Create a composite unique index, backfilled from existing documents.
    /// Creating an index that already exists is a no-op.
    pub fn create_unique_index(&mut self, fields: Vec<String>) -> Result<String> {
        if let Some(existing) = self.unique_indexes.iter().find(|i| i.fields == fields) {
            return Ok(existing.name());
        }
        let mut idx = UniqueIndex::new(fields);
        for (&id, data) in &self.docs {
            if idx.conflicts(data, None) {
                return Err(Error::UniqueViolation { fields: idx.name() });
            }
            idx.insert_value(id, data);
        }
        let name = idx.name();
        self.unique_indexes.push(idx);
        Ok(name)
    }

    fn check_unique(
        indexes: &[UniqueIndex],
        data: &Value,
        exclude_id: Option<DocumentId>,
    ) -> Result<()> {
        match indexes.iter().find(|idx| idx.conflicts(data, exclude_id)) {
            Some(idx) => Err(Error::UniqueViolation { fields: idx.name() }),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // CRUD operations
    // -----------------------------------------------------------------------

    /// Insert a document. Returns the assigned `_id`.
    pub fn insert(&mut self, data: Value) -> Result<DocumentId> {
        let ids = self.insert_many(vec![data])?;
        Ok(ids[0])
    }

    /// Insert documents atomically: either all are stored or none
    /// (on a constraint violation, including one inside the batch).
    ///
    /// A document that already carries a positive integer `_id` keeps it;
    /// the others are numbered after the highest id seen so far.
    pub fn insert_many(&mut self, docs: Vec<Value>) -> Result<Vec<DocumentId>> {
        let mut staged_indexes = self.unique_indexes.clone();
        let mut prepared: Vec<(DocumentId, Value)> = Vec::with_capacity(docs.len());
        let mut next_id = self.next_id;

        for mut data in docs {
            let Some(obj) = data.as_object_mut() else {
                return Err(Error::InvalidDocument("document must be a JSON object".into()));
            };
            let id = match obj.get("_id") {
                None => next_id,
                Some(given) => given.as_u64().filter(|&id| id > 0).ok_or_else(|| {
                    Error::InvalidDocument(format!("_id must be a positive integer, got {given}"))
                })?,
            };
            if self.docs.contains_key(&id) || prepared.iter().any(|(taken, _)| *taken == id) {
                return Err(Error::UniqueViolation {
                    fields: "_id".into(),
                });
            }
            next_id = next_id.max(id + 1);
            obj.insert("_id".to_string(), Value::Number(id.into()));

            Self::check_unique(&staged_indexes, &data, None)?;
            for idx in &mut staged_indexes {
                idx.insert_value(id, &data);
            }
            prepared.push((id, data));
        }

        self.unique_indexes = staged_indexes;
        self.next_id = next_id;
        let mut ids = Vec::with_capacity(prepared.len());
        for (id, data) in prepared {
            self.docs.insert(id, data);
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn find(&self, query_json: &Value) -> Result<Vec<Value>> {
        let query = query::parse_query(query_json)?;
        Ok(self.find_query(&query))
    }

    pub fn find_query(&self, query: &Query) -> Vec<Value> {
        self.docs
            .values()
            .filter(|data| query::matches_value(query, data))
            .cloned()
            .collect()
    }

    pub fn find_one(&self, query_json: &Value) -> Result<Option<Value>> {
        let query = query::parse_query(query_json)?;
        Ok(self
            .docs
            .values()
            .find(|data| query::matches_value(&query, data))
            .cloned())
    }

    pub fn get(&self, id: DocumentId) -> Option<&Value> {
        self.docs.get(&id)
    }

    /// Apply `update_json` to every matching document atomically. Returns the
    /// number of documents modified.
    pub fn update(&mut self, query_json: &Value, update_json: &Value) -> Result<u64> {
        let query = query::parse_query(query_json)?;
        let mut staged_indexes = self.unique_indexes.clone();
        let mut changed = Vec::new();

        for (&id, data) in &self.docs {
            if !query::matches_value(&query, data) {
                continue;
            }
            let mut new_data = data.clone();
            apply_update(&mut new_data, update_json)?;
            for idx in &mut staged_indexes {
                idx.remove_value(id, data);
            }
            Self::check_unique(&staged_indexes, &new_data, Some(id))?;
            for idx in &mut staged_indexes {
                idx.insert_value(id, &new_data);
            }
            changed.push((id, new_data));
        }

        self.unique_indexes = staged_indexes;
        let count = changed.len() as u64;
        for (id, data) in changed {
            self.docs.insert(id, data);
        }
        Ok(count)
    }

    /// Delete documents matching a query. Returns the number deleted.
    pub fn delete(&mut self, query_json: &Value) -> Result<u64> {
        let query = query::parse_query(query_json)?;
        let ids: Vec<DocumentId> = self
            .docs
            .iter()
            .filter(|(_, data)| query::matches_value(&query, data))
            .map(|(&id, _)| id)
            .collect();

        for id in &ids {
            if let Some(data) = self.docs.remove(id) {
                for idx in &mut self.unique_indexes {
                    idx.remove_value(*id, &data);
                }
            }
        }
        Ok(ids.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products() -> Collection {
        let mut col = Collection::new("products");
        col.create_unique_index(vec!["organizationId".into(), "sku".into()])
            .unwrap();
        col
    }

    #[test]
    fn insert_and_get() {
        let mut col = products();
        let id = col.insert(json!({"name": "Widget"})).unwrap();
        let doc = col.get(id).unwrap();
        assert_eq!(doc["name"], "Widget");
        assert_eq!(doc["_id"], id);
        assert_eq!(col.name(), "products");
    }

    #[test]
    fn non_object_is_rejected() {
        let mut col = products();
        assert!(matches!(
            col.insert(json!([1, 2])),
            Err(Error::InvalidDocument(_))
        ));
        assert_eq!(col.count(), 0);
    }

    #[test]
    fn unique_index_enforced_per_tenant() {
        let mut col = products();
        col.insert(json!({"organizationId": "org1", "sku": "A"})).unwrap();
        col.insert(json!({"organizationId": "org2", "sku": "A"})).unwrap();
        let dup = col.insert(json!({"organizationId": "org1", "sku": "A"}));
        assert!(matches!(dup, Err(Error::UniqueViolation { .. })));
        assert_eq!(col.count(), 2);
    }

    #[test]
    fn insert_many_intra_batch_violation_rolls_back() {
        let mut col = products();
        let result = col.insert_many(vec![
            json!({"organizationId": "org1", "sku": "A"}),
            json!({"organizationId": "org1", "sku": "A"}),
        ]);
        assert!(result.is_err());
        assert_eq!(col.count(), 0);
        // ids are not burnt by the failed batch
        assert_eq!(col.insert(json!({"sku": "B"})).unwrap(), 1);
    }

    #[test]
    fn backfilled_index_detects_existing_duplicates() {
        let mut col = Collection::new("invoices");
        col.insert(json!({"organizationId": "org1", "invoiceNumber": "INV-1"}))
            .unwrap();
        col.insert(json!({"organizationId": "org1", "invoiceNumber": "INV-1"}))
            .unwrap();
        assert!(col
            .create_unique_index(vec!["organizationId".into(), "invoiceNumber".into()])
            .is_err());
    }

    #[test]
    fn given_ids_are_kept_and_numbering_continues_after_them() {
        let mut col = products();
        let ids = col
            .insert_many(vec![
                json!({"_id": 7, "organizationId": "org1", "sku": "A"}),
                json!({"organizationId": "org1", "sku": "B"}),
            ])
            .unwrap();
        assert_eq!(ids, vec![7, 8]);
        assert_eq!(col.insert(json!({"organizationId": "org1", "sku": "C"})).unwrap(), 9);

        let dup = col.insert(json!({"_id": 7, "organizationId": "org1", "sku": "D"}));
        assert!(matches!(dup, Err(Error::UniqueViolation { .. })));
        assert!(col.insert(json!({"_id": "x", "sku": "E"})).is_err());
        assert_eq!(col.count(), 3);
    }

    #[test]
    fn update_doc() {
        let mut col = products();
        let id = col
            .insert(json!({"organizationId": "org1", "sku": "A", "price": 5}))
            .unwrap();
        let n = col
            .update(&json!({"_id": id}), &json!({"$set": {"price": 7}}))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(col.get(id).unwrap()["price"], 7);
    }

    #[test]
    fn update_into_conflict_is_rejected() {
        let mut col = products();
        col.insert(json!({"organizationId": "org1", "sku": "A"})).unwrap();
        let b = col.insert(json!({"organizationId": "org1", "sku": "B"})).unwrap();
        let result = col.update(&json!({"_id": b}), &json!({"$set": {"sku": "A"}}));
        assert!(matches!(result, Err(Error::UniqueViolation { .. })));
        assert_eq!(col.get(b).unwrap()["sku"], "B");
    }

    #[test]
    fn update_same_doc_keeps_its_key() {
        let mut col = products();
        let a = col.insert(json!({"organizationId": "org1", "sku": "A"})).unwrap();
        col.update(&json!({"_id": a}), &json!({"$set": {"name": "x"}}))
            .unwrap();
        assert_eq!(col.get(a).unwrap()["name"], "x");
    }

    #[test]
    fn delete_frees_unique_key() {
        let mut col = products();
        col.insert(json!({"organizationId": "org1", "sku": "A"})).unwrap();
        assert_eq!(col.delete(&json!({"sku": "A"})).unwrap(), 1);
        assert!(col.insert(json!({"organizationId": "org1", "sku": "A"})).is_ok());
    }

    #[test]
    fn find_and_find_one() {
        let mut col = products();
        col.insert(json!({"organizationId": "org1", "sku": "A"})).unwrap();
        col.insert(json!({"organizationId": "org2", "sku": "B"})).unwrap();
        assert_eq!(col.find(&json!({"organizationId": "org1"})).unwrap().len(), 1);
        assert_eq!(
            col.find_one(&json!({"sku": "B"})).unwrap().unwrap()["organizationId"],
            "org2"
        );
        assert!(col.find_one(&json!({"sku": "Z"})).unwrap().is_none());
    }
}
