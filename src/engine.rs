use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tracing::debug;

use crate::collection::Collection;
use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::query::Query;
use crate::store::DocumentStore;

fn poisoned<T>(_: T) -> Error {
    Error::Unavailable("collection lock poisoned".into())
}

/// Embedded in-memory document database. Manages multiple collections.
///
/// Thread-safe: a `RwLock` guards the collection map and each collection has
/// its own `RwLock`, so reads on different collections never block each other
/// and reads on the same collection proceed concurrently.
#[derive(Default)]
pub struct Database {
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the collection, creating it on first use.
    fn collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        {
            let cols = self.collections.read().map_err(poisoned)?;
            if let Some(col) = cols.get(name) {
                return Ok(Arc::clone(col));
            }
        }
        let mut cols = self.collections.write().map_err(poisoned)?;
        let col = cols
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::new(name))));
        Ok(Arc::clone(col))
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let cols = self.collections.read().map_err(poisoned)?;
        let mut names: Vec<String> = cols.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocumentId>> {
        let col = self.collection(collection)?;
        let mut col = col.write().map_err(poisoned)?;
        col.insert_many(docs)
    }

    pub fn find(&self, collection: &str, query: &Value) -> Result<Vec<Value>> {
        let col = self.collection(collection)?;
        let col = col.read().map_err(poisoned)?;
        col.find(query)
    }

    fn find_query(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
        let col = self.collection(collection)?;
        let col = col.read().map_err(poisoned)?;
        Ok(col.find_query(query))
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let col = self.collection(collection)?;
        let col = col.read().map_err(poisoned)?;
        Ok(col.count())
    }

    /// Load `{ "<collection>": [doc, ...], ... }` fixtures. Each collection's
    /// batch is inserted atomically. `_id`s given in the fixture are kept, so
    /// references between collections resolve whatever the file order.
    pub fn load_fixtures(&self, fixtures: &Value) -> Result<usize> {
        let obj = fixtures
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("fixtures must be a JSON object".into()))?;
        let mut total = 0;
        for (name, docs) in obj {
            let docs = docs.as_array().ok_or_else(|| {
                Error::InvalidDocument(format!("fixtures for '{name}' must be an array"))
            })?;
            total += self.insert_many(name, docs.clone())?.len();
        }
        Ok(total)
    }
}

impl DocumentStore for Database {
    fn insert(&self, collection: &str, doc: Value) -> Result<DocumentId> {
        let col = self.collection(collection)?;
        let mut col = col.write().map_err(poisoned)?;
        col.insert(doc)
    }

    fn find_one(&self, collection: &str, query: &Value) -> Result<Option<Value>> {
        let col = self.collection(collection)?;
        let col = col.read().map_err(poisoned)?;
        col.find_one(query)
    }

    fn update(&self, collection: &str, query: &Value, update: &Value) -> Result<u64> {
        let col = self.collection(collection)?;
        let mut col = col.write().map_err(poisoned)?;
        col.update(query, update)
    }

    fn delete(&self, collection: &str, query: &Value) -> Result<u64> {
        let col = self.collection(collection)?;
        let mut col = col.write().map_err(poisoned)?;
        col.delete(query)
    }

    fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> Result<()> {
        let col = self.collection(collection)?;
        let mut col = col.write().map_err(poisoned)?;
        col.create_unique_index(fields.iter().map(|f| f.to_string()).collect())?;
        Ok(())
    }

    fn aggregate(&self, collection: &str, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::parse(pipeline_json)?;
        let (leading_match, start_idx) = pipeline.take_leading_match();

        let initial_docs = match leading_match {
            Some(q) => self.find_query(collection, q)?,
            None => self.find(collection, &json!({}))?,
        };
        debug!(
            collection,
            stages = pipeline.len(),
            scanned = initial_docs.len(),
            "running aggregate"
        );

        let lookup_fn = |foreign: &str, query: &Value| -> Result<Vec<Value>> {
            self.find(foreign, query)
        };
        pipeline.execute_from(start_idx, initial_docs, &lookup_fn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_created_on_first_use() {
        let db = Database::new();
        db.insert("b", json!({"x": 1})).unwrap();
        db.insert("a", json!({"x": 2})).unwrap();
        assert_eq!(db.list_collections().unwrap(), vec!["a", "b"]);
        assert_eq!(db.count("a").unwrap(), 1);
    }

    #[test]
    fn aggregate_with_lookup_across_collections() {
        let db = Database::new();
        let cat = db.insert("categories", json!({"name": "Tools"})).unwrap();
        db.insert("products", json!({"name": "Hammer", "categoryId": cat}))
            .unwrap();
        db.insert("products", json!({"name": "Loose"})).unwrap();

        let out = db
            .aggregate(
                "products",
                &json!([
                    {"$lookup": {"from": "categories", "localField": "categoryId",
                                 "foreignField": "_id", "as": "category"}},
                    {"$unwind": {"path": "$category", "preserveNullAndEmptyArrays": true}},
                    {"$sort": {"name": 1}}
                ]),
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["category"]["name"], "Tools");
        assert!(out[1].get("category").is_none());
    }

    #[test]
    fn fixtures_load_per_collection() {
        let db = Database::new();
        let n = db
            .load_fixtures(&json!({"customers": [{"name": "A"}, {"name": "B"}]}))
            .unwrap();
        assert_eq!(n, 2);
        assert!(db.load_fixtures(&json!({"customers": {}})).is_err());
    }

    #[test]
    fn fixture_ids_survive_so_references_resolve() {
        let db = Database::new();
        db.load_fixtures(&json!({
            "products": [{"_id": 3, "name": "Widget", "categoryId": 12}],
            "categories": [{"_id": 12, "name": "Tools"}],
        }))
        .unwrap();
        let out = db
            .aggregate(
                "products",
                &json!([
                    {"$lookup": {"from": "categories", "localField": "categoryId",
                                 "foreignField": "_id", "as": "category"}},
                    {"$unwind": {"path": "$category", "preserveNullAndEmptyArrays": true}},
                ]),
            )
            .unwrap();
        assert_eq!(out[0]["_id"], 3);
        assert_eq!(out[0]["category"]["name"], "Tools");
    }

    #[test]
    fn delete_and_update_through_store_trait() {
        let db = Database::new();
        let id = db.insert("orders", json!({"status": "Pending"})).unwrap();
        assert_eq!(
            db.update("orders", &json!({"_id": id}), &json!({"$set": {"status": "Shipped"}}))
                .unwrap(),
            1
        );
        assert_eq!(
            db.find_one("orders", &json!({"_id": id})).unwrap().unwrap()["status"],
            "Shipped"
        );
        assert_eq!(db.delete("orders", &json!({"_id": id})).unwrap(), 1);
    }
}
