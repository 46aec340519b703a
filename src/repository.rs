use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::document::DocumentId;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::filter::{OrderBy, RawFilters, TenantId, normalize};
use crate::model::{Invoice, InvoiceStatus, Stock, StatusSummary, StockItem};
use crate::paginate::{Page, PageRequest, paginated_aggregate};
use crate::policy::TenantPolicies;
use crate::stages::{EntityDescriptor, StageBuilder};
use crate::store::DocumentStore;
use crate::update::{apply_update, patch_to_update};

/// Tenant-scoped reads and writes for one entity.
///
/// Construction validates the entity's descriptor (sort aliases included) and
/// creates its per-tenant unique indexes, so a repository that exists can
/// always build its pipelines.
pub struct Repository<E: Entity, S: DocumentStore> {
    store: Arc<S>,
    policies: Arc<TenantPolicies>,
    descriptor: EntityDescriptor,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, S: DocumentStore> Clone for Repository<E, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policies: Arc::clone(&self.policies),
            descriptor: self.descriptor.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, S: DocumentStore> Repository<E, S> {
    pub fn new(store: Arc<S>, policies: Arc<TenantPolicies>) -> Result<Self> {
        let descriptor = E::descriptor();
        descriptor.validate()?;
        for fields in &descriptor.unique {
            let mut scoped = vec!["organizationId"];
            scoped.extend(fields.iter().copied());
            store.ensure_unique_index(descriptor.collection, &scoped)?;
        }
        Ok(Self {
            store,
            policies,
            descriptor,
            _entity: PhantomData,
        })
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Filter, sort and paginate in one aggregate call.
    pub fn find_many(
        &self,
        tenant: &TenantId,
        filters: &RawFilters,
        order_by: Option<&OrderBy>,
        page: PageRequest,
    ) -> Result<Page<E>> {
        let result = self.run_find_many(tenant, filters, order_by, page);
        match &result {
            Ok(page) => debug!(
                entity = E::NAME,
                %tenant,
                total_pages = page.total_pages,
                records = page.records.len(),
                "find_many"
            ),
            Err(e) => error!(
                entity = E::NAME,
                %tenant,
                kind = e.kind().as_str(),
                error = %e,
                "find_many failed"
            ),
        }
        result
    }

    fn run_find_many(
        &self,
        tenant: &TenantId,
        filters: &RawFilters,
        order_by: Option<&OrderBy>,
        page: PageRequest,
    ) -> Result<Page<E>> {
        let filters = normalize(tenant.clone(), filters, &self.descriptor)?;
        let sort = self.descriptor.sort.resolve(order_by)?;
        let policy = self.policies.policy_for(tenant);
        let stages = StageBuilder::new(&self.descriptor, policy).build(&filters, sort);
        paginated_aggregate(
            self.store.as_ref(),
            self.descriptor.collection,
            stages,
            &page,
        )
    }

    /// One record with its relations and derived fields.
    pub fn find_by_id(&self, tenant: &TenantId, id: DocumentId) -> Result<E> {
        let policy = self.policies.policy_for(tenant);
        let stages = StageBuilder::new(&self.descriptor, policy).build_single(tenant, id);
        let mut out = self
            .store
            .aggregate(self.descriptor.collection, &Value::Array(stages))?;
        if out.is_empty() {
            return Err(self.not_found(id));
        }
        Ok(serde_json::from_value(out.swap_remove(0))?)
    }

    pub fn create(&self, tenant: &TenantId, draft: E::Draft) -> Result<E> {
        E::validate_draft(&draft)?;
        self.check_references(tenant, &serde_json::to_value(&draft)?)?;
        let id = E::insert_draft(self.store.as_ref(), tenant, draft)?;
        info!(entity = E::NAME, %tenant, id, "created");
        self.find_by_id(tenant, id)
    }

    /// Apply a flat patch; `null` values remove optional fields.
    ///
    /// The patched record is checked as a draft before anything is written,
    /// so a rejected patch leaves the stored record untouched.
    pub fn update(&self, tenant: &TenantId, id: DocumentId, patch: &Value) -> Result<E> {
        let current = self
            .store
            .find_one(self.descriptor.collection, &self.scope(tenant, id))?
            .ok_or_else(|| self.not_found(id))?;
        self.check_patch(patch)?;
        self.check_references(tenant, patch)?;
        let update = patch_to_update(patch)?;
        if update.as_object().is_some_and(|u| !u.is_empty()) {
            self.check_patched(&current, patch, &update)?;
            self.store
                .update(self.descriptor.collection, &self.scope(tenant, id), &update)?;
        }
        info!(entity = E::NAME, %tenant, id, "updated");
        self.find_by_id(tenant, id)
    }

    /// Existence is checked in the tenant before deleting, so another
    /// tenant's id reads as not found. Owned child records go with it; a
    /// record still referenced from a restricted collection is kept.
    pub fn delete(&self, tenant: &TenantId, id: DocumentId) -> Result<()> {
        self.ensure_exists(tenant, id)?;
        for (collection, foreign_key) in &self.descriptor.restricted {
            let referrer = self.store.find_one(
                collection,
                &json!({ *foreign_key: id, "organizationId": tenant.as_str() }),
            )?;
            if referrer.is_some() {
                return Err(Error::InUse {
                    entity: E::NAME,
                    id,
                    by: *collection,
                });
            }
        }
        for (collection, foreign_key) in &self.descriptor.owned {
            self.store.delete(
                collection,
                &json!({ *foreign_key: id, "organizationId": tenant.as_str() }),
            )?;
        }
        self.store
            .delete(self.descriptor.collection, &self.scope(tenant, id))?;
        info!(entity = E::NAME, %tenant, id, "deleted");
        Ok(())
    }

    fn scope(&self, tenant: &TenantId, id: DocumentId) -> Value {
        json!({ "_id": id, "organizationId": tenant.as_str() })
    }

    fn not_found(&self, id: DocumentId) -> Error {
        Error::NotFound {
            entity: E::NAME,
            id,
        }
    }

    fn ensure_exists(&self, tenant: &TenantId, id: DocumentId) -> Result<()> {
        match self
            .store
            .find_one(self.descriptor.collection, &self.scope(tenant, id))?
        {
            Some(_) => Ok(()),
            None => Err(self.not_found(id)),
        }
    }

    /// Relations and derived fields are computed at read time and cannot be written.
    fn check_patch(&self, patch: &Value) -> Result<()> {
        let obj = patch
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("patch must be a JSON object".into()))?;
        let d = &self.descriptor;
        for key in obj.keys() {
            let root = key.split('.').next().unwrap_or(key);
            let derived = d.relations.iter().any(|r| r.as_field == root)
                || d.computed.iter().any(|(name, _)| *name == root)
                || d.hidden.iter().any(|h| *h == root);
            if derived {
                return Err(Error::InvalidDocument(format!(
                    "field '{key}' is derived and cannot be set"
                )));
            }
        }
        Ok(())
    }

    /// The patched document must still deserialize into a valid draft, and
    /// every patched field must be one the draft carries.
    fn check_patched(&self, current: &Value, patch: &Value, update: &Value) -> Result<()> {
        let before = serde_json::to_value(as_draft::<E>(current)?)?;
        let mut candidate = current.clone();
        apply_update(&mut candidate, update)?;
        let draft = as_draft::<E>(&candidate)?;
        E::validate_draft(&draft)?;
        let after = serde_json::to_value(&draft)?;

        let Some(fields) = patch.as_object() else {
            return Ok(());
        };
        for (key, value) in fields {
            let root = key.split('.').next().unwrap_or(key);
            let writable = if value.is_null() {
                before.get(root).is_some() || current.get(root).is_none()
            } else {
                after.get(root).is_some()
            };
            if !writable {
                return Err(Error::InvalidDocument(format!(
                    "field '{key}' cannot be set on a {}",
                    E::NAME
                )));
            }
        }
        Ok(())
    }

    fn check_references(&self, tenant: &TenantId, doc: &Value) -> Result<()> {
        for (field, collection) in &self.descriptor.references {
            let Some(target) = doc.get(*field).filter(|v| !v.is_null()) else {
                continue;
            };
            let found = self.store.find_one(
                collection,
                &json!({ "_id": target, "organizationId": tenant.as_str() }),
            )?;
            if found.is_none() {
                return Err(Error::InvalidDocument(format!(
                    "{field} {target} does not exist"
                )));
            }
        }
        Ok(())
    }
}

fn as_draft<E: Entity>(doc: &Value) -> Result<E::Draft> {
    serde_json::from_value(doc.clone())
        .map_err(|e| Error::InvalidDocument(format!("invalid {}: {e}", E::NAME)))
}

impl<S: DocumentStore> Repository<Stock, S> {
    /// Record `quantity` of a product at a stock location. The product's
    /// current price is copied onto the item.
    pub fn add_item(
        &self,
        tenant: &TenantId,
        stock_id: DocumentId,
        product_id: DocumentId,
        quantity: i64,
    ) -> Result<StockItem> {
        if quantity < 0 {
            return Err(Error::InvalidDocument(
                "quantity must not be negative".into(),
            ));
        }
        self.ensure_exists(tenant, stock_id)?;
        let product = self
            .store
            .find_one(
                "products",
                &json!({ "_id": product_id, "organizationId": tenant.as_str() }),
            )?
            .ok_or(Error::NotFound {
                entity: "product",
                id: product_id,
            })?;
        let price = product["price"].as_f64().unwrap_or(0.0);

        let id = self.store.insert(
            "stockItems",
            json!({
                "organizationId": tenant.as_str(),
                "stockId": stock_id,
                "productId": product_id,
                "quantity": quantity,
                "price": price,
            }),
        )?;
        let doc = self
            .store
            .find_one("stockItems", &json!({ "_id": id }))?
            .ok_or(Error::NotFound {
                entity: "stock item",
                id,
            })?;
        Ok(serde_json::from_value(doc)?)
    }

    pub fn remove_item(&self, tenant: &TenantId, item_id: DocumentId) -> Result<()> {
        let scope = json!({ "_id": item_id, "organizationId": tenant.as_str() });
        if self.store.find_one("stockItems", &scope)?.is_none() {
            return Err(Error::NotFound {
                entity: "stock item",
                id: item_id,
            });
        }
        self.store.delete("stockItems", &scope)?;
        Ok(())
    }
}

impl<S: DocumentStore> Repository<Invoice, S> {
    /// Invoice count and amount per status, statuses in name order.
    pub fn status_summary(&self, tenant: &TenantId) -> Result<Vec<StatusSummary>> {
        let pipeline = json!([
            { "$match": { "organizationId": tenant.as_str() } },
            { "$group": {
                "_id": "$status",
                "count": { "$sum": 1 },
                "totalAmount": { "$sum": "$totalAmount" },
            }},
            { "$sort": { "_id": 1 } },
        ]);
        let rows = self.store.aggregate(self.descriptor.collection, &pipeline)?;
        rows.into_iter()
            .map(|row| {
                let status: InvoiceStatus = serde_json::from_value(row["_id"].clone())?;
                Ok(StatusSummary {
                    status,
                    count: row["count"].as_u64().unwrap_or(0),
                    total_amount: row["totalAmount"].as_f64().unwrap_or(0.0),
                })
            })
            .collect()
    }
}
