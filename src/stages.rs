//! Declarative entity descriptors and the stage builder that turns a
//! normalized filter set into an aggregation pipeline.
//!
//! Stage order is fixed: tenant `$match`, relation `$lookup`/`$unwind`,
//! computed `$addFields`, status `$match`, combined `$match`, `$project`,
//! `$sort`. Building never fails and performs no I/O; everything that can be
//! wrong with a descriptor is caught by [`EntityDescriptor::validate`].

use std::collections::HashSet;

use serde_json::{Map, Value, json};

use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::filter::{Filters, OrderBy, SortDirection, StatusFilter, TenantId};
use crate::policy::StockPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Looked up then unwound, keeping records without a match.
    One,
    Many,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub from: &'static str,
    pub local_field: &'static str,
    pub foreign_field: &'static str,
    pub as_field: &'static str,
    pub cardinality: Cardinality,
}

impl Relation {
    pub fn one(
        from: &'static str,
        local_field: &'static str,
        foreign_field: &'static str,
        as_field: &'static str,
    ) -> Self {
        Self {
            from,
            local_field,
            foreign_field,
            as_field,
            cardinality: Cardinality::One,
        }
    }

    pub fn many(
        from: &'static str,
        local_field: &'static str,
        foreign_field: &'static str,
        as_field: &'static str,
    ) -> Self {
        Self {
            from,
            local_field,
            foreign_field,
            as_field,
            cardinality: Cardinality::Many,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusKind {
    None,
    /// Stock-level buckets over a computed quantity.
    Buckets { field: &'static str },
    /// A stored status drawn from a closed set.
    Enum {
        field: &'static str,
        allowed: &'static [&'static str],
    },
}

/// Sortable fields, alias map and the default order.
#[derive(Debug, Clone)]
pub struct SortFields {
    pub fields: Vec<&'static str>,
    pub aliases: Vec<(&'static str, &'static str)>,
    pub default: (&'static str, SortDirection),
}

/// A validated sort: `field` is a real document path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: &'static str,
    pub direction: SortDirection,
}

impl SortFields {
    /// Defaults to newest first.
    pub fn new(fields: &[&'static str], aliases: &[(&'static str, &'static str)]) -> Self {
        Self {
            fields: fields.to_vec(),
            aliases: aliases.to_vec(),
            default: ("createdAt", SortDirection::Desc),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let known: HashSet<&str> = self.fields.iter().copied().collect();
        if !known.contains(self.default.0) {
            return Err(Error::InvalidDescriptor(format!(
                "default sort field '{}' is not sortable",
                self.default.0
            )));
        }
        for (alias, target) in &self.aliases {
            if known.contains(alias) {
                return Err(Error::InvalidDescriptor(format!(
                    "sort alias '{alias}' shadows a field"
                )));
            }
            if !known.contains(target) {
                return Err(Error::InvalidDescriptor(format!(
                    "sort alias '{alias}' points at unknown field '{target}'"
                )));
            }
        }
        Ok(())
    }

    /// Translate an alias into its field; unknown names are rejected.
    pub fn resolve(&self, order_by: Option<&OrderBy>) -> Result<SortSpec> {
        let Some(order_by) = order_by else {
            return Ok(SortSpec {
                field: self.default.0,
                direction: self.default.1,
            });
        };
        let requested = order_by.field.trim();
        let field = self
            .fields
            .iter()
            .copied()
            .find(|f| *f == requested)
            .or_else(|| {
                self.aliases
                    .iter()
                    .find(|(alias, _)| *alias == requested)
                    .map(|(_, target)| *target)
            })
            .ok_or_else(|| Error::InvalidSort(format!("cannot sort by '{requested}'")))?;
        Ok(SortSpec {
            field,
            direction: order_by.direction,
        })
    }
}

/// Everything the builder needs to know about one entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub collection: &'static str,
    pub relations: Vec<Relation>,
    /// `$addFields` entries, evaluated in order after the lookups.
    pub computed: Vec<(&'static str, Value)>,
    pub status: StatusKind,
    pub search_fields: Vec<&'static str>,
    /// Filter name to document path, e.g. `customerType` to `customer.customerType`.
    pub discriminators: Vec<(&'static str, &'static str)>,
    /// Intermediate arrays removed before records are returned.
    pub hidden: Vec<&'static str>,
    pub sort: SortFields,
    /// Field sets unique within a tenant; `organizationId` is prepended.
    pub unique: Vec<Vec<&'static str>>,
    /// Child collections deleted with the record: `(collection, foreign key)`.
    pub owned: Vec<(&'static str, &'static str)>,
    /// Id fields that must name a record of the same tenant: `(field, collection)`.
    pub references: Vec<(&'static str, &'static str)>,
    /// Collections whose records block a delete while they point here:
    /// `(collection, foreign key)`.
    pub restricted: Vec<(&'static str, &'static str)>,
}

impl EntityDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(Error::InvalidDescriptor("collection name is empty".into()));
        }
        self.sort.validate()?;
        if let StatusKind::Enum { allowed, .. } = &self.status {
            if allowed.is_empty() {
                return Err(Error::InvalidDescriptor(format!(
                    "{}: status enum has no values",
                    self.collection
                )));
            }
        }
        for fields in &self.unique {
            if fields.is_empty() || fields.contains(&"organizationId") {
                return Err(Error::InvalidDescriptor(format!(
                    "{}: unique field set must be non-empty and tenant-free",
                    self.collection
                )));
            }
        }
        Ok(())
    }
}

pub struct StageBuilder<'a> {
    descriptor: &'a EntityDescriptor,
    policy: StockPolicy,
}

impl<'a> StageBuilder<'a> {
    pub fn new(descriptor: &'a EntityDescriptor, policy: StockPolicy) -> Self {
        Self { descriptor, policy }
    }

    /// The full list pipeline, without pagination.
    pub fn build(&self, filters: &Filters, sort: SortSpec) -> Vec<Value> {
        let mut stages = vec![json!({ "$match": { "organizationId": filters.tenant.as_str() } })];
        self.push_denormalization(&mut stages);
        if let Some(status) = self.status_match(filters.status.as_ref()) {
            stages.push(status);
        }
        stages.push(self.combined_match(filters));
        self.push_projection(&mut stages);
        stages.push(json!({ "$sort": {
            sort.field: sort.direction.as_i32(),
            "_id": sort.direction.as_i32(),
        }}));
        stages
    }

    /// One denormalized record by id, same shape as a list record.
    pub fn build_single(&self, tenant: &TenantId, id: DocumentId) -> Vec<Value> {
        let mut stages = vec![json!({ "$match": {
            "organizationId": tenant.as_str(),
            "_id": id,
        }})];
        self.push_denormalization(&mut stages);
        self.push_projection(&mut stages);
        stages
    }

    fn push_denormalization(&self, stages: &mut Vec<Value>) {
        for rel in &self.descriptor.relations {
            stages.push(json!({ "$lookup": {
                "from": rel.from,
                "localField": rel.local_field,
                "foreignField": rel.foreign_field,
                "as": rel.as_field,
            }}));
            if rel.cardinality == Cardinality::One {
                stages.push(json!({ "$unwind": {
                    "path": format!("${}", rel.as_field),
                    "preserveNullAndEmptyArrays": true,
                }}));
            }
        }
        if !self.descriptor.computed.is_empty() {
            let fields: Map<String, Value> = self
                .descriptor
                .computed
                .iter()
                .map(|(name, expr)| (name.to_string(), expr.clone()))
                .collect();
            stages.push(json!({ "$addFields": fields }));
        }
    }

    fn status_match(&self, status: Option<&StatusFilter>) -> Option<Value> {
        let status = status?;
        match (&self.descriptor.status, status) {
            (StatusKind::Buckets { field }, StatusFilter::Buckets(buckets)) => {
                let mut ranges: Vec<Value> = buckets
                    .iter()
                    .map(|b| json!({ *field: self.policy.range(*b) }))
                    .collect();
                match ranges.len() {
                    0 => None,
                    1 => ranges.pop().map(|r| json!({ "$match": r })),
                    _ => Some(json!({ "$match": { "$or": ranges } })),
                }
            }
            (StatusKind::Enum { field, .. }, StatusFilter::Values(values)) if !values.is_empty() => {
                Some(json!({ "$match": { *field: { "$in": values } } }))
            }
            _ => None,
        }
    }

    fn combined_match(&self, filters: &Filters) -> Value {
        let mut cond = Map::new();
        cond.insert("organizationId".into(), json!(filters.tenant.as_str()));
        if let Some(pattern) = &filters.search {
            let clauses: Vec<Value> = self
                .descriptor
                .search_fields
                .iter()
                .map(|f| json!({ *f: { "$regex": pattern, "$options": "i" } }))
                .collect();
            if !clauses.is_empty() {
                cond.insert("$or".into(), Value::Array(clauses));
            }
        }
        for (path, value) in &filters.discriminators {
            cond.insert(path.clone(), json!(value));
        }
        json!({ "$match": cond })
    }

    fn push_projection(&self, stages: &mut Vec<Value>) {
        if self.descriptor.hidden.is_empty() {
            return;
        }
        let fields: Map<String, Value> = self
            .descriptor
            .hidden
            .iter()
            .map(|f| (f.to_string(), json!(0)))
            .collect();
        stages.push(json!({ "$project": fields }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{RawFilters, normalize};

    fn products() -> EntityDescriptor {
        EntityDescriptor {
            collection: "products",
            relations: vec![
                Relation::one("categories", "categoryId", "_id", "category"),
                Relation::many("stockItems", "_id", "productId", "stockItems"),
            ],
            computed: vec![(
                "totalStockQuantity",
                json!({ "$sum": "$stockItems.quantity" }),
            )],
            status: StatusKind::Buckets {
                field: "totalStockQuantity",
            },
            search_fields: vec!["name", "sku"],
            discriminators: vec![("category", "category.name")],
            hidden: vec!["stockItems"],
            sort: SortFields::new(
                &["name", "createdAt", "totalStockQuantity"],
                &[("stock", "totalStockQuantity")],
            ),
            unique: vec![vec!["sku"]],
            owned: vec![],
            references: vec![("categoryId", "categories")],
            restricted: vec![],
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("org1").unwrap()
    }

    fn stage_names(stages: &[Value]) -> Vec<String> {
        stages
            .iter()
            .filter_map(|s| s.as_object().and_then(|o| o.keys().next().cloned()))
            .collect()
    }

    #[test]
    fn stages_come_in_fixed_order() {
        let d = products();
        let raw = RawFilters::new().status("Low Stock").search("wid");
        let filters = normalize(tenant(), &raw, &d).unwrap();
        let sort = d.sort.resolve(None).unwrap();
        let stages = StageBuilder::new(&d, StockPolicy::default()).build(&filters, sort);
        assert_eq!(
            stage_names(&stages),
            vec![
                "$match", "$lookup", "$unwind", "$lookup", "$addFields", "$match", "$match",
                "$project", "$sort"
            ]
        );
        assert_eq!(stages[0], json!({"$match": {"organizationId": "org1"}}));
        assert_eq!(
            stages[5],
            json!({"$match": {"totalStockQuantity": {"$gt": 0, "$lt": 50}}})
        );
        assert_eq!(stages[6]["$match"]["organizationId"], "org1");
        assert_eq!(
            stages[6]["$match"]["$or"][1],
            json!({"sku": {"$regex": "wid", "$options": "i"}})
        );
        assert_eq!(
            stages[8],
            json!({"$sort": {"createdAt": -1, "_id": -1}})
        );
    }

    #[test]
    fn several_buckets_are_or_ed() {
        let d = products();
        let raw = RawFilters::new().statuses(&["In Stock", "Empty"]);
        let filters = normalize(tenant(), &raw, &d).unwrap();
        let stages = StageBuilder::new(&d, StockPolicy::default())
            .build(&filters, d.sort.resolve(None).unwrap());
        assert_eq!(
            stages[5],
            json!({"$match": {"$or": [
                {"totalStockQuantity": {"$gte": 50}},
                {"totalStockQuantity": {"$lte": 0}}
            ]}})
        );
    }

    #[test]
    fn no_status_means_no_status_stage() {
        let d = products();
        let filters = Filters::tenant_only(tenant());
        let stages = StageBuilder::new(&d, StockPolicy::default())
            .build(&filters, d.sort.resolve(None).unwrap());
        assert_eq!(stage_names(&stages).iter().filter(|s| *s == "$match").count(), 2);
    }

    #[test]
    fn policy_is_injected() {
        let d = products();
        let filters = normalize(tenant(), &RawFilters::new().status("In Stock"), &d).unwrap();
        let stages = StageBuilder::new(&d, StockPolicy::new(10, 2).unwrap())
            .build(&filters, d.sort.resolve(None).unwrap());
        assert_eq!(stages[5], json!({"$match": {"totalStockQuantity": {"$gte": 10}}}));
    }

    #[test]
    fn discriminators_join_the_combined_match() {
        let d = products();
        let raw = RawFilters::new().discriminator("category", "Tools");
        let filters = normalize(tenant(), &raw, &d).unwrap();
        let stages = StageBuilder::new(&d, StockPolicy::default())
            .build(&filters, d.sort.resolve(None).unwrap());
        assert_eq!(
            stages[5],
            json!({"$match": {"organizationId": "org1", "category.name": "Tools"}})
        );
    }

    #[test]
    fn alias_is_translated() {
        let d = products();
        let spec = d
            .sort
            .resolve(Some(&OrderBy::new("stock", SortDirection::parse("asc"))))
            .unwrap();
        assert_eq!(spec.field, "totalStockQuantity");
        assert_eq!(spec.direction, SortDirection::Asc);
        assert!(matches!(
            d.sort.resolve(Some(&OrderBy::asc("colour"))),
            Err(Error::InvalidSort(_))
        ));
    }

    #[test]
    fn bad_alias_fails_validation() {
        let mut d = products();
        d.sort.aliases.push(("qty", "quantity"));
        assert!(matches!(d.validate(), Err(Error::InvalidDescriptor(_))));

        let mut d = products();
        d.sort.aliases.push(("name", "createdAt"));
        assert!(d.validate().is_err());

        assert!(products().validate().is_ok());
    }

    #[test]
    fn single_record_pipeline_is_scoped() {
        let d = products();
        let stages = StageBuilder::new(&d, StockPolicy::default()).build_single(&tenant(), 7);
        assert_eq!(
            stages[0],
            json!({"$match": {"organizationId": "org1", "_id": 7}})
        );
        assert_eq!(stages.last().unwrap(), &json!({"$project": {"stockItems": 0}}));
    }
}
