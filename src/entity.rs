//! Per-entity stage providers.
//!
//! Each record type declares its collection, relations, computed fields,
//! searchable fields, status kind and sort aliases. [`crate::Repository`]
//! does the rest.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::filter::TenantId;
use crate::model::{
    Category, Customer, Invoice, InvoiceStatus, NewCategory, NewCustomer, NewInvoice, NewOrder,
    NewProduct, NewStock, NewSupplier, Order, OrderStatus, Product, Stock, Supplier,
};
use crate::stages::{EntityDescriptor, Relation, SortFields, StatusKind};
use crate::store::DocumentStore;

pub trait Entity: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Singular name used in errors and logs.
    const NAME: &'static str;
    /// Collection name, also the response key for lists.
    const COLLECTION: &'static str;

    type Draft: DeserializeOwned + Serialize + Send;

    fn descriptor() -> EntityDescriptor;

    fn validate_draft(_draft: &Self::Draft) -> Result<()> {
        Ok(())
    }

    /// Insert a validated draft for `tenant`; returns the new id.
    fn insert_draft<S: DocumentStore + ?Sized>(
        store: &S,
        tenant: &TenantId,
        draft: Self::Draft,
    ) -> Result<DocumentId> {
        let doc = stamp(tenant, serde_json::to_value(draft)?)?;
        store.insert(Self::COLLECTION, doc)
    }
}

/// Add the tenant and creation time to a draft document.
pub fn stamp(tenant: &TenantId, mut doc: Value) -> Result<Value> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| Error::InvalidDocument("record must be a JSON object".into()))?;
    obj.insert("organizationId".into(), json!(tenant.as_str()));
    obj.insert(
        "createdAt".into(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Ok(doc)
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidDocument(format!("{field} is required")));
    }
    Ok(())
}

fn require_non_negative(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidDocument(format!(
            "{field} must be a non-negative number"
        )));
    }
    Ok(())
}

impl Entity for Product {
    const NAME: &'static str = "product";
    const COLLECTION: &'static str = "products";
    type Draft = NewProduct;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![
                Relation::one("categories", "categoryId", "_id", "category"),
                Relation::many("stockItems", "_id", "productId", "stockItems"),
                Relation::many("orderLines", "_id", "productId", "orderLines"),
            ],
            computed: vec![(
                "totalStockQuantity",
                json!({ "$sum": "$stockItems.quantity" }),
            )],
            status: StatusKind::Buckets {
                field: "totalStockQuantity",
            },
            search_fields: vec!["name", "sku", "barcode", "description"],
            discriminators: vec![("category", "category.name")],
            hidden: vec!["stockItems"],
            sort: SortFields::new(
                &[
                    "name",
                    "sku",
                    "barcode",
                    "price",
                    "createdAt",
                    "totalStockQuantity",
                    "category.name",
                ],
                &[("stock", "totalStockQuantity"), ("category", "category.name")],
            ),
            unique: vec![vec!["sku"], vec!["barcode"]],
            owned: vec![("stockItems", "productId")],
            references: vec![("categoryId", "categories")],
            restricted: vec![("orderLines", "productId")],
        }
    }

    fn validate_draft(draft: &NewProduct) -> Result<()> {
        require_text(&draft.name, "name")?;
        require_text(&draft.sku, "sku")?;
        require_non_negative(draft.price, "price")
    }
}

impl Entity for Category {
    const NAME: &'static str = "category";
    const COLLECTION: &'static str = "categories";
    type Draft = NewCategory;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![
                Relation::many("products", "_id", "categoryId", "products"),
                Relation::many("stockItems", "products._id", "productId", "stockItems"),
            ],
            computed: vec![
                ("productCount", json!({ "$size": "$products" })),
                (
                    "totalStockQuantity",
                    json!({ "$sum": "$stockItems.quantity" }),
                ),
            ],
            status: StatusKind::Buckets {
                field: "totalStockQuantity",
            },
            search_fields: vec!["name", "description"],
            discriminators: vec![],
            hidden: vec!["products", "stockItems"],
            sort: SortFields::new(
                &[
                    "name",
                    "description",
                    "createdAt",
                    "productCount",
                    "totalStockQuantity",
                ],
                &[("products", "productCount"), ("stock", "totalStockQuantity")],
            ),
            unique: vec![vec!["name"]],
            owned: vec![],
            references: vec![],
            restricted: vec![("products", "categoryId")],
        }
    }

    fn validate_draft(draft: &NewCategory) -> Result<()> {
        require_text(&draft.name, "name")
    }
}

impl Entity for Stock {
    const NAME: &'static str = "stock";
    const COLLECTION: &'static str = "stocks";
    type Draft = NewStock;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![Relation::many("stockItems", "_id", "stockId", "stockItems")],
            computed: vec![("totalQuantity", json!({ "$sum": "$stockItems.quantity" }))],
            status: StatusKind::Buckets {
                field: "totalQuantity",
            },
            search_fields: vec!["name", "location"],
            discriminators: vec![],
            hidden: vec![],
            sort: SortFields::new(
                &["name", "location", "createdAt", "totalQuantity"],
                &[("quantity", "totalQuantity"), ("stock", "totalQuantity")],
            ),
            unique: vec![vec!["name"]],
            owned: vec![("stockItems", "stockId")],
            references: vec![],
            restricted: vec![],
        }
    }

    fn validate_draft(draft: &NewStock) -> Result<()> {
        require_text(&draft.name, "name")
    }
}

impl Entity for Customer {
    const NAME: &'static str = "customer";
    const COLLECTION: &'static str = "customers";
    type Draft = NewCustomer;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![],
            computed: vec![],
            status: StatusKind::None,
            search_fields: vec!["name", "email"],
            discriminators: vec![("customerType", "customerType")],
            hidden: vec![],
            sort: SortFields::new(&["name", "email", "customerType", "createdAt"], &[]),
            unique: vec![],
            owned: vec![],
            references: vec![],
            restricted: vec![("orders", "customerId")],
        }
    }

    fn validate_draft(draft: &NewCustomer) -> Result<()> {
        require_text(&draft.name, "name")
    }
}

impl Entity for Supplier {
    const NAME: &'static str = "supplier";
    const COLLECTION: &'static str = "suppliers";
    type Draft = NewSupplier;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![],
            computed: vec![],
            status: StatusKind::None,
            search_fields: vec!["name", "email"],
            discriminators: vec![],
            hidden: vec![],
            sort: SortFields::new(&["name", "email", "createdAt"], &[]),
            unique: vec![],
            owned: vec![],
            references: vec![],
            restricted: vec![("orders", "supplierId")],
        }
    }

    fn validate_draft(draft: &NewSupplier) -> Result<()> {
        require_text(&draft.name, "name")
    }
}

impl Entity for Order {
    const NAME: &'static str = "order";
    const COLLECTION: &'static str = "orders";
    type Draft = NewOrder;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![
                Relation::one("customers", "customerId", "_id", "customer"),
                Relation::one("suppliers", "supplierId", "_id", "supplier"),
                Relation::many("orderLines", "_id", "orderId", "orderLines"),
            ],
            computed: vec![],
            status: StatusKind::Enum {
                field: "status",
                allowed: OrderStatus::ALL,
            },
            search_fields: vec!["orderNumber", "customer.name", "supplier.name"],
            discriminators: vec![
                ("orderType", "orderType"),
                ("customerType", "customer.customerType"),
            ],
            hidden: vec![],
            sort: SortFields::new(
                &[
                    "orderNumber",
                    "orderDate",
                    "status",
                    "orderType",
                    "totalAmount",
                    "createdAt",
                    "customer.name",
                    "supplier.name",
                ],
                &[
                    ("number", "orderNumber"),
                    ("date", "orderDate"),
                    ("amount", "totalAmount"),
                    ("customer", "customer.name"),
                    ("supplier", "supplier.name"),
                ],
            ),
            unique: vec![vec!["orderNumber"]],
            owned: vec![("orderLines", "orderId")],
            references: vec![("customerId", "customers"), ("supplierId", "suppliers")],
            restricted: vec![("invoices", "orderId")],
        }
    }

    fn validate_draft(draft: &NewOrder) -> Result<()> {
        require_text(&draft.order_number, "orderNumber")?;
        for line in &draft.lines {
            if line.quantity <= 0 {
                return Err(Error::InvalidDocument(
                    "order line quantity must be positive".into(),
                ));
            }
            require_non_negative(line.unit_price, "unitPrice")?;
        }
        Ok(())
    }

    /// Lines go to `orderLines`; the order stores the computed total.
    fn insert_draft<S: DocumentStore + ?Sized>(
        store: &S,
        tenant: &TenantId,
        draft: NewOrder,
    ) -> Result<DocumentId> {
        for line in &draft.lines {
            let product = store.find_one(
                "products",
                &json!({ "_id": line.product_id, "organizationId": tenant.as_str() }),
            )?;
            if product.is_none() {
                return Err(Error::InvalidDocument(format!(
                    "product {} does not exist",
                    line.product_id
                )));
            }
        }

        let total = draft.total_amount();
        let mut doc = serde_json::to_value(&draft)?;
        if let Some(obj) = doc.as_object_mut() {
            obj.remove("lines");
            obj.insert("totalAmount".into(), json!(total));
        }
        let order_id = store.insert(Self::COLLECTION, stamp(tenant, doc)?)?;

        for line in draft.lines {
            let mut line_doc = serde_json::to_value(line)?;
            if let Some(obj) = line_doc.as_object_mut() {
                obj.insert("orderId".into(), json!(order_id));
                obj.insert("organizationId".into(), json!(tenant.as_str()));
            }
            store.insert("orderLines", line_doc)?;
        }
        Ok(order_id)
    }
}

impl Entity for Invoice {
    const NAME: &'static str = "invoice";
    const COLLECTION: &'static str = "invoices";
    type Draft = NewInvoice;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            collection: Self::COLLECTION,
            relations: vec![
                Relation::one("orders", "orderId", "_id", "order"),
                Relation::one("customers", "order.customerId", "_id", "order.customer"),
                Relation::one("suppliers", "order.supplierId", "_id", "order.supplier"),
                Relation::many("orderLines", "order._id", "orderId", "order.orderLines"),
            ],
            computed: vec![],
            status: StatusKind::Enum {
                field: "status",
                allowed: InvoiceStatus::ALL,
            },
            search_fields: vec![
                "invoiceNumber",
                "order.customer.name",
                "order.supplier.name",
            ],
            discriminators: vec![("customerType", "order.customer.customerType")],
            hidden: vec![],
            sort: SortFields::new(
                &[
                    "invoiceNumber",
                    "issueDate",
                    "dueDate",
                    "totalAmount",
                    "status",
                    "createdAt",
                    "order.customer.name",
                ],
                &[
                    ("number", "invoiceNumber"),
                    ("date", "issueDate"),
                    ("due", "dueDate"),
                    ("amount", "totalAmount"),
                    ("customer", "order.customer.name"),
                ],
            ),
            unique: vec![vec!["invoiceNumber"]],
            owned: vec![],
            references: vec![("orderId", "orders")],
            restricted: vec![],
        }
    }

    fn validate_draft(draft: &NewInvoice) -> Result<()> {
        require_text(&draft.invoice_number, "invoiceNumber")?;
        require_non_negative(draft.total_amount, "totalAmount")?;
        if draft.due_date < draft.issue_date {
            return Err(Error::InvalidDocument(
                "dueDate must not precede issueDate".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_descriptor_validates() {
        Product::descriptor().validate().unwrap();
        Category::descriptor().validate().unwrap();
        Stock::descriptor().validate().unwrap();
        Customer::descriptor().validate().unwrap();
        Supplier::descriptor().validate().unwrap();
        Order::descriptor().validate().unwrap();
        Invoice::descriptor().validate().unwrap();
    }

    #[test]
    fn stock_reads_its_own_collection() {
        assert_eq!(Stock::descriptor().collection, "stocks");
    }

    #[test]
    fn stamp_sets_tenant_and_creation_time() {
        let tenant = TenantId::new("org1").unwrap();
        let doc = stamp(&tenant, json!({"name": "Tools"})).unwrap();
        assert_eq!(doc["organizationId"], "org1");
        assert!(doc["createdAt"].as_str().unwrap().ends_with('Z'));
        assert!(stamp(&tenant, json!("nope")).is_err());
    }

    #[test]
    fn drafts_are_validated() {
        let bad = NewProduct {
            name: "Widget".into(),
            sku: " ".into(),
            barcode: None,
            price: 1.0,
            description: None,
            category_id: None,
        };
        assert!(matches!(
            Product::validate_draft(&bad),
            Err(Error::InvalidDocument(_))
        ));
        let negative = NewProduct {
            sku: "W-1".into(),
            price: -1.0,
            ..bad
        };
        assert!(Product::validate_draft(&negative).is_err());
    }
}
