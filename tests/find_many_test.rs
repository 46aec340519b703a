//! List queries through the repositories against the embedded store.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;

use wareflow::model::{
    Category, Customer, Invoice, InvoiceStatus, NewCategory, NewCustomer, NewInvoice, NewOrder,
    NewOrderLine, NewProduct, NewStock, Order, OrderStatus, OrderType, Product, Stock,
};
use wareflow::{
    Database, DocumentStore, Error, ErrorKind, OrderBy, PageRequest, PageSize, RawFilters,
    Repository, StockBucket, StockPolicy, TenantId, TenantPolicies,
};

struct Fixture {
    db: Arc<Database>,
    products: Repository<Product, Database>,
    categories: Repository<Category, Database>,
    stocks: Repository<Stock, Database>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_policies(TenantPolicies::default())
    }

    fn with_policies(policies: TenantPolicies) -> Self {
        let db = Arc::new(Database::new());
        let policies = Arc::new(policies);
        Self {
            products: Repository::new(Arc::clone(&db), Arc::clone(&policies)).unwrap(),
            categories: Repository::new(Arc::clone(&db), Arc::clone(&policies)).unwrap(),
            stocks: Repository::new(Arc::clone(&db), policies).unwrap(),
            db,
        }
    }

    /// A product holding `qty` units in the tenant's only warehouse.
    fn product(&self, org: &TenantId, name: &str, qty: i64) -> u64 {
        let stock = match self
            .db
            .find_one("stocks", &json!({"organizationId": org.as_str()}))
            .unwrap()
        {
            Some(s) => s["_id"].as_u64().unwrap(),
            None => {
                self.stocks
                    .create(org, NewStock { name: "Main".into(), location: None })
                    .unwrap()
                    .id
            }
        };
        let product = self
            .products
            .create(
                org,
                NewProduct {
                    name: name.into(),
                    sku: format!("{name}-sku"),
                    barcode: None,
                    price: 1.0,
                    description: None,
                    category_id: None,
                },
            )
            .unwrap();
        if qty > 0 {
            self.stocks.add_item(org, stock, product.id, qty).unwrap();
        }
        product.id
    }
}

fn org(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

fn names(records: &[Product]) -> Vec<&str> {
    records.iter().map(|p| p.name.as_str()).collect()
}

fn page(n: i64, size: u64) -> PageRequest {
    PageRequest::new(n, PageSize::Limited(size))
}

#[test]
fn low_stock_returns_only_the_middle_product() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "Empty", 0);
    f.product(&org1, "Some", 30);
    f.product(&org1, "Plenty", 80);

    let result = f
        .products
        .find_many(&org1, &RawFilters::new().status("Low Stock"), None, page(1, 10))
        .unwrap();
    assert_eq!(result.total_pages, 1);
    assert_eq!(names(&result.records), vec!["Some"]);
    assert_eq!(result.records[0].total_stock_quantity, 30);
}

#[test]
fn bucket_boundaries() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "Fifty", 50);
    f.product(&org1, "FortyNine", 49);
    f.product(&org1, "Zero", 0);

    let find = |status: &str| {
        f.products
            .find_many(&org1, &RawFilters::new().status(status), None, PageRequest::all())
            .unwrap()
            .records
    };
    let names_in = |status: &str| find(status).into_iter().map(|p| p.name).collect::<Vec<_>>();
    assert_eq!(names_in("In Stock"), vec!["Fifty"]);
    assert_eq!(names_in("Low"), vec!["FortyNine"]);
    assert_eq!(names_in("Out of Stock"), vec!["Zero"]);
    assert_eq!(names_in("All").len(), 3);

    let policy = StockPolicy::default();
    for bucket in [StockBucket::InStock, StockBucket::LowStock, StockBucket::OutOfStock] {
        let records = find(bucket.label());
        assert_eq!(records.len(), 1, "{}", bucket.label());
        assert!(records.iter().all(|p| policy.classify(p.total_stock_quantity) == bucket));
    }
}

#[test]
fn search_is_case_insensitive_across_fields() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "Widget", 5);
    f.product(&org1, "Bolt", 5);
    let db = &f.db;
    db.update(
        "products",
        &json!({"name": "Bolt"}),
        &json!({"$set": {"description": "fits the WIDGET frame"}}),
    )
    .unwrap();

    let result = f
        .products
        .find_many(&org1, &RawFilters::new().search("wid"), Some(&OrderBy::asc("name")), page(1, 10))
        .unwrap();
    assert_eq!(names(&result.records), vec!["Bolt", "Widget"]);
}

#[test]
fn search_input_is_literal() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "A.B", 1);
    f.product(&org1, "AxB", 1);
    let result = f
        .products
        .find_many(&org1, &RawFilters::new().search("a.b"), None, page(1, 10))
        .unwrap();
    assert_eq!(names(&result.records), vec!["A.B"]);
}

#[test]
fn no_match_is_an_empty_page() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "Widget", 5);
    let result = f
        .products
        .find_many(&org1, &RawFilters::new().search("zzz"), None, page(1, 10))
        .unwrap();
    assert_eq!(result.total_pages, 0);
    assert!(result.records.is_empty());
}

#[test]
fn page_size_all_returns_everything_on_one_page() {
    let f = Fixture::new();
    let org1 = org("org1");
    for i in 0..13 {
        f.product(&org1, &format!("P{i:02}"), i);
    }
    let result = f
        .products
        .find_many(&org1, &RawFilters::new(), None, PageRequest::all())
        .unwrap();
    assert_eq!(result.total_pages, 1);
    assert_eq!(result.records.len(), 13);
}

#[test]
fn non_positive_page_reads_first_page() {
    let f = Fixture::new();
    let org1 = org("org1");
    for i in 0..3 {
        f.product(&org1, &format!("P{i}"), i);
    }
    let first = f
        .products
        .find_many(&org1, &RawFilters::new(), None, page(1, 2))
        .unwrap();
    let zero = f
        .products
        .find_many(&org1, &RawFilters::new(), None, page(0, 2))
        .unwrap();
    assert_eq!(first, zero);
    assert_eq!(zero.total_pages, 2);
}

#[test]
fn default_order_is_newest_first() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "First", 1);
    f.product(&org1, "Second", 1);
    f.product(&org1, "Third", 1);
    let result = f
        .products
        .find_many(&org1, &RawFilters::new(), None, page(1, 10))
        .unwrap();
    assert_eq!(names(&result.records), vec!["Third", "Second", "First"]);
}

#[test]
fn alias_sort_equals_direct_sort() {
    let f = Fixture::new();
    let org1 = org("org1");
    for (name, qty) in [("A", 7), ("B", 70), ("C", 0), ("D", 7)] {
        f.product(&org1, name, qty);
    }
    for dir in ["asc", "desc"] {
        let direction = wareflow::SortDirection::parse(dir);
        let by_alias = f
            .products
            .find_many(&org1, &RawFilters::new(), Some(&OrderBy::new("stock", direction)), PageRequest::all())
            .unwrap();
        let direct = f
            .products
            .find_many(
                &org1,
                &RawFilters::new(),
                Some(&OrderBy::new("totalStockQuantity", direction)),
                PageRequest::all(),
            )
            .unwrap();
        assert_eq!(by_alias, direct);
    }
}

#[test]
fn repeated_queries_are_identical() {
    let f = Fixture::new();
    let org1 = org("org1");
    for i in 0..5 {
        f.product(&org1, &format!("P{i}"), i * 20);
    }
    let filters = RawFilters::new().statuses(&["In Stock", "Low"]);
    let a = f.products.find_many(&org1, &filters, None, page(1, 2)).unwrap();
    let b = f.products.find_many(&org1, &filters, None, page(1, 2)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn unknown_sort_and_status_are_validation_errors() {
    let f = Fixture::new();
    let org1 = org("org1");
    let err = f
        .products
        .find_many(&org1, &RawFilters::new(), Some(&OrderBy::asc("colour")), page(1, 10))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSort(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = f
        .products
        .find_many(&org1, &RawFilters::new().status("Plenty"), None, page(1, 10))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn missing_tenant_is_unauthenticated() {
    let err = TenantId::from_session(Some("")).unwrap_err();
    assert!(matches!(err, Error::MissingTenant));
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn category_filter_and_derived_counts() {
    let f = Fixture::new();
    let org1 = org("org1");
    let tools = f
        .categories
        .create(&org1, NewCategory { name: "Tools".into(), description: None })
        .unwrap();
    f.categories
        .create(&org1, NewCategory { name: "Paint".into(), description: None })
        .unwrap();
    let hammer = f.product(&org1, "Hammer", 20);
    let saw = f.product(&org1, "Saw", 40);
    f.product(&org1, "Brush", 3);
    for id in [hammer, saw] {
        f.products
            .update(&org1, id, &json!({"categoryId": tools.id}))
            .unwrap();
    }

    let result = f
        .products
        .find_many(
            &org1,
            &RawFilters::new().discriminator("category", "Tools"),
            Some(&OrderBy::asc("name")),
            page(1, 10),
        )
        .unwrap();
    assert_eq!(names(&result.records), vec!["Hammer", "Saw"]);
    assert_eq!(result.records[0].category.as_ref().unwrap().name, "Tools");

    let cats = f
        .categories
        .find_many(&org1, &RawFilters::new(), Some(&OrderBy::asc("name")), page(1, 10))
        .unwrap();
    let tools = &cats.records[1];
    assert_eq!(tools.name, "Tools");
    assert_eq!(tools.product_count, 2);
    assert_eq!(tools.total_stock_quantity, 60);
    assert_eq!(cats.records[0].product_count, 0);

    let in_stock = f
        .categories
        .find_many(&org1, &RawFilters::new().status("In Stock"), None, page(1, 10))
        .unwrap();
    assert_eq!(in_stock.records.len(), 1);
    assert_eq!(in_stock.records[0].name, "Tools");
}

#[test]
fn stocks_carry_items_and_totals() {
    let f = Fixture::new();
    let org1 = org("org1");
    f.product(&org1, "A", 10);
    f.product(&org1, "B", 45);
    let result = f
        .stocks
        .find_many(&org1, &RawFilters::new().status("In Stock"), Some(&OrderBy::desc("quantity")), page(1, 10))
        .unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].total_quantity, 55);
    assert_eq!(result.records[0].stock_items.len(), 2);
}

#[test]
fn per_tenant_policy_moves_boundaries() {
    let policies = TenantPolicies::default()
        .with_override("org2", wareflow::StockPolicy::new(10, 0).unwrap());
    let f = Fixture::with_policies(policies);
    let org1 = org("org1");
    let org2 = org("org2");
    f.product(&org1, "A", 30);
    f.product(&org2, "A", 30);

    let low = |tenant: &TenantId| {
        f.products
            .find_many(tenant, &RawFilters::new().status("Low Stock"), None, page(1, 10))
            .unwrap()
            .records
            .len()
    };
    assert_eq!(low(&org1), 1);
    assert_eq!(low(&org2), 0);
}

#[test]
fn orders_filter_by_customer_type_and_status() {
    let db = Arc::new(Database::new());
    let policies = Arc::new(TenantPolicies::default());
    let customers: Repository<Customer, Database> =
        Repository::new(Arc::clone(&db), Arc::clone(&policies)).unwrap();
    let orders: Repository<Order, Database> =
        Repository::new(Arc::clone(&db), Arc::clone(&policies)).unwrap();
    let invoices: Repository<Invoice, Database> =
        Repository::new(Arc::clone(&db), Arc::clone(&policies)).unwrap();
    let org1 = org("org1");

    let retail = customers
        .create(&org1, NewCustomer { name: "Shop".into(), email: None, customer_type: Some("Retail".into()) })
        .unwrap();
    let wholesale = customers
        .create(&org1, NewCustomer { name: "Depot".into(), email: None, customer_type: Some("Wholesale".into()) })
        .unwrap();

    let date = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let new_order = |number: &str, customer: u64, status: OrderStatus| NewOrder {
        order_number: number.into(),
        order_date: date,
        status,
        order_type: OrderType::Sales,
        customer_id: Some(customer),
        supplier_id: None,
        lines: vec![],
    };
    let o1 = orders.create(&org1, new_order("SO-1", retail.id, OrderStatus::Pending)).unwrap();
    orders.create(&org1, new_order("SO-2", wholesale.id, OrderStatus::Shipped)).unwrap();
    orders.create(&org1, new_order("SO-3", wholesale.id, OrderStatus::Pending)).unwrap();

    let result = orders
        .find_many(
            &org1,
            &RawFilters::new().discriminator("customerType", "Wholesale").status("pending"),
            None,
            page(1, 10),
        )
        .unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].order_number, "SO-3");

    invoices
        .create(
            &org1,
            NewInvoice {
                invoice_number: "INV-1".into(),
                issue_date: date,
                due_date: date,
                total_amount: 0.0,
                status: InvoiceStatus::Pending,
                order_id: Some(o1.id),
            },
        )
        .unwrap();
    let found = invoices
        .find_many(&org1, &RawFilters::new().search("shop"), None, page(1, 10))
        .unwrap();
    assert_eq!(found.records.len(), 1);
    let order = found.records[0].order.as_ref().unwrap();
    assert_eq!(order.customer.as_ref().unwrap().name, "Shop");
    assert!(order.supplier.is_none());
}

#[test]
fn order_lines_feed_the_total_and_the_product() {
    let f = Fixture::new();
    let org1 = org("org1");
    let orders: Repository<Order, Database> =
        Repository::new(Arc::clone(&f.db), Arc::new(TenantPolicies::default())).unwrap();
    let widget = f.product(&org1, "Widget", 0);
    let order = orders
        .create(
            &org1,
            NewOrder {
                order_number: "PO-1".into(),
                order_date: Utc::now(),
                status: OrderStatus::Processing,
                order_type: OrderType::Purchase,
                customer_id: None,
                supplier_id: None,
                lines: vec![NewOrderLine { product_id: widget, quantity: 4, unit_price: 2.5 }],
            },
        )
        .unwrap();
    assert_eq!(order.total_amount, 10.0);
    assert_eq!(order.order_lines.len(), 1);
    assert_eq!(f.products.find_by_id(&org1, widget).unwrap().order_lines.len(), 1);

    orders.delete(&org1, order.id).unwrap();
    assert!(f.products.find_by_id(&org1, widget).unwrap().order_lines.is_empty());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

const ORGS: [&str; 3] = ["org1", "org2", "org3"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn tenants_only_see_their_own_records(
        products in prop::collection::vec((0usize..3, 0i64..120), 0..18)
    ) {
        let f = Fixture::new();
        for (i, (o, qty)) in products.iter().enumerate() {
            f.product(&org(ORGS[*o]), &format!("P{i}"), *qty);
        }
        for (o, name) in ORGS.iter().enumerate() {
            let tenant = org(name);
            let result = f
                .products
                .find_many(&tenant, &RawFilters::new(), None, PageRequest::all())
                .unwrap();
            let expected = products.iter().filter(|(p, _)| *p == o).count();
            prop_assert_eq!(result.records.len(), expected);
            prop_assert!(result.records.iter().all(|p| p.organization_id == *name));
        }
    }

    #[test]
    fn pages_partition_the_result(
        quantities in prop::collection::vec(0i64..120, 0..25),
        size in 1u64..7,
    ) {
        let f = Fixture::new();
        let org1 = org("org1");
        for (i, qty) in quantities.iter().enumerate() {
            f.product(&org1, &format!("P{i}"), *qty);
        }
        let order = OrderBy::asc("stock");
        let all = f
            .products
            .find_many(&org1, &RawFilters::new(), Some(&order), PageRequest::all())
            .unwrap();

        let first = f
            .products
            .find_many(&org1, &RawFilters::new(), Some(&order), page(1, size))
            .unwrap();
        let mut collected = Vec::new();
        for n in 1..=first.total_pages {
            let p = f
                .products
                .find_many(&org1, &RawFilters::new(), Some(&order), page(n as i64, size))
                .unwrap();
            prop_assert_eq!(p.total_pages, first.total_pages);
            collected.extend(p.records.into_iter().map(|r| r.id));
        }
        let expected: Vec<u64> = all.records.iter().map(|r| r.id).collect();
        prop_assert_eq!(collected, expected);
        prop_assert_eq!(first.total_pages, (quantities.len() as u64).div_ceil(size));
    }
}
