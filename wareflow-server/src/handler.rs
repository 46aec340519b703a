//! Request dispatch: `{ "cmd": "<resource>.<action>", "session": {...}, ... }`.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{error, warn};

use wareflow::entity::Entity;
use wareflow::filter::OneOrMany;
use wareflow::model::{Category, Customer, Invoice, Order, Product, Stock, Supplier};
use wareflow::{
    Database, DocumentId, Error, ErrorKind, OrderBy, PageRequest, PageSize, RawFilters,
    Repository, SortDirection, TenantId, TenantPolicies,
};

/// One repository per resource, sharing a store and the stock policies.
pub struct AppState {
    products: Repository<Product, Database>,
    categories: Repository<Category, Database>,
    stocks: Repository<Stock, Database>,
    customers: Repository<Customer, Database>,
    suppliers: Repository<Supplier, Database>,
    orders: Repository<Order, Database>,
    invoices: Repository<Invoice, Database>,
}

impl AppState {
    pub fn new(db: Arc<Database>, policies: Arc<TenantPolicies>) -> wareflow::Result<Self> {
        Ok(Self {
            products: Repository::new(Arc::clone(&db), Arc::clone(&policies))?,
            categories: Repository::new(Arc::clone(&db), Arc::clone(&policies))?,
            stocks: Repository::new(Arc::clone(&db), Arc::clone(&policies))?,
            customers: Repository::new(Arc::clone(&db), Arc::clone(&policies))?,
            suppliers: Repository::new(Arc::clone(&db), Arc::clone(&policies))?,
            orders: Repository::new(Arc::clone(&db), Arc::clone(&policies))?,
            invoices: Repository::new(db, policies)?,
        })
    }
}

pub fn status_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Unauthenticated => 401,
        ErrorKind::Validation => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::Infrastructure => 500,
    }
}

fn ok_response(status: u16, message: &str, mut body: Map<String, Value>) -> Value {
    body.insert("ok".into(), json!(true));
    body.insert("status".into(), json!(status));
    body.insert("message".into(), json!(message));
    Value::Object(body)
}

fn err_response(status: u16, kind: &str, message: &str) -> Value {
    json!({ "ok": false, "status": status, "error": kind, "message": message })
}

fn error_response(e: &Error) -> Value {
    let kind = e.kind();
    let status = status_code(kind);
    // Internal details stay in the log.
    let message = if kind == ErrorKind::Infrastructure {
        "internal error".to_string()
    } else {
        e.to_string()
    };
    err_response(status, kind.as_str(), &message)
}

/// Handle a single JSON request and return a JSON response.
pub fn handle_request(state: &AppState, request: &Value) -> Value {
    let Some(cmd) = request.get("cmd").and_then(Value::as_str) else {
        return err_response(400, "validation", "missing or invalid 'cmd' field");
    };
    if cmd == "ping" {
        return ok_response(200, "pong", Map::new());
    }
    let Some((resource, action)) = cmd.split_once('.') else {
        return err_response(400, "validation", &format!("unknown command: {cmd}"));
    };

    let tenant = match TenantId::from_session(
        request
            .get("session")
            .and_then(|s| s.get("organizationId"))
            .and_then(Value::as_str),
    ) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    let result = match (resource, action) {
        ("stocks", "addItem") => add_stock_item(state, &tenant, request),
        ("stocks", "removeItem") => request_id(request)
            .and_then(|id| state.stocks.remove_item(&tenant, id))
            .map(|()| (200, "stock item removed".to_string(), Map::new())),
        ("invoices", "summary") => state.invoices.status_summary(&tenant).map(|summary| {
            let mut body = Map::new();
            body.insert("summary".into(), json!(summary));
            (200, "invoice summary fetched".to_string(), body)
        }),
        ("products", _) => handle_entity(&state.products, action, &tenant, request),
        ("categories", _) => handle_entity(&state.categories, action, &tenant, request),
        ("stocks", _) => handle_entity(&state.stocks, action, &tenant, request),
        ("customers", _) => handle_entity(&state.customers, action, &tenant, request),
        ("suppliers", _) => handle_entity(&state.suppliers, action, &tenant, request),
        ("orders", _) => handle_entity(&state.orders, action, &tenant, request),
        ("invoices", _) => handle_entity(&state.invoices, action, &tenant, request),
        _ => return err_response(404, "not_found", &format!("unknown resource: {resource}")),
    };

    match result {
        Ok((status, message, body)) => ok_response(status, &message, body),
        Err(e) => {
            if e.kind() == ErrorKind::Infrastructure {
                error!(cmd, %tenant, error = %e, "request failed");
            } else {
                warn!(cmd, %tenant, kind = e.kind().as_str(), error = %e, "request rejected");
            }
            error_response(&e)
        }
    }
}

type Reply = (u16, String, Map<String, Value>);

fn handle_entity<E: Entity>(
    repo: &Repository<E, Database>,
    action: &str,
    tenant: &TenantId,
    request: &Value,
) -> wareflow::Result<Reply> {
    let mut body = Map::new();
    match action {
        "list" => {
            let (filters, order_by, page) = parse_list_query(request.get("query"))?;
            let page = repo.find_many(tenant, &filters, order_by.as_ref(), page)?;
            body.insert(E::COLLECTION.into(), json!(page.records));
            body.insert("totalPages".into(), json!(page.total_pages));
            Ok((200, format!("{} fetched", E::COLLECTION), body))
        }
        "get" => {
            let record = repo.find_by_id(tenant, request_id(request)?)?;
            body.insert(E::NAME.into(), json!(record));
            Ok((200, format!("{} fetched", E::NAME), body))
        }
        "create" => {
            let data = request_data(request)?;
            let draft: E::Draft = serde_json::from_value(data.clone())
                .map_err(|e| Error::InvalidDocument(e.to_string()))?;
            let record = repo.create(tenant, draft)?;
            body.insert(E::NAME.into(), json!(record));
            Ok((201, format!("{} created", E::NAME), body))
        }
        "update" => {
            let record = repo.update(tenant, request_id(request)?, request_data(request)?)?;
            body.insert(E::NAME.into(), json!(record));
            Ok((200, format!("{} updated", E::NAME), body))
        }
        "delete" => {
            repo.delete(tenant, request_id(request)?)?;
            Ok((200, format!("{} deleted", E::NAME), body))
        }
        _ => Err(Error::InvalidQuery(format!(
            "unknown action '{action}' for {}",
            E::COLLECTION
        ))),
    }
}

fn add_stock_item(state: &AppState, tenant: &TenantId, request: &Value) -> wareflow::Result<Reply> {
    let data = request_data(request)?;
    let field = |name: &str| {
        data.get(name)
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidDocument(format!("'{name}' must be a record id")))
    };
    let quantity = data
        .get("quantity")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidDocument("'quantity' must be an integer".into()))?;
    let item = state
        .stocks
        .add_item(tenant, field("stockId")?, field("productId")?, quantity)?;
    let mut body = Map::new();
    body.insert("stockItem".into(), json!(item));
    Ok((201, "stock item added".to_string(), body))
}

fn request_id(request: &Value) -> wareflow::Result<DocumentId> {
    request
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::InvalidQuery("missing or invalid 'id'".into()))
}

fn request_data(request: &Value) -> wareflow::Result<&Value> {
    request
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| Error::InvalidDocument("missing or invalid 'data' object".into()))
}

/// Query values arrive as strings, as they would from a URL query string.
/// Numbers are accepted for `page`/`pageSize` and a list for `status`.
pub fn parse_list_query(
    query: Option<&Value>,
) -> wareflow::Result<(RawFilters, Option<OrderBy>, PageRequest)> {
    let empty = Map::new();
    let query = match query {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(Error::InvalidQuery("'query' must be an object".into())),
    };

    let mut filters = RawFilters::new();
    let mut sort_by = None;
    let mut direction = None;
    let mut page = 1_i64;
    let mut size = PageSize::Limited(wareflow::paginate::DEFAULT_PAGE_SIZE);

    for (key, value) in query {
        match key.as_str() {
            "status" => {
                filters.status = Some(
                    serde_json::from_value::<OneOrMany>(value.clone()).map_err(|_| {
                        Error::InvalidQuery("'status' must be a string or a list".into())
                    })?,
                );
            }
            "search" => filters.search = Some(query_string(key, value)?),
            "sortBy" => sort_by = Some(query_string(key, value)?),
            "order" => direction = Some(SortDirection::parse(&query_string(key, value)?)),
            "page" => {
                page = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }
                .ok_or_else(|| Error::InvalidQuery(format!("invalid page {value}")))?;
            }
            "pageSize" => {
                size = match value {
                    Value::Number(n) => n
                        .as_u64()
                        .ok_or_else(|| Error::InvalidQuery(format!("invalid page size {n}")))
                        .and_then(PageSize::limited)?,
                    Value::String(s) => PageSize::parse(s)?,
                    _ => return Err(Error::InvalidQuery("invalid page size".into())),
                };
            }
            _ => {
                filters
                    .discriminators
                    .insert(key.clone(), query_string(key, value)?);
            }
        }
    }

    let order_by = match (sort_by, direction) {
        (None, None) => None,
        (field, direction) => Some(OrderBy::new(
            field.as_deref().unwrap_or("createdAt"),
            direction.unwrap_or(SortDirection::Asc),
        )),
    };
    Ok((filters, order_by, PageRequest::new(page, size)))
}

fn query_string(key: &str, value: &Value) -> wareflow::Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidQuery(format!("'{key}' must be a string")))
}
