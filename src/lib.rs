pub mod collection;
pub mod document;
pub mod engine;
pub mod entity;
pub mod error;
pub mod filter;
pub mod index;
pub mod model;
pub mod paginate;
pub mod pipeline;
pub mod policy;
pub mod query;
pub mod repository;
pub mod stages;
pub mod store;
pub mod update;
pub mod value;

pub use document::DocumentId;
pub use engine::Database;
pub use entity::Entity;
pub use error::{Error, ErrorKind, Result};
pub use filter::{OrderBy, RawFilters, SortDirection, TenantId};
pub use paginate::{Page, PageRequest, PageSize};
pub use policy::{StockBucket, StockPolicy, TenantPolicies};
pub use repository::Repository;
pub use store::DocumentStore;
