//! Normalization of raw list filters into a typed, tenant-scoped filter set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::StockBucket;
use crate::stages::{EntityDescriptor, StatusKind};

/// Sentinel meaning "no restriction" for status and discriminator filters.
pub const ALL: &str = "All";

fn is_all(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(ALL)
}

/// A non-blank organization id. Every read and write is scoped by one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingTenant);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Absent and blank tenants are both rejected.
    pub fn from_session(id: Option<&str>) -> Result<Self> {
        match id {
            Some(id) => Self::new(id),
            None => Err(Error::MissingTenant),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `status` arrives either as one value or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn values(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(s) => vec![s.as_str()],
            OneOrMany::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Filters as the caller sent them. Keys other than `status` and `search`
/// are discriminators such as `category`, `orderType` or `customerType`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawFilters {
    #[serde(default)]
    pub status: Option<OneOrMany>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(flatten)]
    pub discriminators: BTreeMap<String, String>,
}

impl RawFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(OneOrMany::One(status.to_string()));
        self
    }

    pub fn statuses(mut self, statuses: &[&str]) -> Self {
        self.status = Some(OneOrMany::Many(
            statuses.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn search(mut self, search: &str) -> Self {
        self.search = Some(search.to_string());
        self
    }

    pub fn discriminator(mut self, key: &str, value: &str) -> Self {
        self.discriminators.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusFilter {
    Buckets(Vec<StockBucket>),
    Values(Vec<String>),
}

/// The normalized filter set. `search` is already regex-escaped.
#[derive(Debug, Clone, PartialEq)]
pub struct Filters {
    pub tenant: TenantId,
    pub search: Option<String>,
    pub status: Option<StatusFilter>,
    /// `(document path, value)` pairs, matched by equality.
    pub discriminators: Vec<(String, String)>,
}

impl Filters {
    pub fn tenant_only(tenant: TenantId) -> Self {
        Self {
            tenant,
            search: None,
            status: None,
            discriminators: Vec::new(),
        }
    }
}

pub fn normalize(
    tenant: TenantId,
    raw: &RawFilters,
    descriptor: &EntityDescriptor,
) -> Result<Filters> {
    let search = raw
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(regex::escape);

    let status = match &raw.status {
        Some(status) => normalize_status(status, &descriptor.status)?,
        None => None,
    };

    let mut discriminators = Vec::new();
    for (key, value) in &raw.discriminators {
        let path = descriptor
            .discriminators
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, path)| *path)
            .ok_or_else(|| {
                Error::InvalidFilter(format!(
                    "unknown filter '{key}' for {}",
                    descriptor.collection
                ))
            })?;
        if value.trim().is_empty() || is_all(value) {
            continue;
        }
        discriminators.push((path.to_string(), value.clone()));
    }

    Ok(Filters {
        tenant,
        search,
        status,
        discriminators,
    })
}

fn normalize_status(raw: &OneOrMany, kind: &StatusKind) -> Result<Option<StatusFilter>> {
    let values: Vec<&str> = raw
        .values()
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if values.is_empty() || values.iter().any(|v| is_all(v)) {
        return Ok(None);
    }

    match kind {
        StatusKind::None => Err(Error::InvalidFilter(
            "status filter is not supported here".into(),
        )),
        StatusKind::Buckets { .. } => {
            let mut buckets = Vec::new();
            for v in values {
                let bucket = StockBucket::from_label(v)
                    .ok_or_else(|| Error::InvalidFilter(format!("unknown stock status '{v}'")))?;
                if !buckets.contains(&bucket) {
                    buckets.push(bucket);
                }
            }
            Ok(Some(StatusFilter::Buckets(buckets)))
        }
        StatusKind::Enum { allowed, .. } => {
            let mut out = Vec::new();
            for v in values {
                let canonical = allowed
                    .iter()
                    .find(|a| a.eq_ignore_ascii_case(v))
                    .ok_or_else(|| Error::InvalidFilter(format!("unknown status '{v}'")))?;
                if !out.iter().any(|o: &String| o == canonical) {
                    out.push(canonical.to_string());
                }
            }
            Ok(Some(StatusFilter::Values(out)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// `"desc"` (any case) sorts descending; anything else ascending.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// A requested sort. `field` may be a declared alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn new(field: &str, direction: SortDirection) -> Self {
        Self {
            field: field.to_string(),
            direction,
        }
    }

    pub fn asc(field: &str) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: &str) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}
