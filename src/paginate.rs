//! Pagination facet and result shaping.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::DocumentStore;

pub const DEFAULT_PAGE_SIZE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Limited(u64),
    /// Every matching record on one page.
    All,
}

impl PageSize {
    pub fn limited(n: u64) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidQuery("page size must be positive".into()));
        }
        Ok(PageSize::Limited(n))
    }

    /// `all`/`infinity` (any case) select everything; otherwise a positive integer.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("all") || raw.eq_ignore_ascii_case("infinity") {
            return Ok(PageSize::All);
        }
        let n = raw
            .parse::<u64>()
            .map_err(|_| Error::InvalidQuery(format!("invalid page size '{raw}'")))?;
        Self::limited(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    size: PageSize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            size: PageSize::Limited(DEFAULT_PAGE_SIZE),
        }
    }
}

impl PageRequest {
    /// Pages are 1-based; zero and negative pages read the first page.
    pub fn new(page: i64, size: PageSize) -> Self {
        Self {
            page: page.max(1) as u64,
            size,
        }
    }

    pub fn all() -> Self {
        Self::new(1, PageSize::All)
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> PageSize {
        self.size
    }

    fn skip(&self) -> Option<(u64, u64)> {
        match self.size {
            PageSize::Limited(n) => Some(((self.page - 1).saturating_mul(n), n)),
            PageSize::All => None,
        }
    }

    pub fn total_pages(&self, count: u64) -> u64 {
        match self.size {
            PageSize::Limited(n) => count.div_ceil(n),
            PageSize::All => u64::from(count > 0),
        }
    }
}

/// One page of records plus the page count for the whole filtered set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_pages: u64,
    pub records: Vec<T>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            total_pages: 0,
            records: Vec::new(),
        }
    }
}

/// Append the `$facet` returning the requested slice and the total count.
pub fn append_facet(stages: &mut Vec<Value>, page: &PageRequest) {
    let slice = match page.skip() {
        Some((skip, limit)) => vec![json!({ "$skip": skip }), json!({ "$limit": limit })],
        None => Vec::new(),
    };
    stages.push(json!({ "$facet": {
        "paginatedResults": slice,
        "totalCount": [{ "$count": "count" }],
    }}));
}

/// Turn the facet output into a typed page.
pub fn shape<T: DeserializeOwned>(output: Vec<Value>, page: &PageRequest) -> Result<Page<T>> {
    let Some(facet) = output.into_iter().next() else {
        return Ok(Page::empty());
    };
    let count = facet["totalCount"]
        .get(0)
        .and_then(|c| c["count"].as_u64())
        .unwrap_or(0);
    let records = match facet.get("paginatedResults") {
        Some(Value::Array(docs)) => docs
            .iter()
            .map(|d| serde_json::from_value(d.clone()))
            .collect::<std::result::Result<Vec<T>, _>>()?,
        _ => Vec::new(),
    };
    Ok(Page {
        total_pages: page.total_pages(count),
        records,
    })
}

/// Run `stages` plus the pagination facet in one aggregate call.
pub fn paginated_aggregate<T, S>(
    store: &S,
    collection: &str,
    mut stages: Vec<Value>,
    page: &PageRequest,
) -> Result<Page<T>>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
{
    append_facet(&mut stages, page);
    debug!(collection, stages = stages.len(), page = page.page(), "paginated aggregate");
    let output = store.aggregate(collection, &Value::Array(stages))?;
    shape(output, page)
}
