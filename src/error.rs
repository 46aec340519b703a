use thiserror::Error;

use crate::document::DocumentId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tenant id is required")]
    MissingTenant,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: DocumentId },

    #[error("unique constraint violated: {fields} already exists for this tenant")]
    UniqueViolation { fields: String },

    #[error("{entity} {id} is still referenced by {by}")]
    InUse {
        entity: &'static str,
        id: DocumentId,
        by: &'static str,
    },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid sort: {0}")]
    InvalidSort(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid stock policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid entity descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification callers branch on instead of matching variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingTenant => ErrorKind::Unauthenticated,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::UniqueViolation { .. } | Error::InUse { .. } => ErrorKind::Conflict,
            Error::InvalidFilter(_)
            | Error::InvalidSort(_)
            | Error::InvalidQuery(_)
            | Error::InvalidDocument(_)
            | Error::InvalidPolicy(_) => ErrorKind::Validation,
            // Pipelines are built internally, so a bad one is our fault, not the caller's.
            Error::InvalidPipeline(_)
            | Error::InvalidDescriptor(_)
            | Error::Json(_)
            | Error::Unavailable(_) => ErrorKind::Infrastructure,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
