use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad request (payload): {0}")]
    BadRequestPayload(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),
}

impl BrokerError {
    /// HTTP-equivalent status surfaced to the caller.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::BadRequestPayload(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::NotImplemented(_) => 501,
            // Store/serde faults that escape the read path are mutation
            // failures, which surface as bad requests.
            Self::Store(_) | Self::Json(_) | Self::Bson(_) => 400,
        }
    }

    /// Key into the configured message catalog.
    #[must_use]
    pub const fn catalog_key(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "400",
            Self::BadRequestPayload(_) => "400b",
            Self::NotFound(_) => "404",
            Self::Conflict(_) => "409",
            Self::NotImplemented(_) => "501",
            Self::Store(_) | Self::Json(_) | Self::Bson(_) => "400",
        }
    }
}
