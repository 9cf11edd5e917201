use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Raw identifier could not be turned into a fixed-width key
    #[error("invalid identifier {raw:?}: {reason}")]
    InvalidIdentifier { raw: String, reason: String },

    /// A row lacks a field needed to join it
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("invalid source field reference: {0}")]
    InvalidSourceField(String),

    #[error("invalid filter plan: {0}")]
    InvalidFilterPlan(String),

    #[error("configuration error: {0}")]
    Config(String),
}
