use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Key has no columns")]
    EmptyKey,

    #[error("Key too large: {size} bytes exceeds maximum {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Value too large: {size} bytes exceeds maximum {max}")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Invalid heap pointer at address {0}")]
    InvalidPointer(u64),

    #[error("Allocation too large: {size} bytes exceeds maximum {max}")]
    AllocTooLarge { size: u64, max: u64 },

    #[error("Out of space")]
    OutOfSpace,

    #[error("Unique constraint violated on index {0}")]
    Conflict(String),

    #[error("Cannot cast {from} to {to}")]
    InvalidCast { from: String, to: String },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Index {0} already exists")]
    IndexExists(String),

    #[error("File is opened read-only")]
    ReadOnly,

    #[error("Stream closed")]
    StreamClosed,

    #[error("Stream producer failed: {0}")]
    StreamFailed(String),

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        DbError::Corruption(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        DbError::SchemaViolation(msg.into())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        DbError::Syntax(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
