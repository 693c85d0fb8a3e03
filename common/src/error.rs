use std::io;
use thiserror::Error;

/// Core error types for Dummy Chain. These serve as the foundation
/// for error handling across all components.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Invalid or missing configuration, always fatal before production starts
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Out-of-order calls into the protocol encoder
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Failures reading or writing the block store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Catch-all for errors that don't fit other categories
    #[error("Other error: {0}")]
    Other(String),
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid byte size format {0:?}")]
    InvalidByteSize(String),

    #[error("Final block cannot be missing")]
    MissingFinalBlock,

    #[error("Block producer has not been initialized with a chain tip")]
    NotInitialized,
}

/// Errors raised when the protocol encoder is driven in the wrong order.
///
/// These indicate a programming error upstream, never bad data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("No active block, something is wrong in the tracer call order")]
    NoActiveBlock,

    #[error("Block already started, something is wrong in the tracer call order")]
    BlockAlreadyStarted,

    #[error("No active transaction, something is wrong in the tracer call order")]
    NoActiveTransaction,

    #[error("Transaction already started, something is wrong in the tracer call order")]
    TransactionAlreadyStarted,

    #[error("Tracer used before initialization")]
    NotInitialized,

    #[error("Unable to write record: {0}")]
    Output(String),
}

/// Errors related to the on-disk block store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Block {0} not found")]
    BlockNotFound(u64),
}

/// Result type alias for Dummy Chain operations
pub type ChainResult<T> = Result<T, ChainError>;

impl From<io::Error> for ChainError {
    fn from(error: io::Error) -> Self {
        // Bare IO errors only surface from the store
        ChainError::Store(StoreError::Io(error))
    }
}
