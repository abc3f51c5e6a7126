//! Error types and result types for data access operations.
//!
//! Only validation failures, serialization problems and store connectivity issues are
//! errors. Conflicts, failed preconditions and missing resources are reported through
//! [`OperationResult`](crate::concurrency::OperationResult) codes or booleans instead.
//! Use [`DataAccessResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use figment::Error as FigmentError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when going through the data access layer.
#[derive(Error, Debug)]
pub enum DataAccessError {
    /// A filter, sort or projection clause is malformed or was rejected by the store.
    ///
    /// `clause` identifies the offending clause (e.g. `filter[1]`), `reason` explains why.
    #[error("Invalid query parameter {clause}: {reason}")]
    QueryParameter { clause: String, reason: String },
    /// The page or page size is not a positive integer or exceeds the configured maximum.
    #[error("Illegal query parameter: {0}")]
    IllegalQueryParameter(String),
    /// A database or collection name is empty or reserved.
    #[error("Invalid name: {0}")]
    InvalidName(String),
    /// The document violates the layer's layout conventions.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The store could not be reached or the driver failed. Never retried by this layer.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl DataAccessError {
    /// Shorthand for building a [`DataAccessError::QueryParameter`].
    pub fn query_parameter(clause: impl Into<String>, reason: impl Into<String>) -> Self {
        DataAccessError::QueryParameter {
            clause: clause.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for data access operations.
pub type DataAccessResult<T> = Result<T, DataAccessError>;

impl From<BsonError> for DataAccessError {
    fn from(err: BsonError) -> Self {
        DataAccessError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DataAccessError {
    fn from(err: SerdeJsonError) -> Self {
        DataAccessError::Serialization(err.to_string())
    }
}

impl From<FigmentError> for DataAccessError {
    fn from(err: FigmentError) -> Self {
        DataAccessError::Configuration(err.to_string())
    }
}
