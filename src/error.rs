use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for the Flowstate state runtime
///
/// Routine lookup misses are not errors; they surface as `Option::None`
/// from the query methods. This type covers the explicit error channels:
/// terminal errors handed to `force_return`, reply errors handed to a
/// result handler, and the serialization/persistence seams.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateError {
    /// Flow definition could not be resolved
    #[error("Flow definition not found: {0}")]
    DefinitionNotFound(String),

    /// Root or flow instance not found
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// An activity reported a failure
    #[error("Activity error: {0}")]
    ActivityError(String),

    /// A flow definition failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StoreError(String),

    /// Rehydration of a persisted instance tree failed
    #[error("Hydration error: {0}")]
    HydrationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IoError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::IoError(err.to_string())
    }
}

impl From<String> for StateError {
    fn from(err: String) -> Self {
        StateError::Other(err)
    }
}

impl From<&str> for StateError {
    fn from(err: &str) -> Self {
        StateError::Other(err.to_string())
    }
}
