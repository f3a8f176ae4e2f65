use thiserror::Error;

use crate::object::{ObjectId, PropertyId};

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum EventError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A property write was rejected before it was committed
    #[error("Invalid value for {property}: {reason}")]
    InvalidProperty { property: PropertyId, reason: String },

    /// Returned value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },

    /// Requested object is not known to this device
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Requested property has no value on the object
    #[error("Property {property} not found on {object}")]
    PropertyNotFound { object: ObjectId, property: PropertyId },

    /// Referenced notification class does not exist
    #[error("Notification class {0} not found")]
    NotificationClassNotFound(u32),

    /// A remove-list-element operation named an element that is not in the list
    #[error("List element not found: {0}")]
    ListElementNotFound(String),

    /// Acknowledgment did not match the stored transition
    #[error("Acknowledgment rejected for {object}: {reason}")]
    AckMismatch { object: ObjectId, reason: String },

    /// Outbound delivery failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote read did not complete in time
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The remote device answered with an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// Runtime failure that does not fit another category
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Convenient alias over [`Result`] using [`EventError`]
pub type Result<T> = std::result::Result<T, EventError>;
