//! Error types for nodemap operations.

use std::fmt;

/// The primary error type for all mapper operations.
#[derive(Debug)]
pub enum Error {
    /// Metadata or programming defects (unknown role, ambiguous reference, ...)
    Config(ConfigError),
    /// Malformed or mismatched object identities
    Identity(IdentityError),
    /// Failures reported by the database driver
    Driver(DriverError),
    /// Value conversion errors
    Type(TypeError),
    /// Schema (de)serialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// No type with the requested name is registered
    UnknownType,
    /// The type has no relation with the requested role
    UnknownRole,
    /// The type has no attribute with the requested name
    UnknownAttribute,
    /// A reference attribute matches more than one relation
    AmbiguousReference,
    /// A reorder was requested on a relation without a sort key
    NotSortable,
    /// Schema definition is inconsistent
    InvalidSchema,
    /// The metadata asks for something the mapper cannot express
    Unsupported,
}

#[derive(Debug)]
pub struct IdentityError {
    pub kind: IdentityErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// The string form could not be parsed
    Malformed,
    /// The identity belongs to a different type than expected
    TypeMismatch,
    /// Number of key values differs from the declared primary key
    KeyCount,
    /// A persisted identity was required but a dummy was given
    Dummy,
}

#[derive(Debug)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Constraint violation (unique, foreign key, ...)
    Constraint,
    /// Connection lost or refused
    Connection,
    /// Statement failed to execute
    Execution,
    /// Transaction state error (commit without begin, ...)
    Transaction,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub attribute: Option<String>,
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for an identity error.
    pub fn identity(kind: IdentityErrorKind, message: impl Into<String>) -> Self {
        Error::Identity(IdentityError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a driver error without SQL context.
    pub fn driver(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Error::Driver(DriverError {
            kind,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Configuration and identity errors abort immediately and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Identity(_))
    }

    /// Is this a metadata/programming defect?
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// The configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The identity error kind, if this is one.
    pub fn identity_kind(&self) -> Option<IdentityErrorKind> {
        match self {
            Error::Identity(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Driver(d) => d.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Identity(e) => write!(f, "Identity error: {}", e.message),
            Error::Driver(e) => {
                if let Some(sql) = &e.sql {
                    write!(f, "Driver error: {} ({})", e.message, sql)
                } else {
                    write!(f, "Driver error: {}", e.message)
                }
            }
            Error::Type(e) => {
                if let Some(attr) = &e.attribute {
                    write!(
                        f,
                        "Type error in attribute '{}': expected {}, found {}",
                        attr, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Driver(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<IdentityError> for Error {
    fn from(err: IdentityError) -> Self {
        Error::Identity(err)
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for mapper operations.
pub type Result<T> = std::result::Result<T, Error>;
