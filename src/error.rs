//! Error types for the Noco document model, schema resolution and registries.

use std::path::PathBuf;
use thiserror::Error;

/// Structural errors in a Noco document.
///
/// These indicate a corrupt or misused tree and are never recovered locally.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("stored node at {path} must be an object, got {actual}")]
    NotAnObject { path: String, actual: String },

    #[error("stored node at {path} is missing __noco__type__")]
    MissingTag { path: String },

    #[error("unknown tag \"{tag}\" at {path}")]
    UnknownTag { path: String, tag: String },

    #[error("invalid tag descriptor at {path}: {message}")]
    InvalidTagDescriptor { path: String, message: String },

    #[error("invalid {field} at {path}: got {actual}")]
    InvalidField {
        path: String,
        field: &'static str,
        actual: String,
    },

    #[error("root node is not a component (tag {tag})")]
    RootNotComponent { tag: String },

    #[error("duplicate node id \"{id}\"")]
    DuplicateId { id: String },

    #[error("invalid {tag} tag on node {id}: expected string value, got {actual}")]
    InvalidTagValue {
        id: String,
        tag: &'static str,
        actual: String,
    },

    #[error("node {id} has tag {tag} which cannot be rendered")]
    UnrenderableTag { id: String, tag: String },

    #[error("{key} does not exist in this document")]
    UnknownNode { key: String },

    #[error("node {id} is already attached to {parent}")]
    AlreadyAttached { id: String, parent: String },

    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { child: String, parent: String },
}

/// Failure to follow a JSON-pointer-like path through a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointerError {
    #[error("array index \"{segment}\" is not a number")]
    InvalidIndex { segment: String },

    #[error("array index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("key \"{segment}\" not found")]
    MissingKey { segment: String },

    #[error("cannot index into {actual} with \"{segment}\"")]
    NotTraversable { segment: String, actual: String },
}

/// Failure of an asynchronous load (component, schema document or page).
///
/// Cloneable so the failure can be cached and handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LoadError {
    pub message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors during schema resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to load schema document \"{id}\": {source}")]
    Load {
        id: String,
        #[source]
        source: LoadError,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    // Schema errors (exit code 2)
    #[error("schema document \"{id}\" not found")]
    DocumentNotFound { id: String },

    #[error("cannot resolve {reference}: {source}")]
    Pointer {
        reference: String,
        #[source]
        source: PointerError,
    },

    #[error("circular $ref chain at {reference}")]
    CircularReference { reference: String },

    #[error("invalid schema at {pointer}: {message}")]
    InvalidSchema { pointer: String, message: String },
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::FileNotFound { .. }
            | ResolveError::ReadError { .. }
            | ResolveError::Load { .. } => 3,
            #[cfg(feature = "remote")]
            ResolveError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors raised by the component registry.
///
/// Unknown ids and categories are not errors: they resolve to the error view.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("component \"{id}\" is already registered")]
    DuplicateId { id: String },

    #[error("no error view registered")]
    ErrorViewMissing,

    #[error("component \"{id}\" failed to load: {source}")]
    LoadFailed {
        id: String,
        #[source]
        source: LoadError,
    },
}

/// Errors raised by a components repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("component record '{name}' is already registered in repository '{repo}'")]
    DuplicateName { repo: String, name: String },

    #[error("cannot resolve component for \"{pointer}\"")]
    NoComponent { pointer: String },

    #[error("object or array schema expected at \"{pointer}\"")]
    NotContainerSchema { pointer: String },
}

/// Errors while planning an auto view.
#[derive(Debug, Error)]
pub enum AutoViewError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Errors during validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<SchemaError> },
}

/// Single validation error with path context.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SchemaError {
    /// Validation keyword that failed (e.g. `type`, `required`).
    pub keyword: String,
    /// Human-readable error message.
    pub message: String,
    /// JSON Pointer (RFC 6901) to the invalid data.
    #[serde(rename = "dataPointer")]
    pub data_pointer: String,
    /// JSON Pointer to the failing schema keyword.
    #[serde(rename = "schemaPointer")]
    pub schema_pointer: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.data_pointer, self.message)
    }
}

impl DocumentError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::InvalidSchema { .. } => 2,
            ValidateError::Invalid { .. } => 1,
        }
    }
}
