use std::path::PathBuf;

/// Result type alias for fspool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by backend collaborators (factories, resource close)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Core error type for fspool operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cache already holds `max_size` active entries and a new key was requested
    #[error("handle cache max size has been reached: {max_size}")]
    CacheFull { max_size: usize },

    /// The backend factory failed to create a resource
    #[error("failed to create backend resource for '{target}': {source}")]
    BackendCreateFailed {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Closing a backend resource failed
    #[error("failed to close backend resource {resource}: {source}")]
    BackendClose {
        resource: String,
        #[source]
        source: BoxError,
    },

    /// The principal authenticated with a method the cache cannot key on
    #[error("unsupported authentication method: {method}")]
    UnsupportedAuthMethod { method: String },

    /// Operation intentionally not implemented
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    /// A background worker thread could not be started
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: String,
        #[source]
        source: std::io::Error,
    },

    /// Target URI could not be parsed
    #[error("invalid target '{target}': {message}")]
    InvalidTarget { target: String, message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

impl Error {
    /// Create a cache full error
    #[must_use]
    pub fn cache_full(max_size: usize) -> Self {
        Error::CacheFull { max_size }
    }

    /// Wrap a backend factory failure
    #[must_use]
    pub fn backend_create_failed(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::BackendCreateFailed {
            target: target.into(),
            source: source.into(),
        }
    }

    /// Wrap a backend close failure
    #[must_use]
    pub fn backend_close(resource: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::BackendClose {
            resource: resource.into(),
            source: source.into(),
        }
    }

    /// Create an unsupported authentication method error
    #[must_use]
    pub fn unsupported_auth_method(method: impl Into<String>) -> Self {
        Error::UnsupportedAuthMethod {
            method: method.into(),
        }
    }

    /// Create an unsupported operation error
    #[must_use]
    pub fn unsupported_operation(operation: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create a thread spawn error
    #[must_use]
    pub fn spawn(thread: impl Into<String>, source: std::io::Error) -> Self {
        Error::Spawn {
            thread: thread.into(),
            source,
        }
    }

    /// Create an invalid target error
    #[must_use]
    pub fn invalid_target(target: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidTarget {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }
}
