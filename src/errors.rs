use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum EnclaveError {
    SessionNotFound {
        session: String,
    },
    ConfigurationError {
        message: String,
    },
    ValidationError {
        field: String,
        message: String,
    },
    ExternalCommandFailed {
        operation: String,
        message: String,
    },
    MergeConflict {
        project: String,
        files: Vec<String>,
        message: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
    DatabaseError {
        message: String,
    },
    SyncInProgress {
        session: String,
    },
}

impl EnclaveError {
    pub fn git(operation: &str, error: impl ToString) -> Self {
        EnclaveError::ExternalCommandFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        EnclaveError::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl ToString) -> Self {
        EnclaveError::ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn configuration(message: impl ToString) -> Self {
        EnclaveError::ConfigurationError {
            message: message.to_string(),
        }
    }

    pub fn session_not_found(session: &str) -> Self {
        EnclaveError::SessionNotFound {
            session: session.to_string(),
        }
    }

    /// Classify an internal error for the public API. Errors raised as
    /// `EnclaveError` anywhere in the chain keep their variant.
    pub fn from_internal(error: anyhow::Error) -> Self {
        if let Some(known) = error.downcast_ref::<EnclaveError>() {
            return known.clone();
        }

        let message = format!("{error:#}");
        for cause in error.chain() {
            if cause.downcast_ref::<rusqlite::Error>().is_some()
                || cause.downcast_ref::<r2d2::Error>().is_some()
            {
                return EnclaveError::DatabaseError { message };
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                return EnclaveError::IoError {
                    operation: "filesystem".to_string(),
                    path: String::new(),
                    message: format!("{message} ({io})"),
                };
            }
        }

        EnclaveError::ExternalCommandFailed {
            operation: "engine".to_string(),
            message,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::MergeConflict { .. })
    }
}

impl fmt::Display for EnclaveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SessionNotFound { session } => {
                write!(f, "Session '{session}' not found")
            }
            Self::ConfigurationError { message } => {
                write!(f, "Configuration error: {message}")
            }
            Self::ValidationError { field, message } => {
                write!(f, "Invalid input for field '{field}': {message}")
            }
            Self::ExternalCommandFailed { operation, message } => {
                write!(f, "Operation '{operation}' failed: {message}")
            }
            Self::MergeConflict {
                project,
                files,
                message,
            } => {
                write!(
                    f,
                    "Conflict while applying patches for '{project}' in {} file(s): {message}",
                    files.len()
                )
            }
            Self::IoError {
                operation,
                path,
                message,
            } => {
                write!(f, "I/O error during '{operation}' on '{path}': {message}")
            }
            Self::DatabaseError { message } => {
                write!(f, "Database error: {message}")
            }
            Self::SyncInProgress { session } => {
                write!(f, "Synchronization already running for session '{session}'")
            }
        }
    }
}

impl std::error::Error for EnclaveError {}

impl From<EnclaveError> for String {
    fn from(error: EnclaveError) -> Self {
        error.to_string()
    }
}
