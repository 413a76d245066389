use thiserror::Error;

/// Error code the REST layer returns when a single-row read matched no rows.
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Postgres `insufficient_privilege`.
const PERMISSION_DENIED_CODE: &str = "42501";

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("not signed in")]
    Unauthenticated,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no rows returned")]
    NoRows,

    #[error("{0} not found")]
    NotFound(String),

    #[error("backend unreachable: {0}")]
    Network(String),

    #[error("tenant provisioning failed (script: {primary}; fallback: {fallback})")]
    Provisioning { primary: String, fallback: String },

    #[error("malformed tenant identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("tenant context is not ready")]
    TenantNotReady,

    #[error("tenant views are simulated for this session; writes are disabled")]
    SimulatedTenant,

    #[error("file exceeds the {limit} byte upload limit ({size} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend error {status} ({code}): {message}")]
    Backend {
        status: u16,
        code: String,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds the error for a structured backend failure, classifying the
    /// cases callers need to tell apart.
    pub fn from_backend(status: u16, code: Option<&str>, message: &str) -> Self {
        let code = code.unwrap_or_default();
        if code == NO_ROWS_CODE {
            return Error::NoRows;
        }
        if code == PERMISSION_DENIED_CODE
            || status == 403
            || message.to_lowercase().contains("permission denied")
        {
            return Error::PermissionDenied(message.to_string());
        }
        if status == 401 {
            return Error::Unauthenticated;
        }
        Error::Backend {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoRows | Error::NotFound(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }

    /// Short machine-readable kind, sent alongside the message in notices.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidCredentials => "invalid_credentials",
            Error::Unauthenticated => "unauthenticated",
            Error::PermissionDenied(_) => "permission_denied",
            Error::NoRows | Error::NotFound(_) => "not_found",
            Error::Network(_) => "network",
            Error::Provisioning { .. } => "provisioning_failed",
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::TenantNotReady => "tenant_not_ready",
            Error::SimulatedTenant => "simulated_tenant",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::InvalidInput(_) => "invalid_input",
            Error::Backend { .. } => "backend",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            Error::Network(e.to_string())
        } else if e.is_decode() {
            Error::Backend {
                status: 0,
                code: "decode".into(),
                message: e.to_string(),
            }
        } else {
            Error::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_code_is_distinguished() {
        let err = Error::from_backend(406, Some(NO_ROWS_CODE), "JSON object requested, multiple (or no) rows returned");
        assert!(err.is_not_found());
    }

    #[test]
    fn permission_denied_is_detected_from_message_text() {
        let err = Error::from_backend(400, None, "permission denied for table trainers");
        assert!(err.is_permission_denied());

        let err = Error::from_backend(400, Some("42501"), "new row violates row-level security policy");
        assert!(err.is_permission_denied());
    }

    #[test]
    fn other_failures_keep_status_and_code() {
        let err = Error::from_backend(404, Some("PGRST202"), "Could not find the function");
        match err {
            Error::Backend { status, code, .. } => {
                assert_eq!(status, 404);
                assert_eq!(code, "PGRST202");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
