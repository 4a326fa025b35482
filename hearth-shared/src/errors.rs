use serde::{Deserialize, Serialize};

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/transport errors
/// - E1xxx: Auth errors
/// - E2xxx: Provisioning errors
/// - E3xxx: Data errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared/transport (E0xxx)
    InternalError,
    ConfigError,
    NetworkError,
    Timeout,
    ServiceUnavailable,
    DecodeError,
    ValidationError,
    Unauthorized,

    // Auth (E1xxx)
    InvalidCredentials,
    EmailAlreadyRegistered,
    AlreadyMember,
    OtpInvalid,
    OtpExpired,
    OAuthExchangeFailed,
    SessionMissing,
    SessionExpired,
    PasswordTooWeak,

    // Provisioning (E2xxx)
    ProfileMissing,
    FamilyMissing,
    ProfileCreateFailed,
    ProvisioningFailed,
    InvitationConflict,

    // Data (E3xxx)
    NotFound,
    Conflict,
    PermissionDenied,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared/transport
            Self::InternalError => "E0001",
            Self::ConfigError => "E0002",
            Self::NetworkError => "E0003",
            Self::Timeout => "E0004",
            Self::ServiceUnavailable => "E0005",
            Self::DecodeError => "E0006",
            Self::ValidationError => "E0007",
            Self::Unauthorized => "E0008",

            // Auth
            Self::InvalidCredentials => "E1001",
            Self::EmailAlreadyRegistered => "E1002",
            Self::AlreadyMember => "E1003",
            Self::OtpInvalid => "E1004",
            Self::OtpExpired => "E1005",
            Self::OAuthExchangeFailed => "E1006",
            Self::SessionMissing => "E1007",
            Self::SessionExpired => "E1008",
            Self::PasswordTooWeak => "E1009",

            // Provisioning
            Self::ProfileMissing => "E2001",
            Self::FamilyMissing => "E2002",
            Self::ProfileCreateFailed => "E2003",
            Self::ProvisioningFailed => "E2004",
            Self::InvitationConflict => "E2005",

            // Data
            Self::NotFound => "E3001",
            Self::Conflict => "E3002",
            Self::PermissionDenied => "E3003",
        }
    }

    /// Transient codes that the bounded retry loop is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ServiceUnavailable
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn session_missing() -> Self {
        Self::new(ErrorCode::SessionMissing, "no active session")
    }

    /// The `ErrorCode` carried by this error, when it has one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Known { code, .. } => Some(*code),
            Self::Transport(e) if e.is_timeout() => Some(ErrorCode::Timeout),
            Self::Transport(e) if e.is_connect() => Some(ErrorCode::NetworkError),
            _ => None,
        }
    }

    /// Whether the fetch-with-retry loop may try this call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Known { code, .. } => code.is_transient(),
            Self::Transport(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(true)
            }
            Self::Internal(_) | Self::Validation(_) => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
