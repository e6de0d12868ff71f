//! Error types for anti-forgery operations.

use thiserror::Error;

/// Result type for anti-forgery operations.
pub type Result<T> = std::result::Result<T, AntiForgeryError>;

/// Message shown to end users for every validation failure.
pub const PUBLIC_VALIDATION_MESSAGE: &str = "The anti-forgery token could not be validated.";

/// Anti-forgery errors.
///
/// Configuration errors indicate a misconfigured host and should surface as
/// server errors. Validation failures are security decisions: they carry a
/// precise [`ValidationFailure`] for logs but map to one generic response.
#[derive(Debug, Error)]
pub enum AntiForgeryError {
    /// `require_ssl` is set but the request arrived over plaintext
    #[error("The anti-forgery system is configured with require_ssl = true, but the current request is not an SSL request")]
    SslRequired,

    /// An authenticated identity produced nothing the form token could be bound to
    #[error(
        "The provided identity of type '{authentication_type}' is authenticated but has no name, no usable claims and no additional data; set suppress_identity_heuristic_checks if this is intended"
    )]
    UnbindableIdentity {
        /// Authentication scheme of the offending identity
        authentication_type: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid argument passed to a constructor
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The data protection provider failed while sealing a token
    #[error("Token protection failed: {0}")]
    Protection(#[from] ProtectionError),

    /// Token validation failed
    #[error("Anti-forgery validation failed: {}", .0.code())]
    Validation(ValidationFailure),
}

impl AntiForgeryError {
    /// Whether this error is a validation failure rather than a host problem.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The specific failing check, if this is a validation failure.
    pub fn failure(&self) -> Option<ValidationFailure> {
        match self {
            Self::Validation(failure) => Some(*failure),
            _ => None,
        }
    }

    /// HTTP status a host should respond with.
    pub fn status_code(&self) -> u16 {
        if self.is_validation_failure() { 400 } else { 500 }
    }

    /// Message safe to show to end users.
    ///
    /// Validation failures never reveal which check failed.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => PUBLIC_VALIDATION_MESSAGE,
            _ => "Internal server error",
        }
    }
}

impl From<ValidationFailure> for AntiForgeryError {
    fn from(failure: ValidationFailure) -> Self {
        Self::Validation(failure)
    }
}

impl From<TokenDecodeError> for AntiForgeryError {
    fn from(_: TokenDecodeError) -> Self {
        Self::Validation(ValidationFailure::MalformedToken)
    }
}

/// The check that rejected a token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationFailure {
    /// No cookie token on the request
    CookieMissing,
    /// No form token on the request
    FormFieldMissing,
    /// Cookie token supplied as form token or the reverse
    TokensSwapped,
    /// The halves were not issued together
    SecurityTokenMismatch,
    /// Form token was issued for a different user name
    UsernameMismatch,
    /// Form token was issued for a different claims identity
    ClaimUidMismatch,
    /// The additional data provider rejected the form token
    AdditionalDataCheckFailed,
    /// A token could not be decoded
    MalformedToken,
}

impl ValidationFailure {
    /// Stable reason code for logs and telemetry.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CookieMissing => "cookie_missing",
            Self::FormFieldMissing => "form_field_missing",
            Self::TokensSwapped => "tokens_swapped",
            Self::SecurityTokenMismatch => "security_token_mismatch",
            Self::UsernameMismatch => "username_mismatch",
            Self::ClaimUidMismatch => "claim_uid_mismatch",
            Self::AdditionalDataCheckFailed => "additional_data_check_failed",
            Self::MalformedToken => "malformed_token",
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A serialized token that could not be turned back into a token.
///
/// All variants are one error kind to callers; the variant only records the
/// cause for logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenDecodeError {
    #[error("token is not valid base64url")]
    Base64,

    #[error("token could not be unprotected: {0}")]
    Unprotect(ProtectionError),

    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),

    #[error("token payload is truncated")]
    Truncated,

    #[error("token payload has trailing data")]
    TrailingData,

    #[error("token payload contains invalid UTF-8")]
    InvalidUtf8,

    #[error("token payload contains invalid flag byte {0}")]
    InvalidFlag(u8),
}

impl TokenDecodeError {
    /// Short cause code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::Unprotect(_) => "unprotect",
            Self::UnsupportedVersion(_) => "version",
            Self::Truncated => "truncated",
            Self::TrailingData => "trailing_data",
            Self::InvalidUtf8 => "utf8",
            Self::InvalidFlag(_) => "flag",
        }
    }
}

/// Data protection provider errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtectionError {
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("no key with id {0} in the key ring")]
    UnknownKey(u32),

    #[error("protected payload is too short")]
    Truncated,

    #[error("integrity check failed")]
    IntegrityCheckFailed,

    #[error("encryption failed")]
    EncryptionFailed,
}
