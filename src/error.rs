use std::error::Error as StdError;

use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};

/// Message carried by [`Error::TokenNotFound`].
pub const TOKEN_NOT_FOUND: &str = "Auth token not found from request";

/// Errors produced while configuring or running a [`JwtStrategy`](crate::JwtStrategy).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No extractor produced a token for the request
    #[error("{}", TOKEN_NOT_FOUND)]
    TokenNotFound,

    /// The verifier configuration is unusable
    #[error("Invalid verifier configuration: {0}")]
    Config(String),

    /// The token was rejected by the verifier
    #[error(transparent)]
    Token(#[from] TokenError),

    /// No key in the key set matches the token
    #[error("Key not found: {0:?}")]
    KeyNotFound(Option<String>),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// An error reported by the verify callback through [`Resolve`](crate::Resolve)
    #[error("{0}")]
    Callback(Box<dyn StdError + Send + Sync>),

    /// The verify callback finished without resolving the attempt
    #[error("Verify callback finished without resolving")]
    Unresolved,
}

impl Error {
    /// Machine readable code for the error, if it has one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Error::TokenNotFound => Some("TOKEN_NOT_FOUND"),
            Error::Config(_) => Some("INVALID_CONFIGURATION"),
            Error::Token(e) => Some(e.code().as_str()),
            Error::KeyNotFound(_) => Some("KEY_NOT_FOUND"),
            Error::Jwt(_) => Some("JWT_ERROR"),
            Error::Reqwest(_) => Some("FETCH_ERROR"),
            Error::Callback(_) => None,
            Error::Unresolved => Some("UNRESOLVED"),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Error::Token(_) => "TokenError",
            Error::Callback(_) => "CallbackError",
            _ => "Error",
        }
    }
}

/// Diagnostic code attached to a [`TokenError`].
///
/// Most variants mirror [`jsonwebtoken::errors::ErrorKind`]; the rest cover
/// failures that happen around the decode call itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenErrorCode {
    /// When the token is invalid
    #[error("Invalid token")]
    InvalidToken,

    /// When the signature is invalid
    #[error("Invalid signature")]
    InvalidSignature,

    /// When a claim required by the validation is not present
    #[error("Missing required claim: {0}")]
    MissingRequiredClaim(String),

    /// When a token's `exp` claim indicates that it has expired
    #[error("Expired signature")]
    ExpiredSignature,

    /// When a token's `iss` claim does not match the expected issuer
    #[error("Invalid issuer")]
    InvalidIssuer,

    /// When a token's `aud` claim does not match one of the expected audience values
    #[error("Invalid audience")]
    InvalidAudience,

    /// When a token's `sub` claim does not match one of the expected subject values
    #[error("Invalid subject")]
    InvalidSubject,

    /// When a token's `nbf` claim represents a time in the future
    #[error("Immature signature")]
    ImmatureSignature,

    /// When the algorithm in the header doesn't match the one passed to `decode` or the encoding/decoding key
    /// used doesn't match the alg requested
    #[error("Invalid algorithm")]
    InvalidAlgorithm,

    /// When the Validation struct does not contain at least 1 algorithm
    #[error("Missing algorithm")]
    MissingAlgorithm,

    /// When the token is not three base64url segments of valid JSON
    #[error("Malformed token")]
    Malformed,

    /// When the key fetcher could not produce a key for the token
    #[error("Key fetch failed")]
    KeyFetch,

    /// Anything else coming out of the decoder, such as cryptographic failures.
    #[error("Internal error")]
    InternalError,
}

impl TokenErrorCode {
    /// Stable identifier used as the challenge `type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenErrorCode::InvalidToken => "INVALID_TOKEN",
            TokenErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            TokenErrorCode::MissingRequiredClaim(_) => "MISSING_REQUIRED_CLAIM",
            TokenErrorCode::ExpiredSignature => "EXPIRED",
            TokenErrorCode::InvalidIssuer => "INVALID_ISSUER",
            TokenErrorCode::InvalidAudience => "INVALID_AUDIENCE",
            TokenErrorCode::InvalidSubject => "INVALID_SUBJECT",
            TokenErrorCode::ImmatureSignature => "INACTIVE",
            TokenErrorCode::InvalidAlgorithm => "INVALID_ALGORITHM",
            TokenErrorCode::MissingAlgorithm => "MISSING_ALGORITHM",
            TokenErrorCode::Malformed => "MALFORMED",
            TokenErrorCode::KeyFetch => "KEY_FETCH_FAILED",
            TokenErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// A verification failure: the token was present but is not acceptable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TokenError {
    code: TokenErrorCode,
    message: String,
}

impl TokenError {
    pub fn new(code: TokenErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &TokenErrorCode {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The `{message, type}` challenge handed to the host on failure.
    pub fn challenge(&self) -> serde_json::Value {
        serde_json::json!({
            "message": self.message,
            "type": self.code.as_str(),
        })
    }
}

impl From<TokenErrorCode> for TokenError {
    fn from(code: TokenErrorCode) -> Self {
        let message = code.to_string();
        Self { code, message }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        let code = match err.kind() {
            ErrorKind::ExpiredSignature => TokenErrorCode::ExpiredSignature,
            ErrorKind::InvalidSignature => TokenErrorCode::InvalidSignature,
            ErrorKind::InvalidAudience => TokenErrorCode::InvalidAudience,
            ErrorKind::InvalidAlgorithm => TokenErrorCode::InvalidAlgorithm,
            ErrorKind::InvalidAlgorithmName => TokenErrorCode::InvalidAlgorithm,
            ErrorKind::InvalidToken => TokenErrorCode::InvalidToken,
            ErrorKind::InvalidIssuer => TokenErrorCode::InvalidIssuer,
            ErrorKind::InvalidSubject => TokenErrorCode::InvalidSubject,
            ErrorKind::ImmatureSignature => TokenErrorCode::ImmatureSignature,
            ErrorKind::MissingAlgorithm => TokenErrorCode::MissingAlgorithm,
            ErrorKind::MissingRequiredClaim(claim) => {
                TokenErrorCode::MissingRequiredClaim(claim.to_string())
            }
            ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                TokenErrorCode::Malformed
            }
            _ => TokenErrorCode::InternalError,
        };

        Self {
            message: err.to_string(),
            code,
        }
    }
}

/// A plain error record that keeps only data fields.
///
/// Every error leaving the strategy is reduced to this shape so hosts never
/// need to know about the concrete error types underneath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub name: String,
    /// The chain of underlying causes, outermost first.
    pub stack: Option<String>,
}

impl From<&Error> for ErrorRecord {
    fn from(err: &Error) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            code: err.code().map(str::to_owned),
            name: err.name().to_owned(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }
}

impl From<Error> for ErrorRecord {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}
