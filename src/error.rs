//! Error types for the directory searcher.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid authority: {0}")]
    InvalidAuthority(String),

    #[error("Authority validation failed: {0}")]
    AuthorityValidationFailed(String),

    #[error("An interactive sign-in is already in progress")]
    InteractionAlreadyInProgress,

    #[error("Failed to launch sign-in: {0}")]
    LaunchFailed(String),

    #[error("OAuth2 authorization failed: {code}: {description}")]
    OAuthFailed { code: String, description: String },

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("User cancelled authentication")]
    UserCancelled,
}

impl AuthError {
    /// Stable error code carried by a failed `AuthenticationResult`.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidAuthority(_) => "invalid_authority",
            Self::AuthorityValidationFailed(_) => "authority_validation_failed",
            Self::InteractionAlreadyInProgress => "interaction_already_in_progress",
            Self::LaunchFailed(_) => "interaction_launch_failed",
            Self::OAuthFailed { code, .. } => code,
            Self::InvalidAuthCode => "invalid_authorization_code",
            Self::TokenExchangeFailed(_) => "token_exchange_failed",
            Self::StateValidationFailed => "state_mismatch",
            Self::UserCancelled => "authentication_canceled",
        }
    }

    /// Human-readable description, preferring what the provider supplied.
    pub fn description(&self) -> String {
        match self {
            Self::OAuthFailed { description, .. } => description.clone(),
            other => other.to_string(),
        }
    }
}

/// API-related errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Invalid directory endpoint: {0}")]
    InvalidEndpoint(String),
}

impl AppError {
    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::InvalidAuthority(_)) => {
                "The sign-in authority is misconfigured. Please check settings."
            }
            Self::Auth(AuthError::AuthorityValidationFailed(_)) => {
                "The sign-in authority could not be verified."
            }
            Self::Auth(AuthError::InteractionAlreadyInProgress) => {
                "Finish the sign-in already in progress first."
            }
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.",
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(_) => "Sign-in failed. Please try again.",
            Self::Api(ApiError::InvalidEndpoint(_)) => {
                "The directory endpoint is misconfigured. Please check settings."
            }
            Self::Network(_) => "Network error. Check your connection.",
            _ => "An error occurred. Please try again.",
        }
    }
}
