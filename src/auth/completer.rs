//! Entry point for the host to deliver the end of an interactive sign-in.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::context::AuthenticationContext;

/// How an interactive sign-in round trip ended, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionPayload {
    /// The redirect URL the identity provider sent the browser to.
    Redirect(String),
    /// The user or the host abandoned the sign-in.
    Cancelled,
    /// The host could not receive the redirect.
    Error(String),
}

/// Concludes the pending interactive request and resumes its continuation.
#[derive(Clone)]
pub struct InteractiveAuthCompleter {
    context: Arc<AuthenticationContext>,
}

impl InteractiveAuthCompleter {
    pub fn new(context: Arc<AuthenticationContext>) -> Self {
        Self { context }
    }

    /// Returns `false` when no request was pending and the payload was dropped.
    pub async fn on_external_auth_completion(&self, payload: CompletionPayload) -> bool {
        match self.context.conclude_interactive(payload).await {
            Some(concluded) => {
                info!(
                    "Interactive sign-in concluded (success: {})",
                    concluded.result.is_success()
                );
                (concluded.continuation)(concluded.result).await;
                true
            }
            None => {
                warn!("Sign-in completion received with no pending request; dropping it");
                false
            }
        }
    }
}
