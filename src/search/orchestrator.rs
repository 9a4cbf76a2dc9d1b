//! Search orchestration.
//!
//! Tries silent acquisition first and falls back to interactive sign-in with
//! the directory query as the continuation. Every search produces exactly one
//! [`SearchOutcome`], either returned directly or published to the
//! [`SearchView`] once sign-in concludes.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::context::{
    AuthenticationContext, AuthenticationResult, BoxFuture, Continuation,
};
use crate::auth::launcher::InteractionLauncher;
use crate::auth::oauth::TokenRequest;
use crate::auth::InteractiveAuthCompleter;
use crate::config::Config;
use crate::directory::{DirectoryQueryClient, SearchOutcome};
use crate::error::AppError;
use crate::search::state::{AttemptPhase, SearchView};

/// What `search` did with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchDispatch {
    /// The outcome is final and already published.
    Completed(SearchOutcome),
    /// Interactive sign-in was launched; the outcome arrives through the view.
    AwaitingSignIn,
}

/// Coordinates token acquisition and directory queries for the UI.
///
/// Cheap to clone; clones share the same context and view.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    context: Arc<AuthenticationContext>,
    directory: DirectoryQueryClient,
    request: TokenRequest,
    view: watch::Sender<SearchView>,
}

impl SearchOrchestrator {
    /// Create the orchestrator and its authentication context from configuration.
    pub async fn new(
        config: &Config,
        launcher: Arc<dyn InteractionLauncher>,
    ) -> Result<Self, AppError> {
        let context = AuthenticationContext::create(&config.oauth, launcher).await?;
        let directory = DirectoryQueryClient::new(&config.api, &config.oauth.tenant)?;

        let request = TokenRequest {
            resource: config.oauth.resource.clone(),
            client_id: config.oauth.client_id.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
        };

        let (view, _) = watch::channel(SearchView::default());

        Ok(Self {
            inner: Arc::new(Inner {
                context: Arc::new(context),
                directory,
                request,
                view,
            }),
        })
    }

    /// Subscribe to view changes.
    pub fn subscribe(&self) -> watch::Receiver<SearchView> {
        self.inner.view.subscribe()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> SearchView {
        self.inner.view.borrow().clone()
    }

    /// The entry point for the host's sign-in completion events.
    pub fn completer(&self) -> InteractiveAuthCompleter {
        InteractiveAuthCompleter::new(Arc::clone(&self.inner.context))
    }

    /// Search the directory for users whose principal name starts with `search_term`.
    pub async fn search(&self, search_term: &str) -> SearchDispatch {
        let inner = &self.inner;
        inner.view.send_modify(|view| {
            view.attempt += 1;
            view.search_term = search_term.to_string();
            view.phase = AttemptPhase::Idle;
            view.outcome = None;
        });

        if search_term.is_empty() {
            return SearchDispatch::Completed(inner.finish(SearchOutcome::EmptyQuery));
        }

        inner.set_phase(AttemptPhase::SilentAttempted);
        let result = inner
            .context
            .acquire_silent(&inner.request.resource, &inner.request.client_id);

        if !result.is_no_token_available() {
            return SearchDispatch::Completed(inner.complete_with(result, search_term).await);
        }

        info!("No cached token; starting interactive sign-in");

        // Set before launching so a fast completion is not overwritten
        inner.set_phase(AttemptPhase::InteractionPending);

        let resume = Arc::clone(inner);
        let term = search_term.to_string();
        let continuation: Continuation = Box::new(move |result| -> BoxFuture<()> {
            Box::pin(async move {
                resume.complete_with(result, &term).await;
            })
        });

        match inner.context.acquire_interactive_and_continue(
            &inner.request.resource,
            &inner.request.client_id,
            &inner.request.redirect_uri,
            continuation,
        ) {
            Ok(()) => SearchDispatch::AwaitingSignIn,
            Err(e) => {
                warn!("Could not start interactive sign-in: {}", e);
                SearchDispatch::Completed(inner.finish(SearchOutcome::AuthFailure {
                    code: e.code().to_string(),
                    description: e.description(),
                }))
            }
        }
    }

    /// Clear cached tokens and reset the view. Never touches the network.
    ///
    /// A pending interactive sign-in is left to conclude; searching stays
    /// disabled until it does.
    pub fn sign_out(&self) {
        self.inner.sign_out();
    }
}

impl Inner {
    /// Turn an acquisition result into the attempt's outcome and publish it.
    async fn complete_with(&self, result: AuthenticationResult, search_term: &str) -> SearchOutcome {
        let outcome = match result {
            AuthenticationResult::Success {
                access_token,
                user_display_id,
                ..
            } => {
                self.view
                    .send_modify(|view| view.active_user = Some(user_display_id));

                let outcome = self
                    .directory
                    .query(access_token.as_str(), search_term)
                    .await;

                if outcome.requires_sign_out() {
                    warn!("Directory rejected the cached token; signing out");
                    self.sign_out();
                }
                outcome
            }
            AuthenticationResult::Failure(failure) => SearchOutcome::AuthFailure {
                code: failure.code,
                description: failure.description,
            },
        };

        self.finish(outcome)
    }

    fn finish(&self, outcome: SearchOutcome) -> SearchOutcome {
        self.view.send_modify(|view| {
            view.phase = AttemptPhase::Completed;
            view.outcome = Some(outcome.clone());
        });
        outcome
    }

    fn set_phase(&self, phase: AttemptPhase) {
        self.view.send_modify(|view| view.phase = phase);
    }

    fn sign_out(&self) {
        self.context.clear_cache();

        // A sign-in still in flight keeps the search control disabled
        let pending = self.context.has_pending_interaction();
        self.view.send_modify(|view| {
            view.clear();
            if pending {
                view.phase = AttemptPhase::InteractionPending;
            }
        });
        info!("Signed out");
    }
}
