//! Authentication context: silent acquisition from the token cache and
//! interactive acquisition that resumes through a stored continuation.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use crate::auth::authority::Authority;
use crate::auth::cache::{CacheKey, TokenCache, TokenCacheEntry};
use crate::auth::completer::CompletionPayload;
use crate::auth::launcher::InteractionLauncher;
use crate::auth::oauth::{parse_callback_url, IdTokenClaims, OAuth2Client, PkceChallenge, TokenRequest};
use crate::auth::secure::SecureString;
use crate::config::OAuthConfig;
use crate::error::{AppError, AuthError};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error code for a silent acquisition that found nothing usable.
pub const NO_TOKEN_AVAILABLE: &str = "no_token_available";

/// Account identifier used when the id_token carries no usable claim.
const UNKNOWN_ACCOUNT: &str = "unknown";

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Invoked exactly once with the result of an interactive acquisition.
pub type Continuation = Box<dyn FnOnce(AuthenticationResult) -> BoxFuture<()> + Send>;

/// Code and description reported for a failed acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub code: String,
    pub description: String,
}

impl From<&AuthError> for AuthFailure {
    fn from(err: &AuthError) -> Self {
        Self {
            code: err.code().to_string(),
            description: err.description(),
        }
    }
}

/// Outcome of a token acquisition. The variant decides which fields exist.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationResult {
    Success {
        access_token: SecureString,
        user_display_id: String,
        expires_at: DateTime<Utc>,
    },
    Failure(AuthFailure),
}

impl AuthenticationResult {
    pub fn failure(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Failure(AuthFailure {
            code: code.into(),
            description: description.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// True when silent acquisition simply had nothing cached.
    pub fn is_no_token_available(&self) -> bool {
        matches!(self, Self::Failure(f) if f.code == NO_TOKEN_AVAILABLE)
    }
}

impl From<&TokenCacheEntry> for AuthenticationResult {
    fn from(entry: &TokenCacheEntry) -> Self {
        Self::Success {
            access_token: entry.access_token.clone(),
            user_display_id: entry.display_id.clone(),
            expires_at: entry.expires_at,
        }
    }
}

/// The single outstanding interactive acquisition.
pub struct PendingInteractiveRequest {
    pub request: TokenRequest,
    state: String,
    pkce: PkceChallenge,
    cache_generation: u64,
    continuation: Continuation,
}

impl std::fmt::Debug for PendingInteractiveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingInteractiveRequest")
            .field("request", &self.request)
            .field("cache_generation", &self.cache_generation)
            .finish_non_exhaustive()
    }
}

/// A pending request that has been concluded, ready to resume.
pub struct ConcludedInteraction {
    pub result: AuthenticationResult,
    pub continuation: Continuation,
}

#[derive(Debug, Default)]
struct CacheState {
    cache: TokenCache,
    /// Account of the last successful interactive sign-in.
    current_account: Option<String>,
    /// Bumped on every clear.
    generation: u64,
}

/// Owns the token cache and the authority, and runs both acquisition paths.
pub struct AuthenticationContext {
    oauth_client: OAuth2Client,
    state: Mutex<CacheState>,
    pending: Mutex<Option<PendingInteractiveRequest>>,
    launcher: Arc<dyn InteractionLauncher>,
}

impl AuthenticationContext {
    /// Build the context, validating the authority when configured to.
    pub async fn create(
        config: &OAuthConfig,
        launcher: Arc<dyn InteractionLauncher>,
    ) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let authority = Authority::from_template(&config.authority_template, &config.tenant)?;
        if config.validate_authority {
            authority.validate(&http_client).await?;
        } else {
            debug!("Authority validation disabled for {}", authority);
        }

        info!("Authentication context created for {}", authority);

        Ok(Self {
            oauth_client: OAuth2Client::new(authority, http_client),
            state: Mutex::new(CacheState::default()),
            pending: Mutex::new(None),
            launcher,
        })
    }

    pub fn authority(&self) -> &Authority {
        self.oauth_client.authority()
    }

    /// Return a cached token for the current account without any user interaction.
    pub fn acquire_silent(&self, resource: &str, client_id: &str) -> AuthenticationResult {
        let state = self.lock_state();

        let entry = state.current_account.as_ref().and_then(|account| {
            state
                .cache
                .lookup(&CacheKey::new(resource, client_id, account.as_str()))
        });

        match entry {
            Some(entry) => {
                debug!("Silent acquisition served from cache for {}", entry.display_id);
                AuthenticationResult::from(entry)
            }
            None => {
                debug!("No cached token for resource {}", resource);
                AuthenticationResult::failure(
                    NO_TOKEN_AVAILABLE,
                    "No cached token is available for this resource",
                )
            }
        }
    }

    /// Register the interactive request and launch sign-in; returns without a result.
    ///
    /// The continuation runs later, from [`InteractiveAuthCompleter`](crate::auth::completer::InteractiveAuthCompleter).
    pub fn acquire_interactive_and_continue(
        &self,
        resource: &str,
        client_id: &str,
        redirect_uri: &str,
        continuation: Continuation,
    ) -> Result<(), AuthError> {
        let request = TokenRequest {
            resource: resource.to_string(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
        };

        let authorize_url = {
            let mut pending = self.lock_pending();
            if pending.is_some() {
                warn!("Interactive acquisition requested while another is pending");
                return Err(AuthError::InteractionAlreadyInProgress);
            }

            let pkce = PkceChallenge::new();
            let (url, state) = self.oauth_client.generate_auth_url(&request, &pkce)?;
            *pending = Some(PendingInteractiveRequest {
                request,
                state,
                pkce,
                cache_generation: self.lock_state().generation,
                continuation,
            });
            url
        };

        if let Err(e) = self.launcher.launch(&authorize_url) {
            self.lock_pending().take();
            return Err(e);
        }

        info!("Interactive sign-in launched");
        Ok(())
    }

    pub fn has_pending_interaction(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Conclude the pending request with the host's completion payload.
    ///
    /// Returns `None` when nothing is pending.
    pub async fn conclude_interactive(
        &self,
        payload: CompletionPayload,
    ) -> Option<ConcludedInteraction> {
        let PendingInteractiveRequest {
            request,
            state,
            pkce,
            cache_generation,
            continuation,
        } = self.lock_pending().take()?;

        // Only the Send continuation is held across the exchange, never a borrow of it
        let result = match self.redeem(&request, &state, &pkce, payload).await {
            Ok(entry) => {
                let result = AuthenticationResult::from(&entry);
                if cache_generation != self.lock_state().generation {
                    info!("Token cache was cleared during sign-in; storing token fresh");
                }
                self.remember(entry);
                result
            }
            Err(e) => {
                warn!("Interactive acquisition failed: {}", e);
                AuthenticationResult::Failure(AuthFailure::from(&e))
            }
        };

        Some(ConcludedInteraction {
            result,
            continuation,
        })
    }

    async fn redeem(
        &self,
        request: &TokenRequest,
        expected_state: &str,
        pkce: &PkceChallenge,
        payload: CompletionPayload,
    ) -> Result<TokenCacheEntry, AuthError> {
        let url = match payload {
            CompletionPayload::Redirect(url) => url,
            CompletionPayload::Cancelled => return Err(AuthError::UserCancelled),
            CompletionPayload::Error(description) => {
                return Err(AuthError::OAuthFailed {
                    code: "authentication_failed".into(),
                    description,
                })
            }
        };

        let (code, state) = parse_callback_url(&url)?;
        if state != expected_state {
            return Err(AuthError::StateValidationFailed);
        }

        let token_response = self
            .oauth_client
            .exchange_code(request, &code, &pkce.verifier)
            .await?;

        let expires_at = token_expiry(Utc::now(), token_response.expires_in).ok_or_else(|| {
            AuthError::TokenExchangeFailed(format!(
                "Unusable token lifetime: {}s",
                token_response.expires_in
            ))
        })?;

        let claims = token_response
            .id_token
            .as_deref()
            .and_then(IdTokenClaims::decode)
            .unwrap_or_default();
        let account = claims
            .account_id()
            .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string());
        let display_id = claims.displayable_id().unwrap_or_else(|| account.clone());

        Ok(TokenCacheEntry {
            key: CacheKey::new(
                request.resource.as_str(),
                request.client_id.as_str(),
                account,
            ),
            access_token: SecureString::new(token_response.access_token.clone()),
            display_id,
            expires_at,
        })
    }

    /// Store a token and make its account the current one.
    pub(crate) fn remember(&self, entry: TokenCacheEntry) {
        let mut state = self.lock_state();
        state.current_account = Some(entry.key.account.clone());
        state.cache.store(entry);
    }

    /// Empty the token cache and forget the current account.
    pub fn clear_cache(&self) {
        let mut state = self.lock_state();
        state.cache.clear();
        state.current_account = None;
        state.generation += 1;
        info!("Token cache cleared");
    }

    pub fn cached_token_count(&self) -> usize {
        self.lock_state().cache.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingInteractiveRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Expiry instant for a token issued at `now`, or `None` when out of range.
fn token_expiry(now: DateTime<Utc>, expires_in: u64) -> Option<DateTime<Utc>> {
    let lifetime = ChronoDuration::try_seconds(i64::try_from(expires_in).ok()?)?;
    now.checked_add_signed(lifetime)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::oauth::encode_test_id_token;
    use crate::config::test_config;
    use std::collections::HashMap;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESOURCE: &str = "https://graph.windows.net/";
    const CLIENT: &str = "test-client";
    const REDIRECT: &str = "http://localhost:28491/callback";

    /// Records authorize URLs instead of opening a browser.
    #[derive(Default)]
    pub(crate) struct RecordingLauncher {
        pub urls: Mutex<Vec<Url>>,
        pub fail: bool,
    }

    impl RecordingLauncher {
        /// Redirect URL the provider would send back for the last launch.
        pub fn redirect_with_code(&self, code: &str) -> String {
            let urls = self.urls.lock().unwrap();
            let url = urls.last().expect("no sign-in launched");
            let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
            format!("{}?code={}&state={}", REDIRECT, code, params["state"])
        }

        pub fn launches(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    impl InteractionLauncher for RecordingLauncher {
        fn launch(&self, authorize_url: &Url) -> Result<(), AuthError> {
            if self.fail {
                return Err(AuthError::LaunchFailed("no browser".into()));
            }
            self.urls.lock().unwrap().push(authorize_url.clone());
            Ok(())
        }
    }

    pub(crate) async fn mount_token_endpoint(server: &MockServer, code: &str, token: &str) {
        Mock::given(method("POST"))
            .and(path("/contoso.onmicrosoft.com/oauth2/token"))
            .and(body_string_contains(format!("code={}", code)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": token,
                "token_type": "Bearer",
                "expires_in": "3599",
                "id_token": encode_test_id_token(serde_json::json!({
                    "oid": "alice-oid",
                    "upn": "alice@contoso.com"
                }))
            })))
            .mount(server)
            .await;
    }

    async fn context_with(
        server: &MockServer,
        launcher: Arc<RecordingLauncher>,
    ) -> AuthenticationContext {
        let config = test_config(&server.uri());
        AuthenticationContext::create(&config.oauth, launcher)
            .await
            .unwrap()
    }

    fn recording_continuation(calls: Arc<Mutex<Vec<AuthenticationResult>>>) -> Continuation {
        Box::new(move |result| -> BoxFuture<()> {
            Box::pin(async move {
                calls.lock().unwrap().push(result);
            })
        })
    }

    fn noop_continuation() -> Continuation {
        Box::new(|_| -> BoxFuture<()> { Box::pin(async {}) })
    }

    fn cached_entry(account: &str, token: &str) -> TokenCacheEntry {
        TokenCacheEntry {
            key: CacheKey::new(RESOURCE, CLIENT, account),
            access_token: SecureString::from(token),
            display_id: format!("{}@contoso.com", account),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_silent_without_cache_reports_no_token() {
        let server = MockServer::start().await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher.clone()).await;

        let result = context.acquire_silent(RESOURCE, CLIENT);
        assert!(result.is_no_token_available());
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_silent_returns_cached_token() {
        let server = MockServer::start().await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher.clone()).await;

        context.remember(cached_entry("alice", "cached-token"));

        match context.acquire_silent(RESOURCE, CLIENT) {
            AuthenticationResult::Success {
                access_token,
                user_display_id,
                ..
            } => {
                assert_eq!(access_token.as_str(), "cached-token");
                assert_eq!(user_display_id, "alice@contoso.com");
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_silent_ignores_expired_token() {
        let server = MockServer::start().await;
        let context = context_with(&server, Arc::new(RecordingLauncher::default())).await;

        let mut entry = cached_entry("alice", "old-token");
        entry.expires_at = Utc::now() - ChronoDuration::minutes(1);
        context.remember(entry);

        assert!(context.acquire_silent(RESOURCE, CLIENT).is_no_token_available());
    }

    #[tokio::test]
    async fn test_second_interactive_request_is_rejected() {
        let server = MockServer::start().await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher.clone()).await;
        let calls = Arc::new(Mutex::new(Vec::new()));

        context
            .acquire_interactive_and_continue(
                RESOURCE,
                CLIENT,
                REDIRECT,
                recording_continuation(calls.clone()),
            )
            .unwrap();
        let first_url = launcher.urls.lock().unwrap()[0].clone();

        let result = context.acquire_interactive_and_continue(
            RESOURCE,
            CLIENT,
            REDIRECT,
            recording_continuation(calls.clone()),
        );
        assert!(matches!(result, Err(AuthError::InteractionAlreadyInProgress)));
        assert_eq!(launcher.launches(), 1);
        assert!(context.has_pending_interaction());

        // The first request still concludes with its own state
        assert_eq!(launcher.urls.lock().unwrap()[0], first_url);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_nothing_pending() {
        let server = MockServer::start().await;
        let launcher = Arc::new(RecordingLauncher {
            fail: true,
            ..Default::default()
        });
        let context = context_with(&server, launcher).await;

        let result = context.acquire_interactive_and_continue(
            RESOURCE,
            CLIENT,
            REDIRECT,
            noop_continuation(),
        );
        assert!(matches!(result, Err(AuthError::LaunchFailed(_))));
        assert!(!context.has_pending_interaction());
    }

    #[tokio::test]
    async fn test_conclude_exchanges_code_and_caches_token() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "good-code", "fresh-token").await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher.clone()).await;
        let calls = Arc::new(Mutex::new(Vec::new()));

        context
            .acquire_interactive_and_continue(
                RESOURCE,
                CLIENT,
                REDIRECT,
                recording_continuation(calls.clone()),
            )
            .unwrap();

        let payload = CompletionPayload::Redirect(launcher.redirect_with_code("good-code"));
        let concluded = context.conclude_interactive(payload).await.unwrap();
        assert!(concluded.result.is_success());
        assert!(!context.has_pending_interaction());

        (concluded.continuation)(concluded.result).await;
        assert_eq!(calls.lock().unwrap().len(), 1);

        // Subsequent silent acquisition is served from the cache
        match context.acquire_silent(RESOURCE, CLIENT) {
            AuthenticationResult::Success {
                access_token,
                user_display_id,
                ..
            } => {
                assert_eq!(access_token.as_str(), "fresh-token");
                assert_eq!(user_display_id, "alice@contoso.com");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conclude_rejects_state_mismatch() {
        let server = MockServer::start().await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher).await;

        context
            .acquire_interactive_and_continue(
                RESOURCE,
                CLIENT,
                REDIRECT,
                noop_continuation(),
            )
            .unwrap();

        let payload =
            CompletionPayload::Redirect(format!("{}?code=abc&state=forged", REDIRECT));
        let concluded = context.conclude_interactive(payload).await.unwrap();
        match concluded.result {
            AuthenticationResult::Failure(failure) => assert_eq!(failure.code, "state_mismatch"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(context.cached_token_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_a_failure_result() {
        let server = MockServer::start().await;
        let context = context_with(&server, Arc::new(RecordingLauncher::default())).await;

        context
            .acquire_interactive_and_continue(
                RESOURCE,
                CLIENT,
                REDIRECT,
                noop_continuation(),
            )
            .unwrap();

        let concluded = context
            .conclude_interactive(CompletionPayload::Cancelled)
            .await
            .unwrap();
        assert_eq!(
            concluded.result,
            AuthenticationResult::failure("authentication_canceled", "User cancelled authentication")
        );
    }

    #[tokio::test]
    async fn test_conclude_without_pending_returns_none() {
        let server = MockServer::start().await;
        let context = context_with(&server, Arc::new(RecordingLauncher::default())).await;

        assert!(context
            .conclude_interactive(CompletionPayload::Cancelled)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_completion_after_clear_is_still_stored() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, "late-code", "late-token").await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher.clone()).await;

        context.remember(cached_entry("bob", "bob-token"));
        context
            .acquire_interactive_and_continue(
                RESOURCE,
                CLIENT,
                REDIRECT,
                noop_continuation(),
            )
            .unwrap();

        context.clear_cache();
        assert_eq!(context.cached_token_count(), 0);

        let payload = CompletionPayload::Redirect(launcher.redirect_with_code("late-code"));
        let concluded = context.conclude_interactive(payload).await.unwrap();
        assert!(concluded.result.is_success());
        assert_eq!(context.cached_token_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_forgets_account() {
        let server = MockServer::start().await;
        let context = context_with(&server, Arc::new(RecordingLauncher::default())).await;

        context.remember(cached_entry("alice", "token"));
        context.clear_cache();
        context.clear_cache();

        assert_eq!(context.cached_token_count(), 0);
        assert!(context.acquire_silent(RESOURCE, CLIENT).is_no_token_available());
    }

    #[test]
    fn test_token_expiry_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        assert_eq!(
            token_expiry(now, 3600),
            Some(now + ChronoDuration::seconds(3600))
        );
        assert_eq!(token_expiry(now, 100_000_000_000_000_000), None);
        assert_eq!(token_expiry(now, u64::MAX), None);
    }

    #[tokio::test]
    async fn test_oversized_token_lifetime_is_a_failure_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contoso.onmicrosoft.com/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "forever-token",
                "token_type": "Bearer",
                "expires_in": "100000000000000000"
            })))
            .mount(&server)
            .await;
        let launcher = Arc::new(RecordingLauncher::default());
        let context = context_with(&server, launcher.clone()).await;

        context
            .acquire_interactive_and_continue(RESOURCE, CLIENT, REDIRECT, noop_continuation())
            .unwrap();

        let payload = CompletionPayload::Redirect(launcher.redirect_with_code("any-code"));
        let concluded = context.conclude_interactive(payload).await.unwrap();
        match concluded.result {
            AuthenticationResult::Failure(failure) => {
                assert_eq!(failure.code, "token_exchange_failed")
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(context.cached_token_count(), 0);
        assert!(!context.has_pending_interaction());
    }
}
