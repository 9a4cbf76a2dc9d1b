//! Azure AD token acquisition.
//!
//! Silent acquisition from an in-memory token cache, and interactive
//! acquisition (authorization code with PKCE) that resumes through a
//! continuation once the host reports how the sign-in ended.

pub mod authority;
pub mod cache;
pub mod callback_server;
pub mod completer;
pub mod context;
pub mod launcher;
pub mod oauth;
pub mod secure;

pub use cache::{CacheKey, TokenCache, TokenCacheEntry};
pub use completer::{CompletionPayload, InteractiveAuthCompleter};
pub use context::{
    AuthFailure, AuthenticationContext, AuthenticationResult, Continuation, NO_TOKEN_AVAILABLE,
};
pub use launcher::{BrowserLauncher, InteractionLauncher};
