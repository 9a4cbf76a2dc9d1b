//! Directory Searcher
//!
//! Searches an organization's user directory on behalf of a signed-in user.
//! The access token comes from the token cache when possible, otherwise from
//! an interactive Azure AD sign-in that resumes the search when it concludes.

#![deny(clippy::all)]

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod search;

pub use config::Config;
pub use directory::{DirectoryUser, SearchOutcome};
pub use error::{ApiError, AppError, AuthError};
pub use search::{AttemptPhase, SearchDispatch, SearchOrchestrator, SearchView};
