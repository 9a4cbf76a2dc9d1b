//! Directory user search over the Graph REST API.

pub mod client;
pub mod models;

pub use client::{classify_response, DirectoryQueryClient};
pub use models::{DirectoryUser, SearchOutcome};
