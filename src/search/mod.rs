//! Search coordination between token acquisition and the directory.

pub mod orchestrator;
pub mod state;

pub use orchestrator::{SearchDispatch, SearchOrchestrator};
pub use state::{AttemptPhase, SearchView};
