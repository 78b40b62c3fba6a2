//! Session state with actor pattern
//!
//! StateManager owns the SessionState (stream, search, values, indexed view,
//! attachments) and processes messages via channels.

mod manager;
mod messages;
mod store;

pub use manager::StateManager;
pub use messages::{CommitProgress, StateCommand, StateResponse};
pub use store::SessionState;
