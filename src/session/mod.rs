//! Session state and lifecycle.

pub mod manager;
pub mod model;

pub use manager::SessionManager;
pub use model::{PermissionMode, Session, SessionEntry, ToolCallRecord, TurnHandle};
