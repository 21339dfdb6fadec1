//! Sessions and their tabs
//!
//! A session is a logical client identity, not a transport connection. All
//! state lives behind one lock in [`SessionManager`], so every mutation is
//! atomic with respect to other requests.

pub mod lru;
pub mod manager;
pub mod types;

pub use lru::LruTable;
pub use manager::{CancelOutcome, RunTicket, SessionLimits, SessionManager};
pub use types::{Session, SessionSummary, Tab, TabStatus, TabSummary};
