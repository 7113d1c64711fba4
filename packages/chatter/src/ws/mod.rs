//! WebSocket fan-out
//!
//! Three chat endpoints share one engine:
//! - tenant: company-scoped, persisted, scope inferred from the first message
//! - room: explicit CREATE/JOIN binding, persisted, CHAT broadcast
//! - global: one process-wide topic, any JSON, not persisted
//!
//! Each connection runs in its own task; all shared state lives in the
//! per-mode [`registry::TopicRegistry`] (or the single global [`topic::Topic`]).

mod binding;
pub(crate) mod engine;
mod global;
mod protocol;
mod registry;
mod room;
pub(crate) mod tenant;
mod topic;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
pub(crate) mod test_support;

pub use engine::serve_socket;
pub use global::GlobalMode;
pub use registry::TopicStats;
pub use room::RoomMode;
pub use tenant::TenantMode;
