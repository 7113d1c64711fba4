pub mod admin;
pub mod health;
pub mod history;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use admin::{get_database_stats, list_topics_handler};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use history::{company_history_handler, room_history_handler};
pub use websocket::{global_websocket_handler, room_websocket_handler, tenant_websocket_handler};
