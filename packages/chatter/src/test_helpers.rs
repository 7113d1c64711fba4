use std::sync::Arc;

use crate::AppState;
use crate::config::FileConfig;
use crate::db::Database;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Suitable for handler and end-to-end tests that exercise real SQL queries.
pub async fn test_app_state() -> AppState {
    test_app_state_with(FileConfig::default()).await
}

/// Like `test_app_state`, but with the identity header required.
pub async fn test_app_state_with_auth() -> AppState {
    let mut file_config = FileConfig::default();
    file_config.auth.enabled = true;
    test_app_state_with(file_config).await
}

pub async fn test_app_state_with(file_config: FileConfig) -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    AppState::new(&file_config, Arc::new(Database { pool }))
}
