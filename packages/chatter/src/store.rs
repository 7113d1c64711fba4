//! Message persistence seam.
//!
//! The fan-out engine only needs "persist this, give me back what was
//! stored". [`ChatRepository`](crate::repository::ChatRepository) is the
//! SQLite implementation; tests substitute their own.

use async_trait::async_trait;

use crate::models::{ChatMessage, RoomMessage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a tenant message and return the stored record (with its id).
    async fn persist_chat(&self, message: ChatMessage) -> Result<ChatMessage, StoreError>;

    /// Persist a room message (any action) and return the stored record.
    async fn persist_room(&self, message: RoomMessage) -> Result<RoomMessage, StoreError>;
}
