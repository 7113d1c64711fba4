use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::models::{ChatMessage, RoomAction, RoomMessage};
use crate::store::{MessageStore, StoreError};

use super::ChatRepository;

fn chat_from_row(r: SqliteRow) -> ChatMessage {
    ChatMessage {
        id: r.get("id"),
        sender: r.get("sender"),
        content: r.get("content"),
        company_code: r.get("company_code"),
        timestamp: r.get("timestamp"),
    }
}

fn room_from_row(r: SqliteRow) -> Result<RoomMessage> {
    let tag: String = r.get("action");
    let action =
        RoomAction::parse(&tag).ok_or_else(|| anyhow!("unknown room action in database: {tag}"))?;
    Ok(RoomMessage {
        id: r.get("id"),
        sender: r.get("sender"),
        content: r.get("content"),
        room_id: r.get("room_id"),
        timestamp: r.get("timestamp"),
        action,
    })
}

impl ChatRepository {
    pub async fn insert_chat_message(&self, msg: &ChatMessage) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (sender, content, company_code, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&msg.sender)
        .bind(&msg.content)
        .bind(&msg.company_code)
        .bind(msg.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert chat message")?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent `limit` messages for a company, returned oldest first.
    pub async fn get_company_history(
        &self,
        company_code: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender, content, company_code, timestamp
            FROM chat_messages
            WHERE company_code = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(company_code)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<ChatMessage> = rows.into_iter().map(chat_from_row).collect();
        messages.reverse();
        Ok(messages)
    }

    pub async fn insert_room_message(&self, msg: &RoomMessage) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO room_messages (sender, content, room_id, action, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.sender)
        .bind(&msg.content)
        .bind(&msg.room_id)
        .bind(msg.action.as_str())
        .bind(msg.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert room message")?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent `limit` records for a room (all actions), oldest first.
    pub async fn get_room_history(&self, room_id: &str, limit: i64) -> Result<Vec<RoomMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender, content, room_id, action, timestamp
            FROM room_messages
            WHERE room_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(room_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl MessageStore for ChatRepository {
    async fn persist_chat(&self, mut message: ChatMessage) -> Result<ChatMessage, StoreError> {
        let id = self.insert_chat_message(&message).await?;
        message.id = Some(id);
        Ok(message)
    }

    async fn persist_room(&self, mut message: RoomMessage) -> Result<RoomMessage, StoreError> {
        let id = self.insert_room_message(&message).await?;
        message.id = Some(id);
        Ok(message)
    }
}
