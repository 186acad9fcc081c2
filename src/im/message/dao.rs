//! 消息数据访问层（DAO）
//!
//! 单表存储全部会话的消息，外键到会话表。写入是按消息 ID 的
//! 整行覆盖，唯独 `sync_state` 列取新旧两值的最大者：SYNCED(1)
//! 大于 PENDING(0)，因此任何合并路径都无法把已同步的行退回待同步。

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use crate::im::db::{ChangeNotifier, Table};
use crate::im::message::models::LocalMessage;
use crate::im::serialization::{decode_id_set, encode_id_set};
use crate::im::types::{MessageType, SyncState};

const MESSAGE_COLUMNS: &str = r#"
    message_id,
    chat_id,
    sender_id,
    content,
    message_type,
    send_time,
    read_by,
    delivered_to,
    sync_state
"#;

/// 消息 DAO（基于 sqlx）
pub struct MessageDao {
    db: Pool<Sqlite>,
    notifier: Arc<ChangeNotifier>,
}

impl MessageDao {
    /// 创建新的消息 DAO
    pub fn new(db: Pool<Sqlite>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { db, notifier }
    }

    fn row_to_message(row: &SqliteRow) -> LocalMessage {
        let read_by: String = row.get("read_by");
        let delivered_to: String = row.get("delivered_to");
        LocalMessage {
            message_id: row.get("message_id"),
            chat_id: row.get("chat_id"),
            sender_id: row.get("sender_id"),
            content: row.get("content"),
            message_type: MessageType::from_code(row.get("message_type")),
            send_time: row.get("send_time"),
            read_by: decode_id_set(&read_by),
            delivered_to: decode_id_set(&delivered_to),
            sync_state: SyncState::from_code(row.get("sync_state")),
        }
    }

    /// 获取某会话的全部消息，时间升序、同一时间按消息 ID 字典序
    pub async fn get_messages(&self, chat_id: &str) -> Result<Vec<LocalMessage>> {
        let sql = format!(
            "SELECT {} FROM local_messages WHERE chat_id = ? ORDER BY send_time ASC, message_id ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_all(&self.db)
            .await
            .context("查询会话消息失败")?;

        let messages: Vec<LocalMessage> = rows.iter().map(Self::row_to_message).collect();
        debug!(
            "[MsgDAO] 获取会话 {} 的消息，共 {} 条",
            chat_id,
            messages.len()
        );
        Ok(messages)
    }

    /// 按消息 ID 查询单条消息
    pub async fn get_message_by_id(&self, message_id: &str) -> Result<Option<LocalMessage>> {
        let sql = format!(
            "SELECT {} FROM local_messages WHERE message_id = ?",
            MESSAGE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(message_id)
            .fetch_optional(&self.db)
            .await
            .context("查询单条消息失败")?;

        Ok(row.map(|row| Self::row_to_message(&row)))
    }

    /// 某会话中仍为 PENDING 的消息，重放队列即按此序（时间升序）
    pub async fn get_unsynced_messages(&self, chat_id: &str) -> Result<Vec<LocalMessage>> {
        let sql = format!(
            "SELECT {} FROM local_messages WHERE chat_id = ? AND sync_state = 0 ORDER BY send_time ASC, message_id ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_all(&self.db)
            .await
            .context("查询待同步消息失败")?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn upsert_message_no_notify(&self, msg: &LocalMessage) -> Result<()> {
        let sql = r#"
            INSERT INTO local_messages (
                message_id,
                chat_id,
                sender_id,
                content,
                message_type,
                send_time,
                read_by,
                delivered_to,
                sync_state
            ) VALUES (?,?,?,?,?,?,?,?,?)
            ON CONFLICT(message_id) DO UPDATE SET
                chat_id = excluded.chat_id,
                sender_id = excluded.sender_id,
                content = excluded.content,
                message_type = excluded.message_type,
                send_time = excluded.send_time,
                read_by = excluded.read_by,
                delivered_to = excluded.delivered_to,
                sync_state = MAX(local_messages.sync_state, excluded.sync_state)
        "#;

        sqlx::query(sql)
            .bind(&msg.message_id)
            .bind(&msg.chat_id)
            .bind(&msg.sender_id)
            .bind(&msg.content)
            .bind(msg.message_type.code())
            .bind(msg.send_time)
            .bind(encode_id_set(&msg.read_by))
            .bind(encode_id_set(&msg.delivered_to))
            .bind(msg.sync_state.code())
            .execute(&self.db)
            .await
            .context("插入或更新消息失败")?;
        Ok(())
    }

    /// 插入或更新单条消息
    pub async fn upsert_message(&self, msg: &LocalMessage) -> Result<()> {
        self.upsert_message_no_notify(msg).await?;
        self.notifier.bump(Table::Messages);
        Ok(())
    }

    /// 批量插入或更新消息（整帧快照合并的入口）
    pub async fn upsert_messages(&self, messages: &[LocalMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        for msg in messages {
            self.upsert_message_no_notify(msg).await?;
        }
        self.notifier.bump(Table::Messages);
        debug!("[MsgDAO] 批量更新 {} 条消息", messages.len());
        Ok(())
    }

    /// 把消息标记为已同步（状态机唯一的一条边，幂等）
    pub async fn mark_synced(&self, message_id: &str) -> Result<()> {
        sqlx::query("UPDATE local_messages SET sync_state = 1 WHERE message_id = ?")
            .bind(message_id)
            .execute(&self.db)
            .await
            .context("标记消息已同步失败")?;
        self.notifier.bump(Table::Messages);
        debug!("[MsgDAO] 消息 {} 已标记为同步完成", message_id);
        Ok(())
    }
}
