//! 会话数据访问层（DAO）
//!
//! 所有写入都是按会话 ID 的整行覆盖（replace-on-conflict），
//! 不存在"插入即失败"的路径；批量写不保证跨行原子性。

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use crate::im::chat::models::LocalChat;
use crate::im::db::{ChangeNotifier, Table};
use crate::im::serialization::{decode_id_set, encode_id_set};
use crate::im::types::MessageType;

const CHAT_COLUMNS: &str = r#"
    chat_id,
    member_ids,
    last_message,
    last_message_time,
    last_message_type,
    unread_count,
    is_group,
    group_name
"#;

/// 会话 DAO（基于 sqlx）
pub struct ChatDao {
    db: Pool<Sqlite>,
    notifier: Arc<ChangeNotifier>,
}

impl ChatDao {
    /// 创建新的会话 DAO
    pub fn new(db: Pool<Sqlite>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { db, notifier }
    }

    fn row_to_chat(row: &SqliteRow) -> LocalChat {
        let member_ids: String = row.get("member_ids");
        let is_group: i64 = row.get("is_group");
        LocalChat {
            chat_id: row.get("chat_id"),
            member_ids: decode_id_set(&member_ids),
            last_message: row.get("last_message"),
            last_message_time: row.get("last_message_time"),
            last_message_type: MessageType::from_code(row.get("last_message_type")),
            unread_count: row.get("unread_count"),
            is_group: is_group != 0,
            group_name: row.get("group_name"),
        }
    }

    /// 按最近消息时间倒序获取全部本地会话
    ///
    /// 时间相同以会话 ID 升序兜底，保证视图重放时顺序稳定。
    pub async fn get_all_chats(&self) -> Result<Vec<LocalChat>> {
        let sql = format!(
            "SELECT {} FROM local_chats ORDER BY last_message_time DESC, chat_id ASC",
            CHAT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.db)
            .await
            .context("查询会话列表失败")?;

        let chats: Vec<LocalChat> = rows.iter().map(Self::row_to_chat).collect();
        debug!("[ChatDAO] 获取本地会话列表，共 {} 个会话", chats.len());
        Ok(chats)
    }

    /// 按会话 ID 查询单个会话
    pub async fn get_chat_by_id(&self, chat_id: &str) -> Result<Option<LocalChat>> {
        let sql = format!("SELECT {} FROM local_chats WHERE chat_id = ?", CHAT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_optional(&self.db)
            .await
            .context("查询单个会话失败")?;

        Ok(row.map(|row| Self::row_to_chat(&row)))
    }

    async fn upsert_chat_no_notify(&self, chat: &LocalChat) -> Result<()> {
        let sql = r#"
            INSERT INTO local_chats (
                chat_id,
                member_ids,
                last_message,
                last_message_time,
                last_message_type,
                unread_count,
                is_group,
                group_name
            ) VALUES (?,?,?,?,?,?,?,?)
            ON CONFLICT(chat_id) DO UPDATE SET
                member_ids = excluded.member_ids,
                last_message = excluded.last_message,
                last_message_time = excluded.last_message_time,
                last_message_type = excluded.last_message_type,
                unread_count = excluded.unread_count,
                is_group = excluded.is_group,
                group_name = excluded.group_name
        "#;

        sqlx::query(sql)
            .bind(&chat.chat_id)
            .bind(encode_id_set(&chat.member_ids))
            .bind(&chat.last_message)
            .bind(chat.last_message_time)
            .bind(chat.last_message_type.code())
            .bind(chat.unread_count)
            .bind(if chat.is_group { 1 } else { 0 })
            .bind(&chat.group_name)
            .execute(&self.db)
            .await
            .context("插入或更新会话失败")?;
        Ok(())
    }

    /// 插入或更新单个会话
    pub async fn upsert_chat(&self, chat: &LocalChat) -> Result<()> {
        self.upsert_chat_no_notify(chat).await?;
        self.notifier.bump(Table::Chats);
        Ok(())
    }

    /// 批量插入或更新会话（整帧快照合并的入口）
    pub async fn upsert_chats(&self, chats: &[LocalChat]) -> Result<()> {
        if chats.is_empty() {
            return Ok(());
        }
        for chat in chats {
            self.upsert_chat_no_notify(chat).await?;
        }
        self.notifier.bump(Table::Chats);
        debug!("[ChatDAO] 批量更新 {} 个会话", chats.len());
        Ok(())
    }

    /// 全部会话的未读数总和
    pub async fn get_total_unread_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(unread_count), 0) AS total FROM local_chats")
            .fetch_one(&self.db)
            .await
            .context("统计未读数失败")?;
        Ok(row.get("total"))
    }
}
