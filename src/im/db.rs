//! SQLite 数据库工具：连接池、表结构初始化与本地变更通知
//!
//! 本地镜像由三张表组成：会话、消息、用户资料缓存。消息表外键到
//! 会话表并级联删除（引擎自身不删除会话，约束只保证孤儿消息
//! 不会出现）。所有写入都经由 DAO，DAO 在写成功后通过
//! [`ChangeNotifier`] 通知对应表的观察者重新查询。

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tokio::sync::watch;
use tracing::info;

/// 创建 SQLite 连接池
///
/// `db_url` 形如 `sqlite:///path/to/chat.db`；文件不存在时自动创建，
/// 每个连接都打开外键约束。
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let options: SqliteConnectOptions = db_url
        .parse::<SqliteConnectOptions>()
        .context("解析数据库地址失败")?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("连接 SQLite 数据库失败")?;

    Ok(pool)
}

/// 初始化本地镜像表结构
pub async fn init_schema(db: &Pool<Sqlite>) -> Result<()> {
    info!("[DB] 初始化本地镜像表结构");

    let chats_sql = r#"
        CREATE TABLE IF NOT EXISTS local_chats (
            chat_id TEXT PRIMARY KEY,
            member_ids TEXT NOT NULL DEFAULT '',
            last_message TEXT NOT NULL DEFAULT '',
            last_message_time INTEGER NOT NULL DEFAULT 0,
            last_message_type INTEGER NOT NULL DEFAULT 0,
            unread_count INTEGER NOT NULL DEFAULT 0,
            is_group INTEGER NOT NULL DEFAULT 0,
            group_name TEXT
        )
    "#;
    sqlx::query(chats_sql)
        .execute(db)
        .await
        .context("创建会话表失败")?;

    let messages_sql = r#"
        CREATE TABLE IF NOT EXISTS local_messages (
            message_id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            sender_id TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            message_type INTEGER NOT NULL DEFAULT 0,
            send_time INTEGER NOT NULL DEFAULT 0,
            read_by TEXT NOT NULL DEFAULT '',
            delivered_to TEXT NOT NULL DEFAULT '',
            sync_state INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (chat_id) REFERENCES local_chats (chat_id) ON DELETE CASCADE
        )
    "#;
    sqlx::query(messages_sql)
        .execute(db)
        .await
        .context("创建消息表失败")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_local_messages_chat_time ON local_messages (chat_id, send_time)",
    )
    .execute(db)
    .await
    .context("创建消息索引失败")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_local_messages_sync ON local_messages (sync_state)",
    )
    .execute(db)
    .await
    .context("创建同步状态索引失败")?;

    let users_sql = r#"
        CREATE TABLE IF NOT EXISTS local_users (
            user_id TEXT PRIMARY KEY,
            email TEXT NOT NULL DEFAULT '',
            display_name TEXT NOT NULL DEFAULT '',
            face_url TEXT,
            is_online INTEGER NOT NULL DEFAULT 0,
            last_seen_time INTEGER NOT NULL DEFAULT 0
        )
    "#;
    sqlx::query(users_sql)
        .execute(db)
        .await
        .context("创建用户资料表失败")?;

    info!("[DB] 本地镜像表结构初始化完成");
    Ok(())
}

/// 被观察的本地表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Chats,
    Messages,
    Profiles,
}

/// 本地表变更通知器
///
/// 每张表维护一个单调递增的版本号。观察者拿到 [`watch::Receiver`] 后
/// 在每次版本变化时重新执行自己的查询，得到"存储即真相"的实时视图。
/// 通知只说"变了"，不携带增量。
pub struct ChangeNotifier {
    chats: watch::Sender<u64>,
    messages: watch::Sender<u64>,
    profiles: watch::Sender<u64>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (chats, _) = watch::channel(0);
        let (messages, _) = watch::channel(0);
        let (profiles, _) = watch::channel(0);
        Self {
            chats,
            messages,
            profiles,
        }
    }

    fn sender(&self, table: Table) -> &watch::Sender<u64> {
        match table {
            Table::Chats => &self.chats,
            Table::Messages => &self.messages,
            Table::Profiles => &self.profiles,
        }
    }

    /// 表发生写入后调用，唤醒所有观察者
    pub fn bump(&self, table: Table) {
        self.sender(table).send_modify(|v| *v = v.wrapping_add(1));
    }

    /// 订阅某张表的版本变化
    pub fn watch(&self, table: Table) -> watch::Receiver<u64> {
        self.sender(table).subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
