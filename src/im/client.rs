//! 聊天客户端门面
//!
//! 把本地镜像、远端网关与各同步器拼装成一个对外入口。调用方
//! 提供身份源与网关实现，客户端负责建库、装配同步器并交出
//! 会话列表/单会话两种作用域。

use std::sync::Arc;

use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::im::chat::dao::ChatDao;
use crate::im::chat::service::{ChatListScope, ChatSyncer};
use crate::im::db::{create_sqlite_pool, init_schema, ChangeNotifier};
use crate::im::error::SyncError;
use crate::im::identity::IdentityProvider;
use crate::im::listener::{EmptySyncListener, SyncListener};
use crate::im::message::dao::MessageDao;
use crate::im::message::models::LocalMessage;
use crate::im::message::service::{ConversationScope, MessageSyncer};
use crate::im::profile::dao::ProfileDao;
use crate::im::profile::models::LocalProfile;
use crate::im::profile::service::ProfileSyncer;
use crate::im::remote::RemoteGateway;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 本地镜像使用的 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://chat.db?mode=rwc`，测试可用 `sqlite::memory:`
    pub db_url: String,
}

impl ClientConfig {
    /// 创建指定数据库位置的配置
    pub fn new(db_url: String) -> Self {
        Self { db_url }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("sqlite://chat.db?mode=rwc".to_string())
    }
}

/// 聊天客户端
///
/// `connect` 之前注册监听器，之后通过作用域读写。
#[derive(Clone)]
pub struct ChatClient {
    config: ClientConfig,
    gateway: Arc<dyn RemoteGateway>,
    identity: Arc<dyn IdentityProvider>,
    // 同步监听器（可由调用方注册）
    listener: Arc<dyn SyncListener>,
    db: Option<Pool<Sqlite>>,
    notifier: Arc<ChangeNotifier>,
    chat_dao: Option<Arc<ChatDao>>,
    // 会话列表同步器
    chat_syncer: Option<Arc<ChatSyncer>>,
    // 消息同步器（乐观发送 + 离线队列）
    message_syncer: Option<Arc<MessageSyncer>>,
    // 用户资料同步器
    profile_syncer: Option<Arc<ProfileSyncer>>,
}

impl ChatClient {
    /// 创建新的客户端
    /// - `config`: 客户端配置
    /// - `gateway`: 远端网关实现
    /// - `identity`: 当前登录用户的来源
    pub fn new(
        config: ClientConfig,
        gateway: Arc<dyn RemoteGateway>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            gateway,
            identity,
            listener: Arc::new(EmptySyncListener),
            db: None,
            notifier: Arc::new(ChangeNotifier::new()),
            chat_dao: None,
            chat_syncer: None,
            message_syncer: None,
            profile_syncer: None,
        }
    }

    /// 注册同步监听器
    ///
    /// 已连接时用新监听器重建各同步器，保持回调一致；尚未打开的
    /// 作用域会用到新监听器，已打开的作用域不受影响。
    pub fn set_sync_listener(&mut self, listener: Arc<dyn SyncListener>) {
        self.listener = listener;
        if self.db.is_some() {
            if let Err(e) = self.rebuild_syncers() {
                tracing::error!("[Client] 重建同步器失败，保持原同步器: {}", e);
            }
        }
    }

    /// 连接：打开本地数据库、初始化表结构并装配同步器
    ///
    /// 需要已登录用户；纯本地操作，远端不可达也会成功，后续
    /// 作用域只服务缓存。
    pub async fn connect(&mut self) -> Result<(), SyncError> {
        let user_id = self
            .identity
            .current_user_id()
            .ok_or(SyncError::NotSignedIn)?;

        info!(
            "[Client] 🔗 打开本地镜像数据库: {} (user={})",
            self.config.db_url, user_id
        );
        let db = create_sqlite_pool(&self.config.db_url).await?;

        info!("[Client] 📋 初始化数据库表结构");
        init_schema(&db).await?;

        self.db = Some(db);
        self.rebuild_syncers()?;
        info!("[Client] ✅ 客户端就绪 (user={})", user_id);
        Ok(())
    }

    /// 用当前监听器在共享连接上重建 DAO 与同步器
    fn rebuild_syncers(&mut self) -> Result<(), SyncError> {
        let user_id = self
            .identity
            .current_user_id()
            .ok_or(SyncError::NotSignedIn)?;
        let db = self.connected_db()?;

        let chat_dao = Arc::new(ChatDao::new(db.clone(), Arc::clone(&self.notifier)));
        let message_dao = Arc::new(MessageDao::new(db.clone(), Arc::clone(&self.notifier)));
        let profile_dao = Arc::new(ProfileDao::new(db, Arc::clone(&self.notifier)));

        let profile_syncer = Arc::new(ProfileSyncer::new(
            Arc::clone(&self.gateway),
            Arc::clone(&profile_dao),
        ));
        let chat_syncer = Arc::new(ChatSyncer::new(
            user_id.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&chat_dao),
            Arc::clone(&profile_dao),
            Arc::clone(&profile_syncer),
            Arc::clone(&self.notifier),
            Arc::clone(&self.listener),
        ));
        let message_syncer = Arc::new(MessageSyncer::new(
            user_id,
            Arc::clone(&self.gateway),
            message_dao,
            Arc::clone(&self.notifier),
            Arc::clone(&self.listener),
        ));

        self.chat_dao = Some(chat_dao);
        self.chat_syncer = Some(chat_syncer);
        self.message_syncer = Some(message_syncer);
        self.profile_syncer = Some(profile_syncer);
        debug!("[Client] 同步器装配完成");
        Ok(())
    }

    fn connected_db(&self) -> Result<Pool<Sqlite>, SyncError> {
        self.db
            .clone()
            .ok_or_else(|| SyncError::Store(anyhow::anyhow!("客户端尚未连接")))
    }

    fn chat_syncer(&self) -> Result<&Arc<ChatSyncer>, SyncError> {
        self.chat_syncer
            .as_ref()
            .ok_or_else(|| SyncError::Store(anyhow::anyhow!("会话同步器未初始化")))
    }

    fn message_syncer(&self) -> Result<&Arc<MessageSyncer>, SyncError> {
        self.message_syncer
            .as_ref()
            .ok_or_else(|| SyncError::Store(anyhow::anyhow!("消息同步器未初始化")))
    }

    /// 打开会话列表作用域（订阅"成员包含我"的会话集合）
    pub async fn open_chat_list(&self) -> Result<ChatListScope, SyncError> {
        let syncer = self.chat_syncer()?;
        Ok(syncer.open_scope().await)
    }

    /// 打开单个会话作用域
    ///
    /// 先本地优先地解析会话（远端命中回填镜像），随后触发该会话的
    /// 队列重放并建立消息订阅。
    pub async fn open_conversation(&self, chat_id: &str) -> Result<ConversationScope, SyncError> {
        let chat = self.chat_syncer()?.ensure_chat_cached(chat_id).await?;
        debug!(
            "[Client] 打开会话 {} (成员: {})",
            chat.chat_id,
            chat.member_ids.join(",")
        );
        Ok(self.message_syncer()?.open_scope(chat_id).await)
    }

    /// 发送一条文本消息（不要求会话作用域已打开）
    pub async fn send_text_message(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Result<Option<LocalMessage>, SyncError> {
        self.message_syncer()?.send_text(chat_id, text).await
    }

    /// 和另一个用户开始（或复用）两人会话，返回会话 ID
    pub async fn start_conversation(&self, other_user_id: &str) -> Result<String, SyncError> {
        let me = self
            .identity
            .current_user_id()
            .ok_or(SyncError::NotSignedIn)?;
        self.chat_syncer()?
            .create_chat_if_not_exists(&me, other_user_id)
            .await
    }

    /// 拉取用户目录（除自己外的全部用户），同时刷新本地资料缓存
    pub async fn fetch_user_directory(&self) -> Result<Vec<LocalProfile>, SyncError> {
        let me = self
            .identity
            .current_user_id()
            .ok_or(SyncError::NotSignedIn)?;
        let syncer = self
            .profile_syncer
            .as_ref()
            .ok_or_else(|| SyncError::Store(anyhow::anyhow!("资料同步器未初始化")))?;
        Ok(syncer.fetch_user_directory(&me).await?)
    }

    /// 全部会话未读数之和（本地聚合）
    pub async fn total_unread_count(&self) -> Result<i64, SyncError> {
        let dao = self
            .chat_dao
            .as_ref()
            .ok_or_else(|| SyncError::Store(anyhow::anyhow!("客户端尚未连接")))?;
        Ok(dao.get_total_unread_count().await?)
    }

    /// 累计消息刷写失败次数
    pub fn flush_failure_count(&self) -> u64 {
        self.message_syncer
            .as_ref()
            .map(|s| s.flush_failure_count())
            .unwrap_or(0)
    }
}
