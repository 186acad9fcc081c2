//! 会话列表同步器
//!
//! 每个已登录用户一个作用域，订阅"成员包含我"的会话集合。每帧
//! 快照都是远端此刻的完整结果集，逐条映射后整批 upsert 进本地
//! 镜像；对外的会话列表永远从本地镜像读出，冷启动先出缓存，
//! 网络延迟不拖慢读取。

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::im::chat::dao::ChatDao;
use crate::im::chat::models::LocalChat;
use crate::im::chat::view::{counterpart_ids, project_chat_list, ChatListEntry};
use crate::im::db::{ChangeNotifier, Table};
use crate::im::error::SyncError;
use crate::im::listener::SyncListener;
use crate::im::profile::dao::ProfileDao;
use crate::im::profile::service::ProfileSyncer;
use crate::im::remote::{Filter, OrderBy, RemoteDocument, RemoteGateway, Snapshot};
use crate::im::serialization::{generate_record_id, now_millis};
use crate::im::types::{collections, fields, MessageType};

/// 会话列表同步器
pub struct ChatSyncer {
    user_id: String,
    gateway: Arc<dyn RemoteGateway>,
    chat_dao: Arc<ChatDao>,
    profile_dao: Arc<ProfileDao>,
    profile_syncer: Arc<ProfileSyncer>,
    notifier: Arc<ChangeNotifier>,
    listener: Arc<dyn SyncListener>,
}

impl ChatSyncer {
    /// 创建新的会话列表同步器
    pub fn new(
        user_id: String,
        gateway: Arc<dyn RemoteGateway>,
        chat_dao: Arc<ChatDao>,
        profile_dao: Arc<ProfileDao>,
        profile_syncer: Arc<ProfileSyncer>,
        notifier: Arc<ChangeNotifier>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            user_id,
            gateway,
            chat_dao,
            profile_dao,
            profile_syncer,
            notifier,
            listener,
        }
    }

    /// 把一帧会话快照合并进本地镜像
    ///
    /// 单条记录解码失败只跳过该条，快照其余部分照常入库；
    /// 合并完成后刷新对端资料缓存，刷新失败继续用旧缓存。
    pub async fn merge_chat_snapshot(&self, snapshot: &Snapshot) -> Result<(usize, usize)> {
        let mut chats = Vec::with_capacity(snapshot.docs.len());
        let mut skipped = 0usize;
        for doc in &snapshot.docs {
            match LocalChat::from_remote(doc) {
                Ok(chat) => chats.push(chat),
                Err(e) => {
                    skipped += 1;
                    warn!("[ChatSync] 跳过无法解码的会话 {}: {:#}", doc.id, e);
                }
            }
        }

        self.chat_dao.upsert_chats(&chats).await?;
        debug!(
            "[ChatSync] 会话快照合并完成：入库 {} 条，跳过 {} 条",
            chats.len(),
            skipped
        );
        self.listener
            .on_chat_snapshot_merged(chats.len(), skipped)
            .await;

        let counterparts = counterpart_ids(&chats, &self.user_id);
        if let Err(e) = self.profile_syncer.refresh_profiles(&counterparts).await {
            warn!("[ChatSync] 对端资料刷新失败，继续使用本地缓存: {:#}", e);
        }

        Ok((chats.len(), skipped))
    }

    /// 构建当前的会话列表视图（本地镜像 + 资料缓存的纯拼接）
    pub async fn build_chat_list(&self) -> Result<Vec<ChatListEntry>> {
        let chats = self.chat_dao.get_all_chats().await?;
        let ids = counterpart_ids(&chats, &self.user_id);
        let profiles = self.profile_dao.get_profiles_by_ids(&ids).await?;
        Ok(project_chat_list(&chats, &profiles, &self.user_id))
    }

    /// 打开会话列表作用域
    ///
    /// 作用域持有一条远端订阅与一个实时视图任务；订阅建立失败时
    /// 作用域照常打开、只服务本地缓存，失败通过监听器上报。
    pub async fn open_scope(self: &Arc<Self>) -> ChatListScope {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // 实时视图：会话表或资料表一有变更就重建投影
        let (view_tx, view_rx) = watch::channel(Vec::new());
        let view_syncer = Arc::clone(self);
        let mut chats_rx = self.notifier.watch(Table::Chats);
        let mut profiles_rx = self.notifier.watch(Table::Profiles);
        tasks.push(tokio::spawn(async move {
            loop {
                match view_syncer.build_chat_list().await {
                    Ok(list) => {
                        if view_tx.send(list).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("[ChatSync] 构建会话列表视图失败: {:#}", e),
                }
                tokio::select! {
                    changed = chats_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = profiles_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }));

        // 远端订阅：成员包含我的会话，按最近消息时间倒序
        let filter = Filter::array_contains(fields::MEMBER_IDS, &self.user_id);
        let order = OrderBy::Desc(fields::LAST_MESSAGE_TIMESTAMP);
        match self
            .gateway
            .subscribe(collections::CONVERSATIONS, filter, order)
            .await
        {
            Ok(mut stream) => {
                let sub_syncer = Arc::clone(self);
                tasks.push(tokio::spawn(async move {
                    info!(
                        "[ChatSync] 🔄 会话列表订阅已建立: user={}",
                        sub_syncer.user_id
                    );
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(snapshot) => {
                                if let Err(e) = sub_syncer.merge_chat_snapshot(&snapshot).await {
                                    warn!("[ChatSync] 会话快照合并失败: {:#}", e);
                                }
                            }
                            Err(e) => {
                                warn!("[ChatSync] 会话列表订阅流终止: {}", e);
                                sub_syncer
                                    .listener
                                    .on_stream_closed("chat_list".to_string(), e.to_string())
                                    .await;
                                break;
                            }
                        }
                    }
                    debug!("[ChatSync] 会话列表订阅流结束");
                }));
            }
            Err(e) => {
                warn!("[ChatSync] 会话列表订阅建立失败，仅服务本地缓存: {}", e);
                self.listener
                    .on_stream_closed("chat_list".to_string(), e.to_string())
                    .await;
            }
        }

        ChatListScope { view_rx, tasks }
    }

    /// 查找或创建两人会话，返回会话 ID
    ///
    /// 先查远端"成员包含 user_a"的会话，再在结果里找同时包含
    /// user_b 的**非群聊**一条（同在一个群里不算已有两人会话）；
    /// 没有就新建。查与建之间没有事务保护，两端同时发起时可能
    /// 各建一个重复会话，这里不做检测。
    pub async fn create_chat_if_not_exists(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<String, SyncError> {
        let docs = self
            .gateway
            .query(
                collections::CONVERSATIONS,
                Filter::array_contains(fields::MEMBER_IDS, user_a),
                OrderBy::None,
            )
            .await?;

        for doc in &docs {
            match LocalChat::from_remote(doc) {
                Ok(chat) if !chat.is_group && chat.member_ids.iter().any(|m| m == user_b) => {
                    debug!("[ChatSync] 命中已有会话: {}", chat.chat_id);
                    return Ok(chat.chat_id);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[ChatSync] 查找会话时跳过坏记录 {}: {:#}", doc.id, e);
                }
            }
        }

        let chat = LocalChat {
            chat_id: generate_record_id(),
            member_ids: vec![user_a.to_string(), user_b.to_string()],
            last_message: String::new(),
            last_message_time: now_millis(),
            last_message_type: MessageType::Text,
            unread_count: 0,
            is_group: false,
            group_name: None,
        };
        let chat_fields = chat.to_remote_fields()?;
        let assigned_id = self
            .gateway
            .add(
                collections::CONVERSATIONS,
                RemoteDocument::new(chat.chat_id.clone(), chat_fields),
            )
            .await?;
        info!(
            "[ChatSync] ✨ 新建会话 {}: {} <-> {}",
            assigned_id, user_a, user_b
        );
        Ok(assigned_id)
    }

    /// 本地优先地解析一个会话，远端命中时回填镜像
    ///
    /// 本地与远端都没有（或远端记录无法解码）时返回会话不存在。
    pub async fn ensure_chat_cached(&self, chat_id: &str) -> Result<LocalChat, SyncError> {
        if let Some(chat) = self.chat_dao.get_chat_by_id(chat_id).await? {
            return Ok(chat);
        }

        let doc = self
            .gateway
            .get(collections::CONVERSATIONS, chat_id)
            .await?
            .ok_or_else(|| SyncError::ChatNotFound(chat_id.to_string()))?;

        let chat = match LocalChat::from_remote(&doc) {
            Ok(chat) => chat,
            Err(e) => {
                warn!("[ChatSync] 远端会话 {} 无法解码: {:#}", chat_id, e);
                return Err(SyncError::ChatNotFound(chat_id.to_string()));
            }
        };
        self.chat_dao
            .upsert_chat(&chat)
            .await
            .context("回填会话镜像失败")?;
        debug!("[ChatSync] 会话 {} 已从远端回填本地镜像", chat_id);
        Ok(chat)
    }
}

/// 会话列表作用域
///
/// 持有订阅任务与视图任务；`close` 终止订阅并停止后续镜像写入，
/// 丢弃作用域时亦自动关闭。
pub struct ChatListScope {
    view_rx: watch::Receiver<Vec<ChatListEntry>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatListScope {
    /// 实时会话列表视图（带当前值，之后随本地镜像变更重发）
    pub fn chat_list(&self) -> watch::Receiver<Vec<ChatListEntry>> {
        self.view_rx.clone()
    }

    /// 关闭作用域：终止订阅与视图任务
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("[ChatSync] 会话列表作用域已关闭");
    }
}

impl Drop for ChatListScope {
    fn drop(&mut self) {
        self.close();
    }
}
