//! 消息同步器与离线队列
//!
//! 发送路径是乐观提交：消息先以 PENDING 落进本地镜像（界面立即
//! 可见），随后尝试一次远端刷写，失败只记录不重试。补偿全部
//! 集中在重放：下次打开会话时扫出 PENDING 行逐条重刷。因此
//! 断网发出的消息在重启后依然在队列里。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::im::db::{ChangeNotifier, Table};
use crate::im::error::{FlushAck, SyncError};
use crate::im::listener::SyncListener;
use crate::im::message::dao::MessageDao;
use crate::im::message::models::LocalMessage;
use crate::im::remote::{Filter, OrderBy, RemoteDocument, RemoteGateway, Snapshot};
use crate::im::serialization::{generate_record_id, now_millis};
use crate::im::types::{collections, fields, MessageType, SyncState};

/// 一轮待同步消息重放的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// 扫到的 PENDING 消息数
    pub attempted: usize,
    /// 本轮刷写成功（转为 SYNCED）的条数
    pub flushed: usize,
    /// 本轮仍失败、留在队列里的条数
    pub failed: usize,
}

/// 消息同步器
pub struct MessageSyncer {
    user_id: String,
    gateway: Arc<dyn RemoteGateway>,
    message_dao: Arc<MessageDao>,
    notifier: Arc<ChangeNotifier>,
    listener: Arc<dyn SyncListener>,
    flush_failures: AtomicU64,
}

impl MessageSyncer {
    /// 创建新的消息同步器
    pub fn new(
        user_id: String,
        gateway: Arc<dyn RemoteGateway>,
        message_dao: Arc<MessageDao>,
        notifier: Arc<ChangeNotifier>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            user_id,
            gateway,
            message_dao,
            notifier,
            listener,
            flush_failures: AtomicU64::new(0),
        }
    }

    /// 发送一条文本消息
    ///
    /// 空白输入直接丢弃返回 `None`。否则构造 PENDING 消息落库、
    /// 尝试一次刷写，并返回落库后的最新状态（刷写成功即 SYNCED）。
    /// 刷写失败不在这里重试，等下次重放。
    pub async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Result<Option<LocalMessage>, SyncError> {
        let content = text.trim();
        if content.is_empty() {
            debug!("[MsgSync] 忽略空白消息输入");
            return Ok(None);
        }

        let msg = LocalMessage {
            message_id: generate_record_id(),
            chat_id: chat_id.to_string(),
            sender_id: self.user_id.clone(),
            content: content.to_string(),
            message_type: MessageType::Text,
            send_time: now_millis(),
            read_by: Vec::new(),
            delivered_to: Vec::new(),
            sync_state: SyncState::Pending,
        };
        self.message_dao.upsert_message(&msg).await?;
        info!(
            "[MsgSync] 消息 {} 已落库（PENDING），尝试刷写远端",
            msg.message_id
        );
        self.flush_and_swallow(&msg).await;

        let stored = self
            .message_dao
            .get_message_by_id(&msg.message_id)
            .await?
            .unwrap_or(msg);
        Ok(Some(stored))
    }

    /// 向远端刷写一条消息并在成功后标记 SYNCED
    ///
    /// 目标集合由消息自己的 `chat_id` 推导，重放跨会话记录也不会
    /// 写错子集合。文档 ID 用消息自带的 ID，远端按 ID 放置。
    pub async fn flush_message(&self, msg: &LocalMessage) -> Result<FlushAck, SyncError> {
        let collection = collections::messages_of(&msg.chat_id);
        let doc_fields = msg.to_remote_fields()?;
        let assigned_id = self
            .gateway
            .add(&collection, RemoteDocument::new(msg.message_id.clone(), doc_fields))
            .await?;
        self.message_dao.mark_synced(&assigned_id).await?;
        self.listener.on_message_synced(assigned_id.clone()).await;
        Ok(FlushAck {
            message_id: assigned_id,
            chat_id: msg.chat_id.clone(),
        })
    }

    /// 刷写并吞掉失败：成功返回 true，失败计数、上报后返回 false
    async fn flush_and_swallow(&self, msg: &LocalMessage) -> bool {
        match self.flush_message(msg).await {
            Ok(ack) => {
                debug!("[MsgSync] 消息 {} 已刷写远端", ack.message_id);
                true
            }
            Err(e) => {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "[MsgSync] 消息 {} 刷写失败，保持 PENDING 等待下次重放: {}",
                    msg.message_id, e
                );
                self.listener
                    .on_flush_failed(msg.message_id.clone(), e.to_string())
                    .await;
                false
            }
        }
    }

    /// 把一帧消息快照合并进本地镜像
    ///
    /// 单条解码失败只跳过该条；入库走 MAX 守卫，不会把本地
    /// PENDING 行退级。
    pub async fn merge_snapshot(
        &self,
        chat_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(usize, usize)> {
        let mut messages = Vec::with_capacity(snapshot.docs.len());
        let mut skipped = 0usize;
        for doc in &snapshot.docs {
            match LocalMessage::from_remote(chat_id, doc) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    skipped += 1;
                    warn!("[MsgSync] 跳过无法解码的消息 {}: {:#}", doc.id, e);
                }
            }
        }

        self.message_dao.upsert_messages(&messages).await?;
        debug!(
            "[MsgSync] 会话 {} 消息快照合并完成：入库 {} 条，跳过 {} 条",
            chat_id,
            messages.len(),
            skipped
        );
        self.listener
            .on_message_snapshot_merged(chat_id.to_string(), messages.len(), skipped)
            .await;
        Ok((messages.len(), skipped))
    }

    /// 重放一个会话里所有 PENDING 消息
    ///
    /// 逐条刷写，失败的留在队列里等下一轮；本身只在本地读库失败
    /// 时返回错误。
    pub async fn replay_pending(&self, chat_id: &str) -> Result<ReplayReport, SyncError> {
        let pending = self.message_dao.get_unsynced_messages(chat_id).await?;
        let attempted = pending.len();
        let mut flushed = 0usize;
        for msg in &pending {
            if self.flush_and_swallow(msg).await {
                flushed += 1;
            }
        }
        let failed = attempted - flushed;
        if attempted > 0 {
            info!(
                "[MsgSync] 📤 会话 {} 重放完成：成功 {}/{}，仍待同步 {}",
                chat_id, flushed, attempted, failed
            );
        } else {
            debug!("[MsgSync] 会话 {} 没有待重放的消息", chat_id);
        }
        self.listener
            .on_replay_finished(chat_id.to_string(), flushed, failed)
            .await;
        Ok(ReplayReport {
            attempted,
            flushed,
            failed,
        })
    }

    /// 累计刷写失败次数（发送与重放共同计入）
    pub fn flush_failure_count(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// 打开单个会话的消息作用域
    ///
    /// 打开即触发一轮 PENDING 重放，并订阅该会话的消息子集合；
    /// 订阅建立失败时作用域照常打开、只服务本地缓存。
    pub async fn open_scope(self: &Arc<Self>, chat_id: &str) -> ConversationScope {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let replay_gate = Arc::new(tokio::sync::Mutex::new(()));

        // 打开时的队列重放，同一作用域内不并发重放
        let gate = Arc::clone(&replay_gate);
        let replay_syncer = Arc::clone(self);
        let replay_chat = chat_id.to_string();
        tasks.push(tokio::spawn(async move {
            let _guard = match gate.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("[MsgSync] 会话 {} 已有重放在进行，跳过", replay_chat);
                    return;
                }
            };
            if let Err(e) = replay_syncer.replay_pending(&replay_chat).await {
                warn!("[MsgSync] 会话 {} 打开时重放失败: {}", replay_chat, e);
            }
        }));

        // 实时视图：消息表一有变更就重查该会话
        let (view_tx, view_rx) = watch::channel(Vec::new());
        let view_syncer = Arc::clone(self);
        let view_chat = chat_id.to_string();
        let mut messages_rx = self.notifier.watch(Table::Messages);
        tasks.push(tokio::spawn(async move {
            loop {
                match view_syncer.message_dao.get_messages(&view_chat).await {
                    Ok(list) => {
                        if view_tx.send(list).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("[MsgSync] 构建会话 {} 消息视图失败: {:#}", view_chat, e),
                }
                if messages_rx.changed().await.is_err() {
                    break;
                }
            }
        }));

        // 远端订阅：该会话的消息子集合，按时间升序
        let collection = collections::messages_of(chat_id);
        match self
            .gateway
            .subscribe(&collection, Filter::All, OrderBy::Asc(fields::TIMESTAMP))
            .await
        {
            Ok(mut stream) => {
                let sub_syncer = Arc::clone(self);
                let sub_chat = chat_id.to_string();
                tasks.push(tokio::spawn(async move {
                    info!("[MsgSync] 🔄 会话 {} 消息订阅已建立", sub_chat);
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(snapshot) => {
                                if let Err(e) =
                                    sub_syncer.merge_snapshot(&sub_chat, &snapshot).await
                                {
                                    warn!("[MsgSync] 会话 {} 消息快照合并失败: {:#}", sub_chat, e);
                                }
                            }
                            Err(e) => {
                                warn!("[MsgSync] 会话 {} 消息订阅流终止: {}", sub_chat, e);
                                sub_syncer
                                    .listener
                                    .on_stream_closed(format!("messages/{}", sub_chat), e.to_string())
                                    .await;
                                break;
                            }
                        }
                    }
                    debug!("[MsgSync] 会话 {} 消息订阅流结束", sub_chat);
                }));
            }
            Err(e) => {
                warn!(
                    "[MsgSync] 会话 {} 消息订阅建立失败，仅服务本地缓存: {}",
                    chat_id, e
                );
                self.listener
                    .on_stream_closed(format!("messages/{}", chat_id), e.to_string())
                    .await;
            }
        }

        ConversationScope {
            chat_id: chat_id.to_string(),
            syncer: Arc::clone(self),
            view_rx,
            replay_gate,
            tasks,
        }
    }
}

/// 单个会话的消息作用域
///
/// 持有重放门闩、订阅任务与视图任务；`close` 终止订阅并停止
/// 后续镜像写入，丢弃作用域时亦自动关闭。
pub struct ConversationScope {
    chat_id: String,
    syncer: Arc<MessageSyncer>,
    view_rx: watch::Receiver<Vec<LocalMessage>>,
    replay_gate: Arc<tokio::sync::Mutex<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConversationScope {
    /// 作用域绑定的会话 ID
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// 实时消息视图（带当前值，之后随本地镜像变更重发）
    pub fn messages(&self) -> watch::Receiver<Vec<LocalMessage>> {
        self.view_rx.clone()
    }

    /// 在该会话里发送文本消息
    pub async fn send_text(&self, text: &str) -> Result<Option<LocalMessage>, SyncError> {
        self.syncer.send_text(&self.chat_id, text).await
    }

    /// 手动触发一轮 PENDING 重放
    ///
    /// 已有重放在进行时直接返回 `None`，不排队等待。
    pub async fn replay_pending(&self) -> Result<Option<ReplayReport>, SyncError> {
        let _guard = match self.replay_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("[MsgSync] 会话 {} 已有重放在进行，本次跳过", self.chat_id);
                return Ok(None);
            }
        };
        let report = self.syncer.replay_pending(&self.chat_id).await?;
        Ok(Some(report))
    }

    /// 关闭作用域：终止订阅与视图任务
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("[MsgSync] 会话 {} 作用域已关闭", self.chat_id);
    }
}

impl Drop for ConversationScope {
    fn drop(&mut self) {
        self.close();
    }
}
