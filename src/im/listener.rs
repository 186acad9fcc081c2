//! 同步事件回调接口

use async_trait::async_trait;

/// 同步事件监听器
///
/// 引擎在合并快照、刷写消息、重放队列等关键节点回调，
/// 供嵌入方做界面提示或埋点。所有回调都不得阻塞太久。
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 会话列表快照合并完成（applied=入库条数, skipped=跳过的坏记录数）
    async fn on_chat_snapshot_merged(&self, applied: usize, skipped: usize);

    /// 某会话的消息快照合并完成
    async fn on_message_snapshot_merged(&self, chat_id: String, applied: usize, skipped: usize);

    /// 某条消息刷写成功、状态已前进到 SYNCED
    async fn on_message_synced(&self, message_id: String);

    /// 某条消息刷写失败（保持 PENDING，等待下次重放）
    async fn on_flush_failed(&self, message_id: String, reason: String);

    /// 一轮重放结束（flushed=本轮成功条数, failed=本轮失败条数）
    async fn on_replay_finished(&self, chat_id: String, flushed: usize, failed: usize);

    /// 订阅流建立失败或中途终止，该作用域此后只提供本地缓存
    async fn on_stream_closed(&self, scope: String, reason: String);
}

/// 空实现（默认监听器）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_chat_snapshot_merged(&self, _applied: usize, _skipped: usize) {}
    async fn on_message_snapshot_merged(&self, _chat_id: String, _applied: usize, _skipped: usize) {
    }
    async fn on_message_synced(&self, _message_id: String) {}
    async fn on_flush_failed(&self, _message_id: String, _reason: String) {}
    async fn on_replay_finished(&self, _chat_id: String, _flushed: usize, _failed: usize) {}
    async fn on_stream_closed(&self, _scope: String, _reason: String) {}
}
