//! 同步引擎错误类型
//!
//! 远端写失败在发送和重放路径上被记录后吞掉（只在下次重放时重试），
//! 因此这里的类型只覆盖需要向调用方暴露的边界错误。

use thiserror::Error;

/// 远端网关错误
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 网络不可达（或被模拟为离线）
    #[error("远端不可达（离线）")]
    Offline,
    /// 后端返回的其他错误
    #[error("远端后端错误: {0}")]
    Backend(String),
}

/// 同步引擎对外错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 当前没有已登录用户，调用方应引导登录后重试
    #[error("当前没有已登录用户")]
    NotSignedIn,
    /// 远端网关调用失败
    #[error("远端网关调用失败: {0}")]
    Gateway(#[from] GatewayError),
    /// 本地存储读写失败
    #[error("本地存储错误: {0}")]
    Store(#[from] anyhow::Error),
    /// 会话在本地与远端都不存在
    #[error("会话不存在: {0}")]
    ChatNotFound(String),
}

/// 单条消息刷写成功的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushAck {
    /// 被刷写消息的 ID（客户端生成，远端原样保留）
    pub message_id: String,
    /// 消息所属会话
    pub chat_id: String,
}
