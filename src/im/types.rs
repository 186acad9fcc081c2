use serde::{Deserialize, Serialize};

/// 远端集合路径
///
/// 远端文档库按集合组织：会话集合、用户资料集合，
/// 以及每个会话下的消息子集合。
pub mod collections {
    /// 会话集合
    pub const CONVERSATIONS: &str = "conversations";
    /// 用户资料集合
    pub const USERS: &str = "users";

    /// 某个会话的消息子集合路径
    pub fn messages_of(chat_id: &str) -> String {
        format!("{}/{}/messages", CONVERSATIONS, chat_id)
    }
}

/// 远端文档字段名（camelCase，与线上数据保持一致）
pub mod fields {
    pub const MEMBER_IDS: &str = "memberIds";
    pub const LAST_MESSAGE_TIMESTAMP: &str = "lastMessageTimestamp";
    pub const TIMESTAMP: &str = "timestamp";
}

/// 消息类型
///
/// 线上以大写字符串表示（"TEXT" 等），本地数据库以整数编码存储。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageType {
    /// 数据库整数编码
    pub fn code(self) -> i64 {
        match self {
            MessageType::Text => 0,
            MessageType::Image => 1,
            MessageType::Video => 2,
            MessageType::Audio => 3,
            MessageType::Document => 4,
        }
    }

    /// 从数据库整数编码还原，未知编码按文本处理
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageType::Image,
            2 => MessageType::Video,
            3 => MessageType::Audio,
            4 => MessageType::Document,
            _ => MessageType::Text,
        }
    }
}

/// 消息同步状态
///
/// 状态机只有一条边：PENDING --刷写成功--> SYNCED。
/// SYNCED 是终态，任何合并、重放都不得把它退回 PENDING。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    /// 仅存在于本地，等待刷写到远端
    #[default]
    Pending,
    /// 已确认写入远端
    Synced,
}

impl SyncState {
    /// 数据库整数编码（PENDING=0 < SYNCED=1，便于用 MAX 保证单调）
    pub fn code(self) -> i64 {
        match self {
            SyncState::Pending => 0,
            SyncState::Synced => 1,
        }
    }

    /// 从数据库整数编码还原
    pub fn from_code(code: i64) -> Self {
        if code >= 1 {
            SyncState::Synced
        } else {
            SyncState::Pending
        }
    }

    pub fn is_synced(self) -> bool {
        matches!(self, SyncState::Synced)
    }
}
