//! 会话本地模型与线上文档结构

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::im::remote::RemoteDocument;
use crate::im::types::MessageType;

/// 本地会话数据结构
///
/// `member_ids` 创建后不可变；非群聊会话中每对成员只应存在一个会话
/// （由查找或创建协议保证，见 service 层）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChat {
    /// 会话 ID
    #[serde(rename = "chatID")]
    pub chat_id: String,
    /// 成员用户 ID 集合（至少两人）
    #[serde(default)]
    pub member_ids: Vec<String>,
    /// 最近一条消息的预览文本
    #[serde(default)]
    pub last_message: String,
    /// 最近一条消息的时间（Unix 毫秒）
    #[serde(default)]
    pub last_message_time: i64,
    /// 最近一条消息的类型
    #[serde(default)]
    pub last_message_type: MessageType,
    /// 未读数（非负）
    #[serde(default)]
    pub unread_count: i64,
    /// 是否群聊
    #[serde(default)]
    pub is_group: bool,
    /// 群名称（仅群聊会话使用）
    #[serde(default)]
    pub group_name: Option<String>,
}

/// 线上会话文档字段（文档 ID 即会话 ID，不在字段内）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChatDoc {
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_timestamp: i64,
    #[serde(default)]
    pub last_message_type: MessageType,
    #[serde(default)]
    pub unread_count: i64,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl LocalChat {
    /// 从线上文档映射到本地模型
    ///
    /// 字段形状不合法（例如 memberIds 不是字符串数组）时返回错误，
    /// 合并方据此跳过该条、继续应用快照其余部分。
    pub fn from_remote(doc: &RemoteDocument) -> Result<Self> {
        let wire: RemoteChatDoc =
            serde_json::from_value(doc.fields.clone()).context("会话文档字段解码失败")?;
        Ok(Self {
            chat_id: doc.id.clone(),
            member_ids: wire.member_ids,
            last_message: wire.last_message,
            last_message_time: wire.last_message_timestamp,
            last_message_type: wire.last_message_type,
            unread_count: wire.unread_count,
            is_group: wire.is_group,
            group_name: wire.group_name,
        })
    }

    /// 映射为线上文档字段
    pub fn to_remote_fields(&self) -> Result<Value> {
        let wire = RemoteChatDoc {
            member_ids: self.member_ids.clone(),
            last_message: self.last_message.clone(),
            last_message_timestamp: self.last_message_time,
            last_message_type: self.last_message_type,
            unread_count: self.unread_count,
            is_group: self.is_group,
            group_name: self.group_name.clone(),
        };
        serde_json::to_value(wire).context("会话文档字段编码失败")
    }

    /// 除指定用户外的第一个成员（单聊即对端用户）
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        self.member_ids
            .iter()
            .map(|id| id.as_str())
            .find(|id| *id != user_id)
    }
}
