//! 消息本地模型与线上文档结构

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::im::remote::RemoteDocument;
use crate::im::types::{MessageType, SyncState};

/// 本地消息数据结构
///
/// `message_id` 由写入方创建时生成、全局唯一、永不重分配；
/// `sync_state` 只会从 PENDING 前进到 SYNCED。
/// 展示顺序：`send_time` 升序，时间相同按 `message_id` 字典序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMessage {
    /// 消息 ID（客户端生成）
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// 所属会话 ID
    #[serde(rename = "chatID")]
    pub chat_id: String,
    /// 发送者用户 ID
    #[serde(default)]
    pub sender_id: String,
    /// 消息内容
    #[serde(default)]
    pub content: String,
    /// 消息类型
    #[serde(default)]
    pub message_type: MessageType,
    /// 发送时间（Unix 毫秒）
    #[serde(default)]
    pub send_time: i64,
    /// 已读用户集合
    #[serde(default)]
    pub read_by: Vec<String>,
    /// 已送达用户集合
    #[serde(default)]
    pub delivered_to: Vec<String>,
    /// 同步状态
    #[serde(default)]
    pub sync_state: SyncState,
}

/// 线上消息文档字段（文档 ID 即消息 ID，不在字段内；
/// 同步状态是本地簿记，不上线）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessageDoc {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub delivered_to: Vec<String>,
}

impl LocalMessage {
    /// 从线上文档映射到本地模型
    ///
    /// 远端存在即意味着已同步，映射结果一律是 SYNCED；本地的
    /// PENDING 行不会被退回（存储层用 MAX 保证单调）。
    /// 字段形状不合法时返回错误，合并方跳过该条。
    pub fn from_remote(chat_id: &str, doc: &RemoteDocument) -> Result<Self> {
        let wire: RemoteMessageDoc =
            serde_json::from_value(doc.fields.clone()).context("消息文档字段解码失败")?;
        Ok(Self {
            message_id: doc.id.clone(),
            chat_id: chat_id.to_string(),
            sender_id: wire.sender_id,
            content: wire.content,
            message_type: wire.message_type,
            send_time: wire.timestamp,
            read_by: wire.read_by,
            delivered_to: wire.delivered_to,
            sync_state: SyncState::Synced,
        })
    }

    /// 映射为线上文档字段
    pub fn to_remote_fields(&self) -> Result<Value> {
        let wire = RemoteMessageDoc {
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            timestamp: self.send_time,
            message_type: self.message_type,
            read_by: self.read_by.clone(),
            delivered_to: self.delivered_to.clone(),
        };
        serde_json::to_value(wire).context("消息文档字段编码失败")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_remote_always_maps_to_synced() {
        let doc = RemoteDocument::new(
            "m1",
            json!({
                "senderId": "u1",
                "content": "hi",
                "timestamp": 100,
                "type": "TEXT"
            }),
        );
        let msg = LocalMessage::from_remote("c1", &doc).unwrap();
        assert_eq!(msg.message_id, "m1");
        assert_eq!(msg.chat_id, "c1");
        assert_eq!(msg.sync_state, SyncState::Synced);
        assert_eq!(msg.send_time, 100);
    }

    #[test]
    fn from_remote_rejects_malformed_timestamp() {
        let doc = RemoteDocument::new("m1", json!({"timestamp": "不是数字"}));
        assert!(LocalMessage::from_remote("c1", &doc).is_err());
    }

    #[test]
    fn remote_fields_use_wire_names() {
        let msg = LocalMessage {
            message_id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: "u1".into(),
            content: "hello".into(),
            message_type: MessageType::Image,
            send_time: 42,
            read_by: vec!["u1".into()],
            delivered_to: vec![],
            sync_state: SyncState::Pending,
        };
        let fields = msg.to_remote_fields().unwrap();
        assert_eq!(fields["senderId"], "u1");
        assert_eq!(fields["timestamp"], 42);
        assert_eq!(fields["type"], "IMAGE");
        // 同步状态是本地簿记，不应出现在线上字段里
        assert!(fields.get("syncState").is_none());
    }
}
