//! 用户资料本地模型与线上文档结构

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::im::remote::RemoteDocument;

/// 本地用户资料（对端用户的只读缓存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProfile {
    /// 用户 ID
    #[serde(rename = "userID")]
    pub user_id: String,
    /// 邮箱
    #[serde(default)]
    pub email: String,
    /// 显示名称
    #[serde(default)]
    pub display_name: String,
    /// 头像 URL
    #[serde(default)]
    pub face_url: Option<String>,
    /// 是否在线
    #[serde(default)]
    pub is_online: bool,
    /// 最后在线时间（Unix 毫秒）
    #[serde(default)]
    pub last_seen_time: i64,
}

/// 线上用户资料文档字段（文档 ID 即用户 ID，不在字段内）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProfileDoc {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: i64,
}

impl LocalProfile {
    /// 从线上文档映射到本地模型，字段形状不合法时返回错误
    pub fn from_remote(doc: &RemoteDocument) -> Result<Self> {
        let wire: RemoteProfileDoc =
            serde_json::from_value(doc.fields.clone()).context("用户资料文档字段解码失败")?;
        Ok(Self {
            user_id: doc.id.clone(),
            email: wire.email,
            display_name: wire.display_name,
            face_url: wire.profile_picture_url,
            is_online: wire.is_online,
            last_seen_time: wire.last_seen,
        })
    }
}
