//! 会话列表读模型
//!
//! 把会话镜像与对端资料缓存拼成界面直接消费的组合视图。
//! 纯拼接，不触发任何网络或存储写入。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::im::chat::models::LocalChat;
use crate::im::profile::models::LocalProfile;

/// 会话列表条目：会话加上对端用户资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListEntry {
    pub chat: LocalChat,
    pub counterpart: LocalProfile,
}

/// 拼接会话列表视图
///
/// 入参 `chats` 的顺序（最近消息倒序）原样保留；对端取除本人外的
/// 第一个成员；对端资料尚未缓存的会话直接丢弃，不报错。
pub fn project_chat_list(
    chats: &[LocalChat],
    profiles: &[LocalProfile],
    user_id: &str,
) -> Vec<ChatListEntry> {
    let by_id: HashMap<&str, &LocalProfile> = profiles
        .iter()
        .map(|profile| (profile.user_id.as_str(), profile))
        .collect();

    chats
        .iter()
        .filter_map(|chat| {
            let counterpart_id = chat.counterpart_of(user_id)?;
            let counterpart = by_id.get(counterpart_id)?;
            Some(ChatListEntry {
                chat: chat.clone(),
                counterpart: (*counterpart).clone(),
            })
        })
        .collect()
}

/// 会话的全部对端用户 ID（去重，保持首次出现顺序）
pub fn counterpart_ids(chats: &[LocalChat], user_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for chat in chats {
        for member in &chat.member_ids {
            if member != user_id && seen.insert(member.clone()) {
                ids.push(member.clone());
            }
        }
    }
    ids
}
