//! 会话模块
//!
//! 远端会话集合的本地镜像、实时列表视图与查找或创建逻辑。

pub mod dao;
pub mod models;
pub mod service;
pub mod view;

// 重新导出主要类型和函数
pub use dao::ChatDao;
pub use models::{LocalChat, RemoteChatDoc};
pub use service::{ChatListScope, ChatSyncer};
pub use view::{project_chat_list, ChatListEntry};
