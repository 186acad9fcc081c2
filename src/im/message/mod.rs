//! 消息模块
//!
//! 消息本地镜像、乐观发送、离线队列重放与会话内实时视图。

pub mod dao;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use dao::MessageDao;
pub use models::{LocalMessage, RemoteMessageDoc};
pub use service::{ConversationScope, MessageSyncer, ReplayReport};
