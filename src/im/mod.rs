pub mod chat;
pub mod client;
pub mod db;
pub mod error;
pub mod identity;
pub mod listener;
pub mod message;
pub mod profile;
pub mod remote;
pub mod serialization;
pub mod types;

// 重新导出客户端门面
pub use client::{ChatClient, ClientConfig};

// 重新导出会话同步相关类型和函数
pub use chat::{ChatDao, ChatListEntry, ChatListScope, ChatSyncer, LocalChat};

// 重新导出消息同步相关类型和函数
pub use message::{ConversationScope, LocalMessage, MessageSyncer, ReplayReport};
