pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    chat::{ChatListEntry, ChatListScope, ChatSyncer, LocalChat},
    client::{ChatClient, ClientConfig},
    error::{FlushAck, GatewayError, SyncError},
    identity::{IdentityProvider, StaticIdentity},
    listener::{EmptySyncListener, SyncListener},
    message::{ConversationScope, LocalMessage, MessageSyncer, ReplayReport},
    profile::LocalProfile,
    remote::{MemoryGateway, RemoteGateway},
    types::{MessageType, SyncState},
};
