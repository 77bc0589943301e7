//! 房间同步模块
//!
//! 实现 ogadda 聊天房间的实时同步逻辑：历史消息、实时推送、
//! 乐观发送与在线名单轮询。

pub mod backend;
pub mod error;
pub mod listener;
pub mod session;
pub mod supabase;
pub mod types;

// 重新导出主要类型和函数
pub use backend::{
    ChangeFeed, FeedSubscription, IdentityProvider, MessageApi, PresenceApi, StaticIdentity,
};
pub use error::RoomError;
pub use listener::{EmptyRoomListener, RoomListener};
pub use session::{RoomSyncer, RoomSyncerConfig, SessionPhase};
pub use types::{ChatMessage, Identity, MessageAuthor, OnlineUser, RawMessageRow};
