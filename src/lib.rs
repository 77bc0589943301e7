pub mod room;

// 重新导出常用类型和函数，方便外部使用
pub use room::{
    backend::StaticIdentity,
    error::RoomError,
    listener::{EmptyRoomListener, RoomListener},
    session::{RoomSyncer, RoomSyncerConfig, SessionPhase},
    supabase::{RealtimeFeed, SupabaseConfig, SupabaseRestApi},
    types::{ChatMessage, Identity, MessageAuthor, OnlineUser},
};
