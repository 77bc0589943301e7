//! 房间事件监听器
//!
//! 调用方通过注册监听器订阅会话状态变化（消息、在线名单、加载状态）。

use async_trait::async_trait;

/// 房间事件监听器
///
/// 所有回调参数均为 JSON 字符串表示。
#[async_trait]
pub trait RoomListener: Send + Sync {
    /// 初始历史消息加载完成
    ///
    /// 参数 `messages_json` 是 ChatMessage 列表的 JSON 字符串表示（最旧在前）
    async fn on_history_loaded(&self, messages_json: String);

    /// 消息列表新增一条（实时推送送达，或本地乐观追加）
    ///
    /// 参数 `message_json` 是单条 ChatMessage 的 JSON 字符串表示
    async fn on_new_message(&self, message_json: String);

    /// 在线名单变化（整体替换后的名单）
    ///
    /// 参数 `users_json` 是 OnlineUser 列表的 JSON 字符串表示
    async fn on_online_users_changed(&self, users_json: String);

    /// 初始历史消息加载失败
    ///
    /// 会话仍进入 Active（消息列表为空），调用方可重新 start
    async fn on_load_failed(&self, error: String);
}

/// 空的房间监听器实现（默认实现）
pub struct EmptyRoomListener;

#[async_trait]
impl RoomListener for EmptyRoomListener {
    async fn on_history_loaded(&self, _messages_json: String) {}
    async fn on_new_message(&self, _message_json: String) {}
    async fn on_online_users_changed(&self, _users_json: String) {}
    async fn on_load_failed(&self, _error: String) {}
}
