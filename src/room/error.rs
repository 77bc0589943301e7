//! 房间会话的错误分类
//!
//! 所有失败都在产生它的操作边界处恢复，不会级联破坏无关状态；
//! 最坏结果是视图降级或过期，没有任何错误是进程致命的。

use thiserror::Error;

/// RoomSyncer 对调用方暴露的错误分类
#[derive(Debug, Error)]
pub enum RoomError {
    /// send 的前置条件：必须已登录；同步返回，不发起网络调用
    #[error("当前未登录，无法发送消息")]
    Unauthenticated,

    /// 初始历史消息拉取失败；会话仍进入 Active，消息列表为空
    #[error("拉取历史消息失败: {0}")]
    FetchFailed(String),

    /// 消息插入失败；本地状态未改动，未发送的文本由调用方保留重发
    #[error("消息发送失败: {0}")]
    SendFailed(String),

    /// presence get/join/leave 失败；尽力而为，不影响消息流
    #[error("在线状态服务不可用: {0}")]
    PresenceUnavailable(String),

    /// 变更通知订阅建立失败；会话降级为无实时推送
    #[error("订阅实时推送失败: {0}")]
    SubscribeFailed(String),
}
