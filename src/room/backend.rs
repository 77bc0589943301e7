//! 后端协作方接口（依赖注入点）
//!
//! RoomSyncer 不直接依赖具体平台：身份、消息存储、在线状态、变更通知
//! 全部通过这里的 trait 在构造时注入，测试中可用内存假实现替换。

use crate::room::types::{ChatMessage, Identity, MessageAuthor, OnlineUser, RawMessageRow};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// 身份提供方：返回当前登录身份（未登录时为 None）
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> Option<Identity>;
}

/// 消息存储：历史查询、插入、作者解析
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// 按 created_at 倒序拉取某房间最近的消息（最多 `limit` 条），作者快照已解析
    async fn query_recent(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// 插入一条消息；返回存储分配的消息 ID（存储不回传时为 None）
    async fn insert_message(
        &self,
        room_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Option<String>>;

    /// 按用户 ID 解析作者快照（不存在时为 None）
    async fn get_user(&self, user_id: &str) -> Result<Option<MessageAuthor>>;
}

/// 在线状态服务：get / join / leave 三个动作
///
/// 名单过期策略（心跳超时剔除等）归服务端所有，本端只做显式的 join/leave。
#[async_trait]
pub trait PresenceApi: Send + Sync {
    async fn presence_get(&self, room_id: &str) -> Result<Vec<OnlineUser>>;
    async fn presence_join(&self, room_id: &str, identity: &Identity) -> Result<()>;
    async fn presence_leave(&self, room_id: &str, user_id: &str) -> Result<()>;
}

/// 订阅句柄：`unsubscribe` 是唯一的释放入口
#[async_trait]
pub trait FeedSubscription: Send + Sync {
    /// 退订；实现必须幂等
    async fn unsubscribe(&self);
}

/// 变更通知：订阅某房间 messages 表的插入事件
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// 建立订阅；新插入的原始行按提交顺序通过 `tx` 送达，返回的句柄用于退订
    async fn subscribe(
        &self,
        room_id: &str,
        tx: UnboundedSender<RawMessageRow>,
    ) -> Result<Box<dyn FeedSubscription>>;
}

/// 固定身份提供方（CLI 和测试用）
pub struct StaticIdentity {
    identity: Option<Identity>,
}

impl StaticIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// 未登录身份（send 会以 Unauthenticated 失败，presence join/leave 跳过）
    pub fn anonymous() -> Self {
        Self { identity: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Option<Identity> {
        self.identity.clone()
    }
}
