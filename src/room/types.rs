use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// 消息作者展示快照（读取时由 users 表 join 解析）
///
/// join 缺失或解析失败时使用 `Default`（全空字段）作为占位作者，
/// 而不是让整条消息或整次拉取失败。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageAuthor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// 一条聊天消息（messages 表的一行 + 作者快照）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 消息 ID，由消息存储在插入时分配；
    /// 乐观追加且存储未回传 ID 时为 `temp-` 前缀的本地 ID
    pub id: String,
    /// 发送者用户 ID
    pub user_id: String,
    /// 所属房间 ID
    pub room_id: String,
    /// 文本内容（非空）
    pub content: String,
    /// RFC 3339 时间戳（UTC），插入时由存储分配，用于排序
    pub created_at: String,
    /// 作者快照
    #[serde(default)]
    pub user: MessageAuthor,
}

/// 在线名单中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// 当前登录身份（id + 展示名 + 头像）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    pub avatar_url: String,
}

/// 变更通知推送的原始消息行
///
/// 推送只携带 messages 表的裸字段，不带作者快照；作者需要另行解析。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessageRow {
    pub id: String,
    pub user_id: String,
    pub room_id: String,
    pub content: String,
    pub created_at: String,
}

/// presence 接口 get 动作的响应体
#[derive(Debug, Deserialize)]
pub struct PresenceResp {
    #[serde(default)]
    pub users: Vec<OnlineUser>,
}

/// 通用 HTTP 响应处理函数：检查状态码并反序列化 JSON body
/// 所有 API 都可以共用此方法
pub async fn decode_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    use anyhow::Context;

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    // 从 bytes 反序列化（因为 body 已经被消费了）
    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}
