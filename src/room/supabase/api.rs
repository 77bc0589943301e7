//! Supabase REST / 边缘函数客户端
//!
//! messages / users 表通过 PostgREST 访问；在线状态通过 user-presence
//! 边缘函数的 get / join / leave 三个动作维护。

use crate::room::backend::{MessageApi, PresenceApi};
use crate::room::supabase::SupabaseConfig;
use crate::room::types::{
    decode_json_response, ChatMessage, Identity, MessageAuthor, OnlineUser, PresenceResp,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

/// messages 表带作者 join 的一行
///
/// 作者 join 可能为 null（用户行缺失或无权限），反序列化为 None
#[derive(Debug, Deserialize)]
struct MessageRowWithAuthor {
    id: String,
    user_id: String,
    room_id: String,
    content: String,
    created_at: String,
    #[serde(default)]
    user: Option<MessageAuthor>,
}

#[derive(Debug, Deserialize)]
struct InsertedRow {
    id: String,
}

/// Supabase REST 客户端（同时实现消息存储和在线状态两个协作方接口）
pub struct SupabaseRestApi {
    http: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseRestApi {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        // 带认证头的 HTTP 客户端（apikey + Bearer token 通过 default_headers 自动添加）
        let http = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("apikey"),
                    reqwest::header::HeaderValue::from_str(&config.anon_key)
                        .context("无效的 anon key")?,
                );
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!(
                        "Bearer {}",
                        config.access_token
                    ))
                    .context("无效的 access token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self { http, config })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn presence_url(&self, action: &str, room_id: &str) -> String {
        format!(
            "{}/functions/v1/user-presence?action={}&roomId={}",
            self.config.base_url, action, room_id
        )
    }
}

/// 只关心状态码的响应处理（join/leave 的响应体不使用）
async fn ensure_success(response: reqwest::Response, operation_name: &str) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(
            "[SupabaseApi] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body));
    }
    debug!("[SupabaseApi] {}请求成功，HTTP状态: {}", operation_name, status);
    Ok(())
}

#[async_trait]
impl MessageApi for SupabaseRestApi {
    async fn query_recent(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let room_filter = format!("eq.{}", room_id);
        let limit = limit.to_string();
        let resp = self
            .http
            .get(self.rest_url("messages"))
            .query(&[
                (
                    "select",
                    "id,user_id,room_id,content,created_at,user:users(id,name,avatar_url)",
                ),
                ("room_id", room_filter.as_str()),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("请求历史消息失败")?;
        let rows: Vec<MessageRowWithAuthor> = decode_json_response(resp, "历史消息查询").await?;
        Ok(rows
            .into_iter()
            .map(|r| ChatMessage {
                id: r.id,
                user_id: r.user_id,
                room_id: r.room_id,
                content: r.content,
                created_at: r.created_at,
                // 作者 join 缺失时使用占位作者，而不是让整次拉取失败
                user: r.user.unwrap_or_default(),
            })
            .collect())
    }

    async fn insert_message(
        &self,
        room_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Option<String>> {
        let resp = self
            .http
            .post(self.rest_url("messages"))
            .header("Prefer", "return=representation")
            .query(&[("select", "id")])
            .json(&serde_json::json!([{
                "user_id": user_id,
                "room_id": room_id,
                "content": content,
            }]))
            .send()
            .await
            .context("插入消息请求失败")?;
        let rows: Vec<InsertedRow> = decode_json_response(resp, "消息插入").await?;
        Ok(rows.into_iter().next().map(|r| r.id))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<MessageAuthor>> {
        let id_filter = format!("eq.{}", user_id);
        let resp = self
            .http
            .get(self.rest_url("users"))
            .query(&[
                ("select", "id,name,avatar_url"),
                ("id", id_filter.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await
            .context("查询用户请求失败")?;
        let rows: Vec<MessageAuthor> = decode_json_response(resp, "用户查询").await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl PresenceApi for SupabaseRestApi {
    async fn presence_get(&self, room_id: &str) -> Result<Vec<OnlineUser>> {
        let resp = self
            .http
            .get(self.presence_url("get", room_id))
            .send()
            .await
            .context("presence get 请求失败")?;
        let body: PresenceResp = decode_json_response(resp, "presence get").await?;
        Ok(body.users)
    }

    async fn presence_join(&self, room_id: &str, identity: &Identity) -> Result<()> {
        let resp = self
            .http
            .post(self.presence_url("join", room_id))
            .json(&serde_json::json!({
                "userId": identity.user_id,
                "name": identity.name,
                "avatarUrl": identity.avatar_url,
            }))
            .send()
            .await
            .context("presence join 请求失败")?;
        ensure_success(resp, "presence join").await
    }

    async fn presence_leave(&self, room_id: &str, user_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.presence_url("leave", room_id))
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await
            .context("presence leave 请求失败")?;
        ensure_success(resp, "presence leave").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_url_carries_action_and_room() {
        let api = SupabaseRestApi::new(SupabaseConfig::new(
            "https://demo.supabase.co",
            "anon",
            "token",
        ))
        .unwrap();
        assert_eq!(
            api.presence_url("join", "room-42"),
            "https://demo.supabase.co/functions/v1/user-presence?action=join&roomId=room-42"
        );
        assert_eq!(
            api.rest_url("messages"),
            "https://demo.supabase.co/rest/v1/messages"
        );
    }

    #[test]
    fn message_row_tolerates_missing_author() {
        let row: MessageRowWithAuthor = serde_json::from_str(
            r#"{"id":"m1","user_id":"u1","room_id":"room-42","content":"你好",
                "created_at":"2026-08-01T00:00:01Z","user":null}"#,
        )
        .unwrap();
        assert!(row.user.is_none());
    }
}
