//! Supabase 平台接入
//!
//! 消息存储走 PostgREST，在线状态走 user-presence 边缘函数，
//! 变更通知走 Realtime WebSocket（Phoenix 通道协议）。

pub mod api;
pub mod realtime;

// 重新导出主要类型
pub use api::SupabaseRestApi;
pub use realtime::RealtimeFeed;

/// Supabase 接入配置
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// 项目基础地址，例如 `https://xxxx.supabase.co`
    pub base_url: String,
    /// 项目 anon key（apikey 头）
    pub anon_key: String,
    /// 当前会话的 access token（Authorization 头 / Realtime 鉴权）
    pub access_token: String,
}

impl SupabaseConfig {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        // 末尾斜杠会拼出双斜杠路径
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            anon_key: anon_key.into(),
            access_token: access_token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::backend::StaticIdentity;
    use crate::room::listener::RoomListener;
    use crate::room::session::{RoomSyncer, RoomSyncerConfig};
    use crate::room::types::Identity;
    use std::sync::Arc;
    use tracing::{error, info};

    #[test]
    fn config_strips_trailing_slash() {
        let cfg = SupabaseConfig::new("https://demo.supabase.co/", "anon", "token");
        assert_eq!(cfg.base_url, "https://demo.supabase.co");
    }

    /// 端到端冒烟测试：需要真实的 Supabase 项目，手动运行
    ///
    /// ```text
    /// OGADDA_BASE_URL=... OGADDA_ANON_KEY=... OGADDA_ACCESS_TOKEN=... \
    ///   cargo test run_room_session -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn run_room_session() {
        let base_url = std::env::var("OGADDA_BASE_URL").expect("缺少 OGADDA_BASE_URL");
        let anon_key = std::env::var("OGADDA_ANON_KEY").expect("缺少 OGADDA_ANON_KEY");
        let access_token = std::env::var("OGADDA_ACCESS_TOKEN").unwrap_or_else(|_| anon_key.clone());
        let room_id = std::env::var("OGADDA_ROOM_ID").unwrap_or_else(|_| "lobby".to_string());

        let config = SupabaseConfig::new(base_url, anon_key, access_token);
        let api = Arc::new(SupabaseRestApi::new(config.clone()).expect("创建 REST 客户端失败"));
        let feed = Arc::new(RealtimeFeed::new(config));

        struct SmokeListener;
        #[async_trait::async_trait]
        impl RoomListener for SmokeListener {
            async fn on_history_loaded(&self, messages_json: String) {
                info!("[Smoke] 📥 历史消息: {}", messages_json);
            }
            async fn on_new_message(&self, message_json: String) {
                info!("[Smoke] 📨 新消息: {}", message_json);
            }
            async fn on_online_users_changed(&self, users_json: String) {
                info!("[Smoke] 👥 在线名单: {}", users_json);
            }
            async fn on_load_failed(&self, error: String) {
                error!("[Smoke] ❌ 加载失败: {}", error);
            }
        }

        let identity = match std::env::var("OGADDA_USER_ID") {
            Ok(user_id) => StaticIdentity::new(Identity {
                user_id,
                name: std::env::var("OGADDA_USER_NAME").unwrap_or_default(),
                avatar_url: String::new(),
            }),
            Err(_) => StaticIdentity::anonymous(),
        };

        let syncer = RoomSyncer::with_listener(
            RoomSyncerConfig::new(room_id),
            Arc::new(identity),
            api.clone(),
            api,
            feed,
            Arc::new(SmokeListener),
        );

        syncer.start().await;
        info!("[Smoke] 会话已启动，观察 60 秒实时事件...");
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        syncer.stop().await;
    }
}
