//! Supabase Realtime 变更通知（Phoenix 通道协议）
//!
//! 对每个订阅建立一条 WebSocket 连接：`phx_join` 声明按房间过滤的
//! messages 表 INSERT 订阅，心跳任务维持连接，读循环把 INSERT 事件
//! 翻译成原始消息行送入调用方的通道。

use crate::room::backend::{ChangeFeed, FeedSubscription};
use crate::room::supabase::SupabaseConfig;
use crate::room::types::RawMessageRow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Phoenix 通道帧（vsn=1.0.0，JSON 序列化）
#[derive(Debug, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// Realtime 变更通知客户端
pub struct RealtimeFeed {
    config: SupabaseConfig,
}

impl RealtimeFeed {
    pub fn new(config: SupabaseConfig) -> Self {
        Self { config }
    }

    /// 构建 WebSocket 连接 URL（https -> wss）
    fn ws_url(&self) -> String {
        let base = self.config.base_url.replacen("http", "ws", 1);
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base, self.config.anon_key
        )
    }

    fn topic(room_id: &str) -> String {
        format!("realtime:room-{}", room_id)
    }

    /// phx_join 的 payload：按房间过滤的 messages 表 INSERT 订阅
    fn join_payload(&self, room_id: &str) -> serde_json::Value {
        serde_json::json!({
            "config": {
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "filter": format!("room_id=eq.{}", room_id),
                }]
            },
            "access_token": self.config.access_token,
        })
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(
        &self,
        room_id: &str,
        tx: UnboundedSender<RawMessageRow>,
    ) -> Result<Box<dyn FeedSubscription>> {
        let url = self.ws_url();
        let topic = Self::topic(room_id);
        info!("[Realtime] 🔗 连接 Realtime 服务: room={}", room_id);

        let (ws_stream, response) = connect_async(&url)
            .await
            .context("Realtime WebSocket 连接失败")?;
        debug!("[Realtime] WebSocket 已连接, 状态: {}", response.status());

        let (write, read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));

        // 加入通道，声明订阅
        let join = PhoenixFrame {
            topic: topic.clone(),
            event: "phx_join".to_string(),
            payload: self.join_payload(room_id),
            reference: Some("1".to_string()),
        };
        {
            let mut w = writer.lock().await;
            w.send(WsMessage::Text(serde_json::to_string(&join)?))
                .await
                .context("发送 phx_join 失败")?;
        }

        // 心跳任务（Phoenix 要求周期心跳，超时会被服务端断开）
        let writer_for_heartbeat = writer.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(25));
            let mut heartbeat_ref: u64 = 2;
            loop {
                ticker.tick().await;
                let frame = PhoenixFrame {
                    topic: "phoenix".to_string(),
                    event: "heartbeat".to_string(),
                    payload: serde_json::json!({}),
                    reference: Some(heartbeat_ref.to_string()),
                };
                heartbeat_ref += 1;
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(_) => break,
                };
                let mut w = writer_for_heartbeat.lock().await;
                if w.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        // 读循环：把 INSERT 事件翻译成原始消息行
        let topic_for_read = topic.clone();
        let read_task = tokio::spawn(async move {
            run_read_loop(read, topic_for_read, tx).await;
        });

        Ok(Box::new(RealtimeSubscription {
            topic,
            writer,
            heartbeat_task,
            read_task,
            closed: AtomicBool::new(false),
        }))
    }
}

async fn run_read_loop(mut read: WsReader, topic: String, tx: UnboundedSender<RawMessageRow>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let parsed = match serde_json::from_str::<PhoenixFrame>(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        debug!("[Realtime] 忽略无法解析的帧: {}", e);
                        continue;
                    }
                };
                if parsed.topic != topic {
                    continue;
                }
                match parsed.event.as_str() {
                    "phx_reply" => {
                        let status = parsed
                            .payload
                            .get("status")
                            .and_then(|s| s.as_str())
                            .unwrap_or("");
                        if status == "ok" {
                            debug!("[Realtime] ✅ 通道回执: {}", topic);
                        } else {
                            warn!("[Realtime] ⚠️ 通道回执异常: {}", parsed.payload);
                        }
                    }
                    "postgres_changes" => match extract_insert_row(&parsed.payload) {
                        Some(row) => {
                            debug!("[Realtime] 📨 收到插入事件: {}", row.id);
                            if tx.send(row).is_err() {
                                // 接收端已撤销，结束读循环
                                break;
                            }
                        }
                        None => debug!("[Realtime] 忽略非 INSERT 或缺失 record 的事件"),
                    },
                    "phx_error" => {
                        warn!("[Realtime] ⚠️ 通道错误: {}", parsed.payload);
                    }
                    _ => {}
                }
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                warn!("[Realtime] 👋 连接关闭: {:?}", frame);
                break;
            }
            Err(e) => {
                error!("[Realtime] WebSocket 错误: {}", e);
                break;
            }
            _ => {}
        }
    }
}

/// 从 postgres_changes 事件的 payload 中提取 INSERT 的原始行
fn extract_insert_row(payload: &serde_json::Value) -> Option<RawMessageRow> {
    let data = payload.get("data")?;
    if data.get("type").and_then(|t| t.as_str()) != Some("INSERT") {
        return None;
    }
    let record = data.get("record")?;
    serde_json::from_value(record.clone()).ok()
}

/// Realtime 订阅句柄；`unsubscribe` 发送 phx_leave 并终止后台任务
struct RealtimeSubscription {
    topic: String,
    writer: Arc<Mutex<WsWriter>>,
    heartbeat_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
    closed: AtomicBool,
}

#[async_trait]
impl FeedSubscription for RealtimeSubscription {
    async fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[Realtime] 🔌 退订: {}", self.topic);
        let leave = PhoenixFrame {
            topic: self.topic.clone(),
            event: "phx_leave".to_string(),
            payload: serde_json::json!({}),
            reference: None,
        };
        if let Ok(text) = serde_json::to_string(&leave) {
            let mut w = self.writer.lock().await;
            if let Err(e) = w.send(WsMessage::Text(text)).await {
                debug!("[Realtime] phx_leave 发送失败（连接可能已断开）: {}", e);
            }
            let _ = w.send(WsMessage::Close(None)).await;
        }
        self.heartbeat_task.abort();
        self.read_task.abort();
    }
}
