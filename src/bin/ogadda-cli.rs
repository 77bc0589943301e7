//! ogadda CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示房间同步功能：加入指定房间，
//! 打印历史消息、实时推送与在线名单变化，可选发送一条测试消息。

use anyhow::Result;
use clap::Parser;
use ogadda_sdk_core_rust::room::listener::RoomListener;
use ogadda_sdk_core_rust::{
    Identity, RealtimeFeed, RoomSyncer, RoomSyncerConfig, StaticIdentity, SupabaseConfig,
    SupabaseRestApi,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// ogadda CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "ogadda-cli")]
#[command(about = "ogadda CLI 客户端 - 用于测试和展示房间同步功能", long_about = None)]
struct Args {
    /// 房间 ID
    #[arg(short, long, default_value = "lobby")]
    room: String,

    /// Supabase 项目基础地址，例如 https://xxxx.supabase.co
    #[arg(long)]
    base_url: String,

    /// Supabase anon key
    #[arg(long)]
    anon_key: String,

    /// 会话 access token（未提供时退回 anon key，只读访问）
    #[arg(long, default_value = "")]
    access_token: String,

    /// 当前用户 ID（未提供时以未登录身份旁观，无法发送）
    #[arg(long)]
    user_id: Option<String>,

    /// 当前用户展示名
    #[arg(long, default_value = "")]
    user_name: String,

    /// 当前用户头像 URL
    #[arg(long, default_value = "")]
    avatar_url: String,

    /// 加入房间后发送的一条测试消息
    #[arg(long)]
    say: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,ogadda_sdk_core_rust=debug）
    #[arg(long, default_value = "info,ogadda_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 房间监听器（输出所有接收到的事件）
struct CliRoomListener;

#[async_trait::async_trait]
impl RoomListener for CliRoomListener {
    async fn on_history_loaded(&self, messages_json: String) {
        info!("[CLI/Room] 📥 历史消息: {}", messages_json);
    }

    async fn on_new_message(&self, message_json: String) {
        info!("[CLI/Room] 📨 新消息: {}", message_json);
    }

    async fn on_online_users_changed(&self, users_json: String) {
        info!("[CLI/Room] 👥 在线名单: {}", users_json);
    }

    async fn on_load_failed(&self, error: String) {
        error!("[CLI/Room] ❌ 历史加载失败: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);

    info!("[CLI] 🚀 ogadda CLI 客户端（测试模式）");
    info!("[CLI] 🏠 房间: {}", args.room);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let access_token = if args.access_token.is_empty() {
        args.anon_key.clone()
    } else {
        args.access_token.clone()
    };
    let config = SupabaseConfig::new(args.base_url.clone(), args.anon_key.clone(), access_token);

    let api = Arc::new(SupabaseRestApi::new(config.clone())?);
    let feed = Arc::new(RealtimeFeed::new(config));

    let identity = match &args.user_id {
        Some(user_id) => {
            info!("[CLI] 👤 当前用户: {} ({})", args.user_name, user_id);
            StaticIdentity::new(Identity {
                user_id: user_id.clone(),
                name: args.user_name.clone(),
                avatar_url: args.avatar_url.clone(),
            })
        }
        None => {
            info!("[CLI] 👤 未登录身份旁观（无法发送消息）");
            StaticIdentity::anonymous()
        }
    };

    let syncer = RoomSyncer::with_listener(
        RoomSyncerConfig::new(args.room.clone()),
        Arc::new(identity),
        api.clone(),
        api,
        feed,
        Arc::new(CliRoomListener),
    );

    info!("[CLI] 🚪 正在加入房间...");
    syncer.start().await;
    info!(
        "[CLI] ✅ 已加入房间，当前历史 {} 条，在线 {} 人",
        syncer.messages().len(),
        syncer.online_users().len()
    );

    if let Some(text) = &args.say {
        // 稍等片刻，确保订阅稳定后再发送
        sleep(Duration::from_secs(2)).await;
        info!("[CLI] 📤 发送测试消息: {}", text);
        match syncer.send(text).await {
            Ok(_) => info!("[CLI] ✅ 消息发送成功"),
            Err(e) => warn!("[CLI] ⚠️ 消息发送失败: {}", e),
        }
    }

    info!("[CLI] 📥 开始监听房间事件...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await?;
    }

    syncer.stop().await;
    info!("[CLI] 👋 已离开房间，程序退出");
    Ok(())
}
