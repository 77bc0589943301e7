//! 房间同步会话（RoomSyncer）
//!
//! 负责单个房间实时数据的完整生命周期：初始历史消息加载、实时消息接入、
//! 乐观发送、在线名单轮询。对调用方隐藏网络拉取、推送订阅和 presence
//! 簿记的细节，只暴露一份去重后、按时间升序的消息视图和尽力而为的在线名单。
//!
//! 生命周期状态机：`Idle → Joining → Active → Leaving → Idle`。
//! `start` 的各个副作用并发执行、彼此独立成败；部分失败不会退回 Idle，
//! 会话仍以降级数据进入 Active（尽力而为的房间加入，而非全有或全无）。

use crate::room::backend::{
    ChangeFeed, FeedSubscription, IdentityProvider, MessageApi, PresenceApi,
};
use crate::room::error::RoomError;
use crate::room::listener::{EmptyRoomListener, RoomListener};
use crate::room::types::{ChatMessage, MessageAuthor, OnlineUser, RawMessageRow};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 乐观追加且存储未回传 ID 时使用的本地 ID 前缀
pub const TEMP_ID_PREFIX: &str = "temp-";

/// 会话配置
#[derive(Clone, Debug)]
pub struct RoomSyncerConfig {
    /// 房间 ID
    pub room_id: String,
    /// 初始历史消息条数上限
    pub history_limit: usize,
    /// 在线名单轮询间隔
    pub presence_interval: Duration,
}

impl RoomSyncerConfig {
    /// 创建默认配置（50 条历史、10 秒轮询）
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            history_limit: 50,
            presence_interval: Duration::from_secs(10),
        }
    }
}

/// 会话生命周期阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Joining,
    Active,
    Leaving,
}

/// 会话内部状态（归会话独占，同房间的两个会话不共享）
struct RoomState {
    /// 消息列表，最旧在前；初始加载截断到最近 N 条，会话期间随实时消息增长
    messages: Vec<ChatMessage>,
    /// 已见过的存储分配 ID（实时推送去重键）
    seen_ids: HashSet<String>,
    /// 在线名单快照；最近一次成功轮询整体替换，不做增量合并
    online_users: Vec<OnlineUser>,
    loading: bool,
    last_error: Option<String>,
    phase: SessionPhase,
}

impl RoomState {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            seen_ids: HashSet::new(),
            online_users: Vec::new(),
            loading: false,
            last_error: None,
            phase: SessionPhase::Idle,
        }
    }

    /// 接入一条已解析作者的实时消息；返回 true 表示列表追加了新条目
    ///
    /// 去重键是存储分配的 ID。若存在同作者同内容的 `temp-` 乐观条目，
    /// 则就地回填存储 ID 而不追加（乐观/回显对账，见 DESIGN.md）。
    fn apply_incoming(&mut self, msg: ChatMessage) -> bool {
        if self.seen_ids.contains(&msg.id) {
            return false;
        }
        if let Some(slot) = self.messages.iter_mut().find(|m| {
            m.id.starts_with(TEMP_ID_PREFIX)
                && m.user_id == msg.user_id
                && m.content == msg.content
        }) {
            slot.id = msg.id.clone();
            slot.created_at = msg.created_at;
            self.seen_ids.insert(msg.id);
            return false;
        }
        self.seen_ids.insert(msg.id.clone());
        // 尾部追加：推送按提交顺序送达，对真正的新消息保持时间升序
        self.messages.push(msg);
        true
    }
}

/// 会话持有的运行时资源（订阅句柄 + 后台任务）
struct SessionRuntime {
    subscription: Option<Box<dyn FeedSubscription>>,
    feed_task: Option<JoinHandle<()>>,
    presence_task: Option<JoinHandle<()>>,
}

/// 房间同步器
///
/// 一个实例对应一个房间视图的会话；视图销毁或切换房间时必须调用 `stop`。
pub struct RoomSyncer {
    config: RoomSyncerConfig,
    identity: Arc<dyn IdentityProvider>,
    messages_api: Arc<dyn MessageApi>,
    presence_api: Arc<dyn PresenceApi>,
    feed: Arc<dyn ChangeFeed>,
    listener: Arc<dyn RoomListener>,
    state: Arc<Mutex<RoomState>>,
    runtime: tokio::sync::Mutex<SessionRuntime>,
}

impl RoomSyncer {
    /// 创建新的房间同步器（使用默认空监听器）
    pub fn new(
        config: RoomSyncerConfig,
        identity: Arc<dyn IdentityProvider>,
        messages_api: Arc<dyn MessageApi>,
        presence_api: Arc<dyn PresenceApi>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self::with_listener(
            config,
            identity,
            messages_api,
            presence_api,
            feed,
            Arc::new(EmptyRoomListener),
        )
    }

    /// 创建新的房间同步器（带自定义监听器）
    pub fn with_listener(
        config: RoomSyncerConfig,
        identity: Arc<dyn IdentityProvider>,
        messages_api: Arc<dyn MessageApi>,
        presence_api: Arc<dyn PresenceApi>,
        feed: Arc<dyn ChangeFeed>,
        listener: Arc<dyn RoomListener>,
    ) -> Self {
        Self {
            config,
            identity,
            messages_api,
            presence_api,
            feed,
            listener,
            state: Arc::new(Mutex::new(RoomState::new())),
            runtime: tokio::sync::Mutex::new(SessionRuntime {
                subscription: None,
                feed_task: None,
                presence_task: None,
            }),
        }
    }

    /// 注册房间监听器
    pub fn set_listener(&mut self, listener: Arc<dyn RoomListener>) {
        self.listener = listener;
    }

    /// 加入房间：并发执行历史拉取、在线名单拉取、推送订阅、presence join
    ///
    /// 返回时推送订阅已建立（若建立成功），后续插入无需轮询即可观察到。
    /// 历史拉取失败时消息列表为空、`last_error` 置位，会话仍进入 Active；
    /// 重试由调用方负责（重新 start 即可，旧的订阅和任务会先被释放）。
    pub async fn start(&self) {
        let room_id = self.config.room_id.clone();
        info!("[RoomSync] 🚪 开始加入房间: {}", room_id);

        // 重复 start 视为重启：先释放上一次的订阅与后台任务
        self.teardown_runtime().await;

        {
            let mut st = self.state.lock().unwrap();
            st.phase = SessionPhase::Joining;
            st.loading = true;
            st.last_error = None;
            // 重新加入等同全新加载，上一次会话的消息不参与本次合并
            st.messages.clear();
            st.seen_ids.clear();
        }

        let (history, roster, sub, _) = tokio::join!(
            self.messages_api
                .query_recent(&room_id, self.config.history_limit),
            self.presence_api.presence_get(&room_id),
            self.subscribe_feed(),
            self.join_presence(),
        );

        match history {
            Ok(mut list) => {
                // 倒序拉取最近 N 条，翻转为最旧在前
                list.reverse();
                info!("[RoomSync] 📥 历史消息加载完成，共 {} 条", list.len());
                let json = serde_json::to_string(&list).unwrap_or_default();
                {
                    let mut st = self.state.lock().unwrap();
                    // 拉取期间订阅可能已送达插入行；以历史快照为基准合并，
                    // 已接入的实时行追加在后，不整体覆盖
                    let mut seen: HashSet<String> =
                        list.iter().map(|m| m.id.clone()).collect();
                    let live: Vec<ChatMessage> = st
                        .messages
                        .drain(..)
                        .filter(|m| seen.insert(m.id.clone()))
                        .collect();
                    st.messages = list;
                    st.messages.extend(live);
                    st.seen_ids = seen;
                    st.loading = false;
                }
                self.listener.on_history_loaded(json).await;
            }
            Err(e) => {
                let err = RoomError::FetchFailed(e.to_string());
                error!("[RoomSync] ❌ {}", err);
                {
                    let mut st = self.state.lock().unwrap();
                    st.messages.clear();
                    st.seen_ids.clear();
                    st.last_error = Some(err.to_string());
                    st.loading = false;
                }
                self.listener.on_load_failed(err.to_string()).await;
            }
        }

        match roster {
            Ok(users) => self.apply_roster(users).await,
            // presence 尽力而为：失败只记日志，不影响消息展示
            Err(e) => warn!(
                "[RoomSync] ⚠️ {}",
                RoomError::PresenceUnavailable(e.to_string())
            ),
        }

        {
            let mut rt = self.runtime.lock().await;
            if let Some((handle, task)) = sub {
                rt.subscription = Some(handle);
                rt.feed_task = Some(task);
            }
            rt.presence_task = Some(self.spawn_presence_poller());
        }

        self.state.lock().unwrap().phase = SessionPhase::Active;
        info!("[RoomSync] ✅ 已进入房间: {}", room_id);
    }

    /// 离开房间：退订推送、presence leave、取消轮询任务
    ///
    /// 幂等；重复调用无额外副作用。返回后会话状态不再发生变化。
    pub async fn stop(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if st.phase == SessionPhase::Idle || st.phase == SessionPhase::Leaving {
                debug!("[RoomSync] stop 重复调用，忽略");
                return;
            }
            st.phase = SessionPhase::Leaving;
        }
        info!("[RoomSync] 🚪 正在离开房间: {}", self.config.room_id);

        self.teardown_runtime().await;

        if let Some(id) = self.identity.current_identity().await {
            if let Err(e) = self
                .presence_api
                .presence_leave(&self.config.room_id, &id.user_id)
                .await
            {
                warn!(
                    "[RoomSync] ⚠️ {}",
                    RoomError::PresenceUnavailable(e.to_string())
                );
            }
        }

        self.state.lock().unwrap().phase = SessionPhase::Idle;
        info!("[RoomSync] 👋 已离开房间: {}", self.config.room_id);
    }

    /// 发送一条消息（乐观追加）
    ///
    /// 空白内容是 no-op。未登录时以 `Unauthenticated` 失败且不发起网络调用；
    /// 插入失败时以 `SendFailed` 失败且不改动本地状态，未发送的文本由调用方
    /// 保留以便重发。成功后立即追加本地副本（作者取自当前身份），发送方无需
    /// 等待实时回显即可看到自己的消息；回显先于插入响应到达时不重复追加。
    pub async fn send(&self, content: &str) -> Result<(), RoomError> {
        let content = content.trim();
        if content.is_empty() {
            debug!("[RoomSync] 忽略空白消息");
            return Ok(());
        }

        let identity = self
            .identity
            .current_identity()
            .await
            .ok_or(RoomError::Unauthenticated)?;

        let server_id = self
            .messages_api
            .insert_message(&self.config.room_id, &identity.user_id, content)
            .await
            .map_err(|e| RoomError::SendFailed(e.to_string()))?;

        // 存储回传了 ID 时乐观副本直接携带去重键，回显会被正常去重；
        // 否则退化为本地 temp ID，由 apply_incoming 按作者+内容对账
        let id = server_id.unwrap_or_else(|| format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()));
        let msg = ChatMessage {
            id: id.clone(),
            user_id: identity.user_id.clone(),
            room_id: self.config.room_id.clone(),
            content: content.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            user: MessageAuthor {
                id: identity.user_id,
                name: identity.name,
                avatar_url: identity.avatar_url,
            },
        };
        // 提交通知可能赶在插入响应之前送达；回显已被消费时跳过追加
        let appended = {
            let mut st = self.state.lock().unwrap();
            if st.seen_ids.contains(&id) {
                false
            } else {
                if !id.starts_with(TEMP_ID_PREFIX) {
                    st.seen_ids.insert(id.clone());
                }
                st.messages.push(msg.clone());
                true
            }
        };
        if appended {
            debug!("[RoomSync] 📤 消息已发送: {}", id);
            let json = serde_json::to_string(&msg).unwrap_or_default();
            self.listener.on_new_message(json).await;
        } else {
            debug!("[RoomSync] 📤 消息已发送，回显先行到达: {}", id);
        }
        Ok(())
    }

    /// 当前消息列表快照（最旧在前）
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    /// 当前在线名单快照
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.state.lock().unwrap().online_users.clone()
    }

    /// 初始历史是否仍在加载中
    pub fn is_loading(&self) -> bool {
        self.state.lock().unwrap().loading
    }

    /// 最近一次初始加载错误（成功的 start 会清除）
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().last_error.clone()
    }

    /// 当前生命周期阶段
    pub fn phase(&self) -> SessionPhase {
        self.state.lock().unwrap().phase
    }

    /// 建立推送订阅并启动消费任务
    async fn subscribe_feed(&self) -> Option<(Box<dyn FeedSubscription>, JoinHandle<()>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.feed.subscribe(&self.config.room_id, tx).await {
            Ok(handle) => {
                debug!("[RoomSync] 📡 推送订阅已建立: {}", self.config.room_id);
                Some((handle, self.spawn_feed_consumer(rx)))
            }
            Err(e) => {
                let err = RoomError::SubscribeFailed(e.to_string());
                warn!("[RoomSync] ⚠️ {}", err);
                let mut st = self.state.lock().unwrap();
                if st.last_error.is_none() {
                    st.last_error = Some(err.to_string());
                }
                None
            }
        }
    }

    /// 消费推送的原始行：解析作者、去重、尾部追加、触发回调
    fn spawn_feed_consumer(&self, mut rx: UnboundedReceiver<RawMessageRow>) -> JoinHandle<()> {
        let api = self.messages_api.clone();
        let state = self.state.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move {
            while let Some(row) = rx.recv().await {
                // 推送只携带裸字段，作者按 user_id 重新解析；失败降级为占位作者
                let author = match api.get_user(&row.user_id).await {
                    Ok(Some(u)) => u,
                    Ok(None) => {
                        debug!("[RoomSync] 作者 {} 不存在，使用占位作者", row.user_id);
                        MessageAuthor::default()
                    }
                    Err(e) => {
                        warn!("[RoomSync] ⚠️ 作者解析失败，使用占位作者: {}", e);
                        MessageAuthor::default()
                    }
                };
                let msg = ChatMessage {
                    id: row.id,
                    user_id: row.user_id,
                    room_id: row.room_id,
                    content: row.content,
                    created_at: row.created_at,
                    user: author,
                };
                let appended = state.lock().unwrap().apply_incoming(msg.clone());
                if appended {
                    debug!("[RoomSync] 📨 收到新消息: {}", msg.id);
                    let json = serde_json::to_string(&msg).unwrap_or_default();
                    listener.on_new_message(json).await;
                } else {
                    debug!("[RoomSync] 跳过重复消息: {}", msg.id);
                }
            }
            debug!("[RoomSync] 实时推送通道已关闭");
        })
    }

    /// 在线名单轮询任务：固定间隔整体替换，失败只记日志（无退避）
    fn spawn_presence_poller(&self) -> JoinHandle<()> {
        let api = self.presence_api.clone();
        let state = self.state.clone();
        let listener = self.listener.clone();
        let room_id = self.config.room_id.clone();
        let period = self.config.presence_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // 首个 tick 立即返回；初始名单已由 start 拉取过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match api.presence_get(&room_id).await {
                    Ok(users) => {
                        Self::replace_roster(&state, &listener, users).await;
                    }
                    // 每次 tick 彼此独立成败
                    Err(e) => debug!("[RoomSync] presence 轮询失败: {}", e),
                }
            }
        })
    }

    async fn apply_roster(&self, users: Vec<OnlineUser>) {
        Self::replace_roster(&self.state, &self.listener, users).await;
    }

    /// 整体替换在线名单；旧快照不参与合并
    async fn replace_roster(
        state: &Arc<Mutex<RoomState>>,
        listener: &Arc<dyn RoomListener>,
        users: Vec<OnlineUser>,
    ) {
        let changed = {
            let mut st = state.lock().unwrap();
            let changed = st.online_users != users;
            st.online_users = users.clone();
            changed
        };
        if changed {
            debug!("[RoomSync] 👥 在线名单更新，共 {} 人", users.len());
            let json = serde_json::to_string(&users).unwrap_or_default();
            listener.on_online_users_changed(json).await;
        }
    }

    /// presence join（未登录时为 no-op）
    async fn join_presence(&self) {
        match self.identity.current_identity().await {
            Some(id) => {
                if let Err(e) = self
                    .presence_api
                    .presence_join(&self.config.room_id, &id)
                    .await
                {
                    warn!(
                        "[RoomSync] ⚠️ {}",
                        RoomError::PresenceUnavailable(e.to_string())
                    );
                }
            }
            None => debug!("[RoomSync] 未登录，跳过 presence join"),
        }
    }

    /// 释放订阅句柄并终止后台任务（start 重入和 stop 共用）
    async fn teardown_runtime(&self) {
        let (sub, feed_task, presence_task) = {
            let mut rt = self.runtime.lock().await;
            (
                rt.subscription.take(),
                rt.feed_task.take(),
                rt.presence_task.take(),
            )
        };
        if let Some(sub) = sub {
            sub.unsubscribe().await;
        }
        // 终止消费任务后，迟到的作者解析不可能再写入本会话
        if let Some(t) = feed_task {
            t.abort();
        }
        if let Some(t) = presence_task {
            t.abort();
        }
    }
}
