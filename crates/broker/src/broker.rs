//! `Broker`: the orchestrator (`spec.md` §4.2, component C7).
//!
//! Owns the per-app `ChannelStore`/`AliasMap` pairs, the adapter list, and
//! the connection registry; implements `subscribe` / `unsubscribe` /
//! `trigger` / `client_event` / `latest`. All state is hung off this one
//! value (`spec.md` §9 "Global mutable state ... all state is hung off a
//! single `Broker` value constructed at startup; tests instantiate a fresh
//! one").

use std::collections::HashMap;
use std::sync::Arc;

use pushi_adapters::Adapter;
use pushi_channels::RecentEvent;
use pushi_common::{
    model::{App, ChannelData, Envelope, MessageRecord, OutboundFrame},
    AppId, AppKey, BrokerError, ChannelKind, ChannelName, PushiConfig, Result, SocketId,
};
use pushi_repository::Repository;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_cache::AppCache;
use crate::app_state::AppRegistry;
use crate::connection::{ConnectionHandle, ConnectionRegistry, SendOutcome};

/// Built-in client→server events dispatched by name (`spec.md` §4.1, §9 —
/// "replace [duck-typed dispatch] with an explicit table ... set at broker
/// initialization; falls through to a default handler"). Any event not in
/// this table is a `client_event` candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinEvent {
    Subscribe,
    Unsubscribe,
    Latest,
}

fn builtin_dispatch_table() -> HashMap<&'static str, BuiltinEvent> {
    let mut table = HashMap::new();
    table.insert("pusher:subscribe", BuiltinEvent::Subscribe);
    table.insert("pusher:unsubscribe", BuiltinEvent::Unsubscribe);
    table.insert("pusher:latest", BuiltinEvent::Latest);
    table
}

/// Everything `trigger` needs beyond `(channel, event, data)`
/// (`spec.md` §4.2 `trigger`).
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    pub owner_id: Option<String>,
    pub persist: bool,
    pub echo: bool,
    /// When set with `owner_id`, the owner must currently be subscribed to
    /// the channel (`spec.md` §4.2 step 3).
    pub verify_owner: bool,
    /// Per-adapter payload overrides (`spec.md` §4.4 email
    /// `subject`/`body`). Never reaches the socket wire — only
    /// `Envelope::overrides` carries it to adapters.
    pub overrides: Option<pushi_common::model::AdapterOverrides>,
}

#[derive(Debug, Default)]
pub struct TriggerReport {
    pub delivered_sockets: usize,
    pub adapter_failures: Vec<(String, String)>,
    pub adapter_deliveries: usize,
}

pub struct Broker {
    config: PushiConfig,
    repository: Arc<dyn Repository>,
    adapters: Vec<Arc<dyn Adapter>>,
    apps: Arc<AppCache>,
    app_state: AppRegistry,
    connections: ConnectionRegistry,
    dispatch_table: HashMap<&'static str, BuiltinEvent>,
}

impl Broker {
    pub fn new(
        config: PushiConfig,
        repository: Arc<dyn Repository>,
        adapters: Vec<Arc<dyn Adapter>>,
        apps: Arc<AppCache>,
    ) -> Self {
        Self {
            config,
            repository,
            adapters,
            apps,
            app_state: AppRegistry::new(),
            connections: ConnectionRegistry::new(),
            dispatch_table: builtin_dispatch_table(),
        }
    }

    pub fn config(&self) -> &PushiConfig {
        &self.config
    }

    pub fn apps(&self) -> &Arc<AppCache> {
        &self.apps
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Looks up a registered adapter by its [`Adapter::name`], e.g. for the
    /// HTTP control plane's `/apps/vapid_key` endpoint which needs the Web
    /// Push adapter specifically (`spec.md` §4.6).
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    /// Loads every `App` and rebuilds every adapter's in-memory index
    /// (`spec.md` §4.8 "Repository read failures at startup abort
    /// startup"; §4.4 `load`).
    pub async fn start(&self) -> Result<()> {
        let apps = self.repository.load_apps().await.map_err(BrokerError::from)?;
        info!(count = apps.len(), "loaded apps from repository");
        for app in &apps {
            self.apps.insert(app.clone());
        }
        for app in &apps {
            for adapter in &self.adapters {
                let records = self
                    .repository
                    .list_subscriptions(app.id, adapter.name())
                    .await
                    .map_err(BrokerError::from)?;
                adapter.load(&records);
            }
            let personal = self
                .repository
                .list_personal_subscriptions(app.id)
                .await
                .map_err(BrokerError::from)?;
            if !personal.is_empty() {
                let state = self.app_state.state(app.id);
                let mut guard = state.write().expect("app state lock poisoned");
                for record in personal {
                    if let Some(user_id) = &record.user_id {
                        guard
                            .aliases
                            .add_alias(ChannelName::new(format!("personal-{user_id}")), record.event);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn app_by_key(&self, key: &AppKey) -> Option<App> {
        self.apps.get_by_key(key)
    }

    pub fn app_by_id(&self, app_id: AppId) -> Option<App> {
        self.apps.get(app_id)
    }

    pub fn list_apps(&self) -> Vec<App> {
        self.apps.all()
    }

    /// Creates a new tenant (`spec.md` §4.6 `POST /apps`): persists via the
    /// Repository, then admits it into the in-memory cache every other
    /// operation reads from.
    pub async fn create_app(&self, app: App) -> Result<()> {
        self.repository.create_app(app.clone()).await?;
        self.apps.insert(app);
        Ok(())
    }

    /// Applies a partial update (`spec.md` §4.6 `PUT /apps/{id}` — "update
    /// non-identity fields"). `id`, `key` and `secret` on `app` are ignored
    /// in favor of the existing record's.
    pub async fn update_app(&self, app_id: AppId, mut app: App) -> Result<App> {
        let existing = self
            .apps
            .get(app_id)
            .ok_or_else(|| BrokerError::NotFound("unknown app".into()))?;
        app.id = existing.id;
        app.key = existing.key;
        app.secret = existing.secret;
        self.repository.update_app(app.clone()).await?;
        self.apps.insert(app.clone());
        Ok(app)
    }

    // -- connection lifecycle -------------------------------------------------

    pub fn register_connection(&self, app_id: AppId, socket_id: SocketId) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(self.config.limits.outbound_queue_capacity);
        self.connections.register(socket_id, ConnectionHandle { app_id, sender: tx });
        rx
    }

    pub fn connection_count_for_app(&self, app_id: AppId) -> usize {
        self.connections.connection_count_for_app(app_id)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.total_connections()
    }

    /// Number of channels `socket_id` currently has joined, for the
    /// `pushi-ws` layer to enforce `max_channels_per_socket`
    /// (`spec.md` §4.1).
    pub fn channel_count_for_socket(&self, app_id: AppId, socket_id: SocketId) -> usize {
        let state = self.app_state.state(app_id);
        let guard = state.read().expect("app state lock poisoned");
        guard.store.channels_of(socket_id).len()
    }

    /// Number of sockets currently subscribed to `channel_name`, for
    /// `max_sockets_per_channel` enforcement.
    pub fn socket_count_for_channel(&self, app_id: AppId, channel_name: &str) -> usize {
        let Some(channel) = ChannelName::parse(channel_name) else {
            return 0;
        };
        let state = self.app_state.state(app_id);
        let guard = state.read().expect("app state lock poisoned");
        guard.store.sockets(&channel).len()
    }

    /// Delivers a frame directly to one socket, bypassing channel fan-out.
    /// Used by `pushi-ws` for the handshake's `pusher:connection_established`
    /// and for `pusher:error` emission (`spec.md` §4.1, §4.8).
    pub async fn send_frame(&self, socket_id: SocketId, frame: OutboundFrame) -> bool {
        self.send_and_enforce(socket_id, frame).await
    }

    /// Sends one frame to one connection, closing it when its outbound
    /// queue is full (`spec.md` §4.1 "exceeding the queue bound closes the
    /// connection" — enforced here rather than left to `pushi-ws`, since a
    /// full queue is only ever discovered mid-fan-out). Returns whether
    /// the frame actually reached the queue.
    async fn send_and_enforce(&self, socket_id: SocketId, frame: OutboundFrame) -> bool {
        match self.connections.send(socket_id, frame) {
            SendOutcome::Delivered => true,
            SendOutcome::SlowConsumer => {
                warn!(?socket_id, "slow consumer, closing connection");
                self.disconnect(socket_id).await;
                false
            }
            SendOutcome::Gone => false,
        }
    }

    /// Tears down every channel a connection had joined (`spec.md` §4.7 "On
    /// CLOSED, Broker synthesizes `unsubscribe` for every channel the
    /// connection had joined").
    pub async fn disconnect(&self, socket_id: SocketId) {
        let Some(handle) = self.connections.remove(socket_id) else {
            return;
        };
        let app = match self.apps.get(handle.app_id) {
            Some(app) => app,
            None => return,
        };
        let state = self.app_state.state(app.id);
        let outcomes = {
            let mut guard = state.write().expect("app state lock poisoned");
            guard.store.leave_all(socket_id)
        };
        for (channel, outcome) in outcomes {
            self.after_leave(&app, &channel, socket_id, outcome).await;
        }
        debug!(socket_id = %socket_id, app_id = %app.id, "connection disconnected");
    }

    // -- dispatch ---------------------------------------------------------------

    /// Routes one decoded client frame (`spec.md` §4.1 inbound dispatch).
    /// `channel` joined via `pusher:client-*` messages must already be
    /// established — enforcement of that lives in `client_event`.
    pub async fn dispatch(
        &self,
        app: &App,
        socket_id: SocketId,
        event: &str,
        mut data: serde_json::Value,
    ) -> Result<()> {
        match self.dispatch_table.get(event) {
            Some(BuiltinEvent::Subscribe) => {
                let channel = data
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BrokerError::Protocol("subscribe missing channel".into()))?
                    .to_string();
                let auth = data.get("auth").and_then(|v| v.as_str()).map(str::to_string);
                let channel_data = data
                    .get_mut("channel_data")
                    .map(|v| v.take())
                    .and_then(|v| serde_json::from_value::<ChannelData>(v).ok());
                self.subscribe(app, socket_id, &channel, auth.as_deref(), channel_data, false)
                    .await
            }
            Some(BuiltinEvent::Unsubscribe) => {
                let channel = data
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BrokerError::Protocol("unsubscribe missing channel".into()))?
                    .to_string();
                self.unsubscribe(app.id, socket_id, &channel).await
            }
            Some(BuiltinEvent::Latest) => {
                let channel = data
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BrokerError::Protocol("latest missing channel".into()))?
                    .to_string();
                let skip = data.get("skip").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let count = data.get("count").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
                self.latest(app.id, socket_id, &channel, skip, count).await
            }
            None => {
                let channel = data
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BrokerError::Protocol("client event missing channel".into()))?
                    .to_string();
                let payload = data.get("data").cloned().unwrap_or(serde_json::Value::Null);
                self.client_event(app, socket_id, event, &channel, payload, true).await
            }
        }
    }

    // -- subscribe / unsubscribe --------------------------------------------

    /// `spec.md` §4.2 `subscribe`.
    pub async fn subscribe(
        &self,
        app: &App,
        socket_id: SocketId,
        channel_name: &str,
        auth: Option<&str>,
        channel_data: Option<ChannelData>,
        force: bool,
    ) -> Result<()> {
        let channel = ChannelName::parse(channel_name)
            .ok_or_else(|| BrokerError::Protocol(format!("invalid channel name: {channel_name}")))?;

        // Step 1: personal channels expand via AliasMap and recurse.
        if channel.kind() == ChannelKind::Personal {
            let state = self.app_state.state(app.id);
            let aliases = {
                let guard = state.read().expect("app state lock poisoned");
                guard.aliases.get(&channel).to_vec()
            };
            for alias in aliases {
                Box::pin(self.subscribe(app, socket_id, &alias, None, None, true)).await?;
            }
            return Ok(());
        }

        // Step 2: auth for private/presence/peer channels, unless forced.
        if channel.kind().requires_auth() && !force {
            let token = auth.ok_or_else(|| BrokerError::Auth("missing auth token".into()))?;
            if !pushi_auth::verify_channel_auth(&app.secret, &app.key, socket_id, channel.as_str(), token) {
                return Err(BrokerError::Auth("invalid channel signature".into()));
            }
        }

        // Step 3: discard channel_data unless this is a presence channel.
        let channel_data = if channel.kind().carries_presence_data() {
            channel_data
        } else {
            None
        };

        let state = self.app_state.state(app.id);
        let (outcome, peer_wiring) = {
            let mut guard = state.write().expect("app state lock poisoned");
            let outcome = guard
                .store
                .join(socket_id, &channel, channel_data.clone())
                .map_err(|e| BrokerError::Protocol(e.to_string()))?;

            // Step 7: peer auto-wiring, computed under the lock, executed
            // after it is released (recursive `subscribe` calls need it).
            let mut peer_wiring = Vec::new();
            if channel.kind() == ChannelKind::Presence {
                let wants_peer = channel_data
                    .as_ref()
                    .and_then(|d| d.get("peer"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if wants_peer {
                    if let Some(user_id) = &outcome.user_id {
                        for other in guard.store.other_user_ids(&channel, user_id) {
                            let peer_channel = ChannelName::peer_channel(&channel, user_id, &other);
                            let other_sockets = guard.store.sockets_for_user(&channel, &other);
                            peer_wiring.push((peer_channel, other_sockets));
                        }
                    }
                }
            }
            (outcome, peer_wiring)
        };

        // Step 6: member_added broadcast, only on first connection for a user.
        if outcome.is_new_member {
            if let Some(user_id) = &outcome.user_id {
                let member_data = {
                    let guard = state.read().expect("app state lock poisoned");
                    guard.store.members(&channel).get(user_id).cloned()
                };
                if let Some(member_data) = member_data {
                    let frame = OutboundFrame::with_json(
                        "pusher_internal:member_added",
                        Some(channel.as_str().to_string()),
                        &member_data,
                    )
                    .map_err(|e| BrokerError::Protocol(e.to_string()))?;
                    self.broadcast_to_others(app.id, &channel, socket_id, frame).await;
                }
            }
        }

        // Step 7 (continued): wire both ends of every new peer channel.
        for (peer_channel, other_sockets) in peer_wiring {
            Box::pin(self.subscribe(app, socket_id, peer_channel.as_str(), None, None, true)).await?;
            for other_socket in other_sockets {
                Box::pin(self.subscribe(app, other_socket, peer_channel.as_str(), None, None, true)).await?;
            }
        }

        // Step 8: reply to the subscribing socket with a snapshot.
        let snapshot_json = {
            let guard = state.read().expect("app state lock poisoned");
            let snapshot = guard.store.snapshot(&channel);
            serde_json::json!({
                "name": snapshot.name,
                "members": snapshot.members,
                "alias": guard.aliases.aliases_of(channel.as_str()),
                "recent_events": snapshot
                    .recent_events
                    .iter()
                    .map(|e| serde_json::json!({ "event": e.event, "data": e.data }))
                    .collect::<Vec<_>>(),
            })
        };
        let frame = OutboundFrame::with_json(
            "pusher_internal:subscription_succeeded",
            Some(channel.as_str().to_string()),
            &snapshot_json,
        )
        .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        self.send_and_enforce(socket_id, frame).await;
        Ok(())
    }

    /// `spec.md` §4.2 `unsubscribe`.
    pub async fn unsubscribe(&self, app_id: AppId, socket_id: SocketId, channel_name: &str) -> Result<()> {
        let channel = ChannelName::parse(channel_name)
            .ok_or_else(|| BrokerError::Protocol(format!("invalid channel name: {channel_name}")))?;
        let app = self
            .apps
            .get(app_id)
            .ok_or_else(|| BrokerError::NotFound("unknown app".into()))?;
        let state = self.app_state.state(app_id);
        let outcome = {
            let mut guard = state.write().expect("app state lock poisoned");
            guard.store.leave(socket_id, &channel)
        };
        if outcome.left {
            self.after_leave(&app, &channel, socket_id, outcome).await;
            let frame = OutboundFrame::new(
                "pusher_internal:unsubscription_succeeded",
                Some(channel.as_str().to_string()),
                "{}",
            );
            self.send_and_enforce(socket_id, frame).await;
        }
        Ok(())
    }

    /// Shared tail of `unsubscribe`/`disconnect`/`leave_all`: broadcast
    /// `member_removed` on last departure and tear down paired peer
    /// channels (`spec.md` §4.2 `unsubscribe`, Presence state machine §4.7).
    async fn after_leave(
        &self,
        app: &App,
        channel: &ChannelName,
        socket_id: SocketId,
        outcome: pushi_channels::LeaveOutcome,
    ) {
        let Some(user_id) = &outcome.user_id else {
            return;
        };
        if !outcome.was_last_member {
            return;
        }
        if channel.kind() != ChannelKind::Presence {
            return;
        }
        let frame = match OutboundFrame::with_json(
            "pusher_internal:member_removed",
            Some(channel.as_str().to_string()),
            &serde_json::json!({ "user_id": user_id }),
        ) {
            Ok(f) => f,
            Err(_) => return,
        };
        self.broadcast_to_others(app.id, channel, socket_id, frame).await;

        // Tear down every peer channel this user held against another
        // member of this presence channel.
        let state = self.app_state.state(app.id);
        let other_users = {
            let guard = state.read().expect("app state lock poisoned");
            guard.store.other_user_ids(channel, user_id)
        };
        for other in other_users {
            let peer_channel = ChannelName::peer_channel(channel, user_id, &other);
            let peer_sockets = {
                let guard = state.read().expect("app state lock poisoned");
                guard.store.sockets(&peer_channel)
            };
            for peer_socket in peer_sockets {
                let _ = Box::pin(self.unsubscribe(app.id, peer_socket, peer_channel.as_str())).await;
            }
        }
    }

    /// Sends `frame` to every socket currently in `channel` except
    /// `excluding`.
    async fn broadcast_to_others(
        &self,
        app_id: AppId,
        channel: &ChannelName,
        excluding: SocketId,
        frame: OutboundFrame,
    ) {
        let state = self.app_state.state(app_id);
        let sockets = {
            let guard = state.read().expect("app state lock poisoned");
            guard.store.sockets(channel)
        };
        for socket in sockets {
            if socket == excluding {
                continue;
            }
            self.send_and_enforce(socket, frame.clone()).await;
        }
    }

    // -- client events --------------------------------------------------------

    /// App-defined client→client events (`spec.md` §4.1 "any other →
    /// Broker.clientEvent"). Per `spec.md` §9 open question, `verify`
    /// defaults to `true`: the sender must currently be joined to the
    /// channel.
    pub async fn client_event(
        &self,
        app: &App,
        socket_id: SocketId,
        event: &str,
        channel_name: &str,
        data: serde_json::Value,
        verify: bool,
    ) -> Result<()> {
        let channel = ChannelName::parse(channel_name)
            .ok_or_else(|| BrokerError::Protocol(format!("invalid channel name: {channel_name}")))?;
        let state = self.app_state.state(app.id);
        if verify {
            let joined = {
                let guard = state.read().expect("app state lock poisoned");
                guard.store.is_subscribed(socket_id, &channel)
            };
            if !joined {
                return Err(BrokerError::Auth(format!(
                    "socket is not subscribed to {channel_name}"
                )));
            }
        }
        let data_str = if let Some(s) = data.as_str() {
            s.to_string()
        } else {
            serde_json::to_string(&data).map_err(|e| BrokerError::Protocol(e.to_string()))?
        };
        let frame = OutboundFrame::new(event.to_string(), Some(channel.as_str().to_string()), data_str);
        self.broadcast_to_others(app.id, &channel, socket_id, frame).await;
        Ok(())
    }

    /// `pusher:latest` — bounded history fetch (`spec.md` §4.1, §4.2
    /// "Recent events").
    pub async fn latest(
        &self,
        app_id: AppId,
        socket_id: SocketId,
        channel_name: &str,
        skip: usize,
        count: usize,
    ) -> Result<()> {
        let channel = ChannelName::parse(channel_name)
            .ok_or_else(|| BrokerError::Protocol(format!("invalid channel name: {channel_name}")))?;
        let state = self.app_state.state(app_id);
        let events = {
            let guard = state.read().expect("app state lock poisoned");
            guard.store.recent_events(&channel, skip, count)
        };
        let payload: Vec<_> = events
            .iter()
            .map(|e| serde_json::json!({ "event": e.event, "data": e.data }))
            .collect();
        let frame = OutboundFrame::with_json(
            "pusher_internal:latest",
            Some(channel.as_str().to_string()),
            &payload,
        )
        .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        self.send_and_enforce(socket_id, frame).await;
        Ok(())
    }

    // -- publish ---------------------------------------------------------------

    /// `spec.md` §4.2 `trigger`, run once per channel in `channels`.
    pub async fn trigger(
        &self,
        app: &App,
        event: &str,
        data: serde_json::Value,
        channels: &[String],
        options: TriggerOptions,
    ) -> Result<TriggerReport> {
        let mut report = TriggerReport::default();
        for channel_name in channels {
            self.trigger_one(app, event, &data, channel_name, &options, &mut report)
                .await?;
        }
        Ok(report)
    }

    async fn trigger_one(
        &self,
        app: &App,
        event: &str,
        data: &serde_json::Value,
        channel_name: &str,
        options: &TriggerOptions,
        report: &mut TriggerReport,
    ) -> Result<()> {
        let channel = ChannelName::parse(channel_name)
            .ok_or_else(|| BrokerError::Protocol(format!("invalid channel name: {channel_name}")))?;

        // Step 1: normalize payload to a JSON string.
        let data_str = match data.as_str() {
            Some(s) => s.to_string(),
            None => serde_json::to_string(data).map_err(|e| BrokerError::Protocol(e.to_string()))?,
        };

        // Step 3: verify the owner is actually subscribed.
        if let Some(owner_id) = &options.owner_id {
            if options.verify_owner {
                let state = self.app_state.state(app.id);
                let subscribed = {
                    let guard = state.read().expect("app state lock poisoned");
                    guard
                        .store
                        .sockets_for_user(&channel, owner_id)
                        .into_iter()
                        .any(|s| guard.store.is_subscribed(s, &channel))
                };
                if !subscribed {
                    return Err(BrokerError::Auth(format!(
                        "owner {owner_id} is not subscribed to {channel_name}"
                    )));
                }
            }
        }

        let mid = Uuid::new_v4();

        // Step 2: persist, best-effort.
        if options.persist {
            let record = MessageRecord {
                mid,
                app_id: app.id,
                channel: channel.as_str().to_string(),
                owner_id: options.owner_id.clone(),
                timestamp: chrono::Utc::now(),
                data: data_str.clone(),
            };
            if let Err(e) = self.repository.append_event(record).await {
                warn!(channel = channel_name, error = %e, "failed to persist event; continuing with live delivery");
            } else {
                let state = self.app_state.state(app.id);
                let user_ids = {
                    let mut guard = state.write().expect("app state lock poisoned");
                    guard.store.record_event(
                        &channel,
                        RecentEvent {
                            event: event.to_string(),
                            data: data_str.clone(),
                        },
                    );

                    // Per-subscriber assoc rows for personal-channel history
                    // reconstruction (`spec.md` §4.2 step 2): every
                    // personal-channel alias of this channel, plus every
                    // presence member when the channel itself carries
                    // presence data.
                    let mut ids: Vec<String> = guard
                        .aliases
                        .aliases_of(channel.as_str())
                        .iter()
                        .filter_map(|alias| ChannelName::new(alias.as_str()).personal_user_id().map(str::to_string))
                        .collect();
                    if channel.kind() == ChannelKind::Presence {
                        ids.extend(guard.store.members(&channel).into_keys());
                    }
                    ids.sort();
                    ids.dedup();
                    ids
                };
                for user_id in user_ids {
                    if let Err(e) = self.repository.append_assoc(app.id, mid, &user_id).await {
                        warn!(channel = channel_name, user_id, error = %e, "failed to persist assoc row; continuing");
                    }
                }
            }
        }

        // Step 4: fan out to subscribed sockets, skipping the owner unless
        // `echo` is set.
        let state = self.app_state.state(app.id);
        let sockets = {
            let guard = state.read().expect("app state lock poisoned");
            guard.store.sockets(&channel)
        };
        let owner_sockets: Vec<SocketId> = match (&options.owner_id, options.echo) {
            (Some(owner_id), false) => {
                let guard = state.read().expect("app state lock poisoned");
                guard.store.sockets_for_user(&channel, owner_id)
            }
            _ => Vec::new(),
        };
        let frame = OutboundFrame::new(event.to_string(), Some(channel.as_str().to_string()), data_str.clone());
        for socket in sockets {
            if owner_sockets.contains(&socket) {
                continue;
            }
            if self.send_and_enforce(socket, frame.clone()).await {
                report.delivered_sockets += 1;
            }
        }

        // Step 5: fan out to adapters, each inside its own failure
        // boundary (`spec.md` §4.8 "AdapterError ... logged; never
        // surfaced").
        let envelope = Envelope {
            channel: channel.as_str().to_string(),
            event: event.to_string(),
            data: data_str,
            overrides: options.overrides.clone(),
        };
        let state = self.app_state.state(app.id);
        let aliased: Vec<String> = {
            let guard = state.read().expect("app state lock poisoned");
            let mut aliased = vec![channel.as_str().to_string()];
            aliased.extend(guard.aliases.get(&channel).iter().cloned());
            aliased
        };
        for adapter in &self.adapters {
            match adapter.send(app.id, &aliased, &envelope).await {
                Ok(send_report) => {
                    report.adapter_deliveries += send_report.delivered.len();
                    for (target, reason) in send_report.failed {
                        warn!(adapter = adapter.name(), target, reason, "adapter delivery failed");
                        report.adapter_failures.push((adapter.name().to_string(), reason));
                    }
                }
                Err(e) => {
                    warn!(adapter = adapter.name(), error = %e, "adapter send errored");
                    report.adapter_failures.push((adapter.name().to_string(), e.to_string()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushi_common::AppKey;
    use pushi_repository::memory::InMemoryRepository;

    fn sample_app() -> App {
        App {
            id: AppId::new(),
            key: AppKey::generate(),
            secret: "s3cr3t".into(),
            name: "test".into(),
            apn: None,
            vapid: None,
            smtp_url: None,
            created_at: chrono::Utc::now(),
        }
    }

    async fn fresh_broker(app: &App) -> Broker {
        let repo = InMemoryRepository::new();
        repo.seed_app(app.clone());
        let broker = Broker::new(
            PushiConfig::default(),
            Arc::new(repo),
            Vec::new(),
            AppCache::new(),
        );
        broker.start().await.unwrap();
        broker
    }

    #[tokio::test]
    async fn subscribe_to_public_channel_replies_with_success() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let socket = SocketId::new();
        let mut rx = broker.register_connection(app.id, socket);

        broker
            .subscribe(&app, socket, "news", None, None, false)
            .await
            .unwrap();

        let frame = rx.try_recv().expect("expected subscription_succeeded frame");
        assert_eq!(frame.event, "pusher_internal:subscription_succeeded");
        assert_eq!(frame.channel.as_deref(), Some("news"));
    }

    #[tokio::test]
    async fn subscribe_to_private_channel_without_auth_fails() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let socket = SocketId::new();
        let _rx = broker.register_connection(app.id, socket);

        let err = broker
            .subscribe(&app, socket, "private-room", None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Auth(_)));
    }

    #[tokio::test]
    async fn subscribe_to_private_channel_with_valid_auth_succeeds() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let socket = SocketId::new();
        let mut rx = broker.register_connection(app.id, socket);
        let token = pushi_auth::auth_token(&app.secret, &app.key, socket, "private-room");

        broker
            .subscribe(&app, socket, "private-room", Some(&token), None, false)
            .await
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "pusher_internal:subscription_succeeded");
    }

    #[tokio::test]
    async fn presence_join_broadcasts_member_added_to_others_only() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let channel = ChannelName::new("presence-chat");

        let s1 = SocketId::new();
        let mut rx1 = broker.register_connection(app.id, s1);
        let token1 = pushi_auth::auth_token(&app.secret, &app.key, s1, channel.as_str());
        let mut data1 = ChannelData::new();
        data1.insert("user_id".into(), serde_json::json!("u1"));
        broker
            .subscribe(&app, s1, channel.as_str(), Some(&token1), Some(data1), false)
            .await
            .unwrap();
        let _ = rx1.try_recv().unwrap(); // subscription_succeeded for s1

        let s2 = SocketId::new();
        let mut rx2 = broker.register_connection(app.id, s2);
        let token2 = pushi_auth::auth_token(&app.secret, &app.key, s2, channel.as_str());
        let mut data2 = ChannelData::new();
        data2.insert("user_id".into(), serde_json::json!("u2"));
        broker
            .subscribe(&app, s2, channel.as_str(), Some(&token2), Some(data2), false)
            .await
            .unwrap();

        // s1 sees a member_added for u2; s2 does not see one for itself.
        let member_added = rx1.try_recv().expect("s1 should see member_added for u2");
        assert_eq!(member_added.event, "pusher_internal:member_added");
        let s2_next = rx2.try_recv().expect("s2 should only have its own subscription_succeeded");
        assert_eq!(s2_next.event, "pusher_internal:subscription_succeeded");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn trigger_delivers_to_every_subscribed_socket_except_owner() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let channel_name = "news".to_string();

        let owner = SocketId::new();
        let mut owner_rx = broker.register_connection(app.id, owner);
        broker
            .subscribe(&app, owner, &channel_name, None, None, false)
            .await
            .unwrap();
        owner_rx.try_recv().unwrap();

        let other = SocketId::new();
        let mut other_rx = broker.register_connection(app.id, other);
        broker
            .subscribe(&app, other, &channel_name, None, None, false)
            .await
            .unwrap();
        other_rx.try_recv().unwrap();

        let report = broker
            .trigger(
                &app,
                "tick",
                serde_json::json!({"n": 1}),
                &[channel_name],
                TriggerOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.delivered_sockets, 2);
        assert!(other_rx.try_recv().is_ok());
        assert!(owner_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_from_presence_channel_broadcasts_member_removed() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let channel = ChannelName::new("presence-chat");

        let s1 = SocketId::new();
        let mut rx1 = broker.register_connection(app.id, s1);
        let token1 = pushi_auth::auth_token(&app.secret, &app.key, s1, channel.as_str());
        let mut data1 = ChannelData::new();
        data1.insert("user_id".into(), serde_json::json!("u1"));
        broker
            .subscribe(&app, s1, channel.as_str(), Some(&token1), Some(data1), false)
            .await
            .unwrap();
        rx1.try_recv().unwrap();

        let s2 = SocketId::new();
        let mut rx2 = broker.register_connection(app.id, s2);
        let token2 = pushi_auth::auth_token(&app.secret, &app.key, s2, channel.as_str());
        let mut data2 = ChannelData::new();
        data2.insert("user_id".into(), serde_json::json!("u2"));
        broker
            .subscribe(&app, s2, channel.as_str(), Some(&token2), Some(data2), false)
            .await
            .unwrap();
        rx2.try_recv().unwrap();
        rx1.try_recv().unwrap(); // member_added for u2

        broker.unsubscribe(app.id, s2, channel.as_str()).await.unwrap();

        let removed = rx1.try_recv().expect("s1 should see member_removed for u2");
        assert_eq!(removed.event, "pusher_internal:member_removed");
    }

    #[tokio::test]
    async fn disconnect_tears_down_every_joined_channel() {
        let app = sample_app();
        let broker = fresh_broker(&app).await;
        let socket = SocketId::new();
        let mut rx = broker.register_connection(app.id, socket);
        broker
            .subscribe(&app, socket, "news", None, None, false)
            .await
            .unwrap();
        rx.try_recv().unwrap();

        assert_eq!(broker.total_connections(), 1);
        broker.disconnect(socket).await;
        assert_eq!(broker.total_connections(), 0);
    }
}
