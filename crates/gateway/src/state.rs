use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {
    tokio::sync::mpsc,
    tracing::{debug, warn},
};

use {
    tern_config::TernConfig,
    tern_protocol::{frames::kind, platform},
    tern_rpc::{BackendServices, types::OnlineStatusChange},
};

use crate::{
    api::{self, PushJob},
    client::Client,
    error::GatewayError,
    multi_terminal, peers,
    presence::PresenceEngine,
    subscription::SubscriptionIndex,
    usermap::UserMap,
    webhook::WebhookEmitter,
};

/// Registry mutations are serialized through one consumer task, which is
/// the ordering point for the multi-terminal policy against concurrent
/// connects of the same user.
pub enum ClientEvent {
    Register(Arc<Client>),
    Unregister(Arc<Client>),
    /// Cross-node check-in from a sibling gateway.
    KickCheck {
        user_id: String,
        platform_id: i32,
        token: String,
        operation_id: String,
    },
}

/// Shared gateway runtime state, wrapped in `Arc` for use across tasks.
pub struct GatewayState {
    pub config: TernConfig,
    pub services: BackendServices,
    pub registry: Arc<UserMap>,
    pub subs: SubscriptionIndex,
    pub webhooks: Arc<WebhookEmitter>,
    pub version: String,
    pub hostname: String,
    online_count: AtomicUsize,
    events_tx: mpsc::Sender<ClientEvent>,
    push_jobs: mpsc::Sender<PushJob>,
    pub(crate) peer_client: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: TernConfig, services: BackendServices) -> Arc<Self> {
        let (registry, presence_rx) = UserMap::new(config.presence.event_buffer);
        let registry = Arc::new(registry);
        let webhooks = Arc::new(WebhookEmitter::new(config.webhooks.clone()));
        let (events_tx, events_rx) = mpsc::channel(1024);
        let push_jobs = api::spawn_push_pool(&config.push, Arc::clone(&registry));

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        let state = Arc::new(Self {
            registry: Arc::clone(&registry),
            subs: SubscriptionIndex::new(),
            webhooks: Arc::clone(&webhooks),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            online_count: AtomicUsize::new(0),
            events_tx,
            push_jobs,
            peer_client: reqwest::Client::builder().build().unwrap_or_default(),
            services,
            config,
        });

        // Presence pipeline: registry events fan out to subscribers, then
        // feed the batching engine.
        let (engine_tx, engine_rx) = mpsc::channel(state.config.presence.event_buffer.max(1));
        PresenceEngine::spawn(
            &state.config.presence,
            state.config.renewal_interval(),
            registry,
            Arc::clone(&state.services.user),
            webhooks,
            engine_rx,
        );
        tokio::spawn(run_presence_pipeline(
            Arc::clone(&state),
            presence_rx,
            engine_tx,
        ));
        tokio::spawn(run_client_events(Arc::clone(&state), events_rx));

        state
    }

    pub fn online_count(&self) -> usize {
        self.online_count.load(Ordering::SeqCst)
    }

    pub(crate) fn conn_opened(&self) {
        self.online_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn events_sender(&self) -> mpsc::Sender<ClientEvent> {
        self.events_tx.clone()
    }

    pub(crate) fn push_jobs(&self) -> &mpsc::Sender<PushJob> {
        &self.push_jobs
    }

    /// Hand a new session to the serializer task.
    pub async fn register(&self, client: Arc<Client>) {
        if self
            .events_tx
            .send(ClientEvent::Register(client))
            .await
            .is_err()
        {
            warn!("event loop gone, register dropped");
        }
    }

    /// Enqueue a sibling node's login check-in.
    pub async fn kick_check(
        &self,
        user_id: String,
        platform_id: i32,
        token: String,
        operation_id: String,
    ) {
        if self
            .events_tx
            .send(ClientEvent::KickCheck {
                user_id,
                platform_id,
                token,
                operation_id,
            })
            .await
            .is_err()
        {
            warn!("event loop gone, kick check dropped");
        }
    }

    /// Close every live session. Called once on graceful shutdown.
    pub async fn shutdown(&self) {
        let clients = self.registry.all_clients();
        debug!(clients = clients.len(), "closing all sessions");
        for client in clients {
            client.close(GatewayError::Shutdown).await;
        }
    }
}

/// Single consumer of register/unregister/kick events.
async fn run_client_events(state: Arc<GatewayState>, mut rx: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ClientEvent::Register(client) => {
                multi_terminal::enforce(
                    state.config.multi_terminal.policy,
                    &state.registry,
                    &state.services.auth,
                    &state.webhooks,
                    &client.user_id,
                    client.platform_id,
                    &client.token,
                    &client.operation_id,
                )
                .await;
                state.registry.insert(Arc::clone(&client));
                debug!(
                    conn_id = %client.conn_id,
                    user_id = %client.user_id,
                    platform = platform::name(client.platform_id),
                    "session registered"
                );
                peers::notify_siblings(
                    Arc::clone(&state),
                    client.user_id.clone(),
                    client.platform_id,
                    client.token.clone(),
                    client.operation_id.clone(),
                );
            },
            ClientEvent::Unregister(client) => {
                state
                    .registry
                    .remove_clients(&client.user_id, &[Arc::clone(&client)]);
                state.subs.del_client(&client);
                state.online_count.fetch_sub(1, Ordering::SeqCst);
            },
            ClientEvent::KickCheck {
                user_id,
                platform_id,
                token,
                operation_id,
            } => {
                multi_terminal::enforce_remote(
                    state.config.multi_terminal.policy,
                    &state.registry,
                    &state.services.auth,
                    &state.webhooks,
                    &user_id,
                    platform_id,
                    &token,
                    &operation_id,
                )
                .await;
            },
        }
    }
}

/// Forward registry presence events to the batching engine, fanning each
/// one out to the user's presence subscribers on the way.
async fn run_presence_pipeline(
    state: Arc<GatewayState>,
    mut rx: mpsc::Receiver<OnlineStatusChange>,
    engine_tx: mpsc::Sender<OnlineStatusChange>,
) {
    while let Some(change) = rx.recv().await {
        let subscribers = state.subs.get_subscribers(&change.user_id);
        if !subscribers.is_empty() {
            // Writes carry their own deadline; run them off the pipeline so
            // one stuck subscriber cannot stall presence batching.
            let tip = change.clone();
            tokio::spawn(async move {
                push_online_tip(subscribers, tip).await;
            });
        }
        if engine_tx.try_send(change).is_err() {
            warn!("presence engine backlogged, event dropped; renewal sweep will reconverge");
        }
    }
}

/// Write one user's new platform set to every subscriber. The payload is
/// serialized once per codec; per-subscriber failures are logged and do
/// not abort the fan-out.
async fn push_online_tip(subscribers: Vec<Arc<Client>>, change: OnlineStatusChange) {
    use {
        tern_protocol::{Reply, SdkKind},
        tern_rpc::types::UserOnlinePlatforms,
    };

    let payload = UserOnlinePlatforms {
        user_id: change.user_id.clone(),
        online_platform_ids: change.online_platform_ids.clone(),
    };
    let mut encoded: [Option<Vec<u8>>; 2] = [None, None];

    for client in subscribers {
        let slot = match client.sdk_kind {
            SdkKind::Native => 0,
            SdkKind::Web => 1,
        };
        if encoded[slot].is_none() {
            match client.sdk_kind.encode(&payload) {
                Ok(bytes) => encoded[slot] = Some(bytes),
                Err(e) => {
                    warn!(error = %e, "online tip encode failed");
                    continue;
                },
            }
        }
        let Some(data) = encoded[slot].clone() else {
            continue;
        };
        let frame = Reply::push(kind::SUBSCRIBE_ONLINE_STATUS, "", data);
        if let Err(e) = client.write_reply(&frame).await {
            warn!(
                conn_id = %client.conn_id,
                subscribed = %change.user_id,
                error = %e,
                "online tip write failed"
            );
        }
    }
}
