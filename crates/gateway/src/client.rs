use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    axum::extract::ws::Message,
    tokio::{sync::mpsc, task::AbortHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use tern_protocol::{
    Reply, SdkKind, TextPayload, WRITE_WAIT, compress,
    frames::kind,
    platform::{self, PlatformClass},
};

use crate::{
    context::ConnectParams, error::GatewayError, state::ClientEvent, transport::ConnSink,
};

/// One live session. Created on a successful upgrade, owned by the
/// connection registry until unregistered.
///
/// All writes go through the sink mutex, so bytes of concurrent frames
/// never interleave. `closed` transitions exactly once from false to true;
/// that transition closes the transport and enqueues the unregister event.
pub struct Client {
    pub conn_id: String,
    pub user_id: String,
    pub platform_id: i32,
    pub token: String,
    pub operation_id: String,
    pub sdk_kind: SdkKind,
    pub compression: bool,
    pub remote_addr: String,
    is_background: AtomicBool,
    closed: AtomicBool,
    sink: tokio::sync::Mutex<Box<dyn ConnSink>>,
    sub_user_ids: Mutex<HashSet<String>>,
    cancel: CancellationToken,
    heartbeat: Mutex<Option<AbortHandle>>,
    events: mpsc::Sender<ClientEvent>,
}

impl Client {
    pub fn new(
        params: &ConnectParams,
        conn_id: String,
        remote_addr: String,
        sink: Box<dyn ConnSink>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn_id,
            user_id: params.user_id.clone(),
            platform_id: params.platform_id,
            token: params.token.clone(),
            operation_id: params.operation_id.clone(),
            sdk_kind: params.sdk_kind,
            compression: params.compression,
            remote_addr,
            // A reconnecting background client starts as it declared itself.
            is_background: AtomicBool::new(params.is_background),
            closed: AtomicBool::new(false),
            sink: tokio::sync::Mutex::new(sink),
            sub_user_ids: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
            heartbeat: Mutex::new(None),
            events,
        })
    }

    pub fn platform_class(&self) -> PlatformClass {
        platform::class_of(self.platform_id)
    }

    pub fn is_background(&self) -> bool {
        self.is_background.load(Ordering::SeqCst)
    }

    pub fn set_background(&self, background: bool) {
        self.is_background.store(background, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves when `close()` has run; used by the read loop to exit
    /// promptly on kicks and logout.
    pub fn closed_signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_heartbeat(&self, handle: AbortHandle) {
        if let Ok(mut hb) = self.heartbeat.lock() {
            *hb = Some(handle);
        }
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Encode with the session codec (gzip if negotiated) and write.
    pub async fn write_reply(&self, reply: &Reply) -> Result<(), GatewayError> {
        let mut bytes = self.sdk_kind.encode(reply)?;
        if self.compression {
            bytes = compress::compress(&bytes)?;
        }
        self.write_message(Message::Binary(bytes.into())).await
    }

    pub async fn write_text(&self, payload: &TextPayload) -> Result<(), GatewayError> {
        let text = serde_json::to_string(payload).map_err(tern_protocol::ProtoError::from)?;
        self.write_message(Message::Text(text.into())).await
    }

    /// Raw text write for the handshake ack/error path.
    pub(crate) async fn write_raw_text(&self, text: String) -> Result<(), GatewayError> {
        self.write_message(Message::Text(text.into())).await
    }

    pub async fn write_ping(&self) -> Result<(), GatewayError> {
        self.write_message(Message::Ping(Vec::new().into())).await
    }

    pub async fn write_pong(&self, body: Vec<u8>) -> Result<(), GatewayError> {
        self.write_message(Message::Pong(body.into())).await
    }

    async fn write_message(&self, msg: Message) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::ConnClosed);
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(WRITE_WAIT, sink.send(msg)).await {
            Ok(res) => res,
            Err(_) => Err(GatewayError::WriteTimeout),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Apply a subscription delta to this client's local set.
    pub fn apply_sub_delta(&self, add: &[String], del: &[String]) {
        if let Ok(mut subs) = self.sub_user_ids.lock() {
            for id in del {
                subs.remove(id);
            }
            for id in add {
                subs.insert(id.clone());
            }
        }
    }

    pub fn sub_snapshot(&self) -> Vec<String> {
        self.sub_user_ids
            .lock()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Send a kick frame, then close. Used by the multi-terminal engine and
    /// the admin kick RPC.
    pub async fn kick(self: &Arc<Self>, operation_id: &str, reason: GatewayError) {
        let frame = Reply::push(kind::KICK_ONLINE, operation_id, Vec::new());
        if let Err(e) = self.write_reply(&frame).await {
            debug!(conn_id = %self.conn_id, error = %e, "kick frame not delivered");
        }
        self.close(reason).await;
    }

    /// Idempotent teardown: first caller wins, everyone else is a no-op.
    /// Closes the transport, stops the heartbeat and enqueues unregister.
    pub async fn close(self: &Arc<Self>, reason: GatewayError) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if reason.is_benign() {
            debug!(
                conn_id = %self.conn_id,
                user_id = %self.user_id,
                platform = platform::name(self.platform_id),
                operation_id = %self.operation_id,
                %reason,
                "connection closed"
            );
        } else {
            warn!(
                conn_id = %self.conn_id,
                user_id = %self.user_id,
                platform = platform::name(self.platform_id),
                operation_id = %self.operation_id,
                %reason,
                "connection failed"
            );
        }

        self.cancel.cancel();
        let heartbeat = self.heartbeat.lock().ok().and_then(|mut hb| hb.take());
        if let Some(hb) = heartbeat {
            hb.abort();
        }

        {
            let mut sink = self.sink.lock().await;
            let _ = tokio::time::timeout(WRITE_WAIT, sink.close()).await;
        }

        // Non-blocking enqueue: close() can run inside the event loop
        // itself (policy kicks), which must never wait on its own channel.
        match self.events.try_send(ClientEvent::Unregister(Arc::clone(self))) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(event)) => {
                let events = self.events.clone();
                let conn_id = self.conn_id.clone();
                tokio::spawn(async move {
                    if events.send(event).await.is_err() {
                        warn!(conn_id, "event loop gone, unregister dropped");
                    }
                });
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(conn_id = %self.conn_id, "event loop gone, unregister dropped");
            },
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("platform_id", &self.platform_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::RecordingSink;

    fn test_params(user: &str, platform: i32) -> ConnectParams {
        ConnectParams {
            user_id: user.into(),
            platform_id: platform,
            token: "tok".into(),
            operation_id: "op".into(),
            compression: false,
            sdk_kind: SdkKind::Web,
            is_background: false,
            is_msg_resp: false,
        }
    }

    fn test_client(sink: RecordingSink) -> (Arc<Client>, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let client = Client::new(
            &test_params("alice", 2),
            "conn-1".into(),
            "127.0.0.1:1".into(),
            Box::new(sink),
            tx,
        );
        (client, rx)
    }

    #[tokio::test]
    async fn close_is_idempotent_under_concurrency() {
        let sink = RecordingSink::default();
        let (client, mut rx) = test_client(sink.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&client);
            handles.push(tokio::spawn(
                async move { c.close(GatewayError::ConnClosed).await },
            ));
        }
        for h in handles {
            h.await.ok();
        }

        assert!(client.is_closed());
        assert!(sink.closed());
        // Exactly one unregister event.
        assert!(matches!(rx.recv().await, Some(ClientEvent::Unregister(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn writes_after_close_are_refused() {
        let (client, _rx) = test_client(RecordingSink::default());
        client.close(GatewayError::Logout).await;
        let reply = Reply::push(kind::PUSH_MSG, "op", vec![1]);
        assert!(matches!(
            client.write_reply(&reply).await,
            Err(GatewayError::ConnClosed)
        ));
    }

    #[tokio::test]
    async fn concurrent_writes_all_arrive_whole() {
        let sink = RecordingSink::default();
        let (client, _rx) = test_client(sink.clone());

        let mut handles = Vec::new();
        for i in 0..32 {
            let c = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                c.write_reply(&Reply::push(kind::PUSH_MSG, format!("op-{i}"), vec![i as u8]))
                    .await
            }));
        }
        for h in handles {
            h.await.ok().map(|r| r.ok());
        }

        let frames = sink.frames();
        assert_eq!(frames.len(), 32);
        // Every frame decodes on its own: no interleaved bytes.
        for frame in frames {
            let Message::Binary(bytes) = frame else {
                panic!("expected binary frame");
            };
            let reply: Reply = SdkKind::Web.decode(&bytes).unwrap();
            assert_eq!(reply.req_kind, kind::PUSH_MSG);
        }
    }

    #[tokio::test]
    async fn kick_writes_kick_frame_then_closes() {
        let sink = RecordingSink::default();
        let (client, mut rx) = test_client(sink.clone());
        client.kick("op-k", GatewayError::Kicked).await;

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        let Message::Binary(bytes) = &frames[0] else {
            panic!("expected binary kick frame");
        };
        let reply: Reply = SdkKind::Web.decode(bytes).unwrap();
        assert_eq!(reply.req_kind, kind::KICK_ONLINE);
        assert!(client.is_closed());
        assert!(matches!(rx.recv().await, Some(ClientEvent::Unregister(_))));
    }

    #[tokio::test]
    async fn background_flag_follows_handshake_then_updates() {
        let mut params = test_params("carol", 1);
        params.is_background = true;
        let (tx, _rx) = mpsc::channel(4);
        let client = Client::new(
            &params,
            "c".into(),
            "a".into(),
            Box::new(RecordingSink::default()),
            tx,
        );
        assert!(client.is_background());
        client.set_background(false);
        assert!(!client.is_background());
    }
}
