//! End-to-end tests: a real listener, real WebSocket clients, mock
//! backends.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio::net::TcpStream,
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    tern_config::TernConfig,
    tern_gateway::{GatewayState, build_gateway_app},
    tern_protocol::{Reply, Req, SdkKind, frames::kind, platform},
    tern_rpc::{
        AuthService,
        BackendServices,
        mock::{MockAuthService, NoopPushService, RecordingUserService},
        types::*,
    },
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    auth: Arc<MockAuthService>,
    user: Arc<RecordingUserService>,
    push: Arc<NoopPushService>,
}

async fn start(config: TernConfig) -> Harness {
    let auth = Arc::new(MockAuthService::default());
    let user = Arc::new(RecordingUserService::default());
    let push = Arc::new(NoopPushService::default());
    let services = BackendServices::noop()
        .with_auth(auth.clone())
        .with_user(user.clone())
        .with_push(push.clone());
    let state = GatewayState::new(config, services);

    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Harness {
        addr,
        state,
        auth,
        user,
        push,
    }
}

impl Harness {
    fn url(&self, user: &str, platform: i32, token: &str) -> String {
        format!(
            "ws://{}/?sendID={user}&platformID={platform}&token={token}&sdkType=js&operationID=op-{user}",
            self.addr
        )
    }

    /// Grant a token and open a connection, waiting until it is registered.
    async fn connect(&self, user: &str, platform: i32, token: &str) -> WsClient {
        self.auth.grant(token, user, platform);
        let (socket, _) = connect_async(self.url(user, platform, token)).await.unwrap();
        wait_until(|| {
            self.state
                .registry
                .get(user, platform)
                .0
                .iter()
                .any(|c| c.token == token)
        })
        .await;
        socket
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}

fn encode_req(req: &Req) -> Message {
    Message::Binary(SdkKind::Web.encode(req).unwrap().into())
}

/// Read frames until a business (binary) one arrives, answering nothing.
async fn recv_reply(socket: &mut WsClient) -> Reply {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("transport error");
        match frame {
            Message::Binary(bytes) => return SdkKind::Web.decode(&bytes).unwrap(),
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Like `recv_reply` but expects the connection to end instead.
async fn recv_close(socket: &mut WsClient) {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("timed out waiting for close")
        {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_connect_send_disconnect() {
    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("alice", 2, "tokA").await;

    // Business request: send one message.
    let inner = SendMsgReq {
        recv_id: "bob".into(),
        content_type: 101,
        content: b"hello".to_vec(),
        client_msg_id: "m-1".into(),
        ..Default::default()
    };
    let req = Req {
        req_kind: kind::SEND_MSG,
        msg_incr: "41".into(),
        operation_id: "op-alice".into(),
        send_id: "alice".into(),
        token: "tokA".into(),
        data: SdkKind::Web.encode(&inner).unwrap(),
    };
    socket.send(encode_req(&req)).await.unwrap();

    let reply = recv_reply(&mut socket).await;
    assert_eq!(reply.req_kind, kind::SEND_MSG);
    assert_eq!(reply.msg_incr, "41");
    assert_eq!(reply.err_code, 0);
    let resp: SendMsgResp = SdkKind::Web.decode(&reply.data).unwrap();
    assert_eq!(resp.client_msg_id, "m-1");

    // Presence: the user service learns alice is online within the flush
    // window.
    wait_until(|| {
        h.user
            .changes()
            .iter()
            .any(|c| c.user_id == "alice" && c.online_platform_ids == vec![2])
    })
    .await;

    // Disconnect: registry drains and the offline transition is reported.
    socket.close(None).await.unwrap();
    wait_until(|| h.state.registry.get_all("alice").is_empty()).await;
    wait_until(|| {
        h.user
            .changes()
            .iter()
            .any(|c| c.user_id == "alice" && c.offline_platform_ids == vec![2])
    })
    .await;
}

#[tokio::test]
async fn same_device_kick_preserves_new_token() {
    let h = start(TernConfig::default()).await;

    let mut session_a = h.connect("bob", 1, "tokA").await;
    let _session_b = h.connect("bob", 1, "tokB").await;

    // A gets the kick frame, then the connection ends.
    let reply = recv_reply(&mut session_a).await;
    assert_eq!(reply.req_kind, kind::KICK_ONLINE);
    recv_close(&mut session_a).await;

    // B survives as the only session, with its token intact.
    wait_until(|| {
        let (clients, _, _) = h.state.registry.get("bob", 1);
        clients.len() == 1 && clients[0].token == "tokB"
    })
    .await;
    wait_until(|| !h.auth.invalidations().is_empty()).await;
    let calls = h.auth.invalidations();
    assert_eq!(calls[0].preserve_token, "tokB");
    assert!(h.auth.parse_token("tokB", "op").await.is_ok());
    assert!(h.auth.parse_token("tokA", "op").await.is_err());
}

#[tokio::test]
async fn subscriber_sees_new_login() {
    let h = start(TernConfig::default()).await;
    let mut watcher = h.connect("x", platform::WEB, "tokX").await;

    // Subscribe to alice (offline so far).
    let inner = SubscribeOnlineStatusReq {
        subscribe_user_ids: vec!["alice".into()],
        unsubscribe_user_ids: Vec::new(),
    };
    let req = Req {
        req_kind: kind::SUBSCRIBE_ONLINE_STATUS,
        msg_incr: "1".into(),
        operation_id: "op-x".into(),
        send_id: "x".into(),
        token: "tokX".into(),
        data: SdkKind::Web.encode(&inner).unwrap(),
    };
    watcher.send(encode_req(&req)).await.unwrap();
    let reply = recv_reply(&mut watcher).await;
    assert_eq!(reply.err_code, 0);
    let resp: SubscribeOnlineStatusResp = SdkKind::Web.decode(&reply.data).unwrap();
    assert_eq!(resp.subscribed.len(), 1);
    assert!(resp.subscribed[0].online_platform_ids.is_empty());

    // Alice connects on platform 3: the watcher gets one tip frame.
    let _alice = h.connect("alice", platform::WINDOWS, "tokAl").await;
    let tip = recv_reply(&mut watcher).await;
    assert_eq!(tip.req_kind, kind::SUBSCRIBE_ONLINE_STATUS);
    let tip_payload: UserOnlinePlatforms = SdkKind::Web.decode(&tip.data).unwrap();
    assert_eq!(tip_payload.user_id, "alice");
    assert!(tip_payload.online_platform_ids.contains(&platform::WINDOWS));
}

#[tokio::test]
async fn logout_acks_then_closes_and_clears_push_token() {
    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("carol", 2, "tokC").await;

    let req = Req {
        req_kind: kind::LOGOUT,
        msg_incr: "9".into(),
        operation_id: "op-c".into(),
        send_id: "carol".into(),
        token: "tokC".into(),
        data: Vec::new(),
    };
    socket.send(encode_req(&req)).await.unwrap();

    let reply = recv_reply(&mut socket).await;
    assert_eq!(reply.req_kind, kind::LOGOUT);
    assert_eq!(reply.err_code, 0);
    recv_close(&mut socket).await;

    wait_until(|| h.state.registry.get_all("carol").is_empty()).await;
    assert_eq!(h.push.deleted(), vec![("carol".to_string(), 2)]);
}

#[tokio::test]
async fn text_heartbeat_ping_gets_pong() {
    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("dave", 1, "tokD").await;

    socket
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();

    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("transport error");
        match frame {
            Message::Text(text) => {
                assert!(text.as_str().contains("pong"));
                break;
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn spoofed_send_id_fails_the_connection() {
    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("erin", 2, "tokE").await;

    let req = Req {
        req_kind: kind::GET_LATEST_SEQ,
        msg_incr: "1".into(),
        operation_id: "op".into(),
        send_id: "mallory".into(),
        token: "tokE".into(),
        data: SdkKind::Web.encode(&GetLatestSeqReq::default()).unwrap(),
    };
    socket.send(encode_req(&req)).await.unwrap();
    recv_close(&mut socket).await;
    wait_until(|| h.state.registry.get_all("erin").is_empty()).await;
}

// ── Handshake rejections ─────────────────────────────────────────────────────

#[tokio::test]
async fn missing_params_rejects_before_upgrade() {
    let h = start(TernConfig::default()).await;
    let url = format!("ws://{}/?platformID=2&token=t", h.addr);
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn bad_token_rejects_with_http_status() {
    let h = start(TernConfig::default()).await;
    let url = h.url("alice", 2, "never-granted");
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn bad_token_with_msg_resp_gets_framed_error() {
    let h = start(TernConfig::default()).await;
    let url = format!("{}&isMsgResp=true", h.url("alice", 2, "never-granted"));
    let (mut socket, _) = connect_async(url).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected framed handshake error, got {frame:?}");
    };
    let body: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_ne!(body["errCode"], 0);
}

#[tokio::test]
async fn capacity_limit_returns_http_429() {
    let mut config = TernConfig::default();
    config.gateway.max_conns = 1;
    let h = start(config).await;

    let _first = h.connect("alice", 2, "tokA").await;
    h.auth.grant("tokB", "bob", 1);
    assert!(connect_async(h.url("bob", 1, "tokB")).await.is_err());
}

// ── Internal API ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_push_delivers_and_reports_online_push() {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("frank", platform::ANDROID, "tokF").await;

    let http = reqwest::Client::new();
    let body = serde_json::json!({
        "userIDs": ["frank", "ghost"],
        "data": STANDARD.encode(b"payload"),
        "operationID": "op-push",
        "timeoutMs": 2000,
    });
    let resp: serde_json::Value = http
        .post(format!("http://{}/api/batch_push", h.addr))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp["errCode"], 0);
    let results = resp["data"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        match result["userID"].as_str().unwrap() {
            "frank" => {
                assert_eq!(result["results"][0]["onlinePush"], true);
                assert_eq!(result["results"][0]["resultCode"], 0);
            },
            "ghost" => assert!(result["results"].as_array().unwrap().is_empty()),
            other => panic!("unexpected user {other}"),
        }
    }

    // The frame actually reached frank.
    let frame = recv_reply(&mut socket).await;
    assert_eq!(frame.req_kind, kind::PUSH_MSG);
    assert_eq!(frame.data, b"payload");
}

#[tokio::test]
async fn kick_api_closes_sessions_and_kills_tokens() {
    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("gina", 1, "tokG").await;

    let http = reqwest::Client::new();
    let resp: serde_json::Value = http
        .post(format!("http://{}/api/kick", h.addr))
        .json(&serde_json::json!({
            "userIDs": ["gina"],
            "platformID": 1,
            "operationID": "op-admin",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["errCode"], 0);

    let reply = recv_reply(&mut socket).await;
    assert_eq!(reply.req_kind, kind::KICK_ONLINE);
    recv_close(&mut socket).await;
    wait_until(|| h.state.registry.get_all("gina").is_empty()).await;
    wait_until(|| !h.auth.kicked().is_empty()).await;
    assert_eq!(h.auth.kicked()[0], vec!["tokG".to_string()]);
}

#[tokio::test]
async fn sibling_check_in_kicks_local_session() {
    let h = start(TernConfig::default()).await;
    let mut socket = h.connect("hank", 1, "tokOld").await;

    let http = reqwest::Client::new();
    let resp: serde_json::Value = http
        .post(format!("http://{}/api/multi_terminal_check", h.addr))
        .json(&serde_json::json!({
            "userID": "hank",
            "platformID": 1,
            "token": "tokNew",
            "operationID": "op-sib",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["errCode"], 0);

    let reply = recv_reply(&mut socket).await;
    assert_eq!(reply.req_kind, kind::KICK_ONLINE);
    recv_close(&mut socket).await;
    wait_until(|| !h.auth.invalidations().is_empty()).await;
    assert_eq!(h.auth.invalidations()[0].preserve_token, "tokNew");
}

#[tokio::test]
async fn online_status_api_reports_local_sessions() {
    let h = start(TernConfig::default()).await;
    let _socket = h.connect("iris", platform::IPAD, "tokI").await;

    let http = reqwest::Client::new();
    let resp: serde_json::Value = http
        .post(format!("http://{}/api/online_status", h.addr))
        .json(&serde_json::json!({ "userIDs": ["iris", "nobody"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let data = resp["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["platforms"][0]["platformID"], platform::IPAD);
    assert_eq!(data[0]["platforms"][0]["token"], "tokI");
    assert!(data[1]["platforms"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_connection_count() {
    let h = start(TernConfig::default()).await;
    let _socket = h.connect("jack", 2, "tokJ").await;

    let resp: serde_json::Value = reqwest::get(format!("http://{}/health", h.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["connections"], 1);
    assert_eq!(resp["users"], 1);
}

// ── Webhooks ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lifecycle_webhooks_fire_within_two_seconds() {
    use axum::{Json, Router, extract::State, routing::post};
    use std::sync::Mutex;

    // Capture server for webhook deliveries.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(String, serde_json::Value)>>>);
    async fn capture(
        State(captured): State<Captured>,
        axum::extract::Path(event): axum::extract::Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> &'static str {
        captured.0.lock().unwrap().push((event, body));
        "ok"
    }
    let captured = Captured::default();
    let hook_app = Router::new()
        .route("/hooks/{event}", post(capture))
        .with_state(captured.clone());
    let hook_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hook_addr = hook_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(hook_listener, hook_app).await.unwrap();
    });

    let mut config = TernConfig::default();
    for (endpoint, event) in [
        (&mut config.webhooks.after_user_online, "online"),
        (&mut config.webhooks.after_user_offline, "offline"),
    ] {
        endpoint.enable = true;
        endpoint.url = format!("http://{hook_addr}/hooks/{event}");
    }
    let h = start(config).await;

    let mut socket = h.connect("kate", 2, "tokK").await;
    wait_until(|| {
        captured
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|(event, body)| event == "online" && body["userID"] == "kate")
    })
    .await;

    socket.close(None).await.unwrap();
    wait_until(|| {
        captured
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|(event, body)| {
                event == "offline" && body["userID"] == "kate" && body["platformID"] == 2
            })
    })
    .await;
}
