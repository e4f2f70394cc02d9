//! The gateway's own RPC surface, consumed by backend services and sibling
//! nodes: online-status query, admin kick, cross-node login check-in, and
//! batch push. JSON over HTTP on the internal router; expose it only on the
//! service network.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    axum::{Json, extract::State},
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
    tracing::warn,
};

use {
    tern_config::schema::PushConfig,
    tern_protocol::{Reply, errcode, frames::kind, platform},
};

use crate::{error::GatewayError, state::GatewayState, usermap::UserMap};

// ── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        err_code: 0,
        err_msg: String::new(),
        data: Some(data),
    })
}

fn err<T>(code: i32, msg: impl Into<String>) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        err_code: code,
        err_msg: msg.into(),
        data: None,
    })
}

// ── Online status query ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OnlineStatusReq {
    #[serde(rename = "userIDs")]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlatformDetail {
    #[serde(rename = "platformID")]
    pub platform_id: i32,
    pub platform: &'static str,
    #[serde(rename = "connID")]
    pub conn_id: String,
    pub token: String,
    #[serde(rename = "isBackground")]
    pub is_background: bool,
}

#[derive(Debug, Serialize)]
pub struct UserOnlineDetail {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub platforms: Vec<PlatformDetail>,
}

/// Admin-facing per-session detail (token included): node-local view.
pub async fn get_users_online_status(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<OnlineStatusReq>,
) -> Json<ApiResponse<Vec<UserOnlineDetail>>> {
    let details = req
        .user_ids
        .iter()
        .map(|user_id| UserOnlineDetail {
            user_id: user_id.clone(),
            platforms: state
                .registry
                .get_all(user_id)
                .iter()
                .map(|c| PlatformDetail {
                    platform_id: c.platform_id,
                    platform: platform::name(c.platform_id),
                    conn_id: c.conn_id.clone(),
                    token: c.token.clone(),
                    is_background: c.is_background(),
                })
                .collect(),
        })
        .collect();
    ok(details)
}

// ── Admin kick ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct KickReq {
    #[serde(rename = "userIDs")]
    pub user_ids: Vec<String>,
    #[serde(rename = "platformID")]
    pub platform_id: i32,
    #[serde(default, rename = "operationID")]
    pub operation_id: String,
}

/// Force `(user, platform)` sessions offline: unregister, kick frame, token
/// invalidation.
pub async fn kick_user_offline(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<KickReq>,
) -> Json<ApiResponse<serde_json::Value>> {
    let mut tokens = Vec::new();
    for user_id in &req.user_ids {
        let (clients, _, _) = state.registry.get(user_id, req.platform_id);
        if clients.is_empty() {
            continue;
        }
        state.registry.remove_clients(user_id, &clients);
        for client in &clients {
            tokens.push(client.token.clone());
            client.kick(&req.operation_id, GatewayError::AdminKick).await;
            state.webhooks.after_user_kick_off(user_id, client.platform_id);
        }
    }

    if !tokens.is_empty() {
        let auth = Arc::clone(&state.services.auth);
        let operation_id = req.operation_id.clone();
        tokio::spawn(async move {
            if let Err(e) = auth.kick_tokens(&tokens, &operation_id).await {
                warn!(operation_id, error = %e, "kicked token invalidation failed");
            }
        });
    }
    ok(serde_json::json!({}))
}

// ── Cross-node login check-in ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MultiTerminalCheckReq {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "platformID")]
    pub platform_id: i32,
    pub token: String,
    #[serde(default, rename = "operationID")]
    pub operation_id: String,
}

/// A sibling gateway announced a new login; run the co-login policy against
/// this node's sessions. The check is handed to the serializer task so it
/// cannot interleave with local registers.
pub async fn multi_terminal_login_check(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<MultiTerminalCheckReq>,
) -> Json<ApiResponse<serde_json::Value>> {
    state
        .kick_check(req.user_id, req.platform_id, req.token, req.operation_id)
        .await;
    ok(serde_json::json!({}))
}

// ── Batch push ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SinglePushResult {
    #[serde(rename = "platformID")]
    pub platform_id: i32,
    #[serde(rename = "resultCode")]
    pub result_code: i32,
    /// Set when a mobile platform took the realtime frame, letting the
    /// caller skip offline push for this user.
    #[serde(rename = "onlinePush")]
    pub online_push: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPushResult {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub results: Vec<SinglePushResult>,
}

/// One queued fan-out unit: push `frame` to every live session of a user.
pub struct PushJob {
    pub user_id: String,
    pub frame: Arc<Reply>,
    pub deadline: Instant,
    pub results_tx: mpsc::Sender<UserPushResult>,
}

/// Spawn the fixed-size push worker pool. Workers share one job queue;
/// enqueue failures are the caller's backpressure signal.
pub(crate) fn spawn_push_pool(cfg: &PushConfig, registry: Arc<UserMap>) -> mpsc::Sender<PushJob> {
    let (tx, rx) = mpsc::channel::<PushJob>(cfg.queue.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..cfg.workers.max(1) {
        let rx = Arc::clone(&rx);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            loop {
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else { break };
                let result = push_one(&registry, &job).await;
                let _ = job.results_tx.send(result).await;
            }
        });
    }
    tx
}

/// Push to every session of one user, honoring the job deadline: nothing is
/// written at or after it.
async fn push_one(registry: &UserMap, job: &PushJob) -> UserPushResult {
    let mut results = Vec::new();
    for client in registry.get_all(&job.user_id) {
        let now = Instant::now();
        if now >= job.deadline {
            break;
        }
        // iOS in background is served by offline push, not realtime.
        if client.platform_id == platform::IOS && client.is_background() {
            results.push(SinglePushResult {
                platform_id: client.platform_id,
                result_code: errcode::IOS_BACKGROUND_PUSH_ERR,
                online_push: false,
            });
            continue;
        }
        let remaining = job.deadline - now;
        let delivered = matches!(
            tokio::time::timeout(remaining, client.write_reply(&job.frame)).await,
            Ok(Ok(()))
        );
        results.push(SinglePushResult {
            platform_id: client.platform_id,
            result_code: if delivered {
                errcode::SUCCESS
            } else {
                errcode::PUSH_MSG_ERR
            },
            online_push: delivered && platform::is_mobile_push_capable(client.platform_id),
        });
    }
    UserPushResult {
        user_id: job.user_id.clone(),
        results,
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchPushReq {
    #[serde(rename = "userIDs")]
    pub user_ids: Vec<String>,
    /// Base64-encoded message payload, delivered verbatim as frame data.
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "operationID")]
    pub operation_id: String,
    #[serde(default = "default_push_timeout", rename = "timeoutMs")]
    pub timeout_ms: u64,
}

fn default_push_timeout() -> u64 {
    5_000
}

/// Push one message to every listed user's live sessions, bounded by the
/// caller's deadline. The response always contains one entry per input
/// user; users whose pushes did not complete in time come back with an
/// empty result so the caller can re-push only the missing tail.
pub async fn batch_push(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<BatchPushReq>,
) -> Json<ApiResponse<Vec<UserPushResult>>> {
    let data = match BASE64.decode(&req.data) {
        Ok(data) => data,
        Err(e) => return err(errcode::ARGS, format!("data is not base64: {e}")),
    };
    let frame = Reply::push(kind::PUSH_MSG, req.operation_id.clone(), data);
    let deadline = Instant::now() + Duration::from_millis(req.timeout_ms);
    ok(run_batch_push(&state, &req.user_ids, frame, deadline).await)
}

/// Fan a frame out across the worker pool and aggregate per-user results
/// until every user answered or the deadline fired.
pub(crate) async fn run_batch_push(
    state: &Arc<GatewayState>,
    user_ids: &[String],
    frame: Reply,
    deadline: Instant,
) -> Vec<UserPushResult> {
    // Dedupe while preserving input order: exactly one job and one result
    // per user.
    let mut seen = HashSet::new();
    let users: Vec<&String> = user_ids.iter().filter(|u| seen.insert(u.as_str())).collect();

    let frame = Arc::new(frame);
    let (results_tx, mut results_rx) = mpsc::channel(users.len().max(1));
    let mut pending: HashSet<String> = users.iter().map(|u| u.to_string()).collect();

    for user_id in &users {
        let job = PushJob {
            user_id: (*user_id).clone(),
            frame: Arc::clone(&frame),
            deadline,
            results_tx: results_tx.clone(),
        };
        if state.push_jobs().try_send(job).is_err() {
            // Queue full: answer this user immediately with an empty result
            // rather than blocking the caller.
            warn!(user_id = %user_id, "push queue full");
            let _ = results_tx.try_send(UserPushResult {
                user_id: (*user_id).clone(),
                results: Vec::new(),
            });
        }
    }
    drop(results_tx);

    let mut out = Vec::with_capacity(users.len());
    while !pending.is_empty() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match tokio::time::timeout(deadline - now, results_rx.recv()).await {
            Ok(Some(result)) => {
                if pending.remove(&result.user_id) {
                    out.push(result);
                }
            },
            Ok(None) | Err(_) => break,
        }
    }

    // Deadline fired: report the tail as empty results, not errors.
    for user_id in pending {
        out.push(UserPushResult {
            user_id,
            results: Vec::new(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use {tern_config::TernConfig, tern_rpc::BackendServices};

    use super::*;
    use crate::{
        test_util::test_client_with_sink,
        transport::test_support::RecordingSink,
    };

    fn make_state() -> Arc<GatewayState> {
        GatewayState::new(TernConfig::default(), BackendServices::noop())
    }

    fn push_frame() -> Reply {
        Reply::push(kind::PUSH_MSG, "op-push", b"payload".to_vec())
    }

    #[tokio::test]
    async fn ios_background_is_skipped_with_marker_code() {
        let state = make_state();
        let sink = RecordingSink::default();
        let (carol, _rx) = test_client_with_sink("carol", platform::IOS, "c1", sink.clone());
        carol.set_background(true);
        state.registry.insert(carol);

        let results = run_batch_push(
            &state,
            &["carol".to_string()],
            push_frame(),
            Instant::now() + Duration::from_secs(1),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].results.len(), 1);
        assert_eq!(
            results[0].results[0].result_code,
            errcode::IOS_BACKGROUND_PUSH_ERR
        );
        assert!(!results[0].results[0].online_push);
        // Nothing was written to the connection.
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn mobile_delivery_sets_online_push() {
        let state = make_state();
        let android_sink = RecordingSink::default();
        let (android, _rx1) =
            test_client_with_sink("dave", platform::ANDROID, "c1", android_sink.clone());
        let web_sink = RecordingSink::default();
        let (web, _rx2) = test_client_with_sink("dave", platform::WEB, "c2", web_sink.clone());
        state.registry.insert(android);
        state.registry.insert(web);

        let results = run_batch_push(
            &state,
            &["dave".to_string()],
            push_frame(),
            Instant::now() + Duration::from_secs(1),
        )
        .await;

        assert_eq!(results.len(), 1);
        let by_platform = |p: i32| {
            results[0]
                .results
                .iter()
                .find(|r| r.platform_id == p)
                .cloned()
                .unwrap()
        };
        assert!(by_platform(platform::ANDROID).online_push);
        assert!(!by_platform(platform::WEB).online_push);
        assert_eq!(android_sink.frames().len(), 1);
        assert_eq!(web_sink.frames().len(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_reported_per_platform() {
        let state = make_state();
        let sink = RecordingSink::default();
        sink.set_fail_writes(true);
        let (client, _rx) = test_client_with_sink("erin", platform::ANDROID, "c1", sink);
        state.registry.insert(client);

        let results = run_batch_push(
            &state,
            &["erin".to_string()],
            push_frame(),
            Instant::now() + Duration::from_secs(1),
        )
        .await;
        assert_eq!(results[0].results[0].result_code, errcode::PUSH_MSG_ERR);
        assert!(!results[0].results[0].online_push);
    }

    #[tokio::test]
    async fn expired_deadline_returns_every_user_with_empty_result() {
        let state = make_state();
        let sink = RecordingSink::default();
        let (online, _rx) = test_client_with_sink("u-0", platform::ANDROID, "c1", sink.clone());
        state.registry.insert(online);

        let users: Vec<String> = (0..50).map(|i| format!("u-{i}")).collect();
        // Deadline already in the past: nothing may be written.
        let results =
            run_batch_push(&state, &users, push_frame(), Instant::now()).await;

        assert_eq!(results.len(), 50);
        assert!(results.iter().all(|r| r.results.is_empty()));
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn slow_write_is_cut_at_the_deadline() {
        let state = make_state();
        let sink = RecordingSink::default();
        sink.set_delay(Duration::from_millis(300));
        let (client, _rx) = test_client_with_sink("fred", platform::ANDROID, "c1", sink.clone());
        state.registry.insert(client);

        let results = run_batch_push(
            &state,
            &["fred".to_string()],
            push_frame(),
            Instant::now() + Duration::from_millis(50),
        )
        .await;

        // The write was abandoned at the deadline: error code, no frame.
        assert_eq!(results.len(), 1);
        let codes: Vec<i32> = results[0].results.iter().map(|r| r.result_code).collect();
        assert!(codes.is_empty() || codes == vec![errcode::PUSH_MSG_ERR]);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn duplicate_users_collapse_to_one_result() {
        let state = make_state();
        let users = vec!["x".to_string(), "x".to_string(), "y".to_string()];
        let results = run_batch_push(
            &state,
            &users,
            push_frame(),
            Instant::now() + Duration::from_millis(200),
        )
        .await;
        assert_eq!(results.len(), 2);
    }
}
