//! Handshake, upgrade, and the per-connection read loop.

use std::{
    collections::HashMap,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    axum::{
        extract::{
            ConnectInfo, Query, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        http::HeaderMap,
        response::{IntoResponse, Response},
    },
    futures::{FutureExt, StreamExt, stream::SplitStream},
    tokio::time::MissedTickBehavior,
    tracing::{debug, warn},
};

use tern_protocol::{
    MAX_MESSAGE_SIZE, PING_PERIOD, PONG_WAIT, Reply, Req, SdkKind, TextKind, TextPayload,
    compress, errcode,
    frames::kind,
};

use crate::{
    client::Client,
    context::{self, ConnectParams, HandshakeError},
    error::GatewayError,
    router::{self, RouteError, RouteOutcome},
    state::GatewayState,
    transport::WsSink,
};

/// Upgrade handler at `/`. Validates handshake parameters and the token
/// before upgrading; with `isMsgResp=true` failures are answered as one
/// text frame on the upgraded channel instead of as HTTP status.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let framed_errors = query.get(context::param::IS_MSG_RESP).map(String::as_str) == Some("true");

    let params = match ConnectParams::from_query(&query) {
        Ok(params) => params,
        Err(e) => return reject(ws, framed_errors, e),
    };

    if state.online_count() >= state.config.gateway.max_conns {
        let e = HandshakeError::over_capacity(state.config.gateway.max_conns);
        return reject(ws, framed_errors, e);
    }

    match state
        .services
        .auth
        .parse_token(&params.token, &params.operation_id)
        .await
    {
        Ok(claims) => {
            if claims.user_id != params.user_id || claims.platform_id != params.platform_id {
                return reject(
                    ws,
                    framed_errors,
                    HandshakeError::auth("token identity mismatch"),
                );
            }
        },
        Err(e) => return reject(ws, framed_errors, HandshakeError::auth(e.to_string())),
    }

    let remote = context::remote_addr(&headers, peer);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_connection(socket, state, params, remote))
}

/// Refuse a handshake: HTTP status, or one framed text error when the
/// client asked for `isMsgResp`.
fn reject(ws: WebSocketUpgrade, framed: bool, e: HandshakeError) -> Response {
    if !framed {
        return (e.status, e.reason).into_response();
    }
    ws.on_upgrade(move |mut socket| async move {
        let body = serde_json::json!({ "errCode": e.code, "errMsg": e.reason }).to_string();
        let _ = socket.send(Message::Text(body.into())).await;
        let _ = socket.send(Message::Close(None)).await;
    })
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Drive one upgraded connection to completion.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    params: ConnectParams,
    remote: String,
) {
    let conn_id = context::derive_conn_id(&remote, now_ms());
    let (sink, stream) = socket.split();
    let client = Client::new(
        &params,
        conn_id,
        remote,
        Box::new(WsSink(sink)),
        state.events_sender(),
    );

    if params.is_msg_resp {
        let ack = serde_json::json!({ "errCode": 0, "errMsg": "" }).to_string();
        if client.write_raw_text(ack).await.is_err() {
            return;
        }
    }

    state.conn_opened();
    state.register(Arc::clone(&client)).await;

    if params.sdk_kind == SdkKind::Web {
        let hb_client = Arc::clone(&client);
        let handle = tokio::spawn(async move { heartbeat(hb_client).await });
        client.set_heartbeat(handle.abort_handle());
    }

    let reason = read_loop(&state, &client, stream).await;
    client.close(reason).await;
}

/// Server→client pings for web SDK sessions. Native SDKs ping on their own
/// and just get pongs back.
async fn heartbeat(client: Arc<Client>) {
    let mut tick = tokio::time::interval(PING_PERIOD);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; that early ping is harmless.
    loop {
        tick.tick().await;
        if client.is_closed() || client.write_ping().await.is_err() {
            break;
        }
    }
}

/// Read frames until the connection dies, returning why.
async fn read_loop(
    state: &Arc<GatewayState>,
    client: &Arc<Client>,
    mut stream: SplitStream<WebSocket>,
) -> GatewayError {
    let cancel = client.closed_signal();
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return GatewayError::ConnClosed,
            res = tokio::time::timeout(PONG_WAIT, stream.next()) => match res {
                Err(_) => return GatewayError::ReadTimeout,
                Ok(None) => return GatewayError::ClientClose,
                Ok(Some(Err(e))) => return GatewayError::Transport(e),
                Ok(Some(Ok(frame))) => frame,
            },
        };
        if client.is_closed() {
            return GatewayError::ConnClosed;
        }

        let res = match frame {
            Message::Binary(bytes) => handle_binary(state, client, &bytes).await,
            Message::Text(text) => handle_text(client, text.as_str()).await,
            Message::Ping(body) => {
                let _ = client.write_pong(body.to_vec()).await;
                Ok(())
            },
            Message::Pong(_) => Ok(()),
            Message::Close(_) => return GatewayError::ClientClose,
        };
        if let Err(e) = res {
            return e;
        }
    }
}

/// Decode and dispatch one business frame.
async fn handle_binary(
    state: &Arc<GatewayState>,
    client: &Arc<Client>,
    bytes: &[u8],
) -> Result<(), GatewayError> {
    let raw = if client.compression {
        compress::decompress(bytes, MAX_MESSAGE_SIZE)?
    } else {
        bytes.to_vec()
    };

    let req: Req = match client.sdk_kind.decode(&raw) {
        Ok(req) => req,
        Err(e) => {
            // Echo an undecodable-data error, then fail the connection.
            let reply = Reply {
                req_kind: kind::WS_DATA_ERROR,
                err_code: errcode::PROTO_VIOLATION,
                err_msg: e.to_string(),
                ..Default::default()
            };
            let _ = client.write_reply(&reply).await;
            return Err(GatewayError::ProtoViolation(format!("undecodable frame: {e}")));
        },
    };

    debug!(
        conn_id = %client.conn_id,
        operation_id = %req.operation_id,
        req_kind = tern_protocol::frames::kind_name(req.req_kind),
        "dispatching request"
    );

    // A panicking handler fails this connection, never the process.
    let outcome = AssertUnwindSafe(router::dispatch(state, client, &req))
        .catch_unwind()
        .await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                conn_id = %client.conn_id,
                operation_id = %req.operation_id,
                "request handler panicked"
            );
            return Err(GatewayError::HandlerPanic);
        },
    };

    match outcome {
        // An empty reply is still sent so the SDK can settle the request.
        Ok(RouteOutcome::Reply(data)) => {
            client.write_reply(&Reply::ok(&req, data)).await?;
            Ok(())
        },
        Ok(RouteOutcome::ReplyThenClose(data)) => {
            client.write_reply(&Reply::ok(&req, data)).await?;
            Err(GatewayError::Logout)
        },
        Err(RouteError::Violation(v)) => Err(GatewayError::ProtoViolation(v)),
        Err(e) => {
            warn!(
                conn_id = %client.conn_id,
                operation_id = %req.operation_id,
                error = %e,
                "request failed"
            );
            client
                .write_reply(&Reply::err(&req, e.err_code(), e.to_string()))
                .await?;
            Ok(())
        },
    }
}

/// Text frames carry JSON heartbeats: a ping is echoed as a pong, a pong is
/// a no-op, anything else fails the connection.
async fn handle_text(client: &Arc<Client>, text: &str) -> Result<(), GatewayError> {
    let payload: TextPayload = serde_json::from_str(text)
        .map_err(|e| GatewayError::ProtoViolation(format!("unknown text frame: {e}")))?;
    match payload.kind {
        TextKind::Ping => client.write_text(&TextPayload::pong(payload.body)).await,
        TextKind::Pong => Ok(()),
    }
}
