use std::sync::Arc;

use {serde::Serialize, serde::de::DeserializeOwned, thiserror::Error, tracing::warn};

use {
    tern_protocol::{ProtoError, Req, errcode, frames::kind},
    tern_rpc::{RpcError, types::*},
};

use crate::{client::Client, state::GatewayState};

/// What a successfully routed request produces.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Reply payload (possibly empty) for the correlated `Reply`.
    Reply(Vec<u8>),
    /// Reply, then force the connection closed (logout).
    ReplyThenClose(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum RouteError {
    /// Backend failure: surfaced in the reply, connection stays open.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// Undecodable or invalid inner payload: non-retriable client error.
    #[error("bad payload: {0}")]
    BadPayload(#[from] ProtoError),
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Spoofed identity or unknown kind: the connection is failed.
    #[error("{0}")]
    Violation(String),
}

impl RouteError {
    pub fn err_code(&self) -> i32 {
        match self {
            Self::Rpc(e) => e.err_code(),
            Self::BadPayload(_) | Self::Invalid(_) => errcode::ARGS,
            Self::Violation(_) => errcode::PROTO_VIOLATION,
        }
    }
}

fn decode<T: DeserializeOwned>(client: &Client, data: &[u8]) -> Result<T, RouteError> {
    Ok(client.sdk_kind.decode(data)?)
}

fn encode<T: Serialize>(client: &Client, value: &T) -> Result<Vec<u8>, RouteError> {
    Ok(client.sdk_kind.encode(value)?)
}

fn validate_send(req: &SendMsgReq) -> Result<(), RouteError> {
    if req.recv_id.is_empty() && req.group_id.is_empty() {
        return Err(RouteError::Invalid("recvID or groupID required".into()));
    }
    if req.client_msg_id.is_empty() {
        return Err(RouteError::Invalid("clientMsgID required".into()));
    }
    Ok(())
}

/// Dispatch one decoded request to its backend RPC (or local mutation).
///
/// The flat match on the request kind is the complete routing table; an
/// unknown kind and an identity mismatch both fail the connection.
pub async fn dispatch(
    state: &Arc<GatewayState>,
    client: &Arc<Client>,
    req: &Req,
) -> Result<RouteOutcome, RouteError> {
    if req.send_id != client.user_id {
        return Err(RouteError::Violation(format!(
            "sendID {:?} does not match session user {:?}",
            req.send_id, client.user_id
        )));
    }

    let op = req.operation_id.as_str();
    let user = client.user_id.as_str();
    let svc = &state.services;

    match req.req_kind {
        kind::GET_LATEST_SEQ => {
            let inner: GetLatestSeqReq = decode(client, &req.data)?;
            let resp = svc.msg.get_latest_seq(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::PULL_BY_SEQ_LIST => {
            let inner: PullBySeqListReq = decode(client, &req.data)?;
            let resp = svc.msg.pull_by_seq_list(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::SEND_MSG => {
            let inner: SendMsgReq = decode(client, &req.data)?;
            validate_send(&inner)?;
            let resp = svc.msg.send_msg(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::SEND_SIGNAL_MSG => {
            let inner: SendMsgReq = decode(client, &req.data)?;
            validate_send(&inner)?;
            let resp = svc.msg.send_signal_msg(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::PULL_BY_RANGE => {
            let inner: PullByRangeReq = decode(client, &req.data)?;
            if inner.num < 0 || inner.begin > inner.end {
                return Err(RouteError::Invalid("bad seq range".into()));
            }
            let resp = svc.msg.pull_by_range(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::GET_READ_MAX_SEQ => {
            let inner: GetReadMaxSeqReq = decode(client, &req.data)?;
            let resp = svc.conversation.get_read_max_seq(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::PULL_CONV_LAST_MESSAGE => {
            let inner: PullConvLastReq = decode(client, &req.data)?;
            let resp = svc.conversation.pull_conversation_last(user, inner, op).await?;
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        kind::LOGOUT => {
            svc.push
                .del_user_push_token(user, client.platform_id, op)
                .await?;
            Ok(RouteOutcome::ReplyThenClose(Vec::new()))
        },
        kind::SET_BACKGROUND_STATUS => {
            let inner: SetBackgroundStatusReq = decode(client, &req.data)?;
            client.set_background(inner.is_background);
            Ok(RouteOutcome::Reply(Vec::new()))
        },
        kind::SUBSCRIBE_ONLINE_STATUS => {
            let inner: SubscribeOnlineStatusReq = decode(client, &req.data)?;
            let added = state
                .subs
                .subscribe(client, &inner.subscribe_user_ids, &inner.unsubscribe_user_ids);
            let subscribed = if added.is_empty() {
                Vec::new()
            } else {
                match svc.user.get_users_online_platforms(&added, op).await {
                    Ok(platforms) => platforms,
                    Err(e) => {
                        // The subscription itself took effect; answer with
                        // local knowledge rather than failing the request.
                        warn!(operation_id = op, error = %e, "global platform query failed");
                        added
                            .iter()
                            .map(|id| UserOnlinePlatforms {
                                user_id: id.clone(),
                                online_platform_ids: state
                                    .registry
                                    .get_all(id)
                                    .iter()
                                    .map(|c| c.platform_id)
                                    .collect(),
                            })
                            .collect()
                    },
                }
            };
            let resp = SubscribeOnlineStatusResp { subscribed };
            Ok(RouteOutcome::Reply(encode(client, &resp)?))
        },
        other => Err(RouteError::Violation(format!("unknown request kind {other}"))),
    }
}
