//! DTOs shared between the gateway and its backends. These are also the
//! inner payload types of the client wire protocol: the gateway decodes a
//! request's `data` field into one of these with the session codec.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Auth ─────────────────────────────────────────────────────────────────────

/// Verified identity extracted from a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub user_id: String,
    pub platform_id: i32,
}

// ── Presence ─────────────────────────────────────────────────────────────────

/// One user's presence transition as reported to the user service.
/// `online` is the full set of currently-live platforms at emission time;
/// `offline` carries only the platforms that just left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusChange {
    pub user_id: String,
    pub online_platform_ids: Vec<i32>,
    pub offline_platform_ids: Vec<i32>,
    pub conn_id: String,
}

/// A user's live platform set, as answered by the user service and as
/// pushed to presence subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnlinePlatforms {
    pub user_id: String,
    pub online_platform_ids: Vec<i32>,
}

// ── Message service ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLatestSeqReq {
    #[serde(default)]
    pub conversation_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLatestSeqResp {
    pub max_seqs: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMsgReq {
    #[serde(default)]
    pub recv_id: String,
    #[serde(default)]
    pub group_id: String,
    pub content_type: i32,
    pub content: Vec<u8>,
    pub client_msg_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMsgResp {
    pub server_msg_id: String,
    pub client_msg_id: String,
    pub send_time: i64,
    pub seq: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullBySeqListReq {
    pub conversation_seqs: HashMap<String, Vec<i64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullByRangeReq {
    pub conversation_id: String,
    pub begin: i64,
    pub end: i64,
    pub num: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMsg {
    pub conversation_id: String,
    pub seq: i64,
    pub send_id: String,
    pub content_type: i32,
    pub content: Vec<u8>,
    pub send_time: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResp {
    pub msgs: Vec<WireMsg>,
}

// ── Conversation service ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReadMaxSeqReq {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReadMaxSeqResp {
    pub max_read_seq: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullConvLastReq {
    #[serde(default)]
    pub conversation_ids: Vec<String>,
}

// ── Local-only request payloads ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBackgroundStatusReq {
    pub is_background: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOnlineStatusReq {
    #[serde(default)]
    pub subscribe_user_ids: Vec<String>,
    #[serde(default)]
    pub unsubscribe_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOnlineStatusResp {
    pub subscribed: Vec<UserOnlinePlatforms>,
}
