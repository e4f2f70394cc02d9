//! Recording and inert service implementations for tests and partial
//! wiring. These live in the library (not behind `cfg(test)`) so the
//! gateway's own tests and `BackendServices::noop()` can reach them.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{error::RpcError, services::*, types::*};

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    // Mutex poisoning only happens if a test thread panicked while holding
    // the guard; recovering the inner value keeps the remaining assertions
    // meaningful.
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────────

/// A recorded `invalidate_tokens` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidateCall {
    pub user_id: String,
    pub platform_id: i32,
    pub preserve_token: String,
}

/// Token table auth: rejects everything until tokens are granted.
#[derive(Default)]
pub struct MockAuthService {
    granted: Mutex<HashMap<String, TokenClaims>>,
    invalidations: Mutex<Vec<InvalidateCall>>,
    kicked: Mutex<Vec<Vec<String>>>,
}

impl MockAuthService {
    pub fn grant(&self, token: &str, user_id: &str, platform_id: i32) {
        lock(&self.granted).insert(
            token.to_string(),
            TokenClaims {
                user_id: user_id.to_string(),
                platform_id,
            },
        );
    }

    pub fn invalidations(&self) -> Vec<InvalidateCall> {
        lock(&self.invalidations).clone()
    }

    pub fn kicked(&self) -> Vec<Vec<String>> {
        lock(&self.kicked).clone()
    }
}

#[async_trait]
impl AuthService for MockAuthService {
    async fn parse_token(
        &self,
        token: &str,
        _operation_id: &str,
    ) -> Result<TokenClaims, RpcError> {
        lock(&self.granted)
            .get(token)
            .cloned()
            .ok_or_else(|| RpcError::AuthInvalid(format!("unknown token {token:?}")))
    }

    async fn invalidate_tokens(
        &self,
        user_id: &str,
        platform_id: i32,
        preserve_token: &str,
        _operation_id: &str,
    ) -> Result<(), RpcError> {
        // Mirror the real service: every granted token for the device is
        // dropped except the preserved one.
        lock(&self.granted).retain(|token, claims| {
            token == preserve_token
                || claims.user_id != user_id
                || claims.platform_id != platform_id
        });
        lock(&self.invalidations).push(InvalidateCall {
            user_id: user_id.to_string(),
            platform_id,
            preserve_token: preserve_token.to_string(),
        });
        Ok(())
    }

    async fn kick_tokens(&self, tokens: &[String], _operation_id: &str) -> Result<(), RpcError> {
        let mut granted = lock(&self.granted);
        for t in tokens {
            granted.remove(t);
        }
        lock(&self.kicked).push(tokens.to_vec());
        Ok(())
    }
}

// ── User ─────────────────────────────────────────────────────────────────────

/// Records every presence batch; optionally fails on demand to exercise the
/// renewal backstop.
#[derive(Default)]
pub struct RecordingUserService {
    batches: Mutex<Vec<Vec<OnlineStatusChange>>>,
    platforms: Mutex<HashMap<String, Vec<i32>>>,
    fail: AtomicBool,
}

impl RecordingUserService {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_platforms(&self, user_id: &str, platform_ids: Vec<i32>) {
        lock(&self.platforms).insert(user_id.to_string(), platform_ids);
    }

    /// All batches received so far, in call order.
    pub fn batches(&self) -> Vec<Vec<OnlineStatusChange>> {
        lock(&self.batches).clone()
    }

    /// All changes received so far, flattened in call order.
    pub fn changes(&self) -> Vec<OnlineStatusChange> {
        lock(&self.batches).iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl UserService for RecordingUserService {
    async fn set_user_online_status(
        &self,
        batch: &[OnlineStatusChange],
        _operation_id: &str,
    ) -> Result<(), RpcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RpcError::Backend {
                code: 1500,
                message: "induced failure".into(),
            });
        }
        lock(&self.batches).push(batch.to_vec());
        Ok(())
    }

    async fn get_users_online_platforms(
        &self,
        user_ids: &[String],
        _operation_id: &str,
    ) -> Result<Vec<UserOnlinePlatforms>, RpcError> {
        let platforms = lock(&self.platforms);
        Ok(user_ids
            .iter()
            .map(|id| UserOnlinePlatforms {
                user_id: id.clone(),
                online_platform_ids: platforms.get(id).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

// ── Msg / Push / Conversation ────────────────────────────────────────────────

/// Accepts every message and answers with zeroed store coordinates.
pub struct NoopMsgService;

#[async_trait]
impl MsgService for NoopMsgService {
    async fn get_latest_seq(
        &self,
        _user_id: &str,
        _req: GetLatestSeqReq,
        _operation_id: &str,
    ) -> Result<GetLatestSeqResp, RpcError> {
        Ok(GetLatestSeqResp::default())
    }

    async fn send_msg(
        &self,
        _user_id: &str,
        req: SendMsgReq,
        _operation_id: &str,
    ) -> Result<SendMsgResp, RpcError> {
        Ok(SendMsgResp {
            server_msg_id: format!("srv-{}", req.client_msg_id),
            client_msg_id: req.client_msg_id,
            ..Default::default()
        })
    }

    async fn send_signal_msg(
        &self,
        user_id: &str,
        req: SendMsgReq,
        operation_id: &str,
    ) -> Result<SendMsgResp, RpcError> {
        self.send_msg(user_id, req, operation_id).await
    }

    async fn pull_by_seq_list(
        &self,
        _user_id: &str,
        _req: PullBySeqListReq,
        _operation_id: &str,
    ) -> Result<PullResp, RpcError> {
        Ok(PullResp::default())
    }

    async fn pull_by_range(
        &self,
        _user_id: &str,
        _req: PullByRangeReq,
        _operation_id: &str,
    ) -> Result<PullResp, RpcError> {
        Ok(PullResp::default())
    }
}

/// Records push-token deletions.
#[derive(Default)]
pub struct NoopPushService {
    deleted: Mutex<Vec<(String, i32)>>,
}

impl NoopPushService {
    pub fn deleted(&self) -> Vec<(String, i32)> {
        lock(&self.deleted).clone()
    }
}

#[async_trait]
impl PushService for NoopPushService {
    async fn del_user_push_token(
        &self,
        user_id: &str,
        platform_id: i32,
        _operation_id: &str,
    ) -> Result<(), RpcError> {
        lock(&self.deleted).push((user_id.to_string(), platform_id));
        Ok(())
    }
}

pub struct NoopConversationService;

#[async_trait]
impl ConversationService for NoopConversationService {
    async fn get_read_max_seq(
        &self,
        _user_id: &str,
        _req: GetReadMaxSeqReq,
        _operation_id: &str,
    ) -> Result<GetReadMaxSeqResp, RpcError> {
        Ok(GetReadMaxSeqResp::default())
    }

    async fn pull_conversation_last(
        &self,
        _user_id: &str,
        _req: PullConvLastReq,
        _operation_id: &str,
    ) -> Result<PullResp, RpcError> {
        Ok(PullResp::default())
    }
}
