//! HTTP/JSON implementations of the backend service traits.
//!
//! Every internal API answers the platform's standard envelope
//! `{"errCode": 0, "errMsg": "", "data": ...}`; a non-zero `errCode` is
//! surfaced as [`RpcError::Backend`] with the backend's code untouched.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::json,
};

use crate::{error::RpcError, services::*, types::*};

/// Header carrying the request's operation id for cross-service tracing.
pub const OPERATION_ID_HEADER: &str = "operationID";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    err_code: i32,
    #[serde(default)]
    err_msg: String,
    data: Option<T>,
}

/// Shared POST-JSON transport for one backend base URL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: base.into(),
            timeout,
        }
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        operation_id: &str,
        body: &B,
    ) -> Result<T, RpcError> {
        let env: ApiEnvelope<T> = self.roundtrip(path, operation_id, body).await?;
        env.data.ok_or(RpcError::Backend {
            code: 1500,
            message: format!("{path}: missing data in response"),
        })
    }

    async fn call_unit<B: Serialize>(
        &self,
        path: &str,
        operation_id: &str,
        body: &B,
    ) -> Result<(), RpcError> {
        let _: ApiEnvelope<serde_json::Value> = self.roundtrip(path, operation_id, body).await?;
        Ok(())
    }

    async fn roundtrip<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        operation_id: &str,
        body: &B,
    ) -> Result<ApiEnvelope<T>, RpcError> {
        let url = format!("{}{}", self.base.trim_end_matches('/'), path);
        let fut = self
            .client
            .post(&url)
            .header(OPERATION_ID_HEADER, operation_id)
            .json(body)
            .send();
        // The client timeout covers the body read; the outer timeout also
        // bounds connect stalls so a dead backend cannot exceed the budget.
        let resp = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))??;
        let env: ApiEnvelope<T> = tokio::time::timeout(self.timeout, resp.json())
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))??;
        if env.err_code != 0 {
            return Err(RpcError::Backend {
                code: env.err_code,
                message: env.err_msg,
            });
        }
        Ok(env)
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────────

pub struct HttpAuthService(pub HttpTransport);

#[async_trait]
impl AuthService for HttpAuthService {
    async fn parse_token(
        &self,
        token: &str,
        operation_id: &str,
    ) -> Result<TokenClaims, RpcError> {
        self.0
            .call("/auth/parse_token", operation_id, &json!({ "token": token }))
            .await
            .map_err(|e| match e {
                RpcError::Backend { code, message } if code == 1002 => {
                    RpcError::AuthInvalid(message)
                },
                other => other,
            })
    }

    async fn invalidate_tokens(
        &self,
        user_id: &str,
        platform_id: i32,
        preserve_token: &str,
        operation_id: &str,
    ) -> Result<(), RpcError> {
        self.0
            .call_unit(
                "/auth/invalidate_tokens",
                operation_id,
                &json!({
                    "userID": user_id,
                    "platformID": platform_id,
                    "preserveToken": preserve_token,
                }),
            )
            .await
    }

    async fn kick_tokens(&self, tokens: &[String], operation_id: &str) -> Result<(), RpcError> {
        self.0
            .call_unit("/auth/kick_tokens", operation_id, &json!({ "tokens": tokens }))
            .await
    }
}

// ── User ─────────────────────────────────────────────────────────────────────

pub struct HttpUserService(pub HttpTransport);

#[async_trait]
impl UserService for HttpUserService {
    async fn set_user_online_status(
        &self,
        batch: &[OnlineStatusChange],
        operation_id: &str,
    ) -> Result<(), RpcError> {
        self.0
            .call_unit(
                "/user/set_user_online_status",
                operation_id,
                &json!({ "statusList": batch }),
            )
            .await
    }

    async fn get_users_online_platforms(
        &self,
        user_ids: &[String],
        operation_id: &str,
    ) -> Result<Vec<UserOnlinePlatforms>, RpcError> {
        self.0
            .call(
                "/user/get_users_online_platforms",
                operation_id,
                &json!({ "userIDs": user_ids }),
            )
            .await
    }
}

// ── Msg ──────────────────────────────────────────────────────────────────────

pub struct HttpMsgService(pub HttpTransport);

#[async_trait]
impl MsgService for HttpMsgService {
    async fn get_latest_seq(
        &self,
        user_id: &str,
        req: GetLatestSeqReq,
        operation_id: &str,
    ) -> Result<GetLatestSeqResp, RpcError> {
        self.0
            .call(
                "/msg/get_latest_seq",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }

    async fn send_msg(
        &self,
        user_id: &str,
        req: SendMsgReq,
        operation_id: &str,
    ) -> Result<SendMsgResp, RpcError> {
        self.0
            .call(
                "/msg/send_msg",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }

    async fn send_signal_msg(
        &self,
        user_id: &str,
        req: SendMsgReq,
        operation_id: &str,
    ) -> Result<SendMsgResp, RpcError> {
        self.0
            .call(
                "/msg/send_signal_msg",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }

    async fn pull_by_seq_list(
        &self,
        user_id: &str,
        req: PullBySeqListReq,
        operation_id: &str,
    ) -> Result<PullResp, RpcError> {
        self.0
            .call(
                "/msg/pull_by_seq_list",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }

    async fn pull_by_range(
        &self,
        user_id: &str,
        req: PullByRangeReq,
        operation_id: &str,
    ) -> Result<PullResp, RpcError> {
        self.0
            .call(
                "/msg/pull_by_range",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }
}

// ── Push ─────────────────────────────────────────────────────────────────────

pub struct HttpPushService(pub HttpTransport);

#[async_trait]
impl PushService for HttpPushService {
    async fn del_user_push_token(
        &self,
        user_id: &str,
        platform_id: i32,
        operation_id: &str,
    ) -> Result<(), RpcError> {
        self.0
            .call_unit(
                "/push/del_user_push_token",
                operation_id,
                &json!({ "userID": user_id, "platformID": platform_id }),
            )
            .await
    }
}

// ── Conversation ─────────────────────────────────────────────────────────────

pub struct HttpConversationService(pub HttpTransport);

#[async_trait]
impl ConversationService for HttpConversationService {
    async fn get_read_max_seq(
        &self,
        user_id: &str,
        req: GetReadMaxSeqReq,
        operation_id: &str,
    ) -> Result<GetReadMaxSeqResp, RpcError> {
        self.0
            .call(
                "/conversation/get_read_max_seq",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }

    async fn pull_conversation_last(
        &self,
        user_id: &str,
        req: PullConvLastReq,
        operation_id: &str,
    ) -> Result<PullResp, RpcError> {
        self.0
            .call(
                "/conversation/pull_last",
                operation_id,
                &json!({ "userID": user_id, "req": req }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_nonzero_code_is_backend_error() {
        let raw = r#"{"errCode": 10002, "errMsg": "token expired", "data": null}"#;
        let env: ApiEnvelope<TokenClaims> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.err_code, 10002);
        assert_eq!(env.err_msg, "token expired");
        assert!(env.data.is_none());
    }

    #[test]
    fn envelope_data_decodes() {
        let raw = r#"{"errCode": 0, "data": {"userId": "u1", "platformId": 2}}"#;
        let env: ApiEnvelope<TokenClaims> = serde_json::from_str(raw).unwrap();
        let claims = env.data.unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.platform_id, 2);
    }
}
