use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::RpcError, types::*};

// ── Service traits ───────────────────────────────────────────────────────────

/// Token issuance and invalidation.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Verify a token and return the identity it encodes.
    async fn parse_token(&self, token: &str, operation_id: &str)
    -> Result<TokenClaims, RpcError>;

    /// Invalidate every token for `(user_id, platform_id)` except
    /// `preserve_token`, which stays valid.
    async fn invalidate_tokens(
        &self,
        user_id: &str,
        platform_id: i32,
        preserve_token: &str,
        operation_id: &str,
    ) -> Result<(), RpcError>;

    /// Hard-invalidate the given tokens (admin kick path, nothing preserved).
    async fn kick_tokens(&self, tokens: &[String], operation_id: &str) -> Result<(), RpcError>;
}

/// Profile and online-status persistence.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Report a batch of presence transitions.
    async fn set_user_online_status(
        &self,
        batch: &[OnlineStatusChange],
        operation_id: &str,
    ) -> Result<(), RpcError>;

    /// Global (cross-node) live platform sets for the given users.
    async fn get_users_online_platforms(
        &self,
        user_ids: &[String],
        operation_id: &str,
    ) -> Result<Vec<UserOnlinePlatforms>, RpcError>;
}

/// Message store: seq numbers, send, history pull.
#[async_trait]
pub trait MsgService: Send + Sync {
    async fn get_latest_seq(
        &self,
        user_id: &str,
        req: GetLatestSeqReq,
        operation_id: &str,
    ) -> Result<GetLatestSeqResp, RpcError>;

    async fn send_msg(
        &self,
        user_id: &str,
        req: SendMsgReq,
        operation_id: &str,
    ) -> Result<SendMsgResp, RpcError>;

    /// Signal (typing / call control) messages: same contract as `send_msg`
    /// but never persisted by the store.
    async fn send_signal_msg(
        &self,
        user_id: &str,
        req: SendMsgReq,
        operation_id: &str,
    ) -> Result<SendMsgResp, RpcError>;

    async fn pull_by_seq_list(
        &self,
        user_id: &str,
        req: PullBySeqListReq,
        operation_id: &str,
    ) -> Result<PullResp, RpcError>;

    async fn pull_by_range(
        &self,
        user_id: &str,
        req: PullByRangeReq,
        operation_id: &str,
    ) -> Result<PullResp, RpcError>;
}

/// Offline-push token bookkeeping.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn del_user_push_token(
        &self,
        user_id: &str,
        platform_id: i32,
        operation_id: &str,
    ) -> Result<(), RpcError>;
}

/// Conversation metadata.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn get_read_max_seq(
        &self,
        user_id: &str,
        req: GetReadMaxSeqReq,
        operation_id: &str,
    ) -> Result<GetReadMaxSeqResp, RpcError>;

    async fn pull_conversation_last(
        &self,
        user_id: &str,
        req: PullConvLastReq,
        operation_id: &str,
    ) -> Result<PullResp, RpcError>;
}

/// Where the sibling gateway nodes live.
pub trait ServiceDiscovery: Send + Sync {
    /// Base URLs of all gateway instances, this node included.
    fn gateway_addrs(&self) -> Vec<String>;
    /// This node's own advertised base URL, for self-filtering.
    fn self_addr(&self) -> String;
}

/// Discovery backed by a fixed address list (config-driven deployments).
pub struct StaticDiscovery {
    addrs: Vec<String>,
    self_addr: String,
}

impl StaticDiscovery {
    pub fn new(addrs: Vec<String>, self_addr: String) -> Self {
        Self { addrs, self_addr }
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn gateway_addrs(&self) -> Vec<String> {
        self.addrs.clone()
    }

    fn self_addr(&self) -> String {
        self.self_addr.clone()
    }
}

// ── Bundle ───────────────────────────────────────────────────────────────────

/// One implementation of each backend service, shared across the gateway.
#[derive(Clone)]
pub struct BackendServices {
    pub auth: Arc<dyn AuthService>,
    pub user: Arc<dyn UserService>,
    pub msg: Arc<dyn MsgService>,
    pub push: Arc<dyn PushService>,
    pub conversation: Arc<dyn ConversationService>,
    pub discovery: Arc<dyn ServiceDiscovery>,
}

impl BackendServices {
    /// Fully inert wiring; every call succeeds with empty results except
    /// auth, which rejects all tokens. Test and partial-bringup aid.
    pub fn noop() -> Self {
        use crate::mock::{
            MockAuthService, NoopConversationService, NoopMsgService, NoopPushService,
            RecordingUserService,
        };
        Self {
            auth: Arc::new(MockAuthService::default()),
            user: Arc::new(RecordingUserService::default()),
            msg: Arc::new(NoopMsgService),
            push: Arc::new(NoopPushService::default()),
            conversation: Arc::new(NoopConversationService),
            discovery: Arc::new(StaticDiscovery::new(Vec::new(), String::new())),
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthService>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_user(mut self, user: Arc<dyn UserService>) -> Self {
        self.user = user;
        self
    }

    pub fn with_msg(mut self, msg: Arc<dyn MsgService>) -> Self {
        self.msg = msg;
        self
    }

    pub fn with_push(mut self, push: Arc<dyn PushService>) -> Self {
        self.push = push;
        self
    }

    pub fn with_conversation(mut self, conversation: Arc<dyn ConversationService>) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }
}
