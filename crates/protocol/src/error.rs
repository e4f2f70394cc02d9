use thiserror::Error;

/// Wire-stable error codes carried in `Reply.err_code`. These are part of
/// the client contract and never renumbered.
pub mod errcode {
    pub const SUCCESS: i32 = 0;
    /// Missing or malformed handshake/request arguments.
    pub const ARGS: i32 = 1001;
    /// Token parse or verification failure.
    pub const AUTH_INVALID: i32 = 1002;
    /// Node-level connection limit exceeded.
    pub const OVER_CAPACITY: i32 = 1003;
    /// Unknown frame type, bad codec, or user-id spoof.
    pub const PROTO_VIOLATION: i32 = 1004;
    /// Backend RPC dial or deadline failure.
    pub const BACKEND_UNAVAILABLE: i32 = 1100;
    /// Realtime push write failed for one platform.
    pub const PUSH_MSG_ERR: i32 = 1200;
    /// Push skipped: iOS client in background is served by offline push.
    pub const IOS_BACKGROUND_PUSH_ERR: i32 = 1201;
    pub const INTERNAL: i32 = 1500;
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("binary codec: {0}")]
    Binary(#[from] postcard::Error),
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gzip: {0}")]
    Compress(std::io::Error),
    #[error("frame of {size} bytes exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("unsupported sdkType {0:?}")]
    BadSdkType(String),
}

impl ProtoError {
    /// The wire-stable code a decode failure maps to.
    pub fn err_code(&self) -> i32 {
        match self {
            Self::BadSdkType(_) => errcode::ARGS,
            _ => errcode::PROTO_VIOLATION,
        }
    }
}
