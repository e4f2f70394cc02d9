use thiserror::Error;

/// Error from a backend RPC call. Backend-reported failures carry the
/// backend's numeric code, which is surfaced to clients unchanged.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),
    #[error("backend error {code}: {message}")]
    Backend { code: i32, message: String },
    #[error("token invalid: {0}")]
    AuthInvalid(String),
    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RpcError {
    /// Wire-stable code to place in `Reply.err_code`.
    pub fn err_code(&self) -> i32 {
        match self {
            Self::Backend { code, .. } => *code,
            // 1002 / 1100: see tern-protocol errcode table.
            Self::AuthInvalid(_) => 1002,
            Self::Transport(_) | Self::Timeout(_) | Self::Decode(_) => 1100,
        }
    }
}
