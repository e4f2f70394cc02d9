use thiserror::Error;

/// Why a connection ended or a frame was refused. The variant decides the
/// propagation policy: transport-class errors close the connection, backend
/// errors stay in the reply.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection already closed")]
    ConnClosed,
    #[error("client sent close frame")]
    ClientClose,
    #[error("no frame within the pong window")]
    ReadTimeout,
    #[error("kicked by a newer login")]
    Kicked,
    #[error("kicked by admin")]
    AdminKick,
    #[error("client logged out")]
    Logout,
    #[error("server shutting down")]
    Shutdown,
    #[error("protocol violation: {0}")]
    ProtoViolation(String),
    #[error("handler panicked")]
    HandlerPanic,
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("transport: {0}")]
    Transport(#[from] axum::Error),
    #[error(transparent)]
    Proto(#[from] tern_protocol::ProtoError),
}

impl GatewayError {
    /// Whether this close reason is the normal end of a session rather than
    /// something worth a warning in the log.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::ConnClosed | Self::ClientClose | Self::Logout | Self::Kicked | Self::Shutdown
        )
    }
}
