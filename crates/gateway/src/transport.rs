use {
    async_trait::async_trait,
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::SplitSink},
};

use crate::error::GatewayError;

/// The write half of one live transport.
///
/// Production wraps an axum WebSocket sink; tests substitute a recording
/// double so write ordering, kick frames and push skips can be asserted
/// without a socket.
#[async_trait]
pub trait ConnSink: Send {
    async fn send(&mut self, msg: Message) -> Result<(), GatewayError>;
    async fn close(&mut self) -> Result<(), GatewayError>;
}

pub struct WsSink(pub SplitSink<WebSocket, Message>);

#[async_trait]
impl ConnSink for WsSink {
    async fn send(&mut self, msg: Message) -> Result<(), GatewayError> {
        self.0.send(msg).await.map_err(GatewayError::from)
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        self.0.send(Message::Close(None)).await.map_err(GatewayError::from)
    }
}

/// Test doubles, kept in the library (like the `tern-rpc` mocks) so both
/// unit and integration tests can reach them.
pub mod test_support {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;

    /// Records every frame; can be told to fail or stall.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        frames: Arc<Mutex<Vec<Message>>>,
        closed: Arc<AtomicBool>,
        fail_writes: Arc<AtomicBool>,
        delay: Arc<Mutex<Option<Duration>>>,
    }

    impl RecordingSink {
        pub fn frames(&self) -> Vec<Message> {
            self.frames.lock().map(|f| f.clone()).unwrap_or_default()
        }

        pub fn closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Duration) {
            if let Ok(mut d) = self.delay.lock() {
                *d = Some(delay);
            }
        }
    }

    #[async_trait]
    impl ConnSink for RecordingSink {
        async fn send(&mut self, msg: Message) -> Result<(), GatewayError> {
            let delay = self.delay.lock().ok().and_then(|d| *d);
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(GatewayError::ProtoViolation("induced write failure".into()));
            }
            if let Ok(mut frames) = self.frames.lock() {
                frames.push(msg);
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), GatewayError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
