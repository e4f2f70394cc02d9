//! Shared constructors for unit tests.

use std::sync::Arc;

use {tern_protocol::SdkKind, tokio::sync::mpsc};

use crate::{
    client::Client, context::ConnectParams, state::ClientEvent,
    transport::test_support::RecordingSink,
};

pub fn test_params(user: &str, platform: i32, token: &str) -> ConnectParams {
    ConnectParams {
        user_id: user.into(),
        platform_id: platform,
        token: token.into(),
        operation_id: "op-test".into(),
        compression: false,
        sdk_kind: SdkKind::Web,
        is_background: false,
        is_msg_resp: false,
    }
}

pub fn test_client(user: &str, platform: i32, conn_id: &str) -> Arc<Client> {
    test_client_with_sink(user, platform, conn_id, RecordingSink::default()).0
}

pub fn test_client_with_sink(
    user: &str,
    platform: i32,
    conn_id: &str,
    sink: RecordingSink,
) -> (Arc<Client>, mpsc::Receiver<ClientEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let client = Client::new(
        &test_params(user, platform, &format!("tok-{conn_id}")),
        conn_id.into(),
        "127.0.0.1:1".into(),
        Box::new(sink),
        tx,
    );
    (client, rx)
}
