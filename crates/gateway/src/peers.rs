use std::sync::Arc;

use {
    futures::StreamExt,
    serde_json::json,
    tracing::{debug, warn},
};

use crate::state::GatewayState;

/// Tell every sibling gateway about a fresh local login so they can run the
/// multi-terminal policy against their own sessions.
///
/// Skipped entirely under a managed orchestrator (node-to-node coordination
/// is the orchestrator's job there). Failures are logged and ignored: the
/// local login has already won.
pub fn notify_siblings(
    state: Arc<GatewayState>,
    user_id: String,
    platform_id: i32,
    token: String,
    operation_id: String,
) {
    if state.config.gateway.managed_orchestrator {
        return;
    }
    let self_addr = state.services.discovery.self_addr();
    let siblings: Vec<String> = state
        .services
        .discovery
        .gateway_addrs()
        .into_iter()
        .filter(|addr| *addr != self_addr)
        .collect();
    if siblings.is_empty() {
        return;
    }

    let concurrency = state.config.peers.concurrency.max(1);
    tokio::spawn(async move {
        let body = json!({
            "userID": user_id,
            "platformID": platform_id,
            "token": token,
            "operationID": operation_id.clone(),
        });
        futures::stream::iter(siblings)
            .for_each_concurrent(concurrency, |addr| {
                let client = state.peer_client.clone();
                let body = body.clone();
                let operation_id = operation_id.clone();
                async move {
                    let url = format!("{}/api/multi_terminal_check", addr.trim_end_matches('/'));
                    match client.post(&url).json(&body).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            debug!(%url, operation_id, "sibling login check delivered");
                        },
                        Ok(resp) => {
                            warn!(%url, operation_id, status = %resp.status(), "sibling login check rejected");
                        },
                        Err(e) => {
                            warn!(%url, operation_id, error = %e, "sibling login check failed");
                        },
                    }
                }
            })
            .await;
    });
}
