use std::{collections::HashSet, sync::Arc};

use tracing::{info, warn};

use {
    tern_config::LoginPolicy,
    tern_protocol::platform::{self, PlatformClass},
    tern_rpc::AuthService,
};

use crate::{client::Client, error::GatewayError, usermap::UserMap, webhook::WebhookEmitter};

/// Which existing local sessions must yield to a new `(user, platform)`
/// login under the given policy. Called before the new session is inserted,
/// so every match is a predecessor.
pub fn kick_targets(
    policy: LoginPolicy,
    registry: &UserMap,
    user_id: &str,
    new_platform_id: i32,
) -> Vec<Arc<Client>> {
    match policy {
        LoginPolicy::NoKick => Vec::new(),
        LoginPolicy::PcAllowsOthers => {
            if platform::class_of(new_platform_id) == PlatformClass::Pc {
                return Vec::new();
            }
            registry.get(user_id, new_platform_id).0
        },
        LoginPolicy::SameDeviceKick => registry.get(user_id, new_platform_id).0,
        LoginPolicy::SameClassKick => {
            let class = platform::class_of(new_platform_id);
            registry
                .get_all(user_id)
                .into_iter()
                .filter(|c| c.platform_class() == class)
                .collect()
        },
    }
}

/// Enforce the co-login policy for a new `(user, platform, token)`.
///
/// Kicked peers are removed from the registry, sent a kick frame, closed,
/// and their tokens invalidated (preserving the new login's token). Token
/// invalidation is best-effort and never blocks the register path. Returns
/// the platform ids that lost sessions.
pub async fn enforce(
    policy: LoginPolicy,
    registry: &UserMap,
    auth: &Arc<dyn AuthService>,
    webhooks: &Arc<WebhookEmitter>,
    user_id: &str,
    new_platform_id: i32,
    preserve_token: &str,
    operation_id: &str,
) -> Vec<i32> {
    let targets = kick_targets(policy, registry, user_id, new_platform_id);
    if targets.is_empty() {
        return Vec::new();
    }

    info!(
        user_id,
        platform = platform::name(new_platform_id),
        kicked = targets.len(),
        operation_id,
        "multi-terminal policy kicking peers"
    );

    registry.remove_clients(user_id, &targets);
    for client in &targets {
        client.kick(operation_id, GatewayError::Kicked).await;
        webhooks.after_user_kick_off(user_id, client.platform_id);
    }

    let platforms: HashSet<i32> = targets.iter().map(|c| c.platform_id).collect();
    for platform_id in &platforms {
        let auth = Arc::clone(auth);
        let user_id = user_id.to_string();
        let preserve = preserve_token.to_string();
        let operation_id = operation_id.to_string();
        let platform_id = *platform_id;
        tokio::spawn(async move {
            if let Err(e) = auth
                .invalidate_tokens(&user_id, platform_id, &preserve, &operation_id)
                .await
            {
                warn!(
                    user_id,
                    platform_id,
                    operation_id,
                    error = %e,
                    "token invalidation failed"
                );
            }
        });
    }

    platforms.into_iter().collect()
}

/// Cross-node check-in: a sibling gateway announced a new login. Run the
/// same policy against the local view, then re-emit the locally surviving
/// platform set so presence subscribers reconverge.
pub async fn enforce_remote(
    policy: LoginPolicy,
    registry: &UserMap,
    auth: &Arc<dyn AuthService>,
    webhooks: &Arc<WebhookEmitter>,
    user_id: &str,
    platform_id: i32,
    token: &str,
    operation_id: &str,
) {
    let kicked = enforce(
        policy,
        registry,
        auth,
        webhooks,
        user_id,
        platform_id,
        token,
        operation_id,
    )
    .await;
    if !kicked.is_empty() {
        registry.recv_sub_change(user_id, &kicked);
    }
}
