use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TernConfig {
    pub gateway: GatewayConfig,
    pub multi_terminal: MultiTerminalConfig,
    pub presence: PresenceConfig,
    pub push: PushConfig,
    pub rpc: RpcConfig,
    pub webhooks: WebhooksConfig,
    pub peers: PeersConfig,
}

/// Listener and connection-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Node-level cap on live connections; exceeding it answers HTTP 429.
    pub max_conns: usize,
    /// Set when running under an orchestrator that guarantees a single
    /// gateway per user shard; skips sibling-node login fan-out.
    pub managed_orchestrator: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 10001,
            max_conns: 100_000,
            managed_orchestrator: false,
        }
    }
}

/// Which concurrent sessions a user may hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoginPolicy {
    /// Never kick anything.
    NoKick,
    /// PC-class logins coexist; a non-PC login kicks same-platform peers.
    PcAllowsOthers,
    /// A new login kicks peers on the same (user, platform).
    #[default]
    SameDeviceKick,
    /// A new login kicks peers in the same platform class.
    SameClassKick,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiTerminalConfig {
    pub policy: LoginPolicy,
}

/// Presence engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Number of presence shards / worker tasks.
    pub concurrency: usize,
    /// Batch size at which a shard buffer is handed to its worker.
    pub batch_max: usize,
    /// Per-shard request channel depth.
    pub shard_queue: usize,
    /// Registry→engine presence event channel depth. Overflow drops events;
    /// the renewal sweep reconverges.
    pub event_buffer: usize,
    /// TTL of an online record in the user service. The renewal sweep runs
    /// every third of this.
    pub online_expire_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_max: 100,
            shard_queue: 64,
            event_buffer: 10_000,
            online_expire_secs: 180,
        }
    }
}

/// Batch-push worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub workers: usize,
    pub queue: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            workers: 512,
            queue: 16_384,
        }
    }
}

/// Backend service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub auth_url: String,
    pub user_url: String,
    pub msg_url: String,
    pub push_url: String,
    pub conversation_url: String,
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://127.0.0.1:10160".into(),
            user_url: "http://127.0.0.1:10110".into(),
            msg_url: "http://127.0.0.1:10130".into(),
            push_url: "http://127.0.0.1:10170".into(),
            conversation_url: "http://127.0.0.1:10180".into(),
            timeout_secs: 5,
        }
    }
}

/// One webhook callback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookEndpoint {
    pub enable: bool,
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for WebhookEndpoint {
    fn default() -> Self {
        Self {
            enable: false,
            url: String::new(),
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub after_user_online: WebhookEndpoint,
    pub after_user_offline: WebhookEndpoint,
    pub after_user_kick_off: WebhookEndpoint,
}

/// Sibling gateway nodes for cross-node login coordination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Base URLs of all gateway instances, e.g. `http://gw-2:10001`.
    pub addrs: Vec<String>,
    /// This node's own entry in `addrs`, for self-filtering.
    pub advertise_addr: String,
    /// Bound on concurrent sibling notifications.
    pub concurrency: usize,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            advertise_addr: String::new(),
            concurrency: 3,
        }
    }
}

impl TernConfig {
    /// Structural validation; returns every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.gateway.port == 0 {
            problems.push("gateway.port must be non-zero".into());
        }
        if self.gateway.max_conns == 0 {
            problems.push("gateway.max_conns must be at least 1".into());
        }
        if self.presence.concurrency == 0 {
            problems.push("presence.concurrency must be at least 1".into());
        }
        if self.presence.batch_max == 0 {
            problems.push("presence.batch_max must be at least 1".into());
        }
        if self.presence.online_expire_secs < 3 {
            problems.push("presence.online_expire_secs must be at least 3".into());
        }
        if self.push.workers == 0 {
            problems.push("push.workers must be at least 1".into());
        }
        if self.peers.concurrency == 0 {
            problems.push("peers.concurrency must be at least 1".into());
        }
        for (name, wh) in [
            ("after_user_online", &self.webhooks.after_user_online),
            ("after_user_offline", &self.webhooks.after_user_offline),
            ("after_user_kick_off", &self.webhooks.after_user_kick_off),
        ] {
            if wh.enable && wh.url.is_empty() {
                problems.push(format!("webhooks.{name} enabled without a url"));
            }
        }
        problems
    }

    /// Renewal sweep cadence: a third of the online-record TTL.
    pub fn renewal_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.presence.online_expire_secs / 3).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TernConfig::default().validate().is_empty());
    }

    #[test]
    fn policy_parses_kebab_case() {
        let cfg: TernConfig =
            toml::from_str("[multi_terminal]\npolicy = \"pc-allows-others\"").unwrap();
        assert_eq!(cfg.multi_terminal.policy, LoginPolicy::PcAllowsOthers);
    }

    #[test]
    fn enabled_webhook_needs_url() {
        let mut cfg = TernConfig::default();
        cfg.webhooks.after_user_online.enable = true;
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.contains("after_user_online")));
    }

    #[test]
    fn renewal_interval_is_a_third_of_expire() {
        let mut cfg = TernConfig::default();
        cfg.presence.online_expire_secs = 180;
        assert_eq!(cfg.renewal_interval(), std::time::Duration::from_secs(60));
    }
}
