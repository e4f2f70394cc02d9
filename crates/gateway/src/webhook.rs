use std::time::{Duration, SystemTime, UNIX_EPOCH};

use {serde_json::json, tracing::warn};

use tern_config::schema::{WebhookEndpoint, WebhooksConfig};

/// Fire-and-forget lifecycle callbacks: after-online, after-offline,
/// after-kick. Each event is POSTed asynchronously to its configured URL;
/// failures are logged and never retried.
pub struct WebhookEmitter {
    cfg: WebhooksConfig,
    client: reqwest::Client,
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl WebhookEmitter {
    pub fn new(cfg: WebhooksConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::builder()
                .build()
                .unwrap_or_default(),
        }
    }

    fn fire(&self, endpoint: &WebhookEndpoint, event: &'static str, mut body: serde_json::Value) {
        if !endpoint.enable || endpoint.url.is_empty() {
            return;
        }
        if let Some(map) = body.as_object_mut() {
            map.insert("sendTime".into(), json!(unix_millis()));
        }
        let client = self.client.clone();
        let url = endpoint.url.clone();
        let timeout = Duration::from_millis(endpoint.timeout_ms);
        tokio::spawn(async move {
            let res = client.post(&url).timeout(timeout).json(&body).send().await;
            match res {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(%url, event, status = %resp.status(), "webhook rejected");
                },
                Err(e) => warn!(%url, event, error = %e, "webhook failed"),
                _ => {},
            }
        });
    }

    pub fn after_user_online(
        &self,
        user_id: &str,
        platform_id: i32,
        is_background: bool,
        conn_id: &str,
    ) {
        self.fire(
            &self.cfg.after_user_online,
            "after_user_online",
            json!({
                "userID": user_id,
                "platformID": platform_id,
                "isBackground": is_background,
                "connID": conn_id,
            }),
        );
    }

    pub fn after_user_offline(&self, user_id: &str, platform_id: i32, conn_id: &str) {
        self.fire(
            &self.cfg.after_user_offline,
            "after_user_offline",
            json!({
                "userID": user_id,
                "platformID": platform_id,
                "connID": conn_id,
            }),
        );
    }

    pub fn after_user_kick_off(&self, user_id: &str, platform_id: i32) {
        self.fire(
            &self.cfg.after_user_kick_off,
            "after_user_kick_off",
            json!({
                "userID": user_id,
                "platformID": platform_id,
            }),
        );
    }
}
