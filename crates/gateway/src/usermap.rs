use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
    time::Instant,
};

use {
    tokio::sync::mpsc::{self, error::TrySendError},
    tracing::warn,
};

use tern_rpc::types::OnlineStatusChange;

use crate::client::Client;

/// All live sessions of one user on this node.
struct UserPlatformSet {
    last_touched: Instant,
    clients: Vec<Arc<Client>>,
}

/// Connection registry: user id → live sessions, with presence-change
/// emission on every mutation.
///
/// The presence channel is bounded and non-blocking: a full channel drops
/// the event with a warning. The periodic renewal sweep
/// ([`UserMap::get_all_user_status`]) is the backstop that reconverges
/// after drops, so readers must treat events as snapshot-plus-delta, not as
/// a reliable delta stream.
pub struct UserMap {
    users: RwLock<HashMap<String, UserPlatformSet>>,
    presence_tx: mpsc::Sender<OnlineStatusChange>,
}

impl UserMap {
    pub fn new(event_buffer: usize) -> (Self, mpsc::Receiver<OnlineStatusChange>) {
        let (presence_tx, presence_rx) = mpsc::channel(event_buffer.max(1));
        (
            Self {
                users: RwLock::new(HashMap::new()),
                presence_tx,
            },
            presence_rx,
        )
    }

    fn emit(&self, change: OnlineStatusChange) {
        if let Err(TrySendError::Full(change)) = self.presence_tx.try_send(change) {
            warn!(
                user_id = %change.user_id,
                "presence channel full, event dropped; renewal sweep will reconverge"
            );
        }
    }

    /// Unique, sorted platform ids of the given sessions.
    fn live_platforms(clients: &[Arc<Client>]) -> Vec<i32> {
        let mut ids: Vec<i32> = clients
            .iter()
            .map(|c| c.platform_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Register a session. Emits a presence event carrying the full live
    /// platform set (the event is emitted under the write lock, so per-user
    /// event order matches mutation order).
    pub fn insert(&self, client: Arc<Client>) {
        let Ok(mut users) = self.users.write() else {
            return;
        };
        let user_id = client.user_id.clone();
        let conn_id = client.conn_id.clone();
        let entry = users.entry(user_id.clone()).or_insert_with(|| UserPlatformSet {
            last_touched: Instant::now(),
            clients: Vec::new(),
        });
        entry.clients.push(client);
        entry.last_touched = Instant::now();
        let change = OnlineStatusChange {
            user_id,
            online_platform_ids: Self::live_platforms(&entry.clients),
            offline_platform_ids: Vec::new(),
            conn_id,
        };
        self.emit(change);
    }

    /// Remove the given sessions (matched by connection id). Returns `true`
    /// iff the user's entry was removed entirely. Emits a presence event
    /// whose `offline` list contains only platforms that just lost their
    /// last session.
    pub fn remove_clients(&self, user_id: &str, targets: &[Arc<Client>]) -> bool {
        let Ok(mut users) = self.users.write() else {
            return false;
        };
        let Some(entry) = users.get_mut(user_id) else {
            return false;
        };

        let target_ids: HashSet<&str> = targets.iter().map(|c| c.conn_id.as_str()).collect();
        let before = entry.clients.len();
        entry.clients.retain(|c| !target_ids.contains(c.conn_id.as_str()));
        if entry.clients.len() == before {
            return false;
        }

        let online = Self::live_platforms(&entry.clients);
        let offline: Vec<i32> = {
            let mut gone: Vec<i32> = targets
                .iter()
                .map(|c| c.platform_id)
                .collect::<HashSet<_>>()
                .into_iter()
                .filter(|p| !online.contains(p))
                .collect();
            gone.sort_unstable();
            gone
        };
        entry.last_touched = Instant::now();

        let user_gone = entry.clients.is_empty();
        if user_gone {
            users.remove(user_id);
        }

        self.emit(OnlineStatusChange {
            user_id: user_id.to_string(),
            online_platform_ids: online,
            offline_platform_ids: offline,
            conn_id: targets
                .first()
                .map(|c| c.conn_id.clone())
                .unwrap_or_default(),
        });
        user_gone
    }

    /// All live sessions of a user.
    pub fn get_all(&self, user_id: &str) -> Vec<Arc<Client>> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(user_id).map(|e| e.clients.clone()))
            .unwrap_or_default()
    }

    /// Sessions at `(user, platform)` plus existence flags:
    /// `(clients, user_exists, platform_has_clients)`.
    pub fn get(&self, user_id: &str, platform_id: i32) -> (Vec<Arc<Client>>, bool, bool) {
        let Ok(users) = self.users.read() else {
            return (Vec::new(), false, false);
        };
        match users.get(user_id) {
            None => (Vec::new(), false, false),
            Some(entry) => {
                let matched: Vec<Arc<Client>> = entry
                    .clients
                    .iter()
                    .filter(|c| c.platform_id == platform_id)
                    .cloned()
                    .collect();
                let any = !matched.is_empty();
                (matched, true, any)
            },
        }
    }

    /// Renewal sweep: snapshot every user whose entry was last touched at
    /// or before `deadline`, bumping their timestamp to `now`.
    pub fn get_all_user_status(
        &self,
        deadline: Instant,
        now: Instant,
    ) -> Vec<OnlineStatusChange> {
        let Ok(mut users) = self.users.write() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (user_id, entry) in users.iter_mut() {
            if entry.last_touched > deadline {
                continue;
            }
            entry.last_touched = now;
            out.push(OnlineStatusChange {
                user_id: user_id.clone(),
                online_platform_ids: Self::live_platforms(&entry.clients),
                offline_platform_ids: Vec::new(),
                conn_id: String::new(),
            });
        }
        out
    }

    /// A sibling node announced that `offline_platforms` of `user_id` just
    /// went offline there. If this node still holds live sessions for the
    /// user, re-emit the locally-known surviving set so subscribers
    /// reconverge on local truth.
    pub fn recv_sub_change(&self, user_id: &str, offline_platforms: &[i32]) {
        let Ok(users) = self.users.read() else {
            return;
        };
        let Some(entry) = users.get(user_id) else {
            return;
        };
        if entry.clients.is_empty() {
            return;
        }
        let online = Self::live_platforms(&entry.clients);
        self.emit(OnlineStatusChange {
            user_id: user_id.to_string(),
            online_platform_ids: online,
            offline_platform_ids: offline_platforms
                .iter()
                .copied()
                .filter(|p| {
                    !entry.clients.iter().any(|c| c.platform_id == *p)
                })
                .collect(),
            conn_id: String::new(),
        });
    }

    pub fn user_count(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn client_count(&self) -> usize {
        self.users
            .read()
            .map(|u| u.values().map(|e| e.clients.len()).sum())
            .unwrap_or(0)
    }

    /// Every live session on this node. Shutdown uses this to drain.
    pub fn all_clients(&self) -> Vec<Arc<Client>> {
        self.users
            .read()
            .map(|u| u.values().flat_map(|e| e.clients.iter().cloned()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use {tern_protocol::SdkKind, tokio::sync::mpsc::Receiver};

    use super::*;
    use crate::{
        context::ConnectParams, state::ClientEvent, transport::test_support::RecordingSink,
    };

    fn client(user: &str, platform: i32, conn_id: &str) -> Arc<Client> {
        let params = ConnectParams {
            user_id: user.into(),
            platform_id: platform,
            token: format!("tok-{conn_id}"),
            operation_id: "op".into(),
            compression: false,
            sdk_kind: SdkKind::Web,
            is_background: false,
            is_msg_resp: false,
        };
        let (tx, _rx) = mpsc::channel::<ClientEvent>(4);
        Client::new(
            &params,
            conn_id.into(),
            "127.0.0.1:1".into(),
            Box::new(RecordingSink::default()),
            tx,
        )
    }

    fn drain(rx: &mut Receiver<OnlineStatusChange>) -> Vec<OnlineStatusChange> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn insert_emits_full_online_set() {
        let (map, mut rx) = UserMap::new(16);
        map.insert(client("alice", 1, "c1"));
        map.insert(client("alice", 5, "c2"));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].online_platform_ids, vec![1]);
        assert_eq!(events[1].online_platform_ids, vec![1, 5]);
        assert!(events[1].offline_platform_ids.is_empty());
    }

    #[test]
    fn remove_reports_departed_platforms_only() {
        let (map, mut rx) = UserMap::new(16);
        let phone = client("bob", 1, "c1");
        let phone2 = client("bob", 1, "c2");
        let web = client("bob", 5, "c3");
        map.insert(phone.clone());
        map.insert(phone2);
        map.insert(web);
        drain(&mut rx);

        // One of two iOS sessions leaves: platform 1 is still live.
        assert!(!map.remove_clients("bob", &[phone]));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].online_platform_ids, vec![1, 5]);
        assert!(events[0].offline_platform_ids.is_empty());
    }

    #[test]
    fn removing_last_client_removes_user() {
        let (map, mut rx) = UserMap::new(16);
        let c = client("carol", 2, "c1");
        map.insert(c.clone());
        drain(&mut rx);

        assert!(map.remove_clients("carol", &[c]));
        assert_eq!(map.user_count(), 0);
        let events = drain(&mut rx);
        assert_eq!(events[0].online_platform_ids, Vec::<i32>::new());
        assert_eq!(events[0].offline_platform_ids, vec![2]);
    }

    #[test]
    fn get_reports_existence_flags() {
        let (map, _rx) = UserMap::new(16);
        map.insert(client("dave", 3, "c1"));

        let (clients, user_exists, platform_exists) = map.get("dave", 3);
        assert_eq!(clients.len(), 1);
        assert!(user_exists && platform_exists);

        let (clients, user_exists, platform_exists) = map.get("dave", 5);
        assert!(clients.is_empty());
        assert!(user_exists);
        assert!(!platform_exists);

        let (_, user_exists, _) = map.get("nobody", 1);
        assert!(!user_exists);
    }

    #[test]
    fn renewal_sweep_selects_stale_and_bumps() {
        let (map, _rx) = UserMap::new(16);
        map.insert(client("erin", 2, "c1"));

        let now = Instant::now();
        let later = now + std::time::Duration::from_secs(60);

        // Everyone is stale relative to a future deadline.
        let swept = map.get_all_user_status(later, later);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].user_id, "erin");
        assert_eq!(swept[0].online_platform_ids, vec![2]);

        // Timestamps were bumped to `later`; the same deadline selects nothing.
        assert!(map.get_all_user_status(later, later).is_empty());
    }

    #[test]
    fn overflow_drops_events_without_blocking() {
        let (map, mut rx) = UserMap::new(1);
        map.insert(client("frank", 1, "c1"));
        map.insert(client("frank", 2, "c2")); // dropped: channel depth 1
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        // The registry itself stayed consistent.
        assert_eq!(map.client_count(), 2);
    }

    #[test]
    fn recv_sub_change_reemits_surviving_set() {
        let (map, mut rx) = UserMap::new(16);
        map.insert(client("gwen", 3, "c1"));
        drain(&mut rx);

        // A sibling says platform 1 went offline; we still hold platform 3.
        map.recv_sub_change("gwen", &[1]);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].online_platform_ids, vec![3]);
        assert_eq!(events[0].offline_platform_ids, vec![1]);

        // Unknown user: nothing to reconverge.
        map.recv_sub_change("nobody", &[1]);
        assert!(drain(&mut rx).is_empty());
    }
}
