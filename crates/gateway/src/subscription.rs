use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

use crate::client::Client;

/// Bidirectional presence-subscription index.
///
/// Global side: subscribed user → subscribing sessions (keyed by connection
/// id). Per-session side: the client's own subscription set. Both sides are
/// kept consistent on subscribe, unsubscribe and disconnect; a user's bucket
/// is collected when its last subscriber leaves.
#[derive(Default)]
pub struct SubscriptionIndex {
    index: RwLock<HashMap<String, HashMap<String, Arc<Client>>>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a subscription delta for one session. A user appearing in both
    /// lists is a no-op. Returns the effectively added user ids (the caller
    /// answers those with their current online platform sets).
    pub fn subscribe(
        &self,
        client: &Arc<Client>,
        add: &[String],
        del: &[String],
    ) -> Vec<String> {
        let add_set: HashSet<&String> = add.iter().collect();
        let del_set: HashSet<&String> = del.iter().collect();
        let effective_add: Vec<String> = add
            .iter()
            .filter(|id| !del_set.contains(*id))
            .cloned()
            .collect();
        let effective_del: Vec<String> = del
            .iter()
            .filter(|id| !add_set.contains(*id))
            .cloned()
            .collect();

        if let Ok(mut index) = self.index.write() {
            for user_id in &effective_del {
                if let Some(bucket) = index.get_mut(user_id) {
                    bucket.remove(&client.conn_id);
                    if bucket.is_empty() {
                        index.remove(user_id);
                    }
                }
            }
            for user_id in &effective_add {
                index
                    .entry(user_id.clone())
                    .or_default()
                    .insert(client.conn_id.clone(), Arc::clone(client));
            }
        }
        client.apply_sub_delta(&effective_add, &effective_del);

        effective_add
    }

    /// Remove a disconnecting session from every bucket it subscribed to.
    pub fn del_client(&self, client: &Arc<Client>) {
        // Snapshot outside the index lock so the two locks never nest in
        // the opposite order of `subscribe`.
        let subscribed = client.sub_snapshot();
        if subscribed.is_empty() {
            return;
        }
        if let Ok(mut index) = self.index.write() {
            for user_id in &subscribed {
                if let Some(bucket) = index.get_mut(user_id) {
                    bucket.remove(&client.conn_id);
                    if bucket.is_empty() {
                        index.remove(user_id);
                    }
                }
            }
        }
        client.apply_sub_delta(&[], &subscribed);
    }

    /// Snapshot of the sessions subscribed to `user_id`.
    pub fn get_subscribers(&self, user_id: &str) -> Vec<Arc<Client>> {
        self.index
            .read()
            .ok()
            .and_then(|index| index.get(user_id).map(|b| b.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Number of users with at least one subscriber.
    pub fn subscribed_user_count(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }
}
