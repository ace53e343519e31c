//! Online presence, reference-counted per identity.
//!
//! A user is online while at least one of their connections is open. Only
//! the transitions 0 -> 1 and 1 -> 0 are reported to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use parley_shared::types::UserId;

#[derive(Clone, Default)]
pub struct PresenceService {
    connections: Arc<RwLock<HashMap<UserId, usize>>>,
}

impl PresenceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. Returns `true` if the user just came online.
    pub async fn connect(&self, user: UserId) -> bool {
        let mut connections = self.connections.write().await;
        let count = connections.entry(user).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one connection. Returns `true` if the user just went offline.
    pub async fn disconnect(&self, user: UserId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&user) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                connections.remove(&user);
                true
            }
            None => false,
        }
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.connections.read().await.contains_key(user)
    }

    /// Sorted list of online identities.
    pub async fn snapshot(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.connections.read().await.keys().copied().collect();
        users.sort();
        users
    }

    pub async fn connection_counts(&self) -> Vec<(UserId, usize)> {
        let mut counts: Vec<(UserId, usize)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(user, count)| (*user, *count))
            .collect();
        counts.sort();
        counts
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
