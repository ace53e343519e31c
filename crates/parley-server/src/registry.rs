//! Live WebSocket connections and per-user routing groups.
//!
//! Every connection gets an outbound channel. Once a connection is bound to
//! a user it joins that user's group, so an event addressed to the user
//! reaches every one of their open tabs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{debug, info};

use parley_shared::protocol::ServerEvent;
use parley_shared::types::{ConnectionId, UserId};

struct Connection {
    user: Option<UserId>,
    sender: UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<UserId, HashSet<ConnectionId>>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an anonymous connection.
    pub async fn register(&self, id: ConnectionId, sender: UnboundedSender<ServerEvent>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(id, Connection { user: None, sender });
        info!(
            connection_id = %id,
            total_connections = inner.connections.len(),
            "Connection registered"
        );
    }

    /// Join the connection to the user's routing group. Returns `false` if
    /// the connection is not registered.
    pub async fn bind(&self, id: ConnectionId, user: UserId) -> bool {
        let mut inner = self.inner.write().await;
        let previous = match inner.connections.get_mut(&id) {
            Some(conn) => conn.user.replace(user),
            None => return false,
        };

        if let Some(previous) = previous {
            remove_from_group(&mut inner.groups, &previous, &id);
        }
        inner.groups.entry(user).or_default().insert(id);

        debug!(connection_id = %id, user_id = %user, "Connection bound");
        true
    }

    /// Forget the connection. Returns the user it was bound to, if any.
    pub async fn unregister(&self, id: ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.write().await;
        let conn = inner.connections.remove(&id)?;

        if let Some(user) = conn.user {
            remove_from_group(&mut inner.groups, &user, &id);
        }

        info!(
            connection_id = %id,
            remaining_connections = inner.connections.len(),
            "Connection unregistered"
        );
        conn.user
    }

    /// Deliver to every connection in the user's group. Returns the number
    /// of connections reached.
    pub async fn send_to_user(&self, user: &UserId, event: &ServerEvent) -> usize {
        let inner = self.inner.read().await;
        let Some(group) = inner.groups.get(user) else {
            return 0;
        };

        group
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .filter(|conn| conn.sender.send(event.clone()).is_ok())
            .count()
    }

    pub async fn send_to_connection(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&id)
            .map(|conn| conn.sender.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Deliver to every open connection, bound or not.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|conn| conn.sender.send(event.clone()).is_ok())
            .count()
    }

    pub async fn group_size(&self, user: &UserId) -> usize {
        let inner = self.inner.read().await;
        inner.groups.get(user).map(HashSet::len).unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn remove_from_group(
    groups: &mut HashMap<UserId, HashSet<ConnectionId>>,
    user: &UserId,
    id: &ConnectionId,
) {
    if let Some(group) = groups.get_mut(user) {
        group.remove(id);
        if group.is_empty() {
            groups.remove(user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_user_group_reaches_every_tab() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();
        registry.register(c1, tx1).await;
        registry.register(c2, tx2).await;
        assert!(registry.bind(c1, user).await);
        assert!(registry.bind(c2, user).await);

        let event = ServerEvent::OnlineUser(vec![user]);
        assert_eq!(registry.send_to_user(&user, &event).await, 2);
        assert_eq!(rx1.recv().await, Some(event.clone()));
        assert_eq!(rx2.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_anonymous_connection_only_gets_broadcasts() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.register(id, tx).await;

        let stranger = UserId::new();
        let event = ServerEvent::OnlineUser(vec![]);
        assert_eq!(registry.send_to_user(&stranger, &event).await, 0);
        assert_eq!(registry.broadcast(&event).await, 1);
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_unregister_leaves_group() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.register(id, tx).await;
        registry.bind(id, user).await;
        assert_eq!(registry.group_size(&user).await, 1);

        assert_eq!(registry.unregister(id).await, Some(user));
        assert_eq!(registry.group_size(&user).await, 0);
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.unregister(id).await, None);
    }

    #[tokio::test]
    async fn test_bind_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.bind(ConnectionId::new(), UserId::new()).await);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_not_counted() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.register(id, tx).await;
        registry.bind(id, user).await;
        drop(rx);

        let event = ServerEvent::OnlineUser(vec![]);
        assert_eq!(registry.send_to_user(&user, &event).await, 0);
        assert!(!registry.send_to_connection(id, event).await);
    }
}
