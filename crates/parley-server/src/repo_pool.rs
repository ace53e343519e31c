//! Checkout pool of repository handles.
//!
//! Storage calls are synchronous SQLite work. Each call checks out a
//! handle, runs on the blocking thread pool and returns the handle, so a
//! slow call only holds up the event that issued it. Writers are still
//! serialized by SQLite's `IMMEDIATE` transactions.

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::error;

use parley_store::ConversationRepository;

use crate::chat::{ChatError, Result};

type Handle = Box<dyn ConversationRepository>;

#[derive(Clone)]
pub struct RepositoryPool {
    idle: Arc<Mutex<Vec<Handle>>>,
    permits: Arc<Semaphore>,
}

impl RepositoryPool {
    /// Handles must all point at the same underlying store.
    pub fn new(handles: Vec<Handle>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(handles.len())),
            idle: Arc::new(Mutex::new(handles)),
        }
    }

    /// A pool over a single handle. Calls are serialized.
    pub fn single(handle: Handle) -> Self {
        Self::new(vec![handle])
    }

    pub fn size(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` against a checked-out handle on the blocking thread pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn ConversationRepository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ChatError::Unavailable("repository pool closed".into()))?;

        let Some(mut handle) = self.checkout() else {
            return Err(ChatError::Unavailable("no idle repository handle".into()));
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(handle.as_mut());
            (handle, result)
        })
        .await;

        match joined {
            Ok((handle, result)) => {
                self.checkin(handle);
                drop(permit);
                result
            }
            Err(e) => {
                // The handle went down with the task; shrink the pool to match.
                permit.forget();
                error!(error = %e, "Repository call panicked");
                Err(ChatError::Unavailable("repository call panicked".into()))
            }
        }
    }

    fn checkout(&self) -> Option<Handle> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
    }

    fn checkin(&self, handle: Handle) {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::types::UserId;
    use parley_store::Database;

    #[tokio::test]
    async fn test_handle_returns_to_pool() {
        let pool = RepositoryPool::single(Box::new(Database::open_in_memory().unwrap()));
        assert_eq!(pool.size(), 1);

        let user = UserId::new();
        let found = pool.run(move |repo| Ok(repo.get_user(&user)?)).await.unwrap();
        assert!(found.is_none());
        assert_eq!(pool.size(), 1);

        // Errors hand the handle back too.
        let failed: Result<()> = pool
            .run(|_| Err(ChatError::Validation("nope".into())))
            .await;
        assert!(matches!(failed, Err(ChatError::Validation(_))));
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_panicking_call_shrinks_pool() {
        let pool = RepositoryPool::new(vec![
            Box::new(Database::open_in_memory().unwrap()),
            Box::new(Database::open_in_memory().unwrap()),
        ]);

        let result: Result<()> = pool.run(|_| panic!("boom")).await;
        assert!(matches!(result, Err(ChatError::Unavailable(_))));
        assert_eq!(pool.size(), 1);

        let user = UserId::new();
        assert!(pool.run(move |repo| Ok(repo.get_user(&user)?)).await.is_ok());
    }
}
