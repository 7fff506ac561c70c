use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use parley_core::domain::conversation::ConversationId;

type LockMap = HashMap<ConversationId, Arc<AsyncMutex<()>>>;

/// Per-conversation mutual exclusion shared by the worker pool and the decision path.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl ConversationLocks {
    pub async fn acquire(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = self.map().entry(conversation_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops locks that nobody holds or waits on.
    pub fn prune(&self) {
        self.map().retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parley_core::domain::conversation::ConversationId;

    use super::ConversationLocks;

    async fn hold(locks: ConversationLocks, conversation: i64, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) {
        let _guard = locks.acquire(ConversationId(conversation)).await;
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        active.fetch_sub(1, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn same_conversation_is_serialized() {
        let locks = ConversationLocks::default();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| tokio::spawn(hold(locks.clone(), 42, active.clone(), peak.clone())))
            .collect();
        for task in tasks {
            task.await.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        locks.prune();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn different_conversations_run_in_parallel() {
        let locks = ConversationLocks::default();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..3)
            .map(|conversation| {
                tokio::spawn(hold(locks.clone(), conversation, active.clone(), peak.clone()))
            })
            .collect();
        for task in tasks {
            task.await.expect("task");
        }

        assert!(peak.load(Ordering::SeqCst) > 1);
    }
}
