use super::*;

/// Sessions keyed by user id. Each session sits behind its own lock so one
/// user's updates are applied in order while other users proceed.
#[derive(Default)]
pub(super) struct SessionStore {
    sessions: Mutex<HashMap<u64, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub(super) async fn lock(&self, user_id: u64) -> OwnedMutexGuard<Session> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(Session::default())))
                .clone()
        };
        slot.lock_owned().await
    }
}

/// Bounded pool for blocking work (archives, PDFs, downloads).
#[derive(Clone)]
pub(super) struct Workers {
    permits: Arc<Semaphore>,
}

impl Workers {
    pub(super) fn new(size: usize) -> Self {
        Workers {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub(super) async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("worker pool closed")?;
        tokio::task::spawn_blocking(task)
            .await
            .context("worker task failed")?
    }
}
