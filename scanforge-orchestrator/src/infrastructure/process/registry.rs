//! Active process registry
//!
//! Maps live tracked processes to their OS pid and owning job. Guarded by
//! its own lock, separate from the job queue's, so kill requests never
//! contend with queue traffic.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ProcessHandle {
    pid: u32,
    job_id: Option<u64>,
    kill_requested: bool,
}

/// Registry of currently running tracked processes.
#[derive(Debug, Default)]
pub struct ActiveProcessRegistry {
    inner: Mutex<HashMap<Uuid, ProcessHandle>>,
}

impl ActiveProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ProcessHandle>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, record_id: Uuid, pid: u32, job_id: Option<u64>) {
        let mut inner = self.lock();
        inner.insert(
            record_id,
            ProcessHandle {
                pid,
                job_id,
                kill_requested: false,
            },
        );
        debug!(%record_id, pid, ?job_id, "Process registered");
    }

    pub fn deregister(&self, record_id: Uuid) {
        let mut inner = self.lock();
        if inner.remove(&record_id).is_some() {
            debug!(%record_id, "Process deregistered");
        }
    }

    /// Flag one process for termination. Returns false when the process is
    /// not (or no longer) registered.
    pub fn request_kill(&self, record_id: Uuid) -> bool {
        let mut inner = self.lock();
        match inner.get_mut(&record_id) {
            Some(handle) => {
                handle.kill_requested = true;
                true
            }
            None => false,
        }
    }

    /// Flag every process registered under a job. Returns how many were
    /// flagged.
    pub fn kill_all_for_job(&self, job_id: u64) -> usize {
        let mut inner = self.lock();
        let mut flagged = 0;
        for handle in inner.values_mut() {
            if handle.job_id == Some(job_id) {
                handle.kill_requested = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// Polled by the supervising loop.
    pub fn kill_requested(&self, record_id: Uuid) -> bool {
        let inner = self.lock();
        inner.get(&record_id).is_some_and(|h| h.kill_requested)
    }

    pub fn pid_of(&self, record_id: Uuid) -> Option<u32> {
        let inner = self.lock();
        inner.get(&record_id).map(|h| h.pid)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_kill_deregister() {
        let registry = ActiveProcessRegistry::new();
        let id = Uuid::new_v4();

        registry.register(id, 4242, Some(7));
        assert_eq!(registry.active_count(), 1);
        assert!(!registry.kill_requested(id));

        assert!(registry.request_kill(id));
        assert!(registry.kill_requested(id));

        registry.deregister(id);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.request_kill(id));
    }

    #[test]
    fn test_kill_all_for_job_only_touches_that_job() {
        let registry = ActiveProcessRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        registry.register(a, 1, Some(1));
        registry.register(b, 2, Some(1));
        registry.register(c, 3, Some(2));

        assert_eq!(registry.kill_all_for_job(1), 2);
        assert!(registry.kill_requested(a));
        assert!(registry.kill_requested(b));
        assert!(!registry.kill_requested(c));
    }
}
