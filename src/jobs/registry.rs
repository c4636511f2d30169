use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// PIDs this orchestrator instance spawned itself. Process-local on purpose:
/// a PID recorded by a sibling instance is never signalled from here.
#[derive(Debug, Default)]
pub struct SpawnedPidRegistry {
    pids: Mutex<HashSet<u32>>,
}

impl SpawnedPidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.pids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, pid: u32) {
        self.lock().insert(pid);
    }

    /// Called once the process has exited so a recycled PID is not trusted.
    pub fn release(&self, pid: u32) -> bool {
        self.lock().remove(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.lock().contains(&pid)
    }

    /// Runs `f` only while `pid` is registered, holding the registry lock so
    /// the exit path cannot release the pid until `f` returns.
    pub fn with_registered<R>(&self, pid: u32, f: impl FnOnce() -> R) -> Option<R> {
        let pids = self.lock();
        if pids.contains(&pid) {
            Some(f())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
