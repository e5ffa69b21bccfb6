//! Admission Control
//!
//! Bounds the number of executions each caller may have running at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

/// Default per-caller limit.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Per-caller counters guarded by a single lock.
#[derive(Debug)]
pub struct AdmissionController {
    max_concurrent: usize,
    running: Mutex<HashMap<String, usize>>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl AdmissionController {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Takes a slot for `caller` if one is free.
    pub fn try_acquire(&self, caller: &str) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let count = running.entry(caller.to_string()).or_insert(0);
        if *count >= self.max_concurrent {
            debug!("Admission rejected for '{}' ({} running)", caller, count);
            return false;
        }
        *count += 1;
        true
    }

    /// Gives back a slot. Releasing an idle caller is a no-op.
    pub fn release(&self, caller: &str) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = running.get_mut(caller) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(caller);
            }
        }
    }

    /// Executions currently admitted for `caller`.
    pub fn running(&self, caller: &str) -> usize {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(caller)
            .copied()
            .unwrap_or(0)
    }

    /// Like [`try_acquire`](Self::try_acquire), returning a permit that
    /// releases the slot when dropped.
    pub fn acquire(self: &Arc<Self>, caller: &str) -> Option<AdmissionPermit> {
        self.try_acquire(caller).then(|| AdmissionPermit {
            controller: Arc::clone(self),
            caller: caller.to_string(),
        })
    }
}

/// Holds one admission slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    caller: String,
}

impl AdmissionPermit {
    pub fn caller(&self) -> &str {
        &self.caller
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release(&self.caller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_per_caller() {
        let controller = AdmissionController::new(3);

        assert!(controller.try_acquire("u1"));
        assert!(controller.try_acquire("u1"));
        assert!(controller.try_acquire("u1"));
        assert!(!controller.try_acquire("u1"));
        assert!(controller.try_acquire("u2"));

        controller.release("u1");
        assert!(controller.try_acquire("u1"));
        assert_eq!(controller.running("u1"), 3);
    }

    #[test]
    fn test_release_of_idle_caller_is_noop() {
        let controller = AdmissionController::new(1);
        controller.release("nobody");
        assert_eq!(controller.running("nobody"), 0);
        assert!(controller.try_acquire("nobody"));
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let controller = Arc::new(AdmissionController::new(1));

        let permit = controller.acquire("u1").unwrap();
        assert_eq!(permit.caller(), "u1");
        assert!(controller.acquire("u1").is_none());

        drop(permit);
        assert_eq!(controller.running("u1"), 0);
        assert!(controller.acquire("u1").is_some());
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let controller = Arc::new(AdmissionController::new(3));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || controller.try_acquire("shared"))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 3);
        assert_eq!(controller.running("shared"), 3);
    }
}
