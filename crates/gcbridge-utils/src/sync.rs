//! Basic synchronization primitives.
//!
//! Every crate in the workspace takes its locks and atomics from here so the
//! choice of lock implementation lives in one place.
use std::cell::Cell;

pub use parking_lot::{Mutex, RwLock};
pub use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Cached bridge thread ID for the current thread, 0 until first use.
    static BRIDGE_THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Get a small, stable, process-unique ID for the calling thread.
///
/// IDs are handed out lazily in the order threads first ask for one.
pub fn get_current_thread_id() -> u64 {
    BRIDGE_THREAD_ID.with(|id| {
        let current = id.get();
        if current != 0 {
            return current;
        }
        let assigned = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        id.set(assigned);
        assigned
    })
}

/// Name of the calling thread as it should appear in reference logs.
pub fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_thread_id_is_stable() {
        let first = get_current_thread_id();
        assert_ne!(first, 0);
        assert_eq!(first, get_current_thread_id());
    }

    #[test]
    fn test_thread_ids_are_unique() {
        let here = get_current_thread_id();
        let there = thread::spawn(get_current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_thread_name() {
        let name = thread::Builder::new()
            .name("bridge-worker".into())
            .spawn(current_thread_name)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "bridge-worker");
    }
}
