use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a loader mutex, recovering the guard if another holder panicked.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "pending batch may be incomplete after panic in another task",
                "Recovered from poisoned loader lock"
            );
            poisoned.into_inner()
        }
    }
}
