use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pin the calling thread to the given CPU core.
///
/// Returns `false` if the core does not exist or the OS refused the request.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Unable to enumerate CPU cores, not pinning thread");
        return false;
    };

    match ids.into_iter().find(|id| id.id == core) {
        Some(id) => {
            let pinned = core_affinity::set_for_current(id);
            debug!(core, pinned, "Pinning thread");
            pinned
        }
        None => {
            warn!(core, "CPU core not found, not pinning thread");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn pinning_to_missing_core_fails() {
        assert!(!pin_current_thread(usize::MAX));
    }
}
