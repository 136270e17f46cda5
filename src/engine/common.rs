// src/engine/common.rs
//
// Common utilities shared across engine modules:
// panic containment around codec calls and the decode deadline, with a
// cap on timed-out decode threads that are still running.

use crate::error::{LazyConvertError, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Run a codec call, converting any panic into `InternalPanic`.
///
/// Native codecs (mozjpeg in particular) report some failures by unwinding;
/// nothing may unwind across the public API.
pub(crate) fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(LazyConvertError::internal_panic(format!(
            "{stage}: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Timed-out decode threads allowed to keep running before new decodes are
/// refused with `DecodeBacklog`.
pub const MAX_STALLED_DECODES: usize = 16;

static STALLED_DECODES: AtomicUsize = AtomicUsize::new(0);

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Timed-out decode threads that have not exited yet.
pub fn stalled_decodes() -> usize {
    STALLED_DECODES.load(Ordering::Acquire)
}

/// Held by a decode helper thread. Releases the stalled slot on exit if the
/// caller gave up waiting.
struct HelperGuard {
    state: Arc<AtomicU8>,
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        if self.state.swap(FINISHED, Ordering::AcqRel) == ABANDONED {
            STALLED_DECODES.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Called by the waiting side on timeout. Counts the helper as stalled
/// unless it finished in the meantime.
fn abandon(state: &AtomicU8) {
    // Increment first so the helper's decrement can never run ahead of it
    STALLED_DECODES.fetch_add(1, Ordering::AcqRel);
    if state
        .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        STALLED_DECODES.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run `f` on a helper thread and wait at most `timeout` for it.
///
/// On expiry the caller gets `DecodeTimeout` for `name` immediately; the
/// helper keeps running and its late result is dropped. `f` runs under the
/// panic policy. While [`MAX_STALLED_DECODES`] timed-out helpers are still
/// alive, no new helper is spawned and `DecodeBacklog` is returned.
pub fn run_with_deadline<T, F>(name: &str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let stalled = stalled_decodes();
    if stalled >= MAX_STALLED_DECODES {
        warn!(target: "lazy_convert::decode", name, stalled, "decode backlog full, not starting decode");
        return Err(LazyConvertError::decode_backlog(stalled, MAX_STALLED_DECODES));
    }

    let state = Arc::new(AtomicU8::new(RUNNING));
    let guard = HelperGuard {
        state: Arc::clone(&state),
    };
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name("lazy-convert-decode".to_string())
        .spawn(move || {
            let _guard = guard;
            let result = run_with_panic_policy("decode", f);
            // The receiver is gone after a timeout
            let _ = tx.send(result);
        })
        .map_err(|e| {
            LazyConvertError::internal_panic(format!("failed to spawn decode thread: {e}"))
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            abandon(&state);
            Err(LazyConvertError::decode_timeout(
                name.to_string(),
                timeout.as_millis() as u64,
            ))
        }
        Err(RecvTimeoutError::Disconnected) => Err(LazyConvertError::internal_panic(
            "decode thread exited without a result",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_panic_becomes_internal_error() {
        let err = run_with_panic_policy::<(), _>("encode:test", || panic!("codec exploded"))
            .unwrap_err();
        assert!(matches!(err, LazyConvertError::InternalPanic { .. }));
        assert!(err.to_string().contains("codec exploded"));
    }

    #[test]
    fn test_deadline_passes_result_through() {
        let value = run_with_deadline("a.png", Duration::from_secs(5), || Ok(42)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_deadline_expires_on_hang() {
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let err = run_with_deadline("slow.png", timeout, || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        let elapsed = started.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= timeout);
        assert!(elapsed < Duration::from_millis(450));
        assert!(err.to_string().contains("slow.png"));
    }

    #[test]
    fn test_deadline_contains_panics() {
        let err = run_with_deadline::<(), _>("p.png", Duration::from_secs(5), || {
            panic!("decoder bug")
        })
        .unwrap_err();
        assert!(matches!(err, LazyConvertError::InternalPanic { .. }));
    }

    #[test]
    fn test_abandoned_helper_releases_on_exit() {
        let state = Arc::new(AtomicU8::new(RUNNING));
        let guard = HelperGuard {
            state: Arc::clone(&state),
        };
        abandon(&state);
        assert_eq!(state.load(Ordering::Acquire), ABANDONED);
        drop(guard);
        assert_eq!(state.load(Ordering::Acquire), FINISHED);
    }

    #[test]
    fn test_finished_helper_is_not_abandoned() {
        let state = Arc::new(AtomicU8::new(RUNNING));
        drop(HelperGuard {
            state: Arc::clone(&state),
        });
        abandon(&state);
        assert_eq!(state.load(Ordering::Acquire), FINISHED);
    }
}
