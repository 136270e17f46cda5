// src/engine/executor.rs
//
// Where render+encode runs, and the thread pools the converter owns.
//
// - Inline: on the calling thread.
// - Background: on one lazily built worker thread shared by all converters.
//   The caller blocks until the work finishes; the point is keeping heavy
//   encodes off threads the host wants responsive.

use rayon::ThreadPool;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Selectable execution context for the render and encode stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    #[default]
    Inline,
    Background,
}

static BACKGROUND_WORKER: OnceLock<Option<ThreadPool>> = OnceLock::new();

impl ExecutionContext {
    /// Parse `inline` / `background` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "inline" => Some(Self::Inline),
            "background" | "worker" => Some(Self::Background),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Background => "background",
        }
    }

    /// Run `work` in this context and return its result.
    pub fn run<T, F>(self, work: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        match self {
            Self::Inline => work(),
            Self::Background => match background_worker() {
                Some(pool) => pool.install(work),
                None => {
                    warn!(target: "lazy_convert::executor", "background worker unavailable, running inline");
                    work()
                }
            },
        }
    }
}

fn background_worker() -> Option<&'static ThreadPool> {
    BACKGROUND_WORKER
        .get_or_init(|| build_pool(1, "lazy-convert-worker"))
        .as_ref()
}

/// Build a rayon pool, logging instead of failing when the OS refuses threads.
pub(crate) fn build_pool(threads: usize, name: &'static str) -> Option<ThreadPool> {
    let threads = threads.max(1);
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
    {
        Ok(pool) => {
            debug!(target: "lazy_convert::executor", name, threads, "thread pool ready");
            Some(pool)
        }
        Err(e) => {
            warn!(target: "lazy_convert::executor", name, threads, error = %e, "failed to build thread pool");
            None
        }
    }
}
