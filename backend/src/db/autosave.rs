use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use caddie_core::Result;

pub type FlushFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Debounced flush: every [`AutoSave::schedule`] restarts the timer, so a burst
/// of writes produces one flush, `delay` after the last of them.
///
/// Only a timer that has not fired yet is superseded; a flush already under
/// way runs to completion, and flushes never overlap.
pub struct AutoSave {
    delay: Duration,
    dirty: Arc<AtomicBool>,
    running: Arc<tokio::sync::Mutex<()>>,
    pending: Mutex<Option<Pending>>,
    flush: FlushFn,
}

struct Pending {
    handle: JoinHandle<()>,
    /// Set by whichever side gets there first: the timer firing or a canceller.
    claimed: Arc<AtomicBool>,
}

impl Pending {
    /// Aborts the timer unless it already fired, in which case its flush keeps going.
    fn supersede(self) {
        if !self.claimed.swap(true, Ordering::SeqCst) {
            self.handle.abort();
        }
    }
}

async fn run(flush: &FlushFn, dirty: &AtomicBool, running: &tokio::sync::Mutex<()>) -> Result<()> {
    let _guard = running.lock().await;
    if !dirty.swap(false, Ordering::SeqCst) {
        return Ok(());
    }
    let res = flush().await;
    if res.is_err() {
        dirty.store(true, Ordering::SeqCst);
    }
    res
}

impl AutoSave {
    pub fn new<F, Fut>(delay: Duration, flush: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            delay,
            dirty: Arc::new(AtomicBool::new(false)),
            running: Arc::new(tokio::sync::Mutex::new(())),
            pending: Mutex::new(None),
            flush: Arc::new(move || flush().boxed()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Marks the database dirty and (re)starts the timer.
    pub fn schedule(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        let flush = self.flush.clone();
        let dirty = self.dirty.clone();
        let running = self.running.clone();
        let claimed = Arc::new(AtomicBool::new(false));
        let fired = claimed.clone();
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            match run(&flush, &dirty, &running).await {
                Ok(()) => log::debug!(target: "caddie::autosave", "snapshot flushed"),
                Err(e) => log::error!(target: "caddie::autosave", "flush failed: {}", e),
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = pending.replace(Pending { handle, claimed }) {
            old.supersede();
        }
    }

    /// Drops the pending timer without flushing. A flush already running is left to finish.
    pub fn cancel(&self) {
        if let Some(p) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take() {
            p.supersede();
        }
    }

    /// Cancels the timer and flushes now if anything is unsaved.
    pub async fn flush_now(&self) -> Result<()> {
        self.cancel();
        run(&self.flush, &self.dirty, &self.running).await
    }

    /// Like [`AutoSave::flush_now`], but flushes even when nothing changed.
    pub async fn force_flush(&self) -> Result<()> {
        self.cancel();
        self.dirty.store(true, Ordering::SeqCst);
        run(&self.flush, &self.dirty, &self.running).await
    }
}

impl Drop for AutoSave {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddie_core::StoreError;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, Instant};

    fn counting(delay_ms: u64, fail: bool) -> (AutoSave, Arc<Mutex<Vec<Instant>>>) {
        let flushes = Arc::new(Mutex::new(Vec::new()));
        let seen = flushes.clone();
        let auto = AutoSave::new(Duration::from_millis(delay_ms), move || {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(Instant::now());
                if fail {
                    Err(StoreError::Persist("disk full".into()))
                } else {
                    Ok(())
                }
            }
        });
        (auto, flushes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_flushes_once_after_last_write() {
        let (auto, flushes) = counting(100, false);
        let start = Instant::now();

        auto.schedule();
        sleep(Duration::from_millis(50)).await;
        auto.schedule();

        sleep(Duration::from_millis(99)).await;
        assert!(flushes.lock().unwrap().is_empty());

        sleep(Duration::from_millis(2)).await;
        {
            let flushes = flushes.lock().unwrap();
            assert_eq!(flushes.len(), 1);
            let at = flushes[0] - start;
            assert!(at >= Duration::from_millis(150) && at <= Duration::from_millis(151), "{at:?}");
        }
        assert!(!auto.is_dirty());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(flushes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_dirty() {
        let (auto, flushes) = counting(100, true);
        auto.schedule();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(flushes.lock().unwrap().len(), 1);
        assert!(auto.is_dirty());

        assert!(auto.flush_now().await.is_err());
        assert_eq!(flushes.lock().unwrap().len(), 2);
        assert!(auto.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_flush_now() {
        let (auto, flushes) = counting(100, false);
        auto.schedule();
        assert!(auto.is_pending());
        auto.cancel();
        assert!(!auto.is_pending());
        sleep(Duration::from_millis(500)).await;
        assert!(flushes.lock().unwrap().is_empty());
        assert!(auto.is_dirty());

        auto.flush_now().await.unwrap();
        assert_eq!(flushes.lock().unwrap().len(), 1);
        // nothing left to save
        auto.flush_now().await.unwrap();
        assert_eq!(flushes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_during_flush_lets_it_finish() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let seen = done.clone();
        let auto = AutoSave::new(Duration::from_millis(100), move || {
            let seen = seen.clone();
            async move {
                sleep(Duration::from_millis(50)).await;
                seen.lock().unwrap().push(Instant::now());
                Ok(())
            }
        });
        let start = Instant::now();

        auto.schedule();
        // the timer fired at 100ms, the flush is half way
        sleep(Duration::from_millis(120)).await;
        auto.schedule();

        sleep(Duration::from_millis(40)).await;
        {
            let done = done.lock().unwrap();
            assert_eq!(done.len(), 1);
            let at = done[0] - start;
            assert!(at >= Duration::from_millis(150) && at <= Duration::from_millis(151), "{at:?}");
        }

        // the write made during the flush gets its own
        sleep(Duration::from_millis(200)).await;
        assert_eq!(done.lock().unwrap().len(), 2);
        assert!(!auto.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_waits_for_running_flush() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, o, c) = (active.clone(), overlapped.clone(), calls.clone());
        let auto = AutoSave::new(Duration::from_millis(100), move || {
            let (a, o, c) = (a.clone(), o.clone(), c.clone());
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.store(true, Ordering::SeqCst);
                }
                sleep(Duration::from_millis(50)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        auto.schedule();
        sleep(Duration::from_millis(110)).await;
        auto.force_flush().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_writes_one_flush() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let auto = AutoSave::new(Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        for _ in 0..20 {
            auto.schedule();
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
