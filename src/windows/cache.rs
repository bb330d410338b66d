use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};

use super::{WindowId, WindowManager};

/// Smallest pause between refreshes while waiting for the first window.
const MIN_WAIT_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct Entry {
    window_ids: Vec<WindowId>,
    captured_at: Instant,
}

/// Ttl-bounded cache of the child's window handles.
///
/// A read never returns a list older than `ttl`: an expired entry is
/// refreshed (awaited) before it is returned. The cache belongs to the
/// coordination context and is not shared.
pub struct WindowListCache {
    wm: Arc<dyn WindowManager>,
    ttl: Duration,
    owner: Option<u32>,
    entry: Option<Entry>,
    refreshes: u64,
}

impl WindowListCache {
    pub fn new(wm: Arc<dyn WindowManager>, ttl: Duration) -> Self {
        Self {
            wm,
            ttl,
            owner: None,
            entry: None,
            refreshes: 0,
        }
    }

    /// Process whose windows are cached.
    pub fn owner(&self) -> Option<u32> {
        self.owner
    }

    /// Switches to another owner (or none); the cached list is dropped.
    pub fn set_owner(&mut self, pid: Option<u32>) {
        if self.owner != pid {
            self.owner = pid;
            self.invalidate();
        }
    }

    /// Forces the next [`get`](Self::get) to refresh.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Number of window-manager queries issued so far.
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Returns the owner's windows, refreshing when the entry is older than `ttl`.
    pub async fn get(&mut self) -> Vec<WindowId> {
        if let Some(entry) = &self.entry
            && entry.captured_at.elapsed() <= self.ttl
        {
            return entry.window_ids.clone();
        }
        self.refresh().await
    }

    async fn refresh(&mut self) -> Vec<WindowId> {
        let Some(pid) = self.owner else {
            self.entry = None;
            return Vec::new();
        };
        self.refreshes += 1;
        let window_ids = self.wm.list_window_ids(pid).await;
        self.entry = Some(Entry {
            window_ids: window_ids.clone(),
            captured_at: Instant::now(),
        });
        window_ids
    }

    /// Refreshes until the owner has at least one window or `timeout` passes.
    ///
    /// Returns the last list seen (empty on timeout).
    pub async fn wait_for_windows(&mut self, timeout: Duration) -> Vec<WindowId> {
        let deadline = Instant::now() + timeout;
        loop {
            let ids = self.get().await;
            if !ids.is_empty() || self.owner.is_none() {
                return ids;
            }
            let now = Instant::now();
            if now >= deadline {
                return ids;
            }
            let step = self.ttl.max(MIN_WAIT_STEP).min(deadline - now);
            time::sleep(step).await;
            self.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports a growing window list and counts queries.
    #[derive(Default)]
    struct FakeWm {
        calls: AtomicUsize,
        appear_after: usize,
        activated: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl WindowManager for FakeWm {
        async fn activate_windows(&self, pid: u32) -> bool {
            self.activated.lock().unwrap().push(pid);
            true
        }

        async fn list_window_ids(&self, pid: u32) -> Vec<WindowId> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.appear_after {
                vec![u64::from(pid) * 10, n as u64]
            } else {
                Vec::new()
            }
        }
    }

    fn cache(wm: Arc<FakeWm>) -> WindowListCache {
        let mut c = WindowListCache::new(wm, Duration::from_millis(300));
        c.set_owner(Some(7));
        c
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl_hits_cache() {
        let wm = Arc::new(FakeWm::default());
        let mut c = cache(wm.clone());

        let first = c.get().await;
        time::advance(Duration::from_millis(100)).await;
        let second = c.get().await;

        assert_eq!(first, second);
        assert_eq!(wm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_refreshes_exactly_once() {
        let wm = Arc::new(FakeWm::default());
        let mut c = cache(wm.clone());

        c.get().await;
        time::advance(Duration::from_millis(301)).await;
        let fresh = c.get().await;
        let again = c.get().await;

        assert_eq!(fresh, again);
        assert_eq!(wm.calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.refreshes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_owner_change_force_refresh() {
        let wm = Arc::new(FakeWm::default());
        let mut c = cache(wm.clone());

        c.get().await;
        c.invalidate();
        c.get().await;
        c.set_owner(Some(7));
        c.get().await;
        assert_eq!(wm.calls.load(Ordering::SeqCst), 2);

        c.set_owner(Some(8));
        assert_eq!(c.get().await[0], 80);
        assert_eq!(wm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_owner_never_queries() {
        let wm = Arc::new(FakeWm::default());
        let mut c = WindowListCache::new(wm.clone(), Duration::from_millis(300));
        assert!(c.get().await.is_empty());
        assert!(c.wait_for_windows(Duration::from_secs(1)).await.is_empty());
        assert_eq!(wm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_windows_polls_until_first_window() {
        let wm = Arc::new(FakeWm {
            appear_after: 3,
            ..Default::default()
        });
        let mut c = cache(wm.clone());
        let ids = c.wait_for_windows(Duration::from_secs(5)).await;
        assert_eq!(ids.len(), 2);
        assert_eq!(wm.calls.load(Ordering::SeqCst), 4);
        assert!(wm.activated.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_windows_is_bounded() {
        let wm = Arc::new(FakeWm {
            appear_after: usize::MAX,
            ..Default::default()
        });
        let mut c = cache(wm);
        let started = Instant::now();
        assert!(c.wait_for_windows(Duration::from_secs(1)).await.is_empty());
        assert!(started.elapsed() <= Duration::from_millis(1_400));
    }
}
