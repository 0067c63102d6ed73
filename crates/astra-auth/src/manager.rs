//! Shared credential with bounded reuse
//!
//! The manager owns a single bearer token and a use counter. A token is handed
//! out at most `max_uses` times; the caller that finds it exhausted (or unset)
//! refreshes it from the `TokenSource` before anyone receives another value.
//!
//! Locking:
//! - `state` guards the token/counter read-modify-write and is never held
//!   across a network call.
//! - `refresh_lock` serializes refreshes. The `generation` counter lets a
//!   caller that waited on the refresh lock notice that someone else already
//!   refreshed, so one exhausted credential triggers exactly one refresh.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::source::TokenSource;

/// Credential state guarded by the manager's state lock.
#[derive(Default)]
struct CredentialState {
    token: Option<Secret<String>>,
    uses: u32,
    generation: u64,
    refreshes: u64,
    fetched_at: Option<SystemTime>,
}

impl CredentialState {
    /// Hand out the current token and count the use, if it has uses left.
    fn issue(&mut self, max_uses: u32) -> Option<Secret<String>> {
        let token = self.token.as_ref()?;
        if self.uses >= max_uses {
            return None;
        }
        self.uses += 1;
        Some(token.clone())
    }

    fn install(&mut self, token: Secret<String>) {
        self.token = Some(token);
        self.uses = 0;
        self.generation += 1;
        self.refreshes += 1;
        self.fetched_at = Some(SystemTime::now());
    }

    fn clear(&mut self) {
        self.token = None;
        self.uses = 0;
    }
}

/// Point-in-time view of the credential for health reporting. Never contains the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub has_token: bool,
    pub uses: u32,
    pub max_uses: u32,
    pub refreshes: u64,
    pub fetched_at_unix: Option<u64>,
}

/// Owner of the shared bearer token.
pub struct CredentialManager {
    source: Arc<dyn TokenSource>,
    max_uses: u32,
    state: Mutex<CredentialState>,
    refresh_lock: Mutex<()>,
}

impl CredentialManager {
    /// Create a manager with no token yet. The first `get()` refreshes.
    ///
    /// `max_uses` below 1 is treated as 1.
    pub fn new(source: Arc<dyn TokenSource>, max_uses: u32) -> Self {
        let max_uses = max_uses.max(1);
        info!(source = source.id(), max_uses, "credential manager initialized");
        Self {
            source,
            max_uses,
            state: Mutex::new(CredentialState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Take a token for one outbound call.
    ///
    /// Refreshes first when no token is held or the current one has been issued
    /// `max_uses` times. Returns `CredentialUnavailable` if the refresh fails;
    /// the credential then stays unset so the next call refreshes again.
    pub async fn get(&self) -> Result<Secret<String>> {
        loop {
            let observed = {
                let mut state = self.state.lock().await;
                if let Some(token) = state.issue(self.max_uses) {
                    return Ok(token);
                }
                state.generation
            };

            let _refreshing = self.refresh_lock.lock().await;
            if self.state.lock().await.generation != observed {
                // Another caller refreshed while we waited
                continue;
            }
            self.refresh_locked().await?;
        }
    }

    /// Refresh unconditionally, regardless of remaining uses.
    pub async fn force_refresh(&self) -> Result<()> {
        let _refreshing = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Drop the current token if it is still `stale`.
    ///
    /// Called after the remote API rejected `stale`. Returns false when the
    /// credential was already replaced, so concurrent rejections of the same
    /// token lead to a single refresh.
    pub async fn invalidate(&self, stale: &Secret<String>) -> bool {
        let mut state = self.state.lock().await;
        match &state.token {
            Some(current) if current == stale => {
                state.clear();
                info!("credential invalidated after rejection");
                true
            }
            _ => {
                debug!("rejected credential already replaced");
                false
            }
        }
    }

    /// Health view of the credential.
    pub async fn snapshot(&self) -> CredentialSnapshot {
        let state = self.state.lock().await;
        CredentialSnapshot {
            has_token: state.token.is_some(),
            uses: state.uses,
            max_uses: self.max_uses,
            refreshes: state.refreshes,
            fetched_at_unix: state
                .fetched_at
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
        }
    }

    /// Fetch from the source and install the result. Caller holds `refresh_lock`.
    async fn refresh_locked(&self) -> Result<()> {
        match self.source.fetch().await {
            Ok(token) => {
                let generation = {
                    let mut state = self.state.lock().await;
                    state.install(token);
                    state.generation
                };
                metrics::counter!("credential_refresh_total", "result" => "success").increment(1);
                info!(source = self.source.id(), generation, "credential refreshed");
                Ok(())
            }
            Err(e) => {
                self.state.lock().await.clear();
                metrics::counter!("credential_refresh_total", "result" => "failure").increment(1);
                warn!(source = self.source.id(), error = %e, "credential refresh failed");
                Err(Error::CredentialUnavailable(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    /// Source issuing `tok-1`, `tok-2`, ... and counting fetches.
    /// Optionally fails while `failing` is set, and sleeps to widen race windows.
    struct CountingSource {
        fetches: AtomicU64,
        failing: AtomicBool,
        delay: Duration,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicU64::new(0),
                failing: AtomicBool::new(false),
                delay,
            })
        }

        fn fetches(&self) -> u64 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl TokenSource for CountingSource {
        fn id(&self) -> &str {
            "counting"
        }

        fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
                if self.failing.load(Ordering::SeqCst) {
                    return Err(Error::SessionExchange("login endpoint down".into()));
                }
                Ok(Secret::new(format!("tok-{n}")))
            })
        }
    }

    #[tokio::test]
    async fn first_get_fetches_token() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 3);

        let token = manager.get().await.unwrap();
        assert_eq!(token.expose(), "tok-1");
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn token_reused_until_max_uses_then_refreshed() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 3);

        let issued: Vec<String> = {
            let mut v = Vec::new();
            for _ in 0..7 {
                v.push(manager.get().await.unwrap().expose().clone());
            }
            v
        };

        assert_eq!(
            issued,
            vec!["tok-1", "tok-1", "tok-1", "tok-2", "tok-2", "tok-2", "tok-3"]
        );
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn uses_never_exceed_max_uses() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source, 4);

        for _ in 0..10 {
            manager.get().await.unwrap();
            let snapshot = manager.snapshot().await;
            assert!(snapshot.uses <= snapshot.max_uses, "{snapshot:?}");
            assert!(snapshot.uses >= 1);
        }
    }

    #[tokio::test]
    async fn refresh_failure_leaves_credential_unset_and_next_call_retries() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 2);

        source.failing.store(true, Ordering::SeqCst);
        let err = manager.get().await.unwrap_err();
        assert!(matches!(err, Error::CredentialUnavailable(_)), "got: {err}");
        assert!(!manager.snapshot().await.has_token);

        source.failing.store(false, Ordering::SeqCst);
        let token = manager.get().await.unwrap();
        assert_eq!(token.expose(), "tok-2");
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn refresh_failure_after_exhaustion_does_not_reuse_stale_token() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 1);

        assert_eq!(manager.get().await.unwrap().expose(), "tok-1");
        source.failing.store(true, Ordering::SeqCst);
        assert!(manager.get().await.is_err());
        assert!(manager.get().await.is_err());
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test]
    async fn invalidate_only_clears_matching_token() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 10);

        let stale = manager.get().await.unwrap();
        assert!(manager.invalidate(&stale).await);
        // Second rejection of the same token must not clear the replacement
        let fresh = manager.get().await.unwrap();
        assert_eq!(fresh.expose(), "tok-2");
        assert!(!manager.invalidate(&stale).await);
        assert_eq!(manager.get().await.unwrap().expose(), "tok-2");
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn force_refresh_replaces_token_with_uses_left() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 10);

        manager.get().await.unwrap();
        manager.force_refresh().await.unwrap();
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.uses, 0);
        assert_eq!(snapshot.refreshes, 2);
        assert!(snapshot.fetched_at_unix.is_some());
        assert_eq!(manager.get().await.unwrap().expose(), "tok-2");
    }

    #[tokio::test]
    async fn zero_max_uses_is_clamped_to_one() {
        let source = CountingSource::new();
        let manager = CredentialManager::new(source.clone(), 0);
        manager.get().await.unwrap();
        manager.get().await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_refresh_once_per_max_uses_calls() {
        const MAX_USES: u32 = 5;
        const ROUNDS: u64 = 8;
        const TASKS: usize = 8;

        let source = CountingSource::with_delay(Duration::from_millis(2));
        let manager = Arc::new(CredentialManager::new(source.clone(), MAX_USES));

        let total_calls = MAX_USES as usize * ROUNDS as usize;
        let per_task = total_calls / TASKS;
        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let mut tokens = Vec::new();
                for _ in 0..per_task {
                    tokens.push(manager.get().await.unwrap().expose().clone());
                    let snapshot = manager.snapshot().await;
                    assert!(snapshot.uses <= snapshot.max_uses);
                }
                tokens
            }));
        }

        let mut counts = std::collections::HashMap::<String, u32>::new();
        for handle in handles {
            for token in handle.await.unwrap() {
                *counts.entry(token).or_default() += 1;
            }
        }

        assert_eq!(source.fetches(), ROUNDS, "one refresh per exhausted credential");
        assert!(
            counts.values().all(|&n| n <= MAX_USES),
            "no token issued more than max_uses times: {counts:?}"
        );
    }
}
