//! Periodic cleanup of expired sessions and rate-limit windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rate_limit::RateLimiter;
use crate::store::AuthStore;

/// Default sweep interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One cleanup pass. Returns the number of sessions purged.
pub async fn sweep_once(store: &dyn AuthStore, limiters: &[Arc<RateLimiter>]) -> u64 {
    let pruned: usize = limiters.iter().map(|l| l.purge_expired()).sum();
    if pruned > 0 {
        debug!(pruned, "Pruned stale rate-limit windows");
    }
    match store.purge_expired_sessions().await {
        Ok(purged) => {
            if purged > 0 {
                debug!(purged, "Purged expired sessions");
            }
            purged
        }
        Err(e) => {
            warn!(error = %e, "Failed to purge expired sessions");
            0
        }
    }
}

/// Spawn the sweeper; it stops when `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<dyn AuthStore>,
    limiters: Vec<Arc<RateLimiter>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_once(store.as_ref(), &limiters).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::models::auth::{ClientMeta, NewUser};
    use crate::store::{MemoryAuthStore, SessionStore, UserStore};

    async fn store_with_sessions() -> Arc<MemoryAuthStore> {
        let store = Arc::new(MemoryAuthStore::new());
        let user = store
            .insert_user(NewUser {
                email: "s@x.com".into(),
                username: None,
                first_name: "S".into(),
                last_name: "Weeper".into(),
                password_hash: None,
                is_admin: false,
                email_verified: false,
                avatar_url: None,
            })
            .await
            .unwrap();
        let meta = ClientMeta::default();
        store
            .create_session(&user.id, &meta, ChronoDuration::milliseconds(1))
            .await
            .unwrap();
        store
            .create_session(&user.id, &meta, ChronoDuration::days(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
    }

    #[tokio::test]
    async fn sweep_purges_expired_sessions_and_windows() {
        let store = store_with_sessions().await;
        let limiter = Arc::new(RateLimiter::new(5, ChronoDuration::milliseconds(1)));
        limiter.check("login");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let purged = sweep_once(store.as_ref(), &[limiter.clone()]).await;
        assert_eq!(purged, 1);
        assert_eq!(store.session_count(), 1);
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let store = store_with_sessions().await;
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            store.clone(),
            Vec::new(),
            Duration::from_millis(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.session_count(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
