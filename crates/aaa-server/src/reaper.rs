//! Periodic maintenance: force-stop stale sessions, prune old stopped
//! ones, expire the duplicate-response cache.
//!
//! A NAS that loses power sends no Accounting-Stop, so its sessions
//! would pin concurrency slots forever. The reaper closes any active
//! session that has gone quiet for longer than the stale threshold,
//! with Session-Timeout as the recorded cause.

use crate::cache::ResponseCache;
use crate::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct Reaper {
    store: Arc<SessionStore>,
    cache: Arc<ResponseCache>,
    interval: Duration,
    stale_after: Duration,
    retain_stopped: usize,
}

impl Reaper {
    pub fn new(
        store: Arc<SessionStore>,
        cache: Arc<ResponseCache>,
        interval: Duration,
        stale_after: Duration,
        retain_stopped: usize,
    ) -> Self {
        Reaper {
            store,
            cache,
            interval,
            stale_after,
            retain_stopped,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so a restart
            // does not sweep before the NAS has a chance to re-report.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    /// One maintenance pass. Separate from the loop so tests can
    /// drive it directly.
    pub fn sweep(&self) {
        let reaped = self.store.sweep_stale(self.stale_after);
        for session in &reaped {
            info!(
                session_id = %session.session_id,
                username = %session.username,
                nas = %session.nas_identifier,
                stale_after_secs = self.stale_after.as_secs(),
                "force-stopped stale session"
            );
        }

        let pruned = self.store.prune_stopped(self.retain_stopped);
        let expired = self.cache.purge_expired();
        if pruned > 0 || expired > 0 {
            debug!(pruned, expired, "maintenance pass complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStart;
    use aaa_proto::AcctTerminateCause;

    fn reaper(stale_after: Duration) -> (Reaper, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(Duration::from_secs(10)));
        let cache = Arc::new(ResponseCache::new(Duration::ZERO, 16));
        let reaper = Reaper::new(
            store.clone(),
            cache,
            Duration::from_secs(60),
            stale_after,
            2,
        );
        (reaper, store)
    }

    fn start(session_id: &str) -> SessionStart {
        SessionStart {
            session_id: session_id.to_string(),
            username: "alice".to_string(),
            nas_identifier: "vpn1".to_string(),
            nas_ip: "10.0.0.1".parse().unwrap(),
            framed_ip: None,
            calling_station: None,
        }
    }

    #[test]
    fn sweep_reaps_silent_sessions_and_frees_slots() {
        let (reaper, store) = reaper(Duration::ZERO);
        store.start_session(start("s1"));

        reaper.sweep();

        assert_eq!(store.active_count("alice"), 0);
        assert_eq!(
            store.get_session("s1").unwrap().terminate_cause,
            Some(AcctTerminateCause::SessionTimeout)
        );
        // The slot is free again.
        assert!(store.reserve("alice", 1).is_ok());
    }

    #[test]
    fn sweep_leaves_fresh_sessions_alone() {
        let (reaper, store) = reaper(Duration::from_secs(3600));
        store.start_session(start("s1"));

        reaper.sweep();
        assert_eq!(store.active_count("alice"), 1);
    }

    #[test]
    fn sweep_prunes_beyond_retention() {
        let (reaper, store) = reaper(Duration::ZERO);
        for i in 0..4 {
            store.start_session(start(&format!("s{i}")));
        }

        // First pass stops all four, second prunes down to two.
        reaper.sweep();
        reaper.sweep();

        let kept = (0..4)
            .filter(|i| store.get_session(&format!("s{i}")).is_some())
            .count();
        assert_eq!(kept, 2);
    }
}
