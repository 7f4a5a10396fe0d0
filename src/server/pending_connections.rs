use std::net::SocketAddr;
use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::debug;

/// Peers that started a handshake (OPEN_CONNECTION_REQUEST_1) but did not complete its second
///  step yet. Entries expire after a configured time without activity.
#[derive(Default)]
pub struct PendingConnections {
    last_activity: FxHashMap<SocketAddr, Instant>,
}

impl PendingConnections {
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.last_activity.contains_key(addr)
    }

    pub fn touch(&mut self, addr: SocketAddr, now: Instant) {
        self.last_activity.insert(addr, now);
    }

    /// Records activity for an address that is already pending. Returns `false` if it is not.
    pub fn refresh(&mut self, addr: &SocketAddr, now: Instant) -> bool {
        match self.last_activity.get_mut(addr) {
            Some(last) => {
                *last = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> bool {
        self.last_activity.remove(addr).is_some()
    }

    pub fn evict_expired(&mut self, now: Instant, timeout: Duration) {
        self.last_activity.retain(|addr, last| {
            let keep = now.saturating_duration_since(*last) < timeout;
            if !keep {
                debug!("pending connection from {:?} expired", addr);
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.last_activity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_activity.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_eviction() {
        let a = SocketAddr::from(([1, 2, 3, 4], 5));
        let b = SocketAddr::from(([1, 2, 3, 4], 6));

        let mut pending = PendingConnections::default();
        let start = Instant::now();
        pending.touch(a, start);
        pending.touch(b, start + Duration::from_secs(10));
        assert_eq!(pending.len(), 2);

        pending.evict_expired(start + Duration::from_millis(29_999), Duration::from_secs(30));
        assert!(pending.contains(&a));

        pending.evict_expired(start + Duration::from_secs(30), Duration::from_secs(30));
        assert!(!pending.contains(&a));
        assert!(pending.contains(&b));

        assert!(pending.remove(&b));
        assert!(!pending.remove(&b));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_defers_eviction() {
        let a = SocketAddr::from(([1, 2, 3, 4], 5));
        let b = SocketAddr::from(([1, 2, 3, 4], 6));

        let mut pending = PendingConnections::default();
        let start = Instant::now();
        pending.touch(a, start);

        assert!(pending.refresh(&a, start + Duration::from_secs(20)));
        assert!(!pending.refresh(&b, start + Duration::from_secs(20)));
        assert!(!pending.contains(&b));

        pending.evict_expired(start + Duration::from_secs(40), Duration::from_secs(30));
        assert!(pending.contains(&a));
        pending.evict_expired(start + Duration::from_secs(50), Duration::from_secs(30));
        assert!(!pending.contains(&a));
    }
}
