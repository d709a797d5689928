//! Engine configuration.

use std::time::Duration;

/// Tunables of the membership engine.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Extra subscription offers a contact point requests beyond its own
    /// fan-out.
    pub extra_offers: usize,

    /// Interval between weight renormalization rounds.
    pub weight_update: Duration,

    /// Lease interval forcing periodic resubscription; `None` disables the
    /// mechanism.
    pub lease: Option<Duration>,

    /// Settle delay before offer-bearing messages are sent, so the transport
    /// can finish producing signaling fragments.
    pub settle_delay: Duration,

    /// Capacity of the reverse-routing table.
    pub backtrack_capacity: usize,

    /// Age after which an abandoned handshake is dropped; `None` keeps
    /// pending links around forever.
    pub pending_ttl: Option<Duration>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            extra_offers: 0,
            weight_update: Duration::from_millis(30_000),
            lease: None,
            settle_delay: Duration::from_millis(1_500),
            backtrack_capacity: 500,
            pending_ttl: None,
        }
    }
}

impl MembershipConfig {
    /// Create a config optimized for in-memory overlays (tests, demos).
    #[must_use]
    pub fn fast() -> Self {
        Self {
            settle_delay: Duration::from_millis(10),
            weight_update: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// Set the number of extra offers requested by contact points.
    #[must_use]
    pub fn with_extra_offers(mut self, extra_offers: usize) -> Self {
        self.extra_offers = extra_offers;
        self
    }

    /// Set the weight renormalization interval.
    #[must_use]
    pub fn with_weight_update(mut self, interval: Duration) -> Self {
        self.weight_update = interval;
        self
    }

    /// Enable the lease mechanism with the given interval.
    #[must_use]
    pub fn with_lease(mut self, interval: Duration) -> Self {
        self.lease = Some(interval);
        self
    }

    /// Set the settle delay applied before offer-bearing sends.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the reverse-routing table capacity.
    #[must_use]
    pub fn with_backtrack_capacity(mut self, capacity: usize) -> Self {
        self.backtrack_capacity = capacity;
        self
    }

    /// Bound the lifetime of abandoned handshakes.
    #[must_use]
    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = Some(ttl);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = MembershipConfig::default();
        assert_eq!(config.extra_offers, 0);
        assert_eq!(config.weight_update, Duration::from_millis(30_000));
        assert_eq!(config.settle_delay, Duration::from_millis(1_500));
        assert_eq!(config.backtrack_capacity, 500);
        assert!(config.lease.is_none());
        assert!(config.pending_ttl.is_none());
    }

    #[test]
    fn builders_compose() {
        let config = MembershipConfig::default()
            .with_extra_offers(2)
            .with_lease(Duration::from_secs(60))
            .with_backtrack_capacity(32);
        assert_eq!(config.extra_offers, 2);
        assert_eq!(config.lease, Some(Duration::from_secs(60)));
        assert_eq!(config.backtrack_capacity, 32);
    }
}
