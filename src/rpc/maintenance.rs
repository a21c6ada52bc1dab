//! Node wide periodic tasks.

use std::time::{Duration, Instant};

/// Timers of the announce loop and the self refresh lookup.
#[derive(Debug)]
pub(crate) struct Maintenance {
    announce_interval: Duration,
    self_refresh_interval: Duration,
    next_announce: Instant,
    next_self_refresh: Instant,
}

/// Decisions about periodic tasks
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MaintenanceDecisions {
    /// Whether to announce every advertised infohash
    pub should_announce: bool,

    /// Whether to lookup this node's own Id
    pub should_self_refresh: bool,
}

impl Maintenance {
    /// Both tasks are due right away, then once per interval.
    pub fn new(announce_interval: Duration, self_refresh_interval: Duration) -> Self {
        let now = Instant::now();

        Maintenance {
            announce_interval,
            self_refresh_interval,
            next_announce: now,
            next_self_refresh: now,
        }
    }

    /// Determine which periodic tasks are due, and rearm their timers.
    pub fn decisions_at(&mut self, now: Instant) -> MaintenanceDecisions {
        let should_announce = self.next_announce <= now;
        let should_self_refresh = self.next_self_refresh <= now;

        if should_announce {
            self.next_announce = now + self.announce_interval;
        }

        if should_self_refresh {
            self.next_self_refresh = now + self.self_refresh_interval;
        }

        MaintenanceDecisions {
            should_announce,
            should_self_refresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_immediately() {
        let mut maintenance = Maintenance::new(Duration::from_secs(15), Duration::from_secs(300));
        let now = Instant::now();

        assert_eq!(
            maintenance.decisions_at(now),
            MaintenanceDecisions {
                should_announce: true,
                should_self_refresh: true,
            }
        );

        assert_eq!(
            maintenance.decisions_at(now),
            MaintenanceDecisions {
                should_announce: false,
                should_self_refresh: false,
            }
        );
    }

    #[test]
    fn rearm_after_interval() {
        let mut maintenance = Maintenance::new(Duration::from_secs(15), Duration::from_secs(300));

        // Advance time forward instead of subtracting, Instant may be close to its epoch.
        let future = Instant::now() + Duration::from_secs(301);

        let decisions = maintenance.decisions_at(future);
        assert!(decisions.should_announce);
        assert!(decisions.should_self_refresh);

        assert_eq!(maintenance.next_announce, future + Duration::from_secs(15));
        assert_eq!(maintenance.next_self_refresh, future + Duration::from_secs(300));
    }
}
