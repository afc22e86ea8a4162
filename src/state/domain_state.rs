use std::time::{Duration, Instant};

/// Tracks one domain's share of a run's politeness budget
///
/// A `DomainState` lives only inside a scheduler context and is discarded
/// when the run ends.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of counted requests made to this domain in the current run
    pub request_count: u32,

    /// Time of the most recently reserved request slot
    ///
    /// This may lie in the future: a reservation books the slot before the
    /// caller sleeps until it.
    pub last_request_time: Option<Instant>,

    /// Crawl-delay advertised by the domain's robots.txt
    pub crawl_delay: Option<Duration>,
}

impl DomainState {
    /// Effective gap between two requests to this domain
    ///
    /// # Arguments
    ///
    /// * `min_interval` - The configured minimum interval
    /// * `respect_crawl_delay` - Whether a robots.txt Crawl-delay may widen it
    pub fn interval(&self, min_interval: Duration, respect_crawl_delay: bool) -> Duration {
        match self.crawl_delay {
            Some(delay) if respect_crawl_delay => delay.max(min_interval),
            _ => min_interval,
        }
    }

    /// Checks whether the per-domain request budget still has room
    pub fn has_budget(&self, max_requests: u32) -> bool {
        self.request_count < max_requests
    }

    /// Earliest instant at which the next request may be issued
    pub fn next_slot(&self, interval: Duration, now: Instant) -> Instant {
        match self.last_request_time {
            Some(last) => (last + interval).max(now),
            None => now,
        }
    }

    /// Records a request booked for `at`
    ///
    /// `counted` is false for requests that are paced but not charged to the
    /// budget, such as robots.txt retrievals.
    pub fn record_request(&mut self, at: Instant, counted: bool) {
        if counted {
            self.request_count += 1;
        }
        self.last_request_time = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_domain_state() {
        let state = DomainState::default();
        assert_eq!(state.request_count, 0);
        assert!(state.last_request_time.is_none());
        assert!(state.crawl_delay.is_none());
    }

    #[test]
    fn test_first_request_is_immediate() {
        let state = DomainState::default();
        let now = Instant::now();
        assert_eq!(state.next_slot(Duration::from_secs(2), now), now);
    }

    #[test]
    fn test_next_slot_respects_interval() {
        let mut state = DomainState::default();
        let now = Instant::now();
        state.record_request(now, true);

        let interval = Duration::from_secs(2);
        assert_eq!(state.next_slot(interval, now), now + interval);
        let later = now + Duration::from_secs(3);
        assert_eq!(state.next_slot(interval, later), later);
    }

    #[test]
    fn test_budget() {
        let mut state = DomainState::default();
        let now = Instant::now();
        for _ in 0..3 {
            state.record_request(now, true);
        }
        state.record_request(now, false);

        assert_eq!(state.request_count, 3);
        assert!(state.has_budget(4));
        assert!(!state.has_budget(3));
    }

    #[test]
    fn test_crawl_delay_widens_interval() {
        let mut state = DomainState::default();
        let min = Duration::from_secs(2);
        assert_eq!(state.interval(min, true), min);

        state.crawl_delay = Some(Duration::from_secs(5));
        assert_eq!(state.interval(min, true), Duration::from_secs(5));
        assert_eq!(state.interval(min, false), min);

        state.crawl_delay = Some(Duration::from_secs(1));
        assert_eq!(state.interval(min, true), min);
    }
}
