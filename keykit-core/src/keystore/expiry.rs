use std::time::Duration;

/// Outcome of polling the expiration deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// No deadline is armed.
    Idle,
    /// The deadline is in the future by the given amount.
    Pending(Duration),
    /// The deadline has passed; purge.
    Expired,
}

/// Idle deadline, advanced by every key-touching operation.
///
/// Times are offsets from the Unix epoch as reported by the injected clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    timeout: Option<Duration>,
    expire_at: Option<Duration>,
}

impl Expiration {
    pub const fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            expire_at: None,
        }
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Pushes the deadline to `now + timeout`. Without a timeout there is no
    /// deadline.
    pub fn keep_alive(&mut self, now: Duration) {
        self.expire_at = self.timeout.map(|timeout| now.saturating_add(timeout));
    }

    pub fn clear(&mut self) {
        self.expire_at = None;
    }

    /// Zero when expired or unarmed.
    pub fn time_until_expire(&self, now: Duration) -> Duration {
        self.expire_at
            .map_or(Duration::ZERO, |at| at.saturating_sub(now))
    }

    pub fn tick(&self, now: Duration) -> Tick {
        match self.expire_at {
            None => Tick::Idle,
            Some(at) if now >= at => Tick::Expired,
            Some(at) => Tick::Pending(at - now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_tick_lifecycle() {
        let mut expiration = Expiration::new(Some(10 * MINUTE));
        let start = Duration::from_secs(1_000);
        assert_eq!(expiration.tick(start), Tick::Idle);
        assert_eq!(expiration.time_until_expire(start), Duration::ZERO);

        expiration.keep_alive(start);
        assert_eq!(expiration.tick(start + MINUTE), Tick::Pending(9 * MINUTE));
        assert_eq!(expiration.time_until_expire(start + MINUTE), 9 * MINUTE);

        // Keep-alive moves the deadline.
        expiration.keep_alive(start + 5 * MINUTE);
        assert_eq!(expiration.tick(start + 10 * MINUTE), Tick::Pending(5 * MINUTE));
        assert_eq!(expiration.tick(start + 15 * MINUTE), Tick::Expired);
        assert_eq!(expiration.time_until_expire(start + 20 * MINUTE), Duration::ZERO);

        expiration.clear();
        assert_eq!(expiration.tick(start + 20 * MINUTE), Tick::Idle);
    }

    #[test]
    fn test_no_timeout_never_arms() {
        let mut expiration = Expiration::new(None);
        expiration.keep_alive(Duration::from_secs(5));
        assert_eq!(expiration.tick(Duration::from_secs(1_000_000)), Tick::Idle);
        assert_eq!(expiration.timeout(), None);
    }
}
