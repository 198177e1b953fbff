use super::*;

/// Per-connection miner state. The connection task owns it exclusively, so
/// everything here is plain data.
#[derive(Debug)]
pub(crate) struct Session {
    #[allow(dead_code)]
    pub(crate) subscription_id: Option<String>,
    pub(crate) extranonce1: Option<Extranonce>,
    pub(crate) authorized: bool,
    #[allow(dead_code)]
    pub(crate) worker_name: Option<String>,
    pub(crate) difficulty: f64,
    pub(crate) previous_difficulty: Option<f64>,
    pub(crate) pending_difficulty: Option<f64>,
    pub(crate) minimum_difficulty: Option<f64>,
    pub(crate) asicboost: bool,
    pub(crate) negotiated_version_mask: Option<Version>,
    #[allow(dead_code)]
    pub(crate) extranonce_subscribed: bool,
    pub(crate) last_activity: Instant,
    pub(crate) valid_shares: u64,
    pub(crate) invalid_shares: u64,
}

impl Session {
    pub(crate) fn new(difficulty: f64) -> Self {
        Self {
            subscription_id: None,
            extranonce1: None,
            authorized: false,
            worker_name: None,
            difficulty,
            previous_difficulty: None,
            pending_difficulty: None,
            minimum_difficulty: None,
            asicboost: false,
            negotiated_version_mask: None,
            extranonce_subscribed: false,
            last_activity: Instant::now(),
            valid_shares: 0,
            invalid_shares: 0,
        }
    }

    pub(crate) fn subscribed(&self) -> bool {
        self.extranonce1.is_some()
    }

    pub(crate) fn subscribe(&mut self, subscription_id: String, extranonce1: Extranonce) {
        self.subscription_id = Some(subscription_id);
        self.extranonce1 = Some(extranonce1);
    }

    /// Queues a difficulty change for delivery at the next job boundary.
    /// Returns false when the floor or the current value swallow it.
    pub(crate) fn enqueue_difficulty(&mut self, difficulty: f64) -> bool {
        let difficulty = match self.minimum_difficulty {
            Some(floor) => difficulty.max(floor),
            None => difficulty,
        };

        if difficulty == self.difficulty {
            self.pending_difficulty = None;
            return false;
        }

        self.pending_difficulty = Some(difficulty);
        true
    }

    /// Applies a queued difficulty, remembering the old one for the
    /// retarget-race window. Returns the value to announce.
    pub(crate) fn apply_pending_difficulty(&mut self) -> Option<f64> {
        let pending = self.pending_difficulty.take()?;
        self.previous_difficulty = Some(self.difficulty);
        self.difficulty = pending;
        Some(pending)
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn idle_longer_than(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Tracks a share verdict against the ban policy. Returns true when the
    /// connection has earned a ban.
    pub(crate) fn record_share(&mut self, valid: bool, banning: Option<&BanningOptions>) -> bool {
        if valid {
            self.valid_shares += 1;
        } else {
            self.invalid_shares += 1;
        }

        let Some(banning) = banning.filter(|banning| banning.enabled) else {
            return false;
        };

        let total = self.valid_shares + self.invalid_shares;
        if total < banning.check_threshold {
            return false;
        }

        let percent_bad = self.invalid_shares as f64 / total as f64 * 100.0;
        if percent_bad < banning.invalid_percent {
            self.valid_shares = 0;
            self.invalid_shares = 0;
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banning() -> BanningOptions {
        BanningOptions {
            enabled: true,
            check_threshold: 10,
            invalid_percent: 50.0,
            ..Default::default()
        }
    }

    #[test]
    fn starts_unsubscribed_and_unauthorized() {
        let session = Session::new(8.0);
        assert!(!session.subscribed());
        assert!(!session.authorized);
        assert_eq!(session.difficulty, 8.0);
    }

    #[test]
    fn subscribe_installs_identifiers() {
        let mut session = Session::new(8.0);
        session.subscribe("deadbeef".into(), Extranonce::from_u32(7));

        assert!(session.subscribed());
        assert_eq!(session.subscription_id.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn pending_difficulty_applies_at_the_boundary() {
        let mut session = Session::new(8.0);

        assert!(session.enqueue_difficulty(16.0));
        assert_eq!(session.difficulty, 8.0, "not applied yet");

        assert_eq!(session.apply_pending_difficulty(), Some(16.0));
        assert_eq!(session.difficulty, 16.0);
        assert_eq!(session.previous_difficulty, Some(8.0));

        assert_eq!(session.apply_pending_difficulty(), None, "queue drained");
    }

    #[test]
    fn identical_difficulty_is_not_queued() {
        let mut session = Session::new(8.0);
        assert!(!session.enqueue_difficulty(8.0));
        assert_eq!(session.apply_pending_difficulty(), None);
    }

    #[test]
    fn minimum_difficulty_floors_the_queue() {
        let mut session = Session::new(64.0);
        session.minimum_difficulty = Some(32.0);

        assert!(session.enqueue_difficulty(4.0));
        assert_eq!(session.apply_pending_difficulty(), Some(32.0));
    }

    #[test]
    fn ban_fires_once_the_threshold_and_percentage_are_met() {
        let mut session = Session::new(8.0);
        let banning = banning();

        for _ in 0..5 {
            assert!(!session.record_share(true, Some(&banning)));
        }
        for _ in 0..4 {
            assert!(!session.record_share(false, Some(&banning)));
        }

        // 10th share, 50% bad
        assert!(session.record_share(false, Some(&banning)));
    }

    #[test]
    fn healthy_sessions_reset_their_counters() {
        let mut session = Session::new(8.0);
        let banning = banning();

        for _ in 0..9 {
            session.record_share(true, Some(&banning));
        }
        assert!(!session.record_share(false, Some(&banning)));
        assert_eq!(session.valid_shares, 0, "counters reset below the bar");
        assert_eq!(session.invalid_shares, 0);
    }

    #[test]
    fn disabled_banning_never_trips() {
        let mut session = Session::new(8.0);

        for _ in 0..100 {
            assert!(!session.record_share(false, None));
        }

        let disabled = BanningOptions {
            enabled: false,
            ..banning()
        };
        assert!(!session.record_share(false, Some(&disabled)));
    }

    #[test]
    fn idle_detection() {
        let mut session = Session::new(8.0);
        assert!(!session.idle_longer_than(Duration::from_secs(60)));
        assert!(session.idle_longer_than(Duration::ZERO));
        session.touch();
        assert!(!session.idle_longer_than(Duration::from_secs(60)));
    }
}
