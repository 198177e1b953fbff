use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanningOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Ban duration, seconds.
    #[serde(default = "default_time")]
    pub time: u64,
    /// Reject percentage that triggers a ban.
    #[serde(default = "default_invalid_percent")]
    pub invalid_percent: f64,
    /// Shares observed before the percentage is evaluated.
    #[serde(default = "default_check_threshold")]
    pub check_threshold: u64,
    /// Sweep interval for expired entries, seconds.
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u64,
}

fn default_time() -> u64 {
    600
}

fn default_invalid_percent() -> f64 {
    50.0
}

fn default_check_threshold() -> u64 {
    500
}

fn default_purge_interval() -> u64 {
    300
}

impl Default for BanningOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            time: default_time(),
            invalid_percent: default_invalid_percent(),
            check_threshold: default_check_threshold(),
            purge_interval: default_purge_interval(),
        }
    }
}

/// Process-wide table of banned remote addresses. Entries age out after the
/// configured window; a background sweep keeps the map from growing.
#[derive(Debug)]
pub struct BanTable {
    time: Duration,
    banned: Mutex<HashMap<IpAddr, Instant>>,
}

impl BanTable {
    pub fn new(time: Duration) -> Self {
        Self {
            time,
            banned: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, remote: IpAddr) {
        self.banned
            .lock()
            .expect("ban table lock poisoned")
            .insert(remote, Instant::now());
    }

    /// True when the address is still inside its ban window. Expired entries
    /// are dropped on sight.
    pub fn is_banned(&self, remote: IpAddr) -> bool {
        let mut banned = self.banned.lock().expect("ban table lock poisoned");

        match banned.get(&remote) {
            Some(start) if start.elapsed() < self.time => true,
            Some(_) => {
                banned.remove(&remote);
                false
            }
            None => false,
        }
    }

    pub fn purge(&self) -> usize {
        let mut banned = self.banned.lock().expect("ban table lock poisoned");
        let before = banned.len();
        banned.retain(|_, start| start.elapsed() < self.time);
        before - banned.len()
    }

    pub fn len(&self) -> usize {
        self.banned.lock().expect("ban table lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(n: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, n])
    }

    #[test]
    fn defaults() {
        let options: BanningOptions = serde_json::from_value(json!({"enabled": true})).unwrap();
        assert!(options.enabled);
        assert_eq!(options.time, 600);
        assert_eq!(options.invalid_percent, 50.0);
        assert_eq!(options.check_threshold, 500);
        assert_eq!(options.purge_interval, 300);
    }

    #[test]
    fn bans_stick_within_the_window() {
        let table = BanTable::new(Duration::from_secs(600));

        assert!(!table.is_banned(remote(1)));
        table.add(remote(1));
        assert!(table.is_banned(remote(1)));
        assert!(!table.is_banned(remote(2)));
    }

    #[test]
    fn bans_expire() {
        let table = BanTable::new(Duration::ZERO);

        table.add(remote(1));
        assert!(!table.is_banned(remote(1)));
        assert_eq!(table.len(), 0, "expired entry dropped on lookup");
    }

    #[test]
    fn purge_sweeps_expired_entries() {
        let table = BanTable::new(Duration::ZERO);

        table.add(remote(1));
        table.add(remote(2));
        assert_eq!(table.len(), 2);

        assert_eq!(table.purge(), 2);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn purge_keeps_live_entries() {
        let table = BanTable::new(Duration::from_secs(600));

        table.add(remote(1));
        assert_eq!(table.purge(), 0);
        assert_eq!(table.len(), 1);
    }
}
