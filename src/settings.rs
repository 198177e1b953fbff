use super::*;

/// The pool configuration file, JSON. Field names follow the conventional
/// pool-config camelCase surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub coin: CoinOptions,
    pub address: String,
    #[serde(default)]
    pub reward_recipients: BTreeMap<String, f64>,
    pub ports: BTreeMap<u16, PortOptions>,
    pub daemons: Vec<DaemonOptions>,
    #[serde(default)]
    pub p2p: Option<P2pOptions>,
    #[serde(default)]
    pub banning: Option<BanningOptions>,
    /// Seconds without a submit before a session is torn down.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Template poll interval, milliseconds.
    #[serde(default = "default_block_refresh_interval")]
    pub block_refresh_interval: u64,
    /// Seconds without a template change before jobs are re-announced.
    #[serde(default = "default_job_rebroadcast_timeout")]
    pub job_rebroadcast_timeout: u64,
    #[serde(default = "default_version_mask")]
    pub version_mask: Version,
    /// Global retarget style, e.g. `{"mode": "x2"}` to halve/double across
    /// every port.
    #[serde(default)]
    pub var_diff: Option<GlobalVardiff>,
    #[serde(default)]
    pub instance_id: Option<u32>,
    #[serde(default)]
    pub tcp_proxy_protocol: bool,
    #[serde(default)]
    pub emit_invalid_block_hashes: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinOptions {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub asicboost: bool,
    #[serde(default)]
    pub reward: RewardKind,
    #[serde(default)]
    pub tx_messages: bool,
    #[serde(default)]
    pub peer_magic: Option<String>,
    #[serde(default)]
    pub peer_magic_testnet: Option<String>,
    #[serde(default)]
    pub has_get_info: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOptions {
    pub diff: f64,
    #[serde(default)]
    pub var_diff: Option<VardiffOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalVardiff {
    #[serde(default)]
    pub mode: Option<String>,
}

fn default_connection_timeout() -> u64 {
    600
}

fn default_block_refresh_interval() -> u64 {
    1000
}

fn default_job_rebroadcast_timeout() -> u64 {
    55
}

fn default_version_mask() -> Version {
    Version::from(DEFAULT_VERSION_MASK)
}

fn default_algorithm() -> String {
    "sha256".into()
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("malformed config file {}", path.display()))?;

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result {
        ensure!(
            self.coin.algorithm.eq_ignore_ascii_case("sha256"),
            "unsupported algorithm {:?}: only sha256 is supported",
            self.coin.algorithm
        );
        ensure!(!self.address.is_empty(), "pool address must be configured");
        ensure!(!self.daemons.is_empty(), "at least one daemon is required");
        ensure!(!self.ports.is_empty(), "at least one stratum port is required");
        ensure!(
            self.block_refresh_interval > 0,
            "blockRefreshInterval must be positive"
        );
        ensure!(
            self.job_rebroadcast_timeout > 0,
            "jobRebroadcastTimeout must be positive"
        );

        for (port, options) in &self.ports {
            ensure!(
                options.diff > 0.0 && options.diff.is_finite(),
                "port {port}: diff must be a positive number"
            );

            if let Some(var_diff) = &options.var_diff {
                ensure!(
                    var_diff.min_diff > 0.0 && var_diff.min_diff <= var_diff.max_diff,
                    "port {port}: varDiff bounds are inverted"
                );
                ensure!(
                    var_diff.target_time > 0.0 && var_diff.retarget_time > 0.0,
                    "port {port}: varDiff times must be positive"
                );
            }
        }

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn block_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.block_refresh_interval)
    }

    pub fn job_rebroadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.job_rebroadcast_timeout)
    }

    /// Converts `rewardRecipients` into output scripts. A 40-char hex key is
    /// a raw hash160; anything else parses as an address. Bad entries are
    /// logged and skipped.
    pub fn recipients(&self) -> Vec<Recipient> {
        self.reward_recipients
            .iter()
            .filter_map(|(key, percent)| {
                let script = if key.len() == 40 && hex::decode(key).is_ok() {
                    let mut script = Vec::with_capacity(25);
                    script.extend_from_slice(&[0x76, 0xA9, 0x14]);
                    script.extend_from_slice(&hex::decode(key).expect("checked above"));
                    script.extend_from_slice(&[0x88, 0xAC]);
                    Ok(script)
                } else {
                    codec::address_to_script(key)
                };

                match script {
                    Ok(script) => Some(Recipient {
                        script,
                        percent: *percent,
                    }),
                    Err(err) => {
                        warn!("skipping reward recipient {key}: {err}");
                        None
                    }
                }
            })
            .collect()
    }

    /// Total fee percentage across the recipients that actually convert.
    pub fn fee_percent(&self) -> f64 {
        self.recipients()
            .iter()
            .map(|recipient| recipient.percent)
            .sum()
    }

    /// Vardiff settings for a port, with the global `varDiff.mode` override
    /// folded in.
    pub fn vardiff_for(&self, port: u16) -> Option<VardiffOptions> {
        let mut options = self.ports.get(&port)?.var_diff?;

        if let Some(global) = &self.var_diff {
            if global.mode.as_deref() == Some("x2") {
                options.x2mode = true;
            }
        }

        Some(options)
    }

    /// The P2P magic for the active network, decoded.
    pub fn peer_magic(&self, testnet: bool) -> Result<Option<[u8; 4]>> {
        let magic = if testnet {
            &self.coin.peer_magic_testnet
        } else {
            &self.coin.peer_magic
        };

        match magic {
            None => Ok(None),
            Some(hex) => {
                let bytes = hex::decode(hex)?;
                let magic: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("peerMagic must be 4 bytes"))?;
                Ok(Some(magic))
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn sample_settings() -> Settings {
        serde_json::from_value(sample_config()).unwrap()
    }

    fn sample_config() -> Value {
        json!({
            "coin": {
                "name": "Bitcoin",
                "symbol": "BTC",
                "algorithm": "sha256",
                "asicboost": true,
                "peerMagic": "f9beb4d9"
            },
            "address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            "rewardRecipients": {
                "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa": 1.5
            },
            "ports": {
                "3333": {
                    "diff": 8,
                    "varDiff": {
                        "minDiff": 8,
                        "maxDiff": 512,
                        "targetTime": 15,
                        "retargetTime": 90,
                        "variancePercent": 30
                    }
                },
                "3334": {"diff": 256}
            },
            "daemons": [
                {"host": "127.0.0.1", "port": 8332, "user": "rpc", "password": "hunter2"}
            ],
            "p2p": {"enabled": true, "host": "127.0.0.1", "port": 8333},
            "banning": {
                "enabled": true,
                "time": 600,
                "invalidPercent": 50,
                "checkThreshold": 500,
                "purgeInterval": 300
            },
            "connectionTimeout": 600,
            "blockRefreshInterval": 1000,
            "jobRebroadcastTimeout": 55,
            "versionMask": "3fffe000"
        })
    }

    #[test]
    fn parses_the_full_surface() {
        let settings = sample_settings();

        assert_eq!(settings.coin.symbol, "BTC");
        assert!(settings.coin.asicboost);
        assert_eq!(settings.ports.len(), 2);
        assert_eq!(settings.ports[&3333].diff, 8.0);
        assert!(settings.ports[&3333].var_diff.is_some());
        assert!(settings.ports[&3334].var_diff.is_none());
        assert_eq!(settings.daemons.len(), 1);
        assert!(settings.banning.unwrap().enabled);
        assert_eq!(settings.version_mask, Version::from(0x3FFF_E000));
        assert_eq!(settings.connection_timeout(), Duration::from_secs(600));
        assert_eq!(settings.block_refresh_interval(), Duration::from_millis(1000));
        assert_eq!(settings.job_rebroadcast_timeout(), Duration::from_secs(55));
        assert_eq!(settings.peer_magic(false).unwrap(), Some([0xF9, 0xBE, 0xB4, 0xD9]));
        assert_eq!(settings.peer_magic(true).unwrap(), None);
    }

    #[test]
    fn defaults_fill_in() {
        let settings: Settings = serde_json::from_value(json!({
            "coin": {"name": "Bitcoin", "symbol": "BTC"},
            "address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            "ports": {"3333": {"diff": 8}},
            "daemons": [{"host": "127.0.0.1", "port": 8332, "user": "u", "password": "p"}]
        }))
        .unwrap();

        settings.validate().unwrap();

        assert_eq!(settings.coin.algorithm, "sha256");
        assert_eq!(settings.coin.reward, RewardKind::Pow);
        assert_eq!(settings.connection_timeout, 600);
        assert_eq!(settings.block_refresh_interval, 1000);
        assert_eq!(settings.job_rebroadcast_timeout, 55);
        assert_eq!(settings.version_mask, Version::from(DEFAULT_VERSION_MASK));
        assert!(!settings.tcp_proxy_protocol);
        assert!(!settings.emit_invalid_block_hashes);
    }

    #[test]
    fn rejects_unsupported_algorithm() {
        let mut settings = sample_settings();
        settings.coin.algorithm = "scrypt".into();

        assert!(
            settings
                .validate()
                .unwrap_err()
                .to_string()
                .contains("unsupported algorithm")
        );
    }

    #[test]
    fn rejects_empty_essentials() {
        let mut settings = sample_settings();
        settings.daemons.clear();
        assert!(settings.validate().is_err());

        let mut settings = sample_settings();
        settings.address.clear();
        assert!(settings.validate().is_err());

        let mut settings = sample_settings();
        settings.ports.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn global_x2_mode_applies_to_every_port() {
        let mut settings = sample_settings();
        assert!(!settings.vardiff_for(3333).unwrap().x2mode);
        assert!(settings.vardiff_for(3334).is_none());
        assert!(settings.vardiff_for(9999).is_none());

        settings.var_diff = Some(GlobalVardiff {
            mode: Some("x2".into()),
        });
        assert!(settings.vardiff_for(3333).unwrap().x2mode);
    }

    #[test]
    fn invalid_port_difficulty_is_fatal() {
        let mut settings = sample_settings();
        settings.ports.insert(
            3335,
            PortOptions {
                diff: 0.0,
                var_diff: None,
            },
        );

        assert!(settings.validate().is_err());
    }

    #[test]
    fn recipients_convert_and_bad_entries_are_skipped() {
        let mut settings = sample_settings();
        settings
            .reward_recipients
            .insert("notanaddress".into(), 1.0);
        settings.reward_recipients.insert(
            "62e907b15cbf27d5425399ebf6f0fb50ebb88f18".into(),
            0.5,
        );

        let recipients = settings.recipients();

        // the invalid entry drops, the address and raw hash160 survive
        assert_eq!(recipients.len(), 2);
        for recipient in &recipients {
            assert_eq!(recipient.script.len(), 25);
            assert_eq!(
                hex::encode(&recipient.script[3..23]),
                "62e907b15cbf27d5425399ebf6f0fb50ebb88f18"
            );
        }

        assert_eq!(settings.fee_percent(), 2.0, "skipped entries pay no fee");
    }
}
