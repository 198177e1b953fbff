use super::*;

/// What the startup chain probe learned from the daemon.
#[derive(Debug)]
struct ChainProbe {
    pool_script: Vec<u8>,
    testnet: bool,
    has_submit_method: bool,
    network_difficulty: f64,
    protocol_version: Option<i64>,
}

fn testnet_from_chain(chain: &str) -> bool {
    matches!(chain, "test" | "testnet" | "regtest" | "signet")
}

fn submitblock_unsupported(probe: &Result<Value>) -> bool {
    match probe {
        Ok(_) => false,
        Err(err) => err.to_string().contains("Method not found"),
    }
}

fn difficulty_from(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.get("proof-of-work").and_then(Value::as_f64))
        .unwrap_or(0.0)
}

/// The orchestrator: wires daemons, job manager, P2P signal, and stratum
/// listeners together, in startup order. Everything after startup runs as
/// detached tasks tied to the cancellation token.
pub(crate) struct Pool {
    settings: Arc<Settings>,
    authorizer: Arc<dyn Authorizer>,
}

impl Pool {
    pub(crate) fn new(settings: Settings, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            settings: Arc::new(settings),
            authorizer,
        }
    }

    pub(crate) async fn run(&self, cancel: CancellationToken) -> Result {
        let settings = self.settings.clone();
        settings.validate()?;

        let daemons = Arc::new(DaemonSet::new(&settings.daemons)?);
        daemons.ensure_online().await?;

        let probe = self.probe_chain(&daemons).await?;
        info!(
            "chain probe: testnet={} submitblock={} network_difficulty={}",
            probe.testnet, probe.has_submit_method, probe.network_difficulty
        );
        if let Some(version) = probe.protocol_version {
            info!("daemon protocol version {version}");
        }

        let recipients = settings.recipients();
        let fee_percent = settings.fee_percent();
        if fee_percent > 0.0 {
            info!("pool fee {fee_percent}% across {} recipients", recipients.len());
        }

        let manager = Arc::new(JobManager::new(
            PoolContext {
                pool_script: probe.pool_script,
                recipients,
                reward: settings.coin.reward,
                tx_messages: settings.coin.tx_messages,
                version_mask: settings.version_mask,
                pool_sig: POOL_SIGNATURE.into(),
                emit_invalid_block_hashes: settings.emit_invalid_block_hashes,
            },
            settings.instance_id,
        ));

        let template = self.await_first_template(&daemons, &cancel).await?;
        let TemplateOutcome::NewBlock(job) = manager.process_template(template)? else {
            bail!("initial template did not open a block");
        };
        info!("first job ready at height {}", job.template.height);

        let (job_sender, job_receiver) = watch::channel(JobNotification {
            job,
            clean_jobs: true,
        });

        let (share_tx, share_rx) = mpsc::channel(1024);
        let (refresh_tx, refresh_rx) = mpsc::channel(8);
        let (block_signal_tx, block_signal_rx) = mpsc::channel(8);

        tokio::spawn(consume_shares(
            daemons.clone(),
            probe.has_submit_method,
            share_rx,
            refresh_tx,
            cancel.clone(),
        ));

        tokio::spawn(generate_jobs(
            settings.clone(),
            manager.clone(),
            daemons.clone(),
            job_sender,
            block_signal_rx,
            refresh_rx,
            cancel.clone(),
        ));

        if let Some(p2p) = settings.p2p.clone().filter(|p2p| p2p.enabled) {
            match settings.peer_magic(probe.testnet)? {
                Some(magic) => {
                    let peer = Peer::new(p2p, magic, block_signal_tx, cancel.clone());
                    tokio::spawn(peer.run());
                }
                None => warn!("p2p enabled but no peerMagic configured for this network"),
            }
        }

        let banning = settings.banning.unwrap_or_default();
        let bans = Arc::new(BanTable::new(Duration::from_secs(banning.time)));
        if banning.enabled {
            tokio::spawn(purge_bans(
                bans.clone(),
                Duration::from_secs(banning.purge_interval),
                cancel.clone(),
            ));
        }

        let context = ConnectionContext {
            settings: settings.clone(),
            manager,
            subscriptions: Arc::new(SubscriptionIds::new()),
            authorizer: self.authorizer.clone(),
            bans,
            share_tx,
        };

        for port in settings.ports.keys().copied() {
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("failed to bind stratum port {port}"))?;

            tokio::spawn(listen(
                listener,
                port,
                context.clone(),
                job_receiver.clone(),
                cancel.clone(),
            ));
        }

        info!(
            "{} pool started on ports [{}]",
            settings.coin.name,
            settings
                .ports
                .keys()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        cancel.cancelled().await;
        info!("shutting down");

        Ok(())
    }

    /// Startup batch RPC: address validation, difficulty, mining info, the
    /// submitblock probe, and chain/network facts.
    async fn probe_chain(&self, daemons: &DaemonSet) -> Result<ChainProbe> {
        let settings = &self.settings;

        let mut calls: Vec<(&str, Value)> = vec![
            ("validateaddress", json!([settings.address])),
            ("getdifficulty", json!([])),
            ("getmininginfo", json!([])),
            ("submitblock", json!([])),
        ];

        if settings.coin.has_get_info {
            calls.push(("getinfo", json!([])));
        } else {
            calls.push(("getblockchaininfo", json!([])));
            calls.push(("getnetworkinfo", json!([])));
        }

        let mut results = daemons.first().batch(&calls).await?;

        let validation = results
            .remove(0)
            .context("validateaddress failed during startup")?;
        ensure!(
            validation["isvalid"].as_bool() == Some(true),
            "daemon reports pool address {} as invalid",
            settings.address
        );

        let pool_script = match settings.coin.reward {
            RewardKind::Pos => {
                let pubkey = validation["pubkey"]
                    .as_str()
                    .context("POS reward requires the daemon to reveal the address pubkey")?;
                codec::pubkey_to_script(pubkey)?
            }
            RewardKind::Pow => codec::address_to_script(&settings.address)?,
        };

        let network_difficulty = results
            .remove(0)
            .map(|value| difficulty_from(&value))
            .unwrap_or(0.0);

        // getmininginfo is advisory; a failure only costs a log line
        if let Err(err) = results.remove(0) {
            warn!("getmininginfo failed: {err:#}");
        }

        let has_submit_method = !submitblock_unsupported(&results.remove(0));

        let (testnet, protocol_version) = if settings.coin.has_get_info {
            let info = results.remove(0).context("getinfo failed during startup")?;
            (
                info["testnet"].as_bool().unwrap_or(false),
                info["protocolversion"].as_i64(),
            )
        } else {
            let blockchain = results
                .remove(0)
                .context("getblockchaininfo failed during startup")?;
            let network = results
                .remove(0)
                .context("getnetworkinfo failed during startup")?;
            (
                blockchain["chain"]
                    .as_str()
                    .is_some_and(testnet_from_chain),
                network["protocolversion"].as_i64(),
            )
        };

        Ok(ChainProbe {
            pool_script,
            testnet,
            has_submit_method,
            network_difficulty,
            protocol_version,
        })
    }

    /// Blocks until the daemon serves a template, tolerating the "still
    /// downloading blocks" phase. Any other failure is fatal.
    async fn await_first_template(
        &self,
        daemons: &DaemonSet,
        cancel: &CancellationToken,
    ) -> Result<BlockTemplate> {
        loop {
            match fetch_template(daemons).await {
                Ok(template) => return Ok(template),
                Err(err) if rpc_error_code(&err) == Some(-10) => {
                    info!("daemon is still syncing, waiting...");
                    tokio::select! {
                        _ = cancel.cancelled() => bail!("cancelled while waiting for daemon sync"),
                        _ = sleep(Duration::from_secs(5)) => {}
                    }
                }
                Err(err) => return Err(err).context("failed to fetch the initial block template"),
            }
        }
    }
}

async fn fetch_template(daemons: &DaemonSet) -> Result<BlockTemplate> {
    let params = json!([{
        "capabilities": ["coinbasetxn", "workid", "coinbase/append"],
        "rules": ["segwit"],
    }]);

    let value = daemons.call("getblocktemplate", params).await?;
    serde_json::from_value(value).context("malformed block template")
}

/// Polls for templates, reacts to P2P block signals and post-submit refresh
/// requests, and re-announces the current job when nothing changed for the
/// rebroadcast window.
async fn generate_jobs(
    settings: Arc<Settings>,
    manager: Arc<JobManager>,
    daemons: Arc<DaemonSet>,
    job_sender: watch::Sender<JobNotification>,
    mut block_signals: mpsc::Receiver<String>,
    mut refresh_requests: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    let mut poll = interval(settings.block_refresh_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let rebroadcast_timeout = settings.job_rebroadcast_timeout();
    let mut rebroadcast = interval(rebroadcast_timeout);
    rebroadcast.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_broadcast = Instant::now();

    loop {
        let trigger = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll.tick() => "poll",
            signal = block_signals.recv() => {
                match signal {
                    Some(hash) => {
                        info!("p2p announced block {hash}");
                        "p2p"
                    }
                    None => continue,
                }
            }
            request = refresh_requests.recv() => {
                match request {
                    Some(()) => "submit",
                    None => continue,
                }
            }
            _ = rebroadcast.tick() => {
                if last_broadcast.elapsed() < rebroadcast_timeout {
                    continue;
                }
                "rebroadcast"
            }
        };

        let template = match fetch_template(&daemons).await {
            Ok(template) => template,
            Err(err) => {
                warn!("failed to fetch block template ({trigger}): {err:#}");
                continue;
            }
        };

        match manager.process_template(template) {
            Ok(TemplateOutcome::NewBlock(job)) => {
                info!(
                    "new block: broadcasting job {} at height {}",
                    job.job_id, job.template.height
                );
                last_broadcast = Instant::now();
                let _ = job_sender.send(JobNotification {
                    job,
                    clean_jobs: true,
                });
            }
            Ok(TemplateOutcome::Unchanged) if trigger == "rebroadcast" => {
                let Some(current) = manager.current_job() else {
                    continue;
                };
                match manager.update_current_job((*current.template).clone()) {
                    Ok(job) => {
                        debug!("re-announcing job {} as {}", current.job_id, job.job_id);
                        last_broadcast = Instant::now();
                        let _ = job_sender.send(JobNotification {
                            job,
                            clean_jobs: false,
                        });
                    }
                    Err(err) => warn!("failed to refresh job: {err:#}"),
                }
            }
            Ok(TemplateOutcome::Unchanged) => {}
            Ok(TemplateOutcome::Outdated) => {
                warn!("daemon returned an outdated template, ignoring");
            }
            Err(err) => warn!("failed to process template: {err:#}"),
        }
    }
}

/// Drains the share event stream: logs every record and walks block
/// candidates through submission and verification.
async fn consume_shares(
    daemons: Arc<DaemonSet>,
    has_submit_method: bool,
    mut shares: mpsc::Receiver<Share>,
    refresh_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    loop {
        let share = tokio::select! {
            _ = cancel.cancelled() => break,
            share = shares.recv() => {
                match share {
                    Some(share) => share,
                    None => break,
                }
            }
        };

        match serde_json::to_string(&share) {
            Ok(record) => info!("share {record}"),
            Err(err) => error!("unserializable share record: {err}"),
        }

        if share.is_block() {
            if let Err(err) = submit_block(&daemons, has_submit_method, &share).await {
                error!("block submission failed: {err:#}");
            }
            let _ = refresh_tx.send(()).await;
        }
    }
}

async fn submit_block(daemons: &DaemonSet, has_submit_method: bool, share: &Share) -> Result {
    let block_hex = share.block_hex.as_deref().expect("caller checked is_block");
    let block_hash = share.block_hash.as_deref().expect("blocks carry a hash");

    info!("submitting block {block_hash} at height {}", share.height);

    let results = if has_submit_method {
        daemons.call_all("submitblock", json!([block_hex])).await
    } else {
        daemons
            .call_all(
                "getblocktemplate",
                json!([{"mode": "submit", "data": block_hex}]),
            )
            .await
    };

    let mut accepted = false;
    for result in results {
        match result {
            Ok(Value::Null) => accepted = true,
            Ok(Value::String(reason)) => {
                error!("daemon rejected block {block_hash}: {reason}");
            }
            Ok(other) => {
                warn!("unexpected submitblock response: {other}");
            }
            Err(err) => error!("block submission error: {err:#}"),
        }
    }

    ensure!(accepted, "no daemon accepted block {block_hash}");

    // round-trip through getblock to confirm acceptance and surface the
    // coinbase txid for the share record
    match daemons.call("getblock", json!([block_hash])).await {
        Ok(block) => {
            let coinbase_txid = block["tx"][0].as_str().unwrap_or("unknown");
            info!(
                "block {block_hash} accepted by {} (coinbase tx {coinbase_txid})",
                share.worker
            );
        }
        Err(err) => {
            warn!("block {block_hash} not visible after submission (orphaned?): {err:#}");
        }
    }

    Ok(())
}

async fn purge_bans(bans: Arc<BanTable>, purge_interval: Duration, cancel: CancellationToken) {
    let mut ticker = interval(purge_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = bans.purge();
                if removed > 0 {
                    debug!("purged {removed} expired bans");
                }
            }
        }
    }
}

async fn listen(
    listener: TcpListener,
    port: u16,
    context: ConnectionContext,
    job_receiver: watch::Receiver<JobNotification>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("accept failed on port {port}: {err}");
                        continue;
                    }
                }
            }
        };

        if context.bans.is_banned(remote.ip()) {
            warn!("refusing banned address {remote}");
            continue;
        }

        if let Err(err) = stream.set_nodelay(true) {
            warn!("failed to set nodelay for {remote}: {err}");
        }

        debug!("accepted {remote} on port {port}");

        let (reader, writer) = stream.into_split();
        let mut connection = Connection::new(
            context.clone(),
            remote,
            port,
            reader,
            writer,
            job_receiver.clone(),
            cancel.clone(),
        );

        tokio::spawn(async move {
            if let Err(err) = connection.serve().await {
                error!("connection error for {remote}: {err:#}");
            }
        });
    }
}
