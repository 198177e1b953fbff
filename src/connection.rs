use super::*;

/// A job paired with its clean flag, broadcast to every connection through
/// the watch channel.
#[derive(Clone, Debug)]
pub(crate) struct JobNotification {
    pub(crate) job: Arc<Job>,
    pub(crate) clean_jobs: bool,
}

/// Pool-wide collaborators handed to every connection task.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) settings: Arc<Settings>,
    pub(crate) manager: Arc<JobManager>,
    pub(crate) subscriptions: Arc<SubscriptionIds>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) bans: Arc<BanTable>,
    pub(crate) share_tx: mpsc::Sender<Share>,
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_hex_of(s: &str, len: usize) -> bool {
    s.len() == len && is_hex(s)
}

/// One miner socket: line framing with the flood guard, strict in-order
/// method dispatch, and job/difficulty pushes from the broadcast channel.
pub(crate) struct Connection<R, W> {
    context: ConnectionContext,
    remote: SocketAddr,
    port: u16,
    reader: FramedRead<R, LinesCodec>,
    writer: FramedWrite<W, LinesCodec>,
    job_receiver: watch::Receiver<JobNotification>,
    cancel: CancellationToken,
    session: Session,
    vardiff: Option<Vardiff>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        context: ConnectionContext,
        remote: SocketAddr,
        port: u16,
        reader: R,
        writer: W,
        job_receiver: watch::Receiver<JobNotification>,
        cancel: CancellationToken,
    ) -> Self {
        let session = Session::new(context.settings.ports[&port].diff);
        let vardiff = context
            .settings
            .vardiff_for(port)
            .map(|options| Vardiff::new(options, unix_now() as f64));

        Self {
            context,
            remote,
            port,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_SIZE)),
            writer: FramedWrite::new(writer, LinesCodec::new()),
            job_receiver,
            cancel,
            session,
            vardiff,
        }
    }

    pub(crate) async fn serve(&mut self) -> Result {
        if self.context.settings.tcp_proxy_protocol {
            self.read_proxy_header().await?;
        }

        let mut job_receiver = self.job_receiver.clone();
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("disconnecting {}", self.remote);
                    break;
                }

                line = self.reader.next() => {
                    match line {
                        None => {
                            info!("miner {} disconnected", self.remote);
                            break;
                        }
                        Some(Err(err)) => {
                            // oversize frames land here before any parsing
                            warn!("closing {}: {err}", self.remote);
                            break;
                        }
                        Some(Ok(line)) => {
                            if !self.handle_line(&line).await? {
                                break;
                            }
                        }
                    }
                }

                changed = job_receiver.changed() => {
                    if changed.is_err() {
                        warn!("job channel dropped, closing {}", self.remote);
                        break;
                    }

                    let notification = job_receiver.borrow_and_update().clone();

                    if self
                        .session
                        .idle_longer_than(self.context.settings.connection_timeout())
                    {
                        info!("socket timeout for {}", self.remote);
                        break;
                    }

                    if self.session.subscribed() {
                        self.push_job(&notification).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns false when the connection should close.
    async fn handle_line(&mut self, line: &str) -> Result<bool> {
        let message = match serde_json::from_str::<Message>(line) {
            Ok(message) => message,
            Err(err) => {
                warn!("malformed message from {}: {err}; line={line:?}", self.remote);
                return Ok(false);
            }
        };

        let Message::Request { id, method, params } = message else {
            debug!("ignoring non-request from {}", self.remote);
            return Ok(true);
        };

        match method.as_str() {
            "mining.subscribe" => match serde_json::from_value::<Subscribe>(params) {
                Ok(subscribe) => self.subscribe(id, subscribe).await?,
                Err(_) => self.send(Message::error(id, StratumError::MalformedParameters)).await?,
            },
            "mining.authorize" => match serde_json::from_value::<Authorize>(params) {
                Ok(authorize) => return self.authorize(id, authorize).await,
                Err(_) => self.send(Message::error(id, StratumError::MalformedParameters)).await?,
            },
            "mining.configure" => match serde_json::from_value::<Configure>(params) {
                Ok(configure) => self.configure(id, configure).await?,
                Err(_) => self.send(Message::error(id, StratumError::MalformedParameters)).await?,
            },
            "mining.submit" => match serde_json::from_value::<Submit>(params) {
                Ok(submit) => return self.submit(id, submit).await,
                Err(_) => self.send(Message::error(id, StratumError::MalformedParameters)).await?,
            },
            "mining.suggest_difficulty" => {
                match serde_json::from_value::<SuggestDifficulty>(params) {
                    Ok(suggest) => self.suggest_difficulty(id, suggest).await?,
                    Err(_) => {
                        self.send(Message::error(id, StratumError::MalformedParameters))
                            .await?
                    }
                }
            }
            "mining.extranonce.subscribe" => {
                self.session.extranonce_subscribed = true;
                self.send(Message::response(id, json!(true))).await?;
            }
            "mining.get_transactions" => {
                // not supported; the bare `error: true` shape is what
                // existing miners expect
                self.send_raw(json!({"id": id, "result": [], "error": true}))
                    .await?;
            }
            "mining.set_version_mask" => {
                // client acknowledgement of our notification
                debug!("version mask acknowledged by {}", self.remote);
            }
            method => {
                warn!("unknown method {method} from {}", self.remote);
                self.send(Message::error(id, StratumError::UnknownMethod))
                    .await?;
            }
        }

        Ok(true)
    }

    async fn subscribe(&mut self, id: Id, subscribe: Subscribe) -> Result {
        if let Some(user_agent) = &subscribe.user_agent {
            debug!("subscribe from {} ({user_agent})", self.remote);
        }
        if let Some(suggestion) = &subscribe.extranonce1 {
            debug!("ignoring extranonce1 suggestion {suggestion} from {}", self.remote);
        }

        let subscription_id = self.context.subscriptions.next();
        let extranonce1 = self.context.manager.extranonces.next();
        self.session
            .subscribe(subscription_id.clone(), extranonce1.clone());

        let result = SubscribeResult {
            subscriptions: vec![
                ("mining.set_difficulty".into(), subscription_id.clone()),
                ("mining.notify".into(), subscription_id),
            ],
            extranonce1,
            extranonce2_size: EXTRANONCE2_SIZE,
        };

        self.send(Message::response(id, json!(result))).await?;

        // hand out the current difficulty and job right away
        self.send_difficulty(self.session.difficulty).await?;
        if let Some(job) = self.context.manager.current_job() {
            self.send_notify(&job.notify(true)).await?;
        }

        Ok(())
    }

    async fn authorize(&mut self, id: Id, authorize: Authorize) -> Result<bool> {
        let result = self
            .context
            .authorizer
            .authorize(
                self.port,
                &authorize.username,
                authorize.password.as_deref(),
                self.remote.ip(),
            )
            .await;

        self.session.authorized = result.authorized;
        if result.authorized {
            self.session.worker_name = Some(authorize.username.clone());
            info!("authorized {} from {}", authorize.username, self.remote);
        } else {
            warn!("refused worker {} from {}", authorize.username, self.remote);
        }

        self.send(Message::response(id, json!(result.authorized)))
            .await?;

        if result.disconnect {
            info!("policy disconnect for {}", self.remote);
            return Ok(false);
        }

        if let Some(difficulty) = result.difficulty {
            if self.session.enqueue_difficulty(difficulty) {
                if let Some(applied) = self.session.apply_pending_difficulty() {
                    self.send_difficulty(applied).await?;
                }
            }
        }

        Ok(true)
    }

    async fn configure(&mut self, id: Id, configure: Configure) -> Result {
        let mut result = serde_json::Map::new();
        let mut mask_update = None;

        if configure.requests("version-rolling") {
            let client_mask = configure
                .version_rolling_mask
                .unwrap_or(Version::from(u32::MAX));
            let negotiated = self.context.settings.version_mask & client_mask;
            let min_bit_count = configure.version_rolling_min_bit_count.unwrap_or(16);

            if self.context.settings.coin.asicboost && negotiated.count_ones() >= min_bit_count {
                self.session.asicboost = true;
                self.session.negotiated_version_mask = Some(negotiated);

                result.insert("version-rolling".into(), json!(true));
                result.insert("version-rolling.mask".into(), json!(negotiated.to_string()));
                result.insert(
                    "version-rolling.min-bit-count".into(),
                    json!(negotiated.count_ones()),
                );

                mask_update = Some(negotiated);
            } else {
                result.insert("version-rolling".into(), json!(false));
            }
        }

        if configure.requests("minimum-difficulty") {
            match configure.minimum_difficulty_value {
                Some(value) => {
                    self.session.minimum_difficulty = Some(value);
                    result.insert("minimum-difficulty".into(), json!(true));
                }
                None => {
                    result.insert("minimum-difficulty".into(), json!(false));
                }
            }
        }

        if configure.requests("subscribe-extranonce") {
            self.session.extranonce_subscribed = true;
            result.insert("subscribe-extranonce".into(), json!(true));
        }

        self.send(Message::response(id, Value::Object(result)))
            .await?;

        if let Some(mask) = mask_update {
            self.send(Message::notification(
                "mining.set_version_mask",
                json!([mask.to_string()]),
            ))
            .await?;
        }

        Ok(())
    }

    async fn suggest_difficulty(&mut self, id: Id, suggest: SuggestDifficulty) -> Result {
        let mut difficulty = suggest.0;

        if let Some(vardiff) = &self.vardiff {
            difficulty = difficulty.clamp(vardiff.options().min_diff, vardiff.options().max_diff);
        }

        self.send(Message::response(id, json!(true))).await?;

        if self.session.enqueue_difficulty(difficulty) {
            debug!(
                "difficulty {difficulty} suggested by {}, queued for next job",
                self.remote
            );
        }

        Ok(())
    }

    async fn submit(&mut self, id: Id, submit: Submit) -> Result<bool> {
        let shapes_ok = is_hex(&submit.job_id)
            && is_hex(&submit.extranonce2)
            && submit.extranonce2.len() % 2 == 0
            && is_hex_of(&submit.ntime, 8)
            && is_hex_of(&submit.nonce, 8)
            && submit
                .version_bits
                .as_deref()
                .is_none_or(|bits| is_hex_of(bits, 8));

        if !shapes_ok {
            return self
                .reject_submit(id, &submit, StratumError::MalformedParameters)
                .await;
        }

        if !self.session.authorized {
            return self
                .reject_submit(id, &submit, StratumError::UnauthorizedWorker)
                .await;
        }

        let Some(extranonce1) = self.session.extranonce1.clone() else {
            return self
                .reject_submit(id, &submit, StratumError::NotSubscribed)
                .await;
        };

        self.session.touch();

        let submission = ShareSubmission {
            job_id: &submit.job_id,
            extranonce1: &extranonce1,
            extranonce2: &submit.extranonce2,
            ntime: &submit.ntime,
            nonce: &submit.nonce,
            version_bits: submit.version_bits.as_deref(),
            difficulty: self.session.difficulty,
            previous_difficulty: self.session.previous_difficulty,
            negotiated_mask: self.session.negotiated_version_mask,
            asicboost: self.session.asicboost,
            worker: &submit.username,
            remote: self.remote.ip(),
            port: self.port,
        };

        match self.context.manager.process_share(submission) {
            Ok(share) => {
                self.send(Message::response(id, json!(true))).await?;
                self.session
                    .record_share(true, self.context.settings.banning.as_ref());

                debug!(
                    "share accepted from {} | worker={} diff={} share_diff={:.8}",
                    self.remote, share.worker, share.difficulty, share.share_diff
                );

                if let Some(vardiff) = &mut self.vardiff {
                    if let Some(new_diff) =
                        vardiff.on_share(unix_now() as f64, self.session.difficulty)
                    {
                        if self.session.enqueue_difficulty(new_diff) {
                            debug!(
                                "retargeting {} to {new_diff} at next job",
                                self.remote
                            );
                        }
                    }
                }

                if self.context.share_tx.try_send(share).is_err() {
                    error!("share channel full, dropping share");
                }

                Ok(true)
            }
            Err(error) => self.reject_submit(id, &submit, error).await,
        }
    }

    async fn reject_submit(
        &mut self,
        id: Id,
        submit: &Submit,
        error: StratumError,
    ) -> Result<bool> {
        warn!(
            "share rejected from {} | worker={} job={} reason={error}",
            self.remote, submit.username, submit.job_id
        );

        self.send(Message::error(id, error.clone())).await?;

        let share = Share::rejected(
            &submit.job_id,
            &submit.username,
            self.remote.ip(),
            self.port,
            self.session.difficulty,
            &error,
        );
        if self.context.share_tx.try_send(share).is_err() {
            error!("share channel full, dropping share");
        }

        if self
            .session
            .record_share(false, self.context.settings.banning.as_ref())
        {
            warn!(
                "banning {} after {} invalid shares",
                self.remote, self.session.invalid_shares
            );
            self.context.bans.add(self.remote.ip());
            return Ok(false);
        }

        Ok(true)
    }

    async fn push_job(&mut self, notification: &JobNotification) -> Result {
        if let Some(applied) = self.session.apply_pending_difficulty() {
            self.send_difficulty(applied).await?;
        }

        self.send_notify(&notification.job.notify(notification.clean_jobs))
            .await
    }

    async fn send_difficulty(&mut self, difficulty: f64) -> Result {
        self.send(Message::notification(
            "mining.set_difficulty",
            json!(SetDifficulty(difficulty)),
        ))
        .await
    }

    async fn send_notify(&mut self, notify: &Notify) -> Result {
        self.send(Message::notification("mining.notify", json!(notify)))
            .await
    }

    async fn send(&mut self, message: Message) -> Result {
        self.writer.send(serde_json::to_string(&message)?).await?;
        Ok(())
    }

    async fn send_raw(&mut self, value: Value) -> Result {
        self.writer.send(serde_json::to_string(&value)?).await?;
        Ok(())
    }

    /// haproxy-style `PROXY TCP4 src dst sport dport` first line carrying
    /// the real client address.
    async fn read_proxy_header(&mut self) -> Result {
        let line = self
            .reader
            .next()
            .await
            .transpose()?
            .context("connection closed before proxy header")?;

        let parts: Vec<&str> = line.split_whitespace().collect();
        ensure!(
            parts.first() == Some(&"PROXY"),
            "expected PROXY protocol header, got {line:?}"
        );

        if let (Some(ip), Some(port)) = (parts.get(2), parts.get(4)) {
            self.remote = SocketAddr::new(ip.parse()?, port.parse()?);
            debug!("proxy protocol rewrote remote to {}", self.remote);
        }

        Ok(())
    }
}
