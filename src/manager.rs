use super::*;

/// Everything the job manager needs from pool startup to turn templates into
/// jobs: where the reward goes and how the coinbase is flavored.
#[derive(Debug, Clone)]
pub struct PoolContext {
    pub pool_script: Vec<u8>,
    pub recipients: Vec<Recipient>,
    pub reward: RewardKind,
    pub tx_messages: bool,
    pub version_mask: Version,
    pub pool_sig: String,
    pub emit_invalid_block_hashes: bool,
}

#[derive(Debug)]
pub enum TemplateOutcome {
    /// Previous hash changed (or first template): the valid-jobs map was
    /// replaced and miners must abandon in-flight work.
    NewBlock(Arc<Job>),
    /// Same previous hash: nothing changed worth announcing.
    Unchanged,
    /// Previous hash changed but the height went backwards.
    Outdated,
}

/// A `mining.submit` joined with the session state the pipeline needs.
#[derive(Debug)]
pub struct ShareSubmission<'a> {
    pub job_id: &'a str,
    pub extranonce1: &'a Extranonce,
    pub extranonce2: &'a str,
    pub ntime: &'a str,
    pub nonce: &'a str,
    pub version_bits: Option<&'a str>,
    pub difficulty: f64,
    pub previous_difficulty: Option<f64>,
    pub negotiated_mask: Option<Version>,
    pub asicboost: bool,
    pub worker: &'a str,
    pub remote: IpAddr,
    pub port: u16,
}

/// Owns the valid-jobs map and runs the share-validation pipeline. The map
/// is swapped atomically on a new block, so a concurrent submit sees either
/// the old set of jobs or the new one, never a torn state.
pub struct JobManager {
    context: PoolContext,
    jobs: RwLock<Jobs>,
    pub extranonces: ExtranonceCounter,
}

impl JobManager {
    pub fn new(context: PoolContext, instance_id: Option<u32>) -> Self {
        Self {
            context,
            jobs: RwLock::new(Jobs::new()),
            extranonces: ExtranonceCounter::new(instance_id),
        }
    }

    fn build_job(&self, jobs: &mut Jobs, template: Arc<BlockTemplate>) -> Result<Arc<Job>> {
        let (coinb1, coinb2) = CoinbaseBuilder::new(&template, &self.context.pool_script)
            .with_recipients(&self.context.recipients)
            .with_reward(self.context.reward)
            .with_tx_messages(self.context.tx_messages)
            .with_pool_sig(&self.context.pool_sig)
            .build()?;

        Ok(Arc::new(Job::new(
            jobs.next_id(),
            template,
            coinb1,
            coinb2,
            self.context.version_mask,
            self.context.reward,
        )?))
    }

    pub fn current_job(&self) -> Option<Arc<Job>> {
        self.jobs.read().expect("jobs lock poisoned").current()
    }

    /// Decides whether a polled template announces a new block. Returns
    /// `NewBlock` exactly when the previous hash changed (or no job exists
    /// yet); a height regression on a changed hash is ignored as stale
    /// daemon chatter.
    pub fn process_template(&self, template: BlockTemplate) -> Result<TemplateOutcome> {
        let mut jobs = self.jobs.write().expect("jobs lock poisoned");

        if let Some(current) = jobs.current() {
            if template.previous_block_hash == current.template.previous_block_hash {
                return Ok(TemplateOutcome::Unchanged);
            }

            if template.height < current.template.height {
                return Ok(TemplateOutcome::Outdated);
            }
        }

        let job = self.build_job(&mut jobs, Arc::new(template))?;
        jobs.insert_and_clean(job.clone());

        Ok(TemplateOutcome::NewBlock(job))
    }

    /// Refresh path: a fresh job id over (usually) the same previous hash.
    /// Existing jobs stay valid and the broadcast goes out with
    /// `clean_jobs = false`.
    pub fn update_current_job(&self, template: BlockTemplate) -> Result<Arc<Job>> {
        let mut jobs = self.jobs.write().expect("jobs lock poisoned");
        let job = self.build_job(&mut jobs, Arc::new(template))?;
        jobs.insert(job.clone());
        Ok(job)
    }

    pub fn process_share(&self, submission: ShareSubmission) -> Result<Share, StratumError> {
        self.process_share_at(submission, unix_now())
    }

    /// The share pipeline. Checks run in a fixed order and the first failure
    /// wins; `now` is injected so the ntime window is testable.
    pub fn process_share_at(
        &self,
        submission: ShareSubmission,
        now: u64,
    ) -> Result<Share, StratumError> {
        if submission.extranonce2.len() != EXTRANONCE2_SIZE * 2 {
            return Err(StratumError::IncorrectExtranonce2Size);
        }

        let job = submission
            .job_id
            .parse()
            .ok()
            .and_then(|id| self.jobs.read().expect("jobs lock poisoned").get(&id))
            .ok_or(StratumError::JobNotFound)?;

        if submission.ntime.len() != 8 {
            return Err(StratumError::IncorrectNtimeSize);
        }

        let ntime: Ntime = submission
            .ntime
            .parse()
            .map_err(|_| StratumError::MalformedParameters)?;

        if u64::from(u32::from(ntime)) < u64::from(job.template.curtime)
            || u64::from(u32::from(ntime)) > now + 7200
        {
            return Err(StratumError::NtimeOutOfRange);
        }

        if submission.nonce.len() != 8 {
            return Err(StratumError::IncorrectNonceSize);
        }

        let nonce: Nonce = submission
            .nonce
            .parse()
            .map_err(|_| StratumError::MalformedParameters)?;

        let template_version = Version::from(job.template.version);

        let version = if submission.asicboost {
            let submitted = submission
                .version_bits
                .map(|bits| bits.parse::<Version>())
                .transpose()
                .map_err(|_| StratumError::MalformedParameters)?
                .filter(|version| !version.is_zero())
                .unwrap_or(template_version);

            if submitted.to_consensus() < 4 {
                return Err(StratumError::VersionTooLow);
            }

            if submitted != template_version {
                let mask = submission.negotiated_mask.unwrap_or(job.version_mask);
                let rolled = submitted ^ template_version;

                if !(rolled & !mask).is_zero() {
                    return Err(StratumError::VersionOutsideMask);
                }
            }

            submitted
        } else {
            template_version
        };

        if !job.register_submit(
            &submission.extranonce1.to_hex(),
            submission.extranonce2,
            submission.ntime,
            submission.nonce,
        ) {
            return Err(StratumError::DuplicateShare);
        }

        let extranonce2 = Extranonce::from_hex(submission.extranonce2)
            .map_err(|_| StratumError::IncorrectExtranonce2Size)?;

        let coinbase = job.serialize_coinbase(submission.extranonce1, &extranonce2);
        let coinbase_hash = codec::sha256d(&coinbase);
        let merkle_root = stratum::combine_with_coinbase(&job.merkle_branches, coinbase_hash);

        let header = job.serialize_header(&merkle_root, ntime, nonce, version);
        let header_hash = codec::sha256d(&header);
        let header_value = U256::from_little_endian(&header_hash);

        let share_diff =
            uint256::scaled_ratio(*DIFF1 * U256::from(SHARE_MULTIPLIER), header_value);

        let mut difficulty = submission.difficulty;
        let mut block_hash = None;
        let mut block_hash_invalid = None;
        let mut block_hex = None;

        if job.target >= header_value {
            // block candidate: the block must commit to the submitted
            // coinbase exactly, so it is serialized as-is
            block_hex = Some(hex::encode(job.serialize_block(&header, &coinbase)));
            block_hash = Some(hex::encode(codec::reverse_bytes(&header_hash)));
        } else {
            if self.context.emit_invalid_block_hashes {
                block_hash_invalid = Some(hex::encode(codec::reverse_bytes(&header_hash)));
            }

            if share_diff / difficulty < 0.99 {
                // a retarget may still be in flight; honor the difficulty
                // the share was actually mined at
                match submission.previous_difficulty {
                    Some(previous) if share_diff >= previous => difficulty = previous,
                    _ => return Err(StratumError::LowDifficultyShare { share_diff }),
                }
            }
        }

        Ok(Share {
            job_id: submission.job_id.into(),
            height: job.template.height,
            block_reward: job.template.coinbase_value,
            worker: submission.worker.into(),
            remote: submission.remote,
            port: submission.port,
            difficulty,
            share_diff,
            block_diff: job.difficulty,
            block_hash,
            block_hash_invalid,
            block_hex,
            error: None,
        })
    }
}
