use super::*;

/// One mining job: a block template frozen together with everything a
/// session needs to hand out work and everything the share pipeline needs to
/// verify it. Jobs are immutable after construction and shared as `Arc`;
/// only the duplicate-submission set mutates, behind its own lock.
#[derive(Debug)]
pub struct Job {
    pub job_id: JobId,
    pub template: Arc<BlockTemplate>,
    pub target: U256,
    pub difficulty: f64,
    pub prev_hash: PrevHash,
    pub merkle_branches: Vec<MerkleNode>,
    pub coinb1: Vec<u8>,
    pub coinb2: Vec<u8>,
    pub version_mask: Version,
    pub reward: RewardKind,
    raw_transactions: Vec<u8>,
    vote_bytes: Vec<u8>,
    submissions: Mutex<HashSet<(String, String, String, String)>>,
}

impl Job {
    pub fn new(
        job_id: JobId,
        template: Arc<BlockTemplate>,
        coinb1: Vec<u8>,
        coinb2: Vec<u8>,
        version_mask: Version,
        reward: RewardKind,
    ) -> Result<Self> {
        let target = template.target()?;
        ensure!(!target.is_zero(), "template target is zero");

        let difficulty = uint256::scaled_ratio(*DIFF1, target);
        let prev_hash = PrevHash::from_template_hex(&template.previous_block_hash)?;
        let merkle_branches = stratum::merkle_branches(&template.tx_hashes()?);
        let raw_transactions = template.raw_transactions()?;

        let mut vote_bytes = Vec::new();
        if !template.votes.is_empty() {
            vote_bytes.extend_from_slice(&codec::var_int(template.votes.len() as u64));
            for vote in &template.votes {
                vote_bytes.extend_from_slice(&hex::decode(vote)?);
            }
        }

        Ok(Self {
            job_id,
            template,
            target,
            difficulty,
            prev_hash,
            merkle_branches,
            coinb1,
            coinb2,
            version_mask,
            reward,
            raw_transactions,
            vote_bytes,
            submissions: Mutex::new(HashSet::new()),
        })
    }

    pub fn serialize_coinbase(&self, extranonce1: &Extranonce, extranonce2: &Extranonce) -> Vec<u8> {
        let mut coinbase = Vec::with_capacity(
            self.coinb1.len() + extranonce1.len() + extranonce2.len() + self.coinb2.len(),
        );
        coinbase.extend_from_slice(&self.coinb1);
        coinbase.extend_from_slice(extranonce1.as_bytes());
        coinbase.extend_from_slice(extranonce2.as_bytes());
        coinbase.extend_from_slice(&self.coinb2);
        coinbase
    }

    /// The canonical 80-byte header:
    /// `version_LE ‖ prev_hash ‖ merkle_root ‖ ntime_LE ‖ bits_LE ‖ nonce_LE`.
    pub fn serialize_header(
        &self,
        merkle_root: &[u8; 32],
        ntime: Ntime,
        nonce: Nonce,
        version: Version,
    ) -> [u8; 80] {
        let mut header = [0u8; 80];
        header[0..4].copy_from_slice(&version.to_consensus().to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_hash.header_bytes());
        header[36..68].copy_from_slice(merkle_root);
        header[68..72].copy_from_slice(&u32::from(ntime).to_le_bytes());
        header[72..76].copy_from_slice(&self.template.bits.to_consensus().to_le_bytes());
        header[76..80].copy_from_slice(&u32::from(nonce).to_le_bytes());
        header
    }

    pub fn serialize_block(&self, header: &[u8; 80], coinbase: &[u8]) -> Vec<u8> {
        let mut block = Vec::with_capacity(
            80 + 9 + coinbase.len() + self.raw_transactions.len() + self.vote_bytes.len() + 1,
        );

        block.extend_from_slice(header);
        block.extend_from_slice(&codec::var_int(self.template.transactions.len() as u64 + 1));
        block.extend_from_slice(coinbase);
        block.extend_from_slice(&self.raw_transactions);
        block.extend_from_slice(&self.vote_bytes);

        if self.reward == RewardKind::Pos {
            // zero-length block signature placeholder
            block.push(0);
        }

        block
    }

    /// Returns true the first time a `(extranonce1, extranonce2, ntime,
    /// nonce)` tuple is seen for this job.
    pub fn register_submit(
        &self,
        extranonce1: &str,
        extranonce2: &str,
        ntime: &str,
        nonce: &str,
    ) -> bool {
        self.submissions
            .lock()
            .expect("submissions lock poisoned")
            .insert((
                extranonce1.to_lowercase(),
                extranonce2.to_lowercase(),
                ntime.to_lowercase(),
                nonce.to_lowercase(),
            ))
    }

    pub fn notify(&self, clean_jobs: bool) -> Notify {
        Notify {
            job_id: self.job_id,
            prevhash: self.prev_hash,
            coinb1: hex::encode(&self.coinb1),
            coinb2: hex::encode(&self.coinb2),
            merkle_branches: self.merkle_branches.clone(),
            version: Version::from(self.template.version),
            nbits: self.template.bits,
            ntime: Ntime::from(self.template.curtime),
            clean_jobs,
        }
    }
}
