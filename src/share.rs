use super::*;

/// Emitted for every submit that reaches the job manager, accepted or not.
/// Block candidates additionally carry the serialized block for submission.
#[derive(Debug, Clone, Serialize)]
pub struct Share {
    pub job_id: String,
    pub height: u64,
    pub block_reward: u64,
    pub worker: String,
    pub remote: IpAddr,
    pub port: u16,
    pub difficulty: f64,
    pub share_diff: f64,
    pub block_diff: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash_invalid: Option<String>,
    #[serde(skip)]
    pub block_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Share {
    pub fn rejected(
        job_id: &str,
        worker: &str,
        remote: IpAddr,
        port: u16,
        difficulty: f64,
        error: &StratumError,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            height: 0,
            block_reward: 0,
            worker: worker.into(),
            remote,
            port,
            difficulty,
            share_diff: 0.0,
            block_diff: 0.0,
            block_hash: None,
            block_hash_invalid: None,
            block_hex: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_block(&self) -> bool {
        self.block_hex.is_some()
    }
}
