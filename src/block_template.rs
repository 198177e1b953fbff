use super::*;

/// A `getblocktemplate` result, kept close to the daemon's JSON. Coins in the
/// Bitcoin family disagree on the optional fields, so everything beyond the
/// core header inputs defaults.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BlockTemplate {
    pub height: u64,
    pub version: u32,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    pub bits: Nbits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub curtime: u32,
    #[serde(rename = "coinbasevalue", default)]
    pub coinbase_value: u64,
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
    #[serde(default)]
    pub coinbaseaux: CoinbaseAux,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_witness_commitment: Option<String>,
    #[serde(default, deserialize_with = "payee_list")]
    pub masternode: Vec<Payee>,
    #[serde(default)]
    pub masternode_payments_started: bool,
    #[serde(default, deserialize_with = "payee_list")]
    pub superblock: Vec<Payee>,
    #[serde(default)]
    pub votes: Vec<String>,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct TemplateTransaction {
    pub data: String,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct CoinbaseAux {
    #[serde(default)]
    pub flags: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Payee {
    pub payee: String,
    #[serde(default)]
    pub script: Option<String>,
    pub amount: u64,
}

/// Dash-family daemons report a single payee object before masternode lists
/// became arrays; accept both shapes.
fn payee_list<'de, D>(deserializer: D) -> Result<Vec<Payee>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Many(Vec<Payee>),
        One(Payee),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::Many(payees)) => payees,
        Some(Raw::One(payee)) => vec![payee],
    })
}

impl TemplateTransaction {
    pub fn hash_hex(&self) -> Result<&str> {
        self.txid
            .as_deref()
            .or(self.hash.as_deref())
            .ok_or_else(|| anyhow!("transaction carries neither txid nor hash"))
    }
}

impl BlockTemplate {
    /// Transaction hashes in internal byte order, coinbase excluded.
    pub fn tx_hashes(&self) -> Result<Vec<[u8; 32]>> {
        self.transactions
            .iter()
            .map(|tx| codec::uint256_from_hash_hex(tx.hash_hex()?))
            .collect()
    }

    /// The raw non-coinbase transaction bytes, concatenated in template
    /// order.
    pub fn raw_transactions(&self) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        for tx in &self.transactions {
            raw.extend_from_slice(&hex::decode(&tx.data)?);
        }
        Ok(raw)
    }

    /// The block-acceptance target: the explicit `target` field when
    /// present, otherwise decoded from `bits`.
    pub fn target(&self) -> Result<U256> {
        match &self.target {
            Some(hex) => uint256::u256_from_hex(hex),
            None => Ok(self.bits.to_target()?),
        }
    }

    pub fn payees(&self) -> impl Iterator<Item = &Payee> {
        self.masternode.iter().chain(self.superblock.iter())
    }
}
