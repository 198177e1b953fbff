use super::*;

/// Reward scheme of the coin, from the `coin.reward` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RewardKind {
    #[default]
    Pow,
    Pos,
}

/// A fee recipient: an output script and its cut of the block reward in
/// percent.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub script: Vec<u8>,
    pub percent: f64,
}

/// Builds the coinbase transaction split around the extranonce placeholder:
/// `coinb1 ‖ extranonce1 ‖ extranonce2 ‖ coinb2` reassembles to the exact
/// serialized transaction.
#[derive(Clone)]
pub struct CoinbaseBuilder<'a> {
    template: &'a BlockTemplate,
    pool_script: &'a [u8],
    recipients: &'a [Recipient],
    reward: RewardKind,
    tx_messages: bool,
    pool_sig: &'a str,
    placeholder_size: usize,
}

impl<'a> CoinbaseBuilder<'a> {
    const MAX_SCRIPT_SIG_SIZE: usize = 100;

    pub fn new(template: &'a BlockTemplate, pool_script: &'a [u8]) -> Self {
        Self {
            template,
            pool_script,
            recipients: &[],
            reward: RewardKind::Pow,
            tx_messages: false,
            pool_sig: "",
            placeholder_size: EXTRANONCE_PLACEHOLDER_SIZE,
        }
    }

    pub fn with_recipients(mut self, recipients: &'a [Recipient]) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_reward(mut self, reward: RewardKind) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_tx_messages(mut self, tx_messages: bool) -> Self {
        self.tx_messages = tx_messages;
        self
    }

    pub fn with_pool_sig(mut self, pool_sig: &'a str) -> Self {
        self.pool_sig = pool_sig;
        self
    }

    pub fn build(self) -> Result<(Vec<u8>, Vec<u8>)> {
        let template = self.template;

        let mut script_sig = codec::serialize_number(template.height.try_into()?)?;

        if let Some(flags) = &template.coinbaseaux.flags {
            script_sig.extend_from_slice(&hex::decode(flags)?);
        }

        let script_prefix_size = script_sig.len();

        script_sig.extend_from_slice(&vec![0u8; self.placeholder_size]);
        script_sig.extend_from_slice(self.pool_sig.as_bytes());

        ensure!(
            script_sig.len() <= Self::MAX_SCRIPT_SIG_SIZE,
            "script sig too large: {} bytes (max {})",
            script_sig.len(),
            Self::MAX_SCRIPT_SIG_SIZE
        );

        let mut tx = Vec::with_capacity(256);

        let version: u32 = if self.tx_messages { 2 } else { 1 };
        tx.extend_from_slice(&version.to_le_bytes());

        if self.reward == RewardKind::Pos {
            tx.extend_from_slice(&template.curtime.to_le_bytes());
        }

        // single input spending the null outpoint
        tx.extend_from_slice(&codec::var_int(1));
        tx.extend_from_slice(&[0u8; 32]);
        tx.extend_from_slice(&u32::MAX.to_le_bytes());
        tx.extend_from_slice(&codec::var_int(script_sig.len() as u64));

        let offset = tx.len() + script_prefix_size;

        tx.extend_from_slice(&script_sig);
        tx.extend_from_slice(&u32::MAX.to_le_bytes()); // sequence

        tx.extend_from_slice(&self.outputs()?);
        tx.extend_from_slice(&0u32.to_le_bytes()); // lock_time

        let coinb1 = tx[..offset].to_vec();
        let coinb2 = tx[offset + self.placeholder_size..].to_vec();

        Ok((coinb1, coinb2))
    }

    fn outputs(&self) -> Result<Vec<u8>> {
        let template = self.template;
        let mut outputs: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut remainder = template.coinbase_value;

        for payee in template.payees() {
            let script = match &payee.script {
                Some(script) => hex::decode(script)?,
                None => codec::address_to_script(&payee.payee)?,
            };

            remainder = remainder.checked_sub(payee.amount).ok_or_else(|| {
                anyhow!(
                    "payee {} claims {} of {} remaining",
                    payee.payee,
                    payee.amount,
                    remainder
                )
            })?;

            outputs.push((payee.amount, script));
        }

        for recipient in self.recipients {
            let amount = (template.coinbase_value as f64 * recipient.percent / 100.0) as u64;

            remainder = remainder.checked_sub(amount).ok_or_else(|| {
                anyhow!("recipient cut {amount} exceeds {remainder} remaining")
            })?;

            outputs.push((amount, recipient.script.clone()));
        }

        outputs.push((remainder, self.pool_script.to_vec()));

        if let Some(commitment) = &template.default_witness_commitment {
            outputs.push((0, hex::decode(commitment)?));
        }

        let mut buf = codec::var_int(outputs.len() as u64);
        for (amount, script) in outputs {
            buf.extend_from_slice(&amount.to_le_bytes());
            buf.extend_from_slice(&codec::var_string(&script));
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::block_template::tests::sample_template, pretty_assertions::assert_eq};

    fn pool_script() -> Vec<u8> {
        codec::address_to_script("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap()
    }

    fn assemble(coinb1: &[u8], coinb2: &[u8]) -> Vec<u8> {
        let mut tx = coinb1.to_vec();
        tx.extend_from_slice(&hex::decode("01000000").unwrap());
        tx.extend_from_slice(&hex::decode("00000000").unwrap());
        tx.extend_from_slice(coinb2);
        tx
    }

    /// Walks the serialized outputs, returning `(amount, script)` pairs.
    fn parse_outputs(tx: &[u8], reward: RewardKind) -> Vec<(u64, Vec<u8>)> {
        let mut pos = 4;
        if reward == RewardKind::Pos {
            pos += 4;
        }
        assert_eq!(tx[pos], 1, "input count");
        pos += 1 + 32 + 4;

        let script_sig_len = tx[pos] as usize;
        pos += 1 + script_sig_len + 4;

        let count = tx[pos] as usize;
        pos += 1;

        let mut outputs = Vec::new();
        for _ in 0..count {
            let amount = u64::from_le_bytes(tx[pos..pos + 8].try_into().unwrap());
            pos += 8;
            let script_len = tx[pos] as usize;
            pos += 1;
            outputs.push((amount, tx[pos..pos + script_len].to_vec()));
            pos += script_len;
        }

        assert_eq!(&tx[pos..], &[0, 0, 0, 0], "lock_time trailer");

        outputs
    }

    #[test]
    fn split_point_is_the_placeholder() {
        let template = sample_template();
        let (coinb1, _coinb2) = CoinbaseBuilder::new(&template, &pool_script())
            .with_pool_sig("/lode/")
            .build()
            .unwrap();

        // coinb1 ends after height + aux flags inside the scriptSig
        let height_script = codec::serialize_number(100).unwrap();
        let flags = hex::decode("0a2f4542").unwrap();
        let tail = [height_script.as_slice(), flags.as_slice()].concat();

        assert!(coinb1.ends_with(&tail), "coinb1 must end at the placeholder");
    }

    #[test]
    fn assembles_to_a_well_formed_transaction() {
        let template = sample_template();
        let (coinb1, coinb2) = CoinbaseBuilder::new(&template, &pool_script())
            .with_pool_sig("/lode/")
            .build()
            .unwrap();

        let tx = assemble(&coinb1, &coinb2);

        assert_eq!(&tx[..4], &[1, 0, 0, 0], "version 1 LE");
        assert_eq!(tx[4], 1, "one input");
        assert_eq!(&tx[5..37], &[0u8; 32], "null outpoint txid");
        assert_eq!(&tx[37..41], &[0xFF; 4], "null outpoint index");

        let outputs = parse_outputs(&tx, RewardKind::Pow);
        assert_eq!(outputs, vec![(625_000_000, pool_script())]);
    }

    #[test]
    fn placeholder_boundary_occurs_once() {
        let template = sample_template();
        let (coinb1, coinb2) = CoinbaseBuilder::new(&template, &pool_script())
            .with_pool_sig("/lode/")
            .build()
            .unwrap();

        let needle = hex::decode("deadbeefcafebabe").unwrap();
        let mut tx = coinb1.clone();
        tx.extend_from_slice(&needle);
        tx.extend_from_slice(&coinb2);

        let count = tx.windows(needle.len()).filter(|w| *w == needle).count();
        assert_eq!(count, 1, "extranonce bytes should appear exactly once");
    }

    #[test]
    fn recipients_take_their_percentage() {
        let template = sample_template();
        let recipient_script = codec::pubkey_to_script(
            "02aabbccddeeff00112233445566778899aabbccddeeff001122334455667788aa",
        )
        .unwrap();
        let recipients = vec![Recipient {
            script: recipient_script.clone(),
            percent: 1.0,
        }];

        let (coinb1, coinb2) = CoinbaseBuilder::new(&template, &pool_script())
            .with_recipients(&recipients)
            .build()
            .unwrap();

        let outputs = parse_outputs(&assemble(&coinb1, &coinb2), RewardKind::Pow);
        let fee = (625_000_000f64 * 0.01) as u64;

        assert_eq!(
            outputs,
            vec![
                (fee, recipient_script),
                (625_000_000 - fee, pool_script()),
            ]
        );
    }

    #[test]
    fn payees_are_paid_before_the_pool() {
        let mut template = sample_template();
        template.masternode = vec![Payee {
            payee: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into(),
            script: None,
            amount: 5_000_000,
        }];

        let (coinb1, coinb2) = CoinbaseBuilder::new(&template, &pool_script())
            .build()
            .unwrap();

        let outputs = parse_outputs(&assemble(&coinb1, &coinb2), RewardKind::Pow);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].0, 5_000_000);
        assert_eq!(outputs[1].0, 625_000_000 - 5_000_000);
    }

    #[test]
    fn witness_commitment_is_a_zero_value_trailer() {
        let mut template = sample_template();
        template.default_witness_commitment =
            Some("6a24aa21a9ed".to_string() + &"00".repeat(32));

        let (coinb1, coinb2) = CoinbaseBuilder::new(&template, &pool_script())
            .build()
            .unwrap();

        let outputs = parse_outputs(&assemble(&coinb1, &coinb2), RewardKind::Pow);
        let last = outputs.last().unwrap();

        assert_eq!(last.0, 0);
        assert!(last.1.starts_with(&[0x6A, 0x24, 0xAA, 0x21, 0xA9, 0xED]));
    }

    #[test]
    fn pos_prepends_the_template_time() {
        let template = sample_template();
        let (coinb1, _) = CoinbaseBuilder::new(&template, &pool_script())
            .with_reward(RewardKind::Pos)
            .build()
            .unwrap();

        assert_eq!(&coinb1[..4], &[1, 0, 0, 0]);
        assert_eq!(
            &coinb1[4..8],
            &template.curtime.to_le_bytes(),
            "POS timestamp after version"
        );
    }

    #[test]
    fn tx_messages_bump_the_version() {
        let template = sample_template();
        let (coinb1, _) = CoinbaseBuilder::new(&template, &pool_script())
            .with_tx_messages(true)
            .build()
            .unwrap();

        assert_eq!(&coinb1[..4], &[2, 0, 0, 0]);
    }

    #[test]
    fn oversized_script_sig_errors() {
        let template = sample_template();
        let result = CoinbaseBuilder::new(&template, &pool_script())
            .with_pool_sig(&"x".repeat(120))
            .build();

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("script sig too large")
        );
    }

    #[test]
    fn overclaiming_payee_errors() {
        let mut template = sample_template();
        template.masternode = vec![Payee {
            payee: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into(),
            script: None,
            amount: u64::MAX,
        }];

        assert!(
            CoinbaseBuilder::new(&template, &pool_script())
                .build()
                .is_err()
        );
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let template = sample_template();
        let script = pool_script();

        let a = CoinbaseBuilder::new(&template, &script)
            .with_pool_sig("/lode/")
            .build()
            .unwrap();
        let b = CoinbaseBuilder::new(&template, &script)
            .with_pool_sig("/lode/")
            .build()
            .unwrap();

        assert_eq!(a, b);
    }
}
