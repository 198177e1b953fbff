use super::*;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2pOptions {
    #[serde(default)]
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub disable_transactions: bool,
}

const PROTOCOL_VERSION: u32 = 70012;
const HEADER_SIZE: usize = 24;
const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;
const INV_BLOCK: u32 = 2;

/// The 24-byte P2P envelope: `magic(4) ‖ command(12) ‖ length(4) ‖
/// checksum(4)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub command: String,
    pub length: usize,
    pub checksum: [u8; 4],
}

pub fn parse_header(magic: [u8; 4], buf: &[u8; HEADER_SIZE]) -> Result<MessageHeader> {
    ensure!(buf[0..4] == magic, "magic mismatch");

    let command = buf[4..16]
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect::<String>();
    ensure!(
        command.chars().all(|c| c.is_ascii_graphic()),
        "garbled command field"
    );

    let length = u32::from_le_bytes(buf[16..20].try_into().expect("4 bytes")) as usize;
    ensure!(length <= MAX_PAYLOAD_SIZE, "payload of {length} bytes too large");

    Ok(MessageHeader {
        command,
        length,
        checksum: buf[20..24].try_into().expect("4 bytes"),
    })
}

pub fn checksum(payload: &[u8]) -> [u8; 4] {
    codec::sha256d(payload)[..4].try_into().expect("4 bytes")
}

pub fn frame_message(magic: [u8; 4], command: &str, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());

    message.extend_from_slice(&magic);

    let mut command_bytes = [0u8; 12];
    command_bytes[..command.len()].copy_from_slice(command.as_bytes());
    message.extend_from_slice(&command_bytes);

    message.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    message.extend_from_slice(&checksum(payload));
    message.extend_from_slice(payload);

    message
}

fn version_payload(relay: bool, nonce: u64, start_height: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(86);

    payload.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    payload.extend_from_slice(&0u64.to_le_bytes()); // services
    payload.extend_from_slice(&(unix_now() as i64).to_le_bytes());
    payload.extend_from_slice(&[0u8; 26]); // addr_recv
    payload.extend_from_slice(&[0u8; 26]); // addr_from
    payload.extend_from_slice(&nonce.to_le_bytes());
    payload.extend_from_slice(&codec::var_string(USER_AGENT.as_bytes()));
    payload.extend_from_slice(&start_height.to_le_bytes());
    payload.push(u8::from(relay));

    payload
}

/// Extracts block hashes (displayed big-endian hex) from an `inv` payload.
pub fn parse_inv_block_hashes(payload: &[u8]) -> Result<Vec<String>> {
    let (count, offset) = codec::read_var_int(payload)?;
    let mut hashes = Vec::new();
    let mut pos = offset;

    for _ in 0..count {
        let entry = payload
            .get(pos..pos + 36)
            .context("truncated inv entry")?;
        let kind = u32::from_le_bytes(entry[..4].try_into().expect("4 bytes"));

        if kind == INV_BLOCK {
            hashes.push(hex::encode(codec::reverse_bytes(&entry[4..36])));
        }

        pos += 36;
    }

    Ok(hashes)
}

/// Outbound peer on the coin P2P network, used purely as a low-latency
/// new-block signal: handshake, answer pings, and forward block `inv`
/// hashes. No transaction relay.
pub struct Peer {
    options: P2pOptions,
    magic: [u8; 4],
    block_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Peer {
    pub fn new(
        options: P2pOptions,
        magic: [u8; 4],
        block_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            magic,
            block_tx,
            cancel,
        }
    }

    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            match self.connect_and_serve().await {
                Ok(()) => return,
                Err(err) => {
                    warn!("p2p peer error: {err:#}, reconnecting in {backoff:?}");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(backoff) => {}
            }

            backoff = (backoff * 2).min(Duration::from_secs(60));
        }
    }

    async fn connect_and_serve(&self) -> Result {
        let address = format!("{}:{}", self.options.host, self.options.port);
        let mut stream = tokio::net::TcpStream::connect(&address)
            .await
            .with_context(|| format!("failed to connect to peer {address}"))?;

        info!("connected to p2p peer {address}");

        let version = version_payload(!self.options.disable_transactions, rand::rng().next_u64(), 0);
        stream
            .write_all(&frame_message(self.magic, "version", &version))
            .await?;

        let mut buffer: Vec<u8> = Vec::with_capacity(8192);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = stream.read_buf(&mut buffer) => {
                    if read? == 0 {
                        bail!("peer {address} closed the connection");
                    }
                }
            }

            while let Some(consumed) = self.drain_one(&mut stream, &mut buffer).await? {
                buffer.drain(..consumed);
            }
        }
    }

    /// Processes at most one framed message from the buffer, returning how
    /// many bytes to consume, or None when more input is needed. A magic
    /// mismatch scans forward to the next candidate position.
    async fn drain_one(
        &self,
        stream: &mut tokio::net::TcpStream,
        buffer: &mut Vec<u8>,
    ) -> Result<Option<usize>> {
        if buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        if buffer[0..4] != self.magic {
            let skip = buffer[1..]
                .windows(4)
                .position(|w| w == self.magic)
                .map(|p| p + 1)
                .unwrap_or(buffer.len().saturating_sub(3));

            warn!("p2p stream lost sync, skipping {skip} bytes");
            return Ok(Some(skip));
        }

        let header = parse_header(
            self.magic,
            buffer[..HEADER_SIZE].try_into().expect("header size"),
        )?;

        if buffer.len() < HEADER_SIZE + header.length {
            return Ok(None);
        }

        let payload = &buffer[HEADER_SIZE..HEADER_SIZE + header.length];

        if checksum(payload) != header.checksum {
            warn!("bad checksum on {} message, dropping", header.command);
            return Ok(Some(HEADER_SIZE + header.length));
        }

        match header.command.as_str() {
            "version" => {
                stream
                    .write_all(&frame_message(self.magic, "verack", &[]))
                    .await?;
            }
            "verack" => {
                info!("p2p handshake complete");
            }
            "ping" => {
                let pong = frame_message(self.magic, "pong", payload);
                stream.write_all(&pong).await?;
            }
            "inv" => match parse_inv_block_hashes(payload) {
                Ok(hashes) => {
                    for hash in hashes {
                        debug!("p2p block inv {hash}");
                        let _ = self.block_tx.try_send(hash);
                    }
                }
                Err(err) => warn!("unparseable inv payload: {err}"),
            },
            other => {
                debug!("ignoring p2p message {other}");
            }
        }

        Ok(Some(HEADER_SIZE + header.length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = [0xF9, 0xBE, 0xB4, 0xD9];

    #[test]
    fn frame_and_parse_roundtrip() {
        let framed = frame_message(MAGIC, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(framed.len(), HEADER_SIZE + 8);

        let header = parse_header(MAGIC, framed[..HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(header.command, "ping");
        assert_eq!(header.length, 8);
        assert_eq!(header.checksum, checksum(&framed[HEADER_SIZE..]));
    }

    #[test]
    fn header_rejects_wrong_magic_and_oversize() {
        let mut framed = frame_message(MAGIC, "verack", &[]);
        framed[0] ^= 0xFF;
        assert!(parse_header(MAGIC, framed[..HEADER_SIZE].try_into().unwrap()).is_err());

        let mut framed = frame_message(MAGIC, "verack", &[]);
        framed[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(parse_header(MAGIC, framed[..HEADER_SIZE].try_into().unwrap()).is_err());
    }

    #[test]
    fn checksum_is_leading_sha256d() {
        assert_eq!(checksum(&[]), codec::sha256d(&[])[..4]);
    }

    #[test]
    fn inv_extracts_only_block_hashes() {
        let block_hash = [0xABu8; 32];
        let tx_hash = [0xCDu8; 32];

        let mut payload = codec::var_int(2);
        payload.extend_from_slice(&1u32.to_le_bytes()); // MSG_TX
        payload.extend_from_slice(&tx_hash);
        payload.extend_from_slice(&INV_BLOCK.to_le_bytes());
        payload.extend_from_slice(&block_hash);

        let hashes = parse_inv_block_hashes(&payload).unwrap();
        assert_eq!(hashes, vec!["ab".repeat(32)]);
    }

    #[test]
    fn inv_rejects_truncation() {
        let mut payload = codec::var_int(1);
        payload.extend_from_slice(&INV_BLOCK.to_le_bytes());
        payload.extend_from_slice(&[0u8; 16]);

        assert!(parse_inv_block_hashes(&payload).is_err());
    }

    #[test]
    fn version_payload_shape() {
        let payload = version_payload(true, 42, 0);

        assert_eq!(&payload[..4], &PROTOCOL_VERSION.to_le_bytes());
        // relay flag trails the payload
        assert_eq!(*payload.last().unwrap(), 1);
        assert_eq!(*version_payload(false, 42, 0).last().unwrap(), 0);

        // user agent rides along var-string encoded
        let agent_pos = 4 + 8 + 8 + 26 + 26 + 8;
        assert_eq!(payload[agent_pos] as usize, USER_AGENT.len());
    }
}
