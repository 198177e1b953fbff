use super::*;

/// Double SHA-256, the hash used for block headers, transaction ids, merkle
/// nodes and P2P checksums.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Bitcoin compact-size encoding.
pub fn var_int(n: u64) -> Vec<u8> {
    match n {
        0..=0xFC => vec![n as u8],
        0xFD..=0xFFFF => {
            let mut buf = vec![0xFD];
            buf.extend_from_slice(&(n as u16).to_le_bytes());
            buf
        }
        0x1_0000..=0xFFFF_FFFF => {
            let mut buf = vec![0xFE];
            buf.extend_from_slice(&(n as u32).to_le_bytes());
            buf
        }
        _ => {
            let mut buf = vec![0xFF];
            buf.extend_from_slice(&n.to_le_bytes());
            buf
        }
    }
}

pub fn var_string(s: &[u8]) -> Vec<u8> {
    let mut buf = var_int(s.len() as u64);
    buf.extend_from_slice(s);
    buf
}

/// Decodes a compact-size prefix, returning the value and its encoded width.
pub fn read_var_int(buf: &[u8]) -> Result<(u64, usize)> {
    let first = *buf.first().context("empty varint")?;

    let take = |width: usize| -> Result<&[u8]> {
        buf.get(1..1 + width).with_context(|| {
            format!("truncated varint: {} of {width} payload bytes", buf.len() - 1)
        })
    };

    match first {
        0..=0xFC => Ok((u64::from(first), 1)),
        0xFD => Ok((u64::from(u16::from_le_bytes(take(2)?.try_into()?)), 3)),
        0xFE => Ok((u64::from(u32::from_le_bytes(take(4)?.try_into()?)), 5)),
        0xFF => Ok((u64::from_le_bytes(take(8)?.try_into()?), 9)),
    }
}

/// Coinbase scriptSig number encoding, BIP-34 style: small numbers map onto
/// the OP_1..OP_16 range, everything else is a length byte followed by the
/// minimal little-endian encoding with a sign-safe top byte.
pub fn serialize_number(n: i64) -> Result<Vec<u8>> {
    ensure!(n >= 0, "cannot script-encode negative number {n}");

    let mut n = n as u64;

    if (1..=16).contains(&n) {
        return Ok(vec![0x50 + n as u8]);
    }

    let mut payload = Vec::new();
    while n > 0x7F {
        payload.push((n & 0xFF) as u8);
        n >>= 8;
    }
    payload.push(n as u8);

    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(&payload);

    Ok(buf)
}

pub fn reverse_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

/// Swaps the byte order within each 32-bit word.
pub fn reverse_u32_words(bytes: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        bytes.len() % 4 == 0,
        "length {} is not a multiple of 4",
        bytes.len()
    );

    let mut buf = Vec::with_capacity(bytes.len());
    for word in bytes.chunks(4) {
        buf.extend(word.iter().rev());
    }

    Ok(buf)
}

pub fn reverse_hex(hex: &str) -> Result<String> {
    let bytes = hex::decode(hex)?;
    Ok(hex::encode(reverse_bytes(&bytes)))
}

/// Decodes a displayed (big-endian) hash into internal byte order, padding
/// short values on the right with zeros first.
pub fn uint256_from_hash_hex(hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex)?;
    ensure!(bytes.len() <= 32, "hash hex longer than 32 bytes");

    let mut padded = [0u8; 32];
    padded[..bytes.len()].copy_from_slice(&bytes);
    padded.reverse();

    Ok(padded)
}

/// Decodes the 4-byte compact target representation.
pub fn bits_to_target(bits: u32) -> Result<U256> {
    let exponent = bits >> 24;
    ensure!(
        bits & 0x0080_0000 == 0,
        "compact target {bits:#010x} has the sign bit set"
    );
    let mantissa = U256::from(bits & 0x007F_FFFF);

    let target = if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        let word = bits & 0x007F_FFFF;
        ensure!(
            exponent <= 34 && !(word > 0xFF && exponent > 33) && !(word > 0xFFFF && exponent > 32),
            "compact target {bits:#010x} overflows"
        );
        mantissa << (8 * (exponent - 3))
    };

    ensure!(!target.is_zero(), "compact target {bits:#010x} is zero");

    Ok(target)
}

/// Encodes a target in compact form. When the mantissa's high byte would set
/// the sign bit the mantissa is shifted down a byte and the exponent bumped,
/// matching the canonical rule.
pub fn target_to_compact(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = target.bits().div_ceil(8) as u32;
    let mut mantissa = if size <= 3 {
        target.low_u32() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        size += 1;
    }

    (size << 24) | mantissa
}

/// Converts a base58check or CashAddr address into a P2PKH output script.
pub fn address_to_script(address: &str) -> Result<Vec<u8>> {
    let hash160 = if address.contains(':') {
        let (_kind, hash) = cashaddr::decode(address)?;
        hash
    } else {
        let payload = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .with_context(|| format!("invalid base58check address {address}"))?;

        ensure!(
            payload.len() == 21,
            "address {address} decodes to {} bytes, expected 25 with checksum",
            payload.len() + 4
        );

        payload[1..].to_vec()
    };

    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xA9, 0x14]);
    script.extend_from_slice(&hash160);
    script.extend_from_slice(&[0x88, 0xAC]);

    Ok(script)
}

/// P2PK output script for POS coins paying to a raw public key.
pub fn pubkey_to_script(pubkey: &str) -> Result<Vec<u8>> {
    ensure!(
        pubkey.len() == 66,
        "pubkey hex is {} chars, expected 66",
        pubkey.len()
    );

    let mut script = Vec::with_capacity(35);
    script.push(0x21);
    script.extend_from_slice(&hex::decode(pubkey)?);
    script.push(0xAC);

    Ok(script)
}
