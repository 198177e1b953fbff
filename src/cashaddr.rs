use super::*;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const DEFAULT_PREFIX: &str = "bitcoincash";

/// CashAddr address kind, taken from the version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    PubkeyHash,
    ScriptHash,
}

fn charset_value(c: char) -> Result<u8> {
    let lower = c.to_ascii_lowercase() as u8;
    CHARSET
        .iter()
        .position(|b| *b == lower)
        .map(|i| i as u8)
        .ok_or_else(|| anyhow!("invalid cashaddr character {c:?}"))
}

/// BCH checksum over 5-bit symbols, per the CashAddr specification.
fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;

    for &d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_FFFF_FFFF) << 5) ^ u64::from(d);

        if c0 & 0x01 != 0 {
            c ^= 0x98_F2BC_8E61;
        }
        if c0 & 0x02 != 0 {
            c ^= 0x79_B76D_99E2;
        }
        if c0 & 0x04 != 0 {
            c ^= 0xF3_3E5F_B3C4;
        }
        if c0 & 0x08 != 0 {
            c ^= 0xAE_2EAB_E2A8;
        }
        if c0 & 0x10 != 0 {
            c ^= 0x1E_4F43_E470;
        }
    }

    c ^ 1
}

fn convert_bits(data: &[u8], from: u32, to: u32) -> Result<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::new();
    let max = (1u32 << to) - 1;

    for &value in data {
        ensure!(
            u32::from(value) >> from == 0,
            "invalid {from}-bit value {value}"
        );
        acc = (acc << from) | u32::from(value);
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }

    ensure!(
        bits < from && (acc << (to - bits)) & max == 0,
        "non-zero padding in cashaddr payload"
    );

    Ok(out)
}

/// Decodes a CashAddr address into its kind and hash160 payload.
pub(crate) fn decode(address: &str) -> Result<(Kind, Vec<u8>)> {
    let (prefix, payload) = match address.split_once(':') {
        Some((prefix, payload)) => (prefix.to_ascii_lowercase(), payload),
        None => (DEFAULT_PREFIX.into(), address),
    };

    ensure!(!payload.is_empty(), "empty cashaddr payload");

    let values = payload
        .chars()
        .map(charset_value)
        .collect::<Result<Vec<u8>>>()?;

    let mut checksum_input: Vec<u8> = prefix.bytes().map(|b| b & 0x1F).collect();
    checksum_input.push(0);
    checksum_input.extend_from_slice(&values);

    ensure!(
        polymod(&checksum_input) == 0,
        "invalid cashaddr checksum for {address}"
    );

    ensure!(values.len() > 8, "cashaddr payload too short");
    let data = convert_bits(&values[..values.len() - 8], 5, 8)?;

    ensure!(!data.is_empty(), "cashaddr payload missing version byte");
    let version = data[0];
    ensure!(version & 0x80 == 0, "cashaddr version byte has high bit set");

    let kind = match (version >> 3) & 0x0F {
        0 => Kind::PubkeyHash,
        1 => Kind::ScriptHash,
        other => bail!("unsupported cashaddr type {other}"),
    };

    let hash = data[1..].to_vec();
    ensure!(
        hash.len() == 20,
        "unsupported cashaddr hash size {}",
        hash.len()
    );

    Ok((kind, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case(address: &str, kind: Kind, hash_hex: &str) {
        let (got_kind, hash) = decode(address).unwrap();
        assert_eq!(got_kind, kind, "kind for {address}");
        assert_eq!(hex::encode(hash), hash_hex, "hash for {address}");
    }

    #[test]
    fn known_vectors() {
        case(
            "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a",
            Kind::PubkeyHash,
            "76a04053bda0a88bda5177b86a15c3b29f559873",
        );
        case(
            "bitcoincash:qr95sy3j9xwd2ap32xkykttr4cvcu7as4y0qverfuy",
            Kind::PubkeyHash,
            "cb481232299cd5743151ac4b2d63ae198e7bb0a9",
        );
        case(
            "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq",
            Kind::ScriptHash,
            "76a04053bda0a88bda5177b86a15c3b29f559873",
        );
    }

    #[test]
    fn prefix_defaults_to_bitcoincash() {
        case(
            "qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a",
            Kind::PubkeyHash,
            "76a04053bda0a88bda5177b86a15c3b29f559873",
        );
    }

    #[test]
    fn rejects_corruption() {
        // flipped final character
        assert!(decode("bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6q").is_err());
        // wrong prefix for an otherwise valid payload
        assert!(decode("bchtest:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a").is_err());
        assert!(decode("bitcoincash:").is_err());
        assert!(decode("bitcoincash:b").is_err());
    }
}
