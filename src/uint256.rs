use super::*;

/// The diff-1 target, 0x00000000FFFF0000…0. Pool difficulty 1 is defined
/// relative to this value.
pub static DIFF1: LazyLock<U256> = LazyLock::new(|| U256::from(0xFFFFu64) << 208);

/// Scale factor for the share-difficulty division. 10^18 keeps ~18 decimal
/// digits through the integer division before the result is narrowed to a
/// float.
pub const SHARE_PRECISION: u64 = 1_000_000_000_000_000_000;

pub fn u256_from_hex(hex: &str) -> Result<U256> {
    U256::from_str_radix(hex, 16).with_context(|| format!("invalid 256-bit hex {hex:?}"))
}

pub fn u256_from_dec(decimal: &str) -> Result<U256> {
    U256::from_dec_str(decimal).with_context(|| format!("invalid 256-bit decimal {decimal:?}"))
}

pub fn u256_from_be_bytes(bytes: &[u8]) -> Result<U256> {
    ensure!(bytes.len() <= 32, "{} bytes exceed 256 bits", bytes.len());
    Ok(U256::from_big_endian(bytes))
}

pub fn u256_from_le_bytes(bytes: &[u8]) -> Result<U256> {
    ensure!(bytes.len() <= 32, "{} bytes exceed 256 bits", bytes.len());
    Ok(U256::from_little_endian(bytes))
}

pub fn u256_to_be32(value: U256) -> [u8; 32] {
    value.to_big_endian()
}

pub fn u256_to_le32(value: U256) -> [u8; 32] {
    value.to_little_endian()
}

/// `numerator / denominator` recovered as a float by scaling with 10^18
/// before the integer division. The product runs in 512 bits, so numerators
/// near 2^256 stay exact.
pub fn scaled_ratio(numerator: U256, denominator: U256) -> f64 {
    assert!(!denominator.is_zero(), "scaled_ratio denominator is zero");

    let scaled = numerator.full_mul(U256::from(SHARE_PRECISION));
    let quotient = scaled / U512::from_big_endian(&u256_to_be32(denominator));

    u512_to_f64(quotient) / SHARE_PRECISION as f64
}

pub fn u512_to_f64(value: U512) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 2f64.powi(64) + *limb as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff1_layout() {
        let be = u256_to_be32(*DIFF1);
        assert_eq!(
            hex::encode(be),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn construction_sources_agree() {
        let from_hex = u256_from_hex("ffff0000").unwrap();
        let from_dec = u256_from_dec("4294901760").unwrap();
        let from_be = u256_from_be_bytes(&[0xFF, 0xFF, 0x00, 0x00]).unwrap();
        let from_le = u256_from_le_bytes(&[0x00, 0x00, 0xFF, 0xFF]).unwrap();

        assert_eq!(from_hex, from_dec);
        assert_eq!(from_hex, from_be);
        assert_eq!(from_hex, from_le);
    }

    #[test]
    fn byte_buffers_roundtrip() {
        let value = u256_from_hex("0123456789abcdef0123456789abcdef").unwrap();

        assert_eq!(u256_from_be_bytes(&u256_to_be32(value)).unwrap(), value);
        assert_eq!(u256_from_le_bytes(&u256_to_le32(value)).unwrap(), value);
    }

    #[test]
    fn construction_rejects_oversize() {
        assert!(u256_from_be_bytes(&[0u8; 33]).is_err());
        assert!(u256_from_hex(&"f".repeat(65)).is_err());
    }

    #[test]
    fn arithmetic_is_exact() {
        let a = u256_from_dec("340282366920938463463374607431768211456").unwrap(); // 2^128
        let b = U256::from(3u64);

        assert_eq!(a + b - b, a);
        assert_eq!((a * b) / b, a);
        assert_eq!(a % b, U256::from(1u64));
        assert_eq!(a << 2 >> 2, a);
        assert!(a > b);
    }

    #[test]
    fn scaled_ratio_of_diff1_with_itself_is_one() {
        let ratio = scaled_ratio(*DIFF1, *DIFF1);
        assert!((ratio - 1.0).abs() < 1e-12, "got {ratio}");
    }

    #[test]
    fn scaled_ratio_survives_wide_numerators() {
        // diff1 × 10^18 exceeds 256 bits; the result must still be exact
        let ratio = scaled_ratio(*DIFF1, *DIFF1 >> 32);
        let want = 2f64.powi(32);
        assert!(
            (ratio - want).abs() / want < 1e-12,
            "got {ratio}, want {want}"
        );
    }

    #[test]
    fn scaled_ratio_small_fractions_keep_precision() {
        let ratio = scaled_ratio(U256::from(1u64), U256::from(1_000_000u64));
        assert!((ratio - 1e-6).abs() < 1e-15, "got {ratio}");
    }

    #[test]
    fn u512_to_f64_handles_high_limbs() {
        let value = U512::from(1u64) << 256;
        assert_eq!(u512_to_f64(value), 2f64.powi(256));
    }
}
