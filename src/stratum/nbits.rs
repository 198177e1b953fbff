use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Nbits(u32);

impl Nbits {
    pub fn to_target(self) -> Result<U256> {
        codec::bits_to_target(self.0)
    }

    pub fn to_consensus(self) -> u32 {
        self.0
    }
}

impl FromStr for Nbits {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 {
            return Err(InternalError::InvalidLength {
                expected: 8,
                actual: s.len(),
            });
        }
        let bits = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid nbits hex string '{s}': {e}"),
        })?;
        Ok(Nbits(bits))
    }
}

impl fmt::Display for Nbits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Nbits {
    fn from(bits: u32) -> Nbits {
        Nbits(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let nbits = "1d00ffff".parse::<Nbits>().unwrap();
        assert_eq!(nbits.to_string(), "1d00ffff");
        assert_eq!(nbits.to_consensus(), 0x1D00_FFFF);
        assert_eq!(serde_json::to_string(&nbits).unwrap(), "\"1d00ffff\"");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("1d00ff".parse::<Nbits>().is_err());
        assert!("1d00ffff00".parse::<Nbits>().is_err());
    }

    #[test]
    fn target_matches_codec() {
        let nbits = "1d00ffff".parse::<Nbits>().unwrap();
        assert_eq!(nbits.to_target().unwrap(), U256::from(0xFFFFu64) << 208);
    }
}
