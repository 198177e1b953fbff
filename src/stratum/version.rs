use super::*;

/// Block header version field. Stratum renders it as 8 hex chars; BIP 310
/// version rolling treats it as a bag of bits, hence the bit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct Version(pub u32);

impl Version {
    pub fn to_consensus(self) -> u32 {
        self.0
    }

    pub fn count_ones(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Version {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version = u32::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid version hex string '{s}': {e}"),
        })?;
        Ok(Self(version))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Version {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl BitAnd for Version {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Version {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for Version {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Not for Version {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case(version_str: &str, expected: u32) {
        let version = Version::from_str(version_str).unwrap();
        assert_eq!(version.to_string(), version_str, "Display round-trip");
        assert_eq!(version.to_consensus(), expected);
        assert_eq!(
            serde_json::to_string(&version).unwrap(),
            format!("\"{version_str}\"")
        );
    }

    #[test]
    fn known_versions() {
        case("20000000", 0x2000_0000);
        case("00000001", 1);
        case("3fffe000", 0x3FFF_E000);
    }

    #[test]
    fn bit_operators() {
        let mask = Version(0x1FFF_E000);
        let version = Version(0x2000_0000);

        assert_eq!(version & mask, Version(0));
        assert_eq!(version | mask, Version(0x3FFF_E000));
        assert_eq!(version ^ version, Version(0));
        assert_eq!((!mask).0, !0x1FFF_E000u32);
        assert_eq!(mask.count_ones(), 16);
    }
}
