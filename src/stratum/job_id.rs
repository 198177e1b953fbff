use super::*;

/// Rolling 16-bit job identifier, rendered as lowercase hex. The counter
/// wraps back to 1 and never hands out 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DeserializeFromStr, SerializeDisplay, Hash)]
#[repr(transparent)]
pub struct JobId(u16);

impl JobId {
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }
}

impl FromStr for JobId {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = u16::from_str_radix(s, 16).map_err(|e| InternalError::Parse {
            message: format!("invalid job id hex string '{s}': {e}"),
        })?;
        Ok(JobId(id))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u16> for JobId {
    fn from(id: u16) -> JobId {
        JobId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        assert_eq!(JobId::from(0x1F).to_string(), "1f");
        assert_eq!("1F".parse::<JobId>().unwrap(), JobId::from(0x1F));
        assert_eq!(JobId::from(u16::MAX).to_string(), "ffff");
    }

    #[test]
    fn errors() {
        assert!("".parse::<JobId>().is_err());
        assert!("0x1".parse::<JobId>().is_err());
        assert!("g".parse::<JobId>().is_err());
        assert!("10000".parse::<JobId>().is_err());
    }

    #[test]
    fn serde_json() {
        let id = JobId::from(0xBEEF);
        let s = serde_json::to_string(&id).unwrap();
        assert_eq!(s, "\"beef\"");
        assert_eq!(serde_json::from_str::<JobId>(&s).unwrap(), id);
    }

    #[test]
    fn wraps_to_one_skipping_zero() {
        assert_eq!(JobId::from(u16::MAX - 1).next(), JobId::from(u16::MAX));
        assert_eq!(JobId::from(u16::MAX).next(), JobId::first());
    }

    #[test]
    fn full_cycle_is_distinct_and_never_zero() {
        let mut id = JobId::first();
        let mut seen = HashSet::new();

        for _ in 0..u16::MAX {
            assert_ne!(id, JobId(0));
            assert!(seen.insert(id), "duplicate id {id}");
            id = id.next();
        }

        assert_eq!(id, JobId::first());
    }
}
