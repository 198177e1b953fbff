use super::*;

/// `mining.set_difficulty` notification payload, `[difficulty]`.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct SetDifficulty(pub f64);

impl Serialize for SetDifficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1))?;
        if self.0.fract() == 0.0 && self.0 >= 1.0 && self.0 <= u64::MAX as f64 {
            seq.serialize_element(&(self.0 as u64))?;
        } else {
            seq.serialize_element(&self.0)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SetDifficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (difficulty,) = <(f64,)>::deserialize(deserializer)?;
        Ok(SetDifficulty(difficulty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_difficulties_serialize_as_integers() {
        assert_eq!(
            serde_json::to_string(&SetDifficulty(2048.0)).unwrap(),
            "[2048]"
        );
    }

    #[test]
    fn fractional_difficulties_stay_floats() {
        assert_eq!(
            serde_json::to_string(&SetDifficulty(0.125)).unwrap(),
            "[0.125]"
        );
    }

    #[test]
    fn roundtrip() {
        let difficulty: SetDifficulty = serde_json::from_str("[16]").unwrap();
        assert_eq!(difficulty, SetDifficulty(16.0));
    }
}
