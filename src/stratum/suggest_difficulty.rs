use super::*;

/// `mining.suggest_difficulty` request payload, `[difficulty]`.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct SuggestDifficulty(pub f64);

impl<'de> Deserialize<'de> for SuggestDifficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (difficulty,) = <(f64,)>::deserialize(deserializer)?;
        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Err(de::Error::custom("difficulty must be finite and > 0"));
        }
        Ok(SuggestDifficulty(difficulty))
    }
}

impl Serialize for SuggestDifficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1))?;
        seq.serialize_element(&self.0)?;
        seq.end()
    }
}
