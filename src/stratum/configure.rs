use super::*;

/// `mining.configure` request, BIP 310.
#[derive(Debug, PartialEq, Clone)]
pub struct Configure {
    pub extensions: Vec<String>,
    pub minimum_difficulty_value: Option<f64>,
    pub version_rolling_mask: Option<Version>,
    pub version_rolling_min_bit_count: Option<u32>,
}

impl Configure {
    pub fn requests(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct ConfigureOptions {
    #[serde(
        rename = "minimum-difficulty.value",
        skip_serializing_if = "Option::is_none"
    )]
    minimum_difficulty_value: Option<f64>,

    #[serde(
        rename = "version-rolling.mask",
        skip_serializing_if = "Option::is_none"
    )]
    version_rolling_mask: Option<Version>,

    #[serde(
        rename = "version-rolling.min-bit-count",
        skip_serializing_if = "Option::is_none"
    )]
    version_rolling_min_bit_count: Option<u32>,
}

impl Serialize for Configure {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let options = ConfigureOptions {
            minimum_difficulty_value: self.minimum_difficulty_value,
            version_rolling_mask: self.version_rolling_mask,
            version_rolling_min_bit_count: self.version_rolling_min_bit_count,
        };

        (&self.extensions, &options).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Configure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One((Vec<String>,)),
            Two((Vec<String>, ConfigureOptions)),
        }

        match Raw::deserialize(deserializer)? {
            Raw::One((extensions,)) => Ok(Configure {
                extensions,
                minimum_difficulty_value: None,
                version_rolling_mask: None,
                version_rolling_min_bit_count: None,
            }),
            Raw::Two((extensions, options)) => Ok(Configure {
                extensions,
                minimum_difficulty_value: options.minimum_difficulty_value,
                version_rolling_mask: options.version_rolling_mask,
                version_rolling_min_bit_count: options.version_rolling_min_bit_count,
            }),
        }
    }
}
