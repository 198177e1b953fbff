use super::*;

/// `mining.submit` parameters. Everything but the username stays a raw
/// string here; the share pipeline owns width and range validation so it can
/// answer with the proper numeric rejection codes.
#[derive(Debug, PartialEq, Clone)]
pub struct Submit {
    pub username: String,
    pub job_id: String,
    pub extranonce2: String,
    pub ntime: String,
    pub nonce: String,
    pub version_bits: Option<String>,
}

impl Serialize for Submit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.version_bits.is_some() { 6 } else { 5 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.username)?;
        seq.serialize_element(&self.job_id)?;
        seq.serialize_element(&self.extranonce2)?;
        seq.serialize_element(&self.ntime)?;
        seq.serialize_element(&self.nonce)?;
        if let Some(version_bits) = &self.version_bits {
            seq.serialize_element(version_bits)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Submit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Five((String, String, String, String, String)),
            Six((String, String, String, String, String, Option<String>)),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Five((username, job_id, extranonce2, ntime, nonce)) => Ok(Submit {
                username,
                job_id,
                extranonce2,
                ntime,
                nonce,
                version_bits: None,
            }),
            Raw::Six((username, job_id, extranonce2, ntime, nonce, version_bits)) => Ok(Submit {
                username,
                job_id,
                extranonce2,
                ntime,
                nonce,
                version_bits,
            }),
        }
    }
}
