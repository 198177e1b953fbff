use super::*;

#[derive(Debug, Default, PartialEq)]
pub struct Subscribe {
    pub user_agent: Option<String>,
    pub extranonce1: Option<String>,
}

impl Serialize for Subscribe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = usize::from(self.user_agent.is_some()) + usize::from(self.extranonce1.is_some());
        let mut seq = serializer.serialize_seq(Some(len))?;
        if let Some(user_agent) = &self.user_agent {
            seq.serialize_element(user_agent)?;
        }
        if let Some(extranonce1) = &self.extranonce1 {
            seq.serialize_element(extranonce1)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Subscribe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Zero([String; 0]),
            One((String,)),
            Two((String, Option<String>)),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Zero(_) => Subscribe::default(),
            Raw::One((user_agent,)) => Subscribe {
                user_agent: Some(user_agent),
                extranonce1: None,
            },
            Raw::Two((user_agent, extranonce1)) => Subscribe {
                user_agent: Some(user_agent),
                extranonce1,
            },
        })
    }
}

/// The `[[subscriptions], extranonce1, extranonce2_size]` reply.
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeResult {
    pub subscriptions: Vec<(String, String)>,
    pub extranonce1: Extranonce,
    pub extranonce2_size: usize,
}

impl Serialize for SubscribeResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.subscriptions)?;
        seq.serialize_element(&self.extranonce1)?;
        seq.serialize_element(&self.extranonce2_size)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SubscribeResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (subscriptions, extranonce1, extranonce2_size) =
            <(Vec<(String, String)>, Extranonce, usize)>::deserialize(deserializer)?;

        Ok(SubscribeResult {
            subscriptions,
            extranonce1,
            extranonce2_size,
        })
    }
}
