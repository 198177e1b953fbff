use super::*;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
#[serde(untagged)]
pub enum Id {
    Null,
    Number(u64),
    String(String),
}

#[derive(Debug, PartialEq)]
pub enum Message {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        result: Option<Value>,
        error: Option<StratumError>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

/// Notifications go out with an explicit `id: null`, the shape fielded
/// miners expect.
impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        match self {
            Message::Request { id, method, params } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("params", params)?;
            }
            Message::Response { id, result, error } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("result", result)?;
                map.serialize_entry("error", error)?;
            }
            Message::Notification { method, params } => {
                map.serialize_entry("id", &Id::Null)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("params", params)?;
            }
        }
        map.end()
    }
}

impl Message {
    pub fn response(id: Id, result: Value) -> Self {
        Message::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Id, error: StratumError) -> Self {
        Message::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }
}

/// Stratum notifications carry `id: null`, which is technically wrong
/// according to JSON-RPC (the field should be absent). Accept both shapes; a
/// request is anything with a method and a non-null id.
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let is_response = value.get("result").is_some() || value.get("error").is_some();

        let is_notification = value.get("method").is_some()
            && (value.get("id").is_none() || value.get("id") == Some(&Value::Null));

        if is_response {
            let id = value
                .get("id")
                .cloned()
                .map(serde_json::from_value::<Id>)
                .transpose()
                .map_err(de::Error::custom)?
                .unwrap_or(Id::Null);

            Ok(Message::Response {
                id,
                result: value.get("result").filter(|v| !v.is_null()).cloned(),
                error: None,
            })
        } else if is_notification {
            let method = value
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| de::Error::missing_field("method"))?
                .to_string();

            let params = value
                .get("params")
                .cloned()
                .ok_or_else(|| de::Error::missing_field("params"))?;

            Ok(Message::Notification { method, params })
        } else if value.get("method").is_some() {
            let id = serde_json::from_value::<Id>(
                value
                    .get("id")
                    .cloned()
                    .ok_or_else(|| de::Error::missing_field("id"))?,
            )
            .map_err(de::Error::custom)?;

            let method = value
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| de::Error::custom("method must be a string"))?
                .to_string();

            let params = value.get("params").cloned().unwrap_or(Value::Null);

            Ok(Message::Request { id, method, params })
        } else {
            Err(de::Error::custom("unknown message format"))
        }
    }
}
