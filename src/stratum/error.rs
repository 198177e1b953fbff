use super::*;

/// Submit and protocol rejections carry the classic numeric Stratum codes:
/// 20 bad parameter, 21 job not found, 22 duplicate, 23 low difficulty,
/// 24 unauthorized, 25 not subscribed. Serialized as `[code, message, null]`.
#[derive(Debug, Clone, PartialEq)]
pub enum StratumError {
    IncorrectExtranonce2Size,
    JobNotFound,
    IncorrectNtimeSize,
    NtimeOutOfRange,
    IncorrectNonceSize,
    VersionTooLow,
    VersionOutsideMask,
    DuplicateShare,
    LowDifficultyShare { share_diff: f64 },
    UnauthorizedWorker,
    NotSubscribed,
    UnknownMethod,
    MalformedParameters,
}

impl StratumError {
    pub fn code(&self) -> i32 {
        match self {
            Self::IncorrectExtranonce2Size
            | Self::IncorrectNtimeSize
            | Self::NtimeOutOfRange
            | Self::IncorrectNonceSize
            | Self::VersionTooLow
            | Self::VersionOutsideMask
            | Self::UnknownMethod
            | Self::MalformedParameters => 20,
            Self::JobNotFound => 21,
            Self::DuplicateShare => 22,
            Self::LowDifficultyShare { .. } => 23,
            Self::UnauthorizedWorker => 24,
            Self::NotSubscribed => 25,
        }
    }
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncorrectExtranonce2Size => write!(f, "incorrect size of extranonce2"),
            Self::JobNotFound => write!(f, "job not found"),
            Self::IncorrectNtimeSize => write!(f, "incorrect size of ntime"),
            Self::NtimeOutOfRange => write!(f, "ntime out of range"),
            Self::IncorrectNonceSize => write!(f, "incorrect size of nonce"),
            Self::VersionTooLow => write!(f, "version too low"),
            Self::VersionOutsideMask => write!(f, "version rolling outside allowed mask"),
            Self::DuplicateShare => write!(f, "duplicate share"),
            Self::LowDifficultyShare { share_diff } => {
                write!(f, "low difficulty share of {share_diff:.8}")
            }
            Self::UnauthorizedWorker => write!(f, "unauthorized worker"),
            Self::NotSubscribed => write!(f, "not subscribed"),
            Self::UnknownMethod => write!(f, "Unknown method"),
            Self::MalformedParameters => write!(f, "malformed parameters"),
        }
    }
}

impl Serialize for StratumError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.code(), self.to_string(), Option::<()>::None).serialize(serializer)
    }
}

/// Parse-level failures inside the protocol layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InternalError {
    #[snafu(display("Parse error: {message}"))]
    Parse { message: String },

    #[snafu(display("Invalid length: expected {expected}, got {actual}"))]
    InvalidLength { expected: usize, actual: usize },

    #[snafu(display("Failed to parse hex string: {source}"))]
    HexParse { source: hex::FromHexError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case(error: StratumError, json: &str) {
        assert_eq!(serde_json::to_string(&error).unwrap(), json);
    }

    #[test]
    fn codes_and_messages() {
        case(
            StratumError::IncorrectExtranonce2Size,
            r#"[20,"incorrect size of extranonce2",null]"#,
        );
        case(StratumError::JobNotFound, r#"[21,"job not found",null]"#);
        case(
            StratumError::IncorrectNtimeSize,
            r#"[20,"incorrect size of ntime",null]"#,
        );
        case(
            StratumError::NtimeOutOfRange,
            r#"[20,"ntime out of range",null]"#,
        );
        case(
            StratumError::IncorrectNonceSize,
            r#"[20,"incorrect size of nonce",null]"#,
        );
        case(StratumError::VersionTooLow, r#"[20,"version too low",null]"#);
        case(
            StratumError::VersionOutsideMask,
            r#"[20,"version rolling outside allowed mask",null]"#,
        );
        case(StratumError::DuplicateShare, r#"[22,"duplicate share",null]"#);
        case(
            StratumError::UnauthorizedWorker,
            r#"[24,"unauthorized worker",null]"#,
        );
        case(StratumError::NotSubscribed, r#"[25,"not subscribed",null]"#);
        case(StratumError::UnknownMethod, r#"[20,"Unknown method",null]"#);
    }

    #[test]
    fn low_difficulty_message_carries_eight_decimals() {
        case(
            StratumError::LowDifficultyShare { share_diff: 950.0 },
            r#"[23,"low difficulty share of 950.00000000",null]"#,
        );
    }

    #[test]
    fn internal_error_display() {
        let err = InternalError::InvalidLength {
            expected: 8,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Invalid length: expected 8, got 4");
    }
}
