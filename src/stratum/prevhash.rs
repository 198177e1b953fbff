use super::*;

/// Previous block hash. Stored in displayed (big-endian) byte order; the
/// Stratum wire form reverses the order of the eight 32-bit words, which is
/// the same as byte-swapping each word of the little-endian header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct PrevHash([u8; 32]);

fn reverse_word_order(bytes: [u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, word) in bytes.chunks(4).rev().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(word);
    }
    out
}

impl PrevHash {
    /// Parses the big-endian hex form reported by `getblocktemplate`.
    pub fn from_template_hex(s: &str) -> Result<Self, InternalError> {
        if s.len() != 64 {
            return Err(InternalError::InvalidLength {
                expected: 64,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|source| InternalError::HexParse { source })?;

        Ok(Self(bytes))
    }

    /// The 32 bytes written into the header at offset 4, internal (reversed)
    /// order.
    pub fn header_bytes(&self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    pub fn be_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for PrevHash {
    type Err = InternalError;

    // parses the Stratum wire form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wire = Self::from_template_hex(s)?;
        Ok(Self(reverse_word_order(wire.0)))
    }
}

impl fmt::Display for PrevHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(reverse_word_order(self.0)))
    }
}
