use super::*;

/// A node of the merkle tree in internal (little-endian) byte order, the
/// order Stratum puts on the wire for `mining.notify` branches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct MerkleNode([u8; 32]);

impl MerkleNode {
    pub fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_byte_array(&self) -> &[u8; 32] {
        &self.0
    }

    /// From the displayed big-endian hex of a txid, short values padded.
    pub fn from_hash_hex(hex: &str) -> Result<Self> {
        Ok(Self(codec::uint256_from_hash_hex(hex)?))
    }
}

impl FromStr for MerkleNode {
    type Err = InternalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
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
}

impl fmt::Display for MerkleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut concat = [0u8; 64];
    concat[..32].copy_from_slice(a);
    concat[32..].copy_from_slice(b);
    codec::sha256d(&concat)
}

/// Builds the branch the coinbase hash will traverse: the sibling of index 1
/// at every level, with the coinbase slot reserved at index 0. Odd levels
/// duplicate their last element.
pub fn merkle_branches(tx_hashes: &[[u8; 32]]) -> Vec<MerkleNode> {
    if tx_hashes.is_empty() {
        return Vec::new();
    }

    let mut level: Vec<[u8; 32]> = Vec::with_capacity(tx_hashes.len() + 1);
    level.push([0u8; 32]);
    level.extend_from_slice(tx_hashes);

    let mut branches = Vec::new();
    let mut coinbase_index = 0usize;

    while level.len() > 1 {
        // XOR to get the sibling, right or left
        let sibling_index = coinbase_index ^ 1;
        let sibling = if sibling_index < level.len() {
            level[sibling_index]
        } else {
            level[coinbase_index]
        };

        branches.push(MerkleNode(sibling));

        let mut next_level = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next_level.push(hash_pair(left, right));
        }

        level = next_level;
        coinbase_index /= 2;
    }

    branches
}

/// Folds the coinbase hash through the branch, yielding the merkle root in
/// internal byte order. Purely functional.
pub fn combine_with_coinbase(branches: &[MerkleNode], coinbase_hash: [u8; 32]) -> [u8; 32] {
    branches
        .iter()
        .fold(coinbase_hash, |root, branch| hash_pair(&root, &branch.0))
}
