//! Chain primitives the invalid transaction pipeline carries around.
//!
//! Only the parts of a transaction needed for reporting live here: the
//! canonical encoding (which fixes both the txid and the serialized size)
//! and a hex-friendly 32-byte hash.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs and block hashes. Displays as lowercase hex.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Stands in for "no block" in block-origin records.
    pub const ZERO: Self = Self([0u8; 32]);

    /// BLAKE3 digest of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| TransactionError::InvalidHash(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| TransactionError::InvalidHash(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Signature bytes.
    pub signature: Vec<u8>,
    /// Public key bytes.
    pub public_key: Vec<u8>,
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in rills.
    pub value: u64,
    /// Hash of the recipient's public key.
    pub pubkey_hash: Hash256,
}

/// A transaction as received from a peer, RPC caller, or block.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
}

impl Transaction {
    /// Canonical encoding (bincode, standard config).
    pub fn encode(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Transaction ID: BLAKE3 over the canonical encoding.
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        Ok(Hash256::digest(&self.encode()?))
    }

    /// Txid and serialized size from a single encoding pass.
    pub fn id_and_size(&self) -> Result<(Hash256, usize), TransactionError> {
        let encoded = self.encode()?;
        Ok((Hash256::digest(&encoded), encoded.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(sig_len: usize) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: Hash256([7; 32]), index: 0 },
                signature: vec![0xAB; sig_len],
                public_key: vec![0; 32],
            }],
            outputs: vec![TxOutput { value: 50, pubkey_hash: Hash256::ZERO }],
            lock_time: 0,
        }
    }

    #[test]
    fn hash_display_is_lowercase_hex() {
        let h = Hash256([0xAB; 32]);
        assert_eq!(h.to_string(), "ab".repeat(32));
    }

    #[test]
    fn hash_parses_its_own_display() {
        let h = Hash256::digest(b"rill");
        let parsed: Hash256 = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn hash_parse_rejects_wrong_length() {
        assert!("abcd".parse::<Hash256>().is_err());
        assert!("zz".repeat(32).parse::<Hash256>().is_err());
    }

    #[test]
    fn txid_matches_digest_of_encoding() {
        let tx = sample_tx(64);
        let encoded = tx.encode().unwrap();
        assert_eq!(tx.txid().unwrap(), Hash256::digest(&encoded));
    }

    #[test]
    fn id_and_size_agree_with_encoding() {
        let tx = sample_tx(64);
        let (txid, size) = tx.id_and_size().unwrap();
        assert_eq!(txid, tx.txid().unwrap());
        assert_eq!(size, tx.encode().unwrap().len());
    }

    #[test]
    fn size_grows_with_payload() {
        let small = sample_tx(10).id_and_size().unwrap().1;
        let large = sample_tx(10_000).id_and_size().unwrap().1;
        assert!(large > small + 9_000);
    }

    #[test]
    fn outpoint_display() {
        let op = OutPoint { txid: Hash256::ZERO, index: 3 };
        assert!(op.to_string().ends_with(":3"));
    }
}
