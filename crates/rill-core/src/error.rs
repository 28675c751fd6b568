//! Error types for Rill core primitives.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("invalid signature on input {index}")] InvalidSignature { index: usize },
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("oversized: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("value overflow")] ValueOverflow,
    #[error("non-final: lock_time {0}")] NonFinal(u64),
    #[error("conflicts with pool tx {0}")] MempoolConflict(String),
    #[error("double spend detected: {0}")] DoubleSpend(String),
    #[error("validation timed out")] ValidationTimeout,
    #[error("serialization: {0}")] Serialization(String),
    #[error("invalid hash: {0}")] InvalidHash(String),
}
