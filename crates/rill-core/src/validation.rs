//! Validation outcome values.
//!
//! [`ValidationState`] is what transaction and block validation hand back to
//! their callers: whether the object was accepted, and if not, the reject
//! code, the reason and a few classification flags. The invalid transaction
//! pipeline copies it into every record it reports.
//!
//! A `Result<_, TransactionError>` from validation converts into a state with
//! [`ValidationState::from_error`].

use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// P2P reject codes carried in [`ValidationState::reject_code`].
pub mod reject {
    pub const MALFORMED: u8 = 0x01;
    pub const INVALID: u8 = 0x10;
    pub const OBSOLETE: u8 = 0x11;
    pub const DUPLICATE: u8 = 0x12;
    pub const NONSTANDARD: u8 = 0x40;
    pub const DUST: u8 = 0x41;
    pub const INSUFFICIENT_FEE: u8 = 0x42;
    pub const CHECKPOINT: u8 = 0x43;
}

/// DoS score assigned to rejections that are clearly the sender's fault.
pub const DOS_SCORE_MISBEHAVING: u32 = 100;

/// Overall outcome of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Everything ok.
    #[default]
    Valid,
    /// Network rule violation.
    Invalid,
    /// Run-time error unrelated to the object itself.
    Error,
}

/// Outcome of validating a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationState {
    pub mode: ValidationMode,
    pub dos_score: u32,
    pub reject_code: u8,
    pub reject_reason: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub debug_message: String,
    pub corruption_possible: bool,
    pub missing_inputs: bool,
    pub non_final: bool,
    pub double_spend_detected: bool,
    pub mempool_conflict_detected: bool,
    pub validation_timeout_exceeded: bool,
    pub standard_tx: bool,
}

impl ValidationState {
    /// A fresh, valid state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the state invalid. Always returns `false` so validators can
    /// `return state.invalid(..)` from a `bool` check.
    pub fn invalid(&mut self, dos_score: u32, reject_code: u8, reason: impl Into<String>) -> bool {
        if self.mode == ValidationMode::Error {
            return false;
        }
        self.mode = ValidationMode::Invalid;
        self.dos_score = self.dos_score.saturating_add(dos_score);
        self.reject_code = reject_code;
        self.reject_reason = reason.into();
        false
    }

    /// Mark the state as a run-time error. An earlier `Invalid` is kept as
    /// the reject reason but the mode becomes `Error`.
    pub fn error(&mut self, reason: impl Into<String>) -> bool {
        if self.mode == ValidationMode::Valid {
            self.reject_reason = reason.into();
        }
        self.mode = ValidationMode::Error;
        false
    }

    /// Attach a debug message to an existing rejection.
    pub fn with_debug_message(mut self, message: impl Into<String>) -> Self {
        self.debug_message = message.into();
        self
    }

    pub fn is_valid(&self) -> bool {
        self.mode == ValidationMode::Valid
    }

    pub fn is_invalid(&self) -> bool {
        self.mode == ValidationMode::Invalid
    }

    pub fn is_error(&self) -> bool {
        self.mode == ValidationMode::Error
    }

    /// Build a rejected state from a validation error.
    pub fn from_error(err: &TransactionError) -> Self {
        let mut state = Self::new();
        let reason = err.to_string();
        match err {
            TransactionError::UnknownUtxo(_) => {
                state.missing_inputs = true;
                state.invalid(0, reject::INVALID, reason);
            }
            TransactionError::NonFinal(_) => {
                state.non_final = true;
                state.invalid(0, reject::NONSTANDARD, reason);
            }
            TransactionError::MempoolConflict(_) => {
                state.mempool_conflict_detected = true;
                state.invalid(0, reject::DUPLICATE, reason);
            }
            TransactionError::DoubleSpend(_) => {
                state.double_spend_detected = true;
                state.invalid(0, reject::DUPLICATE, reason);
            }
            TransactionError::ValidationTimeout => {
                state.validation_timeout_exceeded = true;
                state.error(reason);
            }
            TransactionError::Serialization(_) | TransactionError::InvalidHash(_) => {
                state.invalid(DOS_SCORE_MISBEHAVING, reject::MALFORMED, reason);
            }
            _ => {
                state.invalid(DOS_SCORE_MISBEHAVING, reject::INVALID, reason);
            }
        }
        state
    }
}

impl From<&TransactionError> for ValidationState {
    fn from(err: &TransactionError) -> Self {
        Self::from_error(err)
    }
}

impl<T> From<&Result<T, TransactionError>> for ValidationState {
    fn from(result: &Result<T, TransactionError>) -> Self {
        match result {
            Ok(_) => Self::new(),
            Err(e) => Self::from_error(e),
        }
    }
}
