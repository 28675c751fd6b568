//! # rill-core
//! Transaction primitives and validation outcomes shared across Rill crates.

pub mod error;
pub mod types;
pub mod validation;
