//! Shared scalar types used across config, kernel, and sink modules.

use serde::{Deserialize, Serialize};

/// Zero-based position of a field within an incoming tuple.
pub type FieldPos = usize;

/// One field of an incoming (or published) tuple.
///
/// QI positions must resolve to `Field::Number`; every other position is
/// opaque to the engine and may carry text (spec §6: "other positions are
/// opaque and may be strings").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Number(f64),
    Text(String),
    /// A QI field after generalization: `[lbound, ubound)`.
    Range(f64, f64),
}

impl Field {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Field::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// A record ready for transmission: SI fields already stripped, QI fields
/// already replaced by their published ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub counter: u64,
    pub fields: Vec<Field>,
    /// True if one or more QI ranges in `fields` came from the Compromise
    /// Map rather than a mature EC (spec §4.4 guarantee).
    pub compromised: bool,
}
