//!
//! Crate-wide error types for `kanon-stream`.

/// Errors that can occur while loading configuration, ingesting records, or
/// operating the EC engine.
///
/// The three kinds mirror spec §7: `ConfigInvalid` is fatal at startup,
/// `InputInvalid` is fatal for one record and propagates to the caller,
/// `InternalInvariant` indicates a bug in the engine itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KanonError {
    /// A configuration parameter was missing, malformed, or out of range.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An incoming tuple could not be parsed, or a QI/SI index was out of
    /// range for it. Carries the record's `counter` when known.
    #[error("invalid input{}: {detail}", counter.map(|c| format!(" (counter={c})")).unwrap_or_default())]
    InputInvalid {
        counter: Option<u64>,
        detail: String,
    },

    /// An internal invariant was violated: the generalize() overlap count
    /// exceeded 2, or a compromise sentinel reached publish() outside
    /// compromise mode. Both indicate an engine bug, not bad input.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl KanonError {
    pub fn input_invalid(counter: u64, detail: impl Into<String>) -> Self {
        KanonError::InputInvalid {
            counter: Some(counter),
            detail: detail.into(),
        }
    }
}
