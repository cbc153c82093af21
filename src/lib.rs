#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(deprecated)]

//!
//! `kanon-stream` is a streaming k-anonymization engine for quasi-identifier
//! (QI) tuples emitted by a wearable medical device before transmission.
//!
//! The core is the online Equivalence Class (EC) engine: a per-QI set of
//! disjoint numeric intervals that adaptively partition the observed value
//! space, a bounded accumulation queue for records awaiting maturation to
//! `k` members, and an EC-mutation protocol (create, extend, deprecate,
//! merge, force-extend with compromise fallback) that bounds publication
//! latency while preserving k-anonymity.

// Configuration loading and validation ([params] table of a TOML file).
pub mod config;

// Shared scalar types: QI/SI indices, field values, published records.
pub mod types;

// Clock abstraction for the refresh timer (monotonic in production,
// manually advanced in tests).
pub mod clock;

// Crate-wide error types.
pub mod error;

// The EC engine itself: equivalence classes, accumulation, publication.
pub mod kernel;

// Transmission sink abstraction (stdout, experiment-mode file logging).
pub mod sink;

pub use config::Config;
pub use error::KanonError;
pub use kernel::{Engine, Published};
pub use types::Field;
