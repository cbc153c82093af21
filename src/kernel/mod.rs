//! The EC engine, split into the per-QI interval structure (`ec`) and the
//! stateful `Engine` that drives ingest/publish/refresh (`core`).

pub mod core;
pub mod ec;

#[cfg(test)]
mod tests;

pub use core::Engine;
pub use ec::{Ec, GeneralizeOutcome};

pub use crate::types::Published;
