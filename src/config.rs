//! Configuration loading and validation (spec §6 "Config source").
//!
//! The reference implementation reads a `config.ini` file's `[params]`
//! section with Python's `configparser`. The idiomatic Rust equivalent kept
//! here is a TOML file with the same `[params]` table and the same key
//! names, parsed with `serde` and validated by hand (the same way the
//! original's `read_config` hand-validates each field before accepting it).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::KanonError;

/// Validated engine parameters.
///
/// Every field corresponds 1:1 to a `[params]` key from spec §6. Construct
/// via `Config::from_toml_str` / `Config::from_file`, both of which call
/// `validate` before returning — a `Config` value is always valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub qi_pos: Vec<usize>,
    pub si_pos: Vec<usize>,
    pub generalize_range: f64,
    pub accumulation_delay_tolerance: u64,
    pub refresh_timer: f64,
    pub threshold_k: u64,
    pub ec_max_holding_members: u64,
}

/// Raw, unvalidated TOML shape. Kept separate from `Config` so deserialize
/// failures produce a `KanonError::ConfigInvalid` rather than a panic or an
/// opaque `toml::de::Error` leaking out of the crate's public API.
#[derive(Debug, Deserialize)]
struct RawFile {
    params: RawParams,
}

#[derive(Debug, Deserialize)]
struct RawParams {
    qi_pos: Vec<usize>,
    si_pos: Vec<usize>,
    generalize_range: f64,
    accumulation_delay_tolerance: u64,
    refresh_timer: f64,
    threshold_k: u64,
    ec_max_holding_members: u64,
}

impl Config {
    /// Parse and validate a config from an in-memory TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, KanonError> {
        let raw: RawFile = toml::from_str(contents)
            .map_err(|e| KanonError::ConfigInvalid(format!("malformed config: {e}")))?;
        let cfg = Config {
            qi_pos: raw.params.qi_pos,
            si_pos: raw.params.si_pos,
            generalize_range: raw.params.generalize_range,
            accumulation_delay_tolerance: raw.params.accumulation_delay_tolerance,
            refresh_timer: raw.params.refresh_timer,
            threshold_k: raw.params.threshold_k,
            ec_max_holding_members: raw.params.ec_max_holding_members,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a config from a file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KanonError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KanonError::ConfigInvalid(format!(
                "could not read config file {:?}: {e}",
                path.as_ref()
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Re-check every invariant spec §6 requires of a config. Called
    /// automatically by the constructors above; exposed so callers who build
    /// a `Config` programmatically (e.g. tests) can validate it too.
    pub fn validate(&self) -> Result<(), KanonError> {
        if self.qi_pos.is_empty() {
            return Err(KanonError::ConfigInvalid("qi_pos must not be empty".into()));
        }
        let qi_set: HashSet<usize> = self.qi_pos.iter().copied().collect();
        let si_set: HashSet<usize> = self.si_pos.iter().copied().collect();
        if qi_set.len() != self.qi_pos.len() {
            return Err(KanonError::ConfigInvalid(
                "qi_pos must not contain duplicates".into(),
            ));
        }
        if !qi_set.is_disjoint(&si_set) {
            return Err(KanonError::ConfigInvalid(
                "qi_pos and si_pos must be disjoint".into(),
            ));
        }
        if self.generalize_range <= 0.0 || !self.generalize_range.is_finite() {
            return Err(KanonError::ConfigInvalid(
                "generalize_range must be a positive, finite real".into(),
            ));
        }
        if self.accumulation_delay_tolerance == 0 {
            return Err(KanonError::ConfigInvalid(
                "accumulation_delay_tolerance must be a positive integer".into(),
            ));
        }
        if self.refresh_timer <= 0.0 || !self.refresh_timer.is_finite() {
            return Err(KanonError::ConfigInvalid(
                "refresh_timer must be a positive, finite number of seconds".into(),
            ));
        }
        if self.threshold_k < 2 {
            return Err(KanonError::ConfigInvalid(
                "threshold_k must be >= 2".into(),
            ));
        }
        if self.ec_max_holding_members <= self.threshold_k {
            return Err(KanonError::ConfigInvalid(
                "ec_max_holding_members should exceed threshold_k".into(),
            ));
        }
        Ok(())
    }
}
