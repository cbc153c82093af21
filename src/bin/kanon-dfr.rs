//! Offline disclosure-failure-rate analyzer (spec §6.6).
//!
//! Reads the original dataset CSV and a published-tuple log (one
//! `serde_json` array per line, last element a record-identity token
//! matching the dataset's last column) and reports, for each configured
//! group of sensitive-value thresholds, how often a threshold fell strictly
//! inside the published QI range.

use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "kanon-dfr", about = "Offline disclosure-failure-rate analyzer")]
struct Cli {
    /// Path to the original (pre-anonymization) dataset CSV.
    #[arg(long)]
    dataset: PathBuf,
    /// Path to the published-tuple log (output_tuple.txt from a
    /// kanon-stream --experiment run).
    #[arg(long)]
    published: PathBuf,
    /// Zero-based position of the published QI range within each logged
    /// array.
    #[arg(long, default_value_t = 1)]
    qi_index: usize,
    /// Named threshold groups as `name=t1,t2,...`; repeatable. Defaults to
    /// the reference tool's three hardcoded groups.
    #[arg(long = "group")]
    groups: Vec<String>,
}

struct ThresholdGroup {
    name: String,
    thresholds: Vec<f64>,
}

fn default_groups() -> Vec<ThresholdGroup> {
    vec![
        ThresholdGroup { name: "glucose".into(), thresholds: vec![70.0, 100.0, 125.0] },
        ThresholdGroup { name: "systolic".into(), thresholds: vec![90.0, 120.0, 140.0] },
        ThresholdGroup { name: "diastolic".into(), thresholds: vec![60.0, 90.0] },
    ]
}

fn parse_groups(raw: &[String]) -> Result<Vec<ThresholdGroup>, String> {
    if raw.is_empty() {
        return Ok(default_groups());
    }
    raw.iter()
        .map(|spec| {
            let (name, rest) = spec
                .split_once('=')
                .ok_or_else(|| format!("malformed --group {spec:?}, expected name=t1,t2,..."))?;
            let thresholds = rest
                .split(',')
                .map(|t| t.trim().parse::<f64>().map_err(|e| format!("bad threshold {t:?}: {e}")))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ThresholdGroup { name: name.to_string(), thresholds })
        })
        .collect()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("kanon-dfr: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let groups = parse_groups(&cli.groups)?;

    let dataset_text = std::fs::read_to_string(&cli.dataset)
        .map_err(|e| format!("could not read dataset {:?}: {e}", cli.dataset))?;
    let identity_tokens: Vec<String> = dataset_text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            line.split(',')
                .last()
                .unwrap_or_default()
                .trim()
                .to_string()
        })
        .collect();

    let published_text = std::fs::read_to_string(&cli.published)
        .map_err(|e| format!("could not read published log {:?}: {e}", cli.published))?;

    let mut total = 0u64;
    let mut failures = vec![0u64; groups.len()];

    for line in published_text.lines().filter(|l| !l.trim().is_empty()) {
        let record: Value = serde_json::from_str(line)
            .map_err(|e| format!("malformed published record {line:?}: {e}"))?;
        let array = record
            .as_array()
            .ok_or_else(|| format!("published record is not an array: {line:?}"))?;

        let identity = array
            .last()
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| array.last().map(|v| v.to_string()).unwrap_or_default());

        if !identity_tokens.iter().any(|t| t == &identity) {
            continue;
        }
        total += 1;

        let range = array
            .get(cli.qi_index)
            .and_then(Value::as_array)
            .ok_or_else(|| format!("no QI range at index {} in {line:?}", cli.qi_index))?;
        let lb = range.first().and_then(Value::as_f64).unwrap_or(f64::NEG_INFINITY);
        let ub = range.get(1).and_then(Value::as_f64).unwrap_or(f64::INFINITY);

        for (i, group) in groups.iter().enumerate() {
            if group.thresholds.iter().any(|&t| lb < t && t < ub) {
                failures[i] += 1;
            }
        }
    }

    if total == 0 {
        return Err("no published records matched the dataset's identity tokens".into());
    }
    for (group, count) in groups.iter().zip(failures.iter()) {
        println!("DFR_{}: {}", group.name, *count as f64 / total as f64);
    }
    Ok(())
}
