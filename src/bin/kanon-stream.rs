//! CLI entry point: stream a CSV dataset through the engine (spec §6.5).

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;

use kanon_stream::sink::{ExperimentSink, Sink, StdoutSink};
use kanon_stream::{Config, Engine, Field};

#[derive(Debug, Parser)]
#[command(name = "kanon-stream", about = "Streaming k-anonymization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Stream a dataset through the engine in arrival order.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,
        /// Path to the input CSV dataset.
        #[arg(long)]
        input: PathBuf,
        /// Treat the last column as a synthetic arrival timestamp, strip it
        /// before ingest, and log transmitted tuples/delays to
        /// output_tuple.txt / output_delay.txt in the current directory.
        #[arg(long)]
        experiment: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        eprintln!("kanon-stream: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), kanon_stream::KanonError> {
    let cli = Cli::parse();
    let Command::Run {
        config,
        input,
        experiment,
    } = cli.command;

    let cfg = Config::from_file(&config)?;
    let mut engine = Engine::new(cfg);

    let mut sink: Box<dyn Sink> = if experiment {
        Box::new(ExperimentSink::new(StdoutSink, "."))
    } else {
        Box::new(StdoutSink)
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(&input)
        .map_err(|e| {
            kanon_stream::KanonError::InputInvalid {
                counter: None,
                detail: format!("could not open {input:?}: {e}"),
            }
        })?;

    // Only qi_pos columns are cast to f64 (spec §6.2, §6.5); every other
    // column — SI fields, identity/ID columns, anything else — stays
    // opaque text regardless of whether it happens to look numeric.
    let qi_pos = engine.config().qi_pos.clone();

    for (counter, record) in reader.records().enumerate() {
        let counter = counter as u64;
        let record = record.map_err(|e| kanon_stream::KanonError::input_invalid(counter, e.to_string()))?;

        let mut cols: Vec<&str> = record.iter().collect();
        let arrival = if experiment {
            cols.pop().map(|s| {
                s.parse::<f64>()
                    .map_err(|e| kanon_stream::KanonError::input_invalid(counter, format!("bad arrival timestamp: {e}")))
            })
        } else {
            None
        }
        .transpose()?;

        let fields = cols
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                if qi_pos.contains(&idx) {
                    match s.parse::<f64>() {
                        Ok(v) => Field::Number(v),
                        Err(_) => Field::Text(s.to_string()),
                    }
                } else {
                    Field::Text(s.to_string())
                }
            })
            .collect();

        let published = engine.ingest(counter, fields)?;
        for p in published {
            // `arrival` is a wall-clock epoch timestamp (matching the
            // original's `time.time()`), so the latency it's measured
            // against must also be wall-clock, not process-relative.
            let delay = arrival.map(|arrival_secs| {
                let now_secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .as_secs_f64();
                Duration::from_secs_f64((now_secs - arrival_secs).max(0.0))
            });
            sink.transmit(&p, delay)?;
        }
    }

    Ok(())
}
