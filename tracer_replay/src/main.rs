//! Feeds a recorded ROM event stream through a [`FullTracer`] and dumps the
//! final trace.
//!
//! The input holds one JSON record per line: the interpreter state at the
//! time of the event, and the command itself.
//!
//! ```text
//! {"context":{"context_id":1,"depth":1,"gas_remaining":21000},"command":{"event":"onOpcode","op":96,"gas_cost":3}}
//! ```
//!
//! Example usage:
//! ```text
//! RUST_LOG=debug tracer_replay --timing -i ./batch_events.jsonl -o ./trace.json
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use full_tracer::{ContextSnapshot, FullTracer, MetricsCollector, RomCommand, TimeMetrics};
use serde::Deserialize;
use tracing::info;

mod cli;
mod init;

/// One line of the event stream.
#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    context: ContextSnapshot,
    command: RomCommand,
}

fn main() -> Result<()> {
    dotenv().ok();
    init::tracing();

    let args = cli::Cli::parse();
    let config = args.tracer_config();

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    if args.timing {
        replay(
            FullTracer::with_metrics(config, TimeMetrics::new("tracer_replay")),
            input,
            output,
        )
    } else {
        replay(FullTracer::new(config), input, output)
    }
}

/// Dispatch every record of `input`, then write the final trace to `output`.
/// Stops at the first record the tracer rejects.
fn replay<M: MetricsCollector>(
    mut tracer: FullTracer<M>,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<()> {
    let mut events = 0;
    for (index, line) in input.lines().enumerate() {
        let line_number = index + 1;
        let line = line.context("Failed to read the event stream")?;
        if line.trim().is_empty() {
            continue;
        }

        let des = &mut serde_json::Deserializer::from_str(&line);
        let record: Record = serde_path_to_error::deserialize(des)
            .with_context(|| format!("Malformed record on line {line_number}"))?;
        tracer
            .handle_event(&record.context, &record.command)
            .with_context(|| {
                format!(
                    "Tracer rejected `{}` on line {line_number}",
                    record.command.event
                )
            })?;
        events += 1;
    }

    let trace = tracer
        .final_trace()
        .context("The event stream ended before the batch finished")?;
    info!(
        "Replayed {events} events: {} transactions, {} steps, {} gas used",
        trace.responses().len(),
        trace.execution_trace().len(),
        trace.cumulative_gas_used()
    );

    serde_json::to_writer_pretty(&mut output, &trace)?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}
