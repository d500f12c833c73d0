use std::path::PathBuf;

use clap::{Parser, ValueHint};
use full_tracer::TracerConfig;

/// Replay a JSON-lines stream of `{ "context": .., "command": .. }` records
/// through the full tracer and print the final trace as JSON.
#[derive(Debug, Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    /// Event stream to replay. Defaults to stdin.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub(crate) input: Option<PathBuf>,
    /// Where to write the trace. Defaults to stdout.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub(crate) output: Option<PathBuf>,
    /// Attach memory snapshots to opcode records.
    #[arg(long, env = "TRACER_CAPTURE_MEMORY")]
    pub(crate) capture_memory: bool,
    /// Leave the value stack out of opcode records.
    #[arg(long, env = "TRACER_NO_CAPTURE_STACK")]
    pub(crate) no_capture_stack: bool,
    /// Report storage slots written back to their original value.
    #[arg(long, env = "TRACER_KEEP_NOOP_STORAGE_WRITES")]
    pub(crate) keep_noop_storage_writes: bool,
    /// Log how long the tracer spent on each kind of event.
    #[arg(long, env = "TRACER_TIMING")]
    pub(crate) timing: bool,
}

impl Cli {
    pub(crate) fn tracer_config(&self) -> TracerConfig {
        TracerConfig {
            capture_stack: !self.no_capture_stack,
            capture_memory: self.capture_memory,
            skip_noop_storage_writes: !self.keep_noop_storage_writes,
        }
    }
}
