//! Execution tracer for the zkEVM batch executor.
//!
//! While the ROM executes a batch, it reports what it does to a
//! [`FullTracer`] as a stream of [`RomCommand`]s: batch and transaction
//! boundaries, executed opcodes, storage writes, logs and faults. From that
//! stream the tracer builds
//! - an opcode-level execution trace, with one call tree per transaction,
//!   for debugging;
//! - the witness summary needed to assemble proof inputs: the addresses the
//!   batch read or wrote, net storage changes, logs, one [`Response`] per
//!   transaction and the roots of the batch.
//!
//! ```no_run
//! # use full_tracer::{ContextSnapshot, FullTracer, RomCommand, TracerConfig, TracerResult};
//! # fn replay(commands: Vec<(ContextSnapshot, RomCommand)>) -> TracerResult<()> {
//! let mut tracer = FullTracer::new(TracerConfig::default());
//! for (ctx, cmd) in &commands {
//!     tracer.handle_event(ctx, cmd)?;
//! }
//! let trace = tracer.final_trace()?;
//! println!("{} gas used", trace.cumulative_gas_used());
//! # Ok(())
//! # }
//! ```
//!
//! Addresses, slots and key types travel through the ROM as 8 Goldilocks
//! field elements; [`limbs`] converts them back and forth.
//!
//! # Non-Goals
//! - Computing state roots. The tracer copies the ones the ROM reports.
//! - Validating transactions, or the order in which events arrive.

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]

pub mod call_tree;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod limbs;
pub mod logs;
pub mod metrics;
pub mod opcodes;
pub mod rw_addresses;
mod serde_hex;
pub mod steps;
pub mod storage;
pub mod trace;
mod tracer;

pub use command::{Event, EventKind, RomCommand};
pub use config::TracerConfig;
pub use context::{BatchRoots, ContextSnapshot, ExecutionContext};
pub use error::{MalformedEvent, TracerError, TracerResult};
pub use metrics::{MetricsCollector, NoopMetrics, TimeMetrics};
pub use trace::{FinalTrace, Response, TraceView, TxContext, TxOutcome};
pub use tracer::{FullTracer, TracerPhase, TracerSnapshot};
