//! Tracer configuration.

use serde::{Deserialize, Serialize};

/// Knobs controlling how much of the interpreter state the tracer copies out.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Copy the value stack into every opcode record.
    pub capture_stack: bool,
    /// Copy the memory into opcode records whenever it changed since the last
    /// recorded snapshot.
    pub capture_memory: bool,
    /// Leave storage slots whose final value equals their value at
    /// transaction start out of the response deltas.
    pub skip_noop_storage_writes: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            capture_stack: true,
            capture_memory: false,
            skip_noop_storage_writes: true,
        }
    }
}
