//! The interpreter state the tracer observes.
//!
//! Handlers receive the context by reference for the duration of a single
//! call and copy out whatever they need to remember; the tracer never mutates
//! it.

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};

use crate::serde_hex;

/// Roots reported by the interpreter once the batch has been executed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchRoots {
    /// State root after the batch.
    pub new_state_root: H256,
    /// Accumulated input hash after the batch.
    pub new_acc_input_hash: H256,
    /// Local exit root after the batch.
    pub new_local_exit_root: H256,
}

/// Read-only view over the live machine state of the interpreter.
pub trait ExecutionContext {
    /// Identifier of the current execution context (call frame).
    fn context_id(&self) -> u64;

    /// Nesting level of the current frame; the transaction frame is at depth
    /// 1.
    fn call_depth(&self) -> u64;

    /// Gas left in the current frame.
    fn gas_remaining(&self) -> u64;

    fn program_counter(&self) -> u64;

    /// The value stack, bottom first.
    fn stack(&self) -> &[U256];

    fn memory(&self) -> &[u8];

    /// Roots of the batch. Only meaningful once the batch has been executed.
    fn batch_roots(&self) -> Option<BatchRoots>;
}

/// An owned copy of the interpreter state, used to replay recorded event
/// streams.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub context_id: u64,
    pub depth: u64,
    pub gas_remaining: u64,
    pub pc: u64,
    pub stack: Vec<U256>,
    #[serde(with = "serde_hex")]
    pub memory: Vec<u8>,
    pub roots: Option<BatchRoots>,
}

impl ExecutionContext for ContextSnapshot {
    fn context_id(&self) -> u64 {
        self.context_id
    }

    fn call_depth(&self) -> u64 {
        self.depth
    }

    fn gas_remaining(&self) -> u64 {
        self.gas_remaining
    }

    fn program_counter(&self) -> u64 {
        self.pc
    }

    fn stack(&self) -> &[U256] {
        &self.stack
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn batch_roots(&self) -> Option<BatchRoots> {
        self.roots
    }
}
