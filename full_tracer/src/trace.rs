//! Per-transaction responses and the final trace of a batch.

use std::ops::Range;

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::call_tree::CallTree;
use crate::logs::LogEntry;
use crate::opcodes::CallType;
use crate::rw_addresses::ReadWriteAddresses;
use crate::serde_hex;
use crate::steps::OpcodeStep;
use crate::storage::StorageChange;

/// The transaction as handed over by the interpreter at `onProcessTx`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct TxContext {
    pub from: Address,
    /// Recipient; `None` for contract deployments.
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub nonce: u64,
    #[serde(with = "serde_hex")]
    pub input: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<H256>,
}

impl TxContext {
    /// Call type of the transaction frame.
    pub fn call_type(&self) -> CallType {
        match self.to {
            Some(_) => CallType::Call,
            None => CallType::Create,
        }
    }
}

/// What the interpreter reports at `onFinishTx`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TxOutcome {
    pub created_address: Option<Address>,
    #[serde(with = "serde_hex")]
    pub return_data: Vec<u8>,
    pub state_root: Option<H256>,
}

/// An EVM-level failure of the transaction being traced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fault {
    pub message: String,
    /// Position, within the transaction, of the step that faulted. `None` if
    /// the transaction failed before executing any step.
    pub step: Option<usize>,
}

/// Result of one transaction of the batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Response {
    pub tx_index: u64,
    #[serde(rename = "tx")]
    pub context: TxContext,
    pub gas_used: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_address: Option<Address>,
    #[serde(with = "serde_hex")]
    pub return_data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_root: Option<H256>,
    pub logs: Vec<LogEntry>,
    pub storage_changes: Vec<StorageChange>,
    /// Slice of the batch execution trace covering this transaction.
    pub steps: Range<usize>,
    pub call_trace: CallTree,
}

impl Response {
    /// Number of opcodes the transaction executed.
    pub fn opcode_count(&self) -> usize {
        self.steps.len()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FinalTrace {
    pub cumulative_gas_used: u64,
    pub new_state_root: H256,
    pub new_acc_input_hash: H256,
    pub new_local_exit_root: H256,
    pub responses: Vec<Response>,
}

/// Read-only view over a finished batch.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TraceView<'a> {
    #[serde(flatten)]
    final_trace: &'a FinalTrace,
    read_write_addresses: &'a ReadWriteAddresses,
    execution_trace: &'a [OpcodeStep],
}

impl<'a> TraceView<'a> {
    pub(crate) fn new(
        final_trace: &'a FinalTrace,
        read_write_addresses: &'a ReadWriteAddresses,
        execution_trace: &'a [OpcodeStep],
    ) -> Self {
        Self {
            final_trace,
            read_write_addresses,
            execution_trace,
        }
    }

    pub fn cumulative_gas_used(&self) -> u64 {
        self.final_trace.cumulative_gas_used
    }

    pub fn new_state_root(&self) -> H256 {
        self.final_trace.new_state_root
    }

    pub fn new_acc_input_hash(&self) -> H256 {
        self.final_trace.new_acc_input_hash
    }

    pub fn new_local_exit_root(&self) -> H256 {
        self.final_trace.new_local_exit_root
    }

    pub fn read_write_addresses(&self) -> &'a ReadWriteAddresses {
        self.read_write_addresses
    }

    pub fn responses(&self) -> &'a [Response] {
        &self.final_trace.responses
    }

    /// Every step of the batch, in execution order.
    pub fn execution_trace(&self) -> &'a [OpcodeStep] {
        self.execution_trace
    }

    /// Steps executed by the transaction `response` describes.
    pub fn steps_of(&self, response: &Response) -> &'a [OpcodeStep] {
        self.execution_trace
            .get(response.steps.clone())
            .unwrap_or_default()
    }

    pub fn final_trace(&self) -> &'a FinalTrace {
        self.final_trace
    }
}
