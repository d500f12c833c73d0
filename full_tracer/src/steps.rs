//! Opcode-level execution trace and call-depth bookkeeping.

use std::collections::HashMap;
use std::mem;
use std::ops::Range;

use ethereum_types::U256;
use serde::Serialize;

use crate::call_tree::CallTree;
use crate::context::ExecutionContext;
use crate::opcodes::{get_mnemonic, CallType};
use crate::serde_hex;

/// One executed instruction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OpcodeStep {
    pub pc: u64,
    pub op: u8,
    pub opcode: &'static str,
    pub depth: u64,
    pub context: u64,
    /// Gas left before the step executes.
    pub gas: u64,
    pub gas_cost: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<U256>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_hex::opt::serialize"
    )]
    pub memory: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Call type of a context, fixed when the context is entered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContextData {
    pub call_type: CallType,
}

/// What the recorder copies out of the interpreter for one step, besides the
/// registers it always reads.
#[derive(Clone, Debug, Default)]
pub(crate) struct StepCapture {
    pub(crate) stack: bool,
    pub(crate) memory: Option<Vec<u8>>,
}

/// Builds the batch execution trace and the call tree of the current
/// transaction.
#[derive(Clone, Debug)]
pub struct StepRecorder {
    execution_trace: Vec<OpcodeStep>,
    call_data: HashMap<u64, ContextData>,
    call_tree: CallTree,
    /// Last stack snapshot of every open frame, innermost last.
    stack_frames: Vec<Vec<U256>>,
    depth: u64,
    prev_context: u64,
    /// Call type opened by the previous step, if it was a call or create.
    pending_call: Option<CallType>,
    tx_first_step: usize,
    tx_step_gas: u64,
}

impl Default for StepRecorder {
    fn default() -> Self {
        Self {
            execution_trace: vec![],
            call_data: HashMap::new(),
            call_tree: CallTree::default(),
            stack_frames: vec![],
            depth: 1,
            prev_context: 0,
            pending_call: None,
            tx_first_step: 0,
            tx_step_gas: 0,
        }
    }
}

impl StepRecorder {
    /// Open the transaction frame.
    pub(crate) fn start_tx(&mut self, call_type: CallType, context: u64, gas: u64) {
        self.tx_first_step = self.execution_trace.len();
        self.tx_step_gas = 0;
        self.depth = 1;
        self.prev_context = context;
        self.pending_call = None;
        self.call_data.insert(context, ContextData { call_type });
        self.call_tree = CallTree::new(call_type, context, gas, self.tx_first_step);
        self.stack_frames = vec![vec![]];
    }

    /// Record one step and return the gas newly accounted for, which may
    /// include the backfilled cost of an earlier step.
    pub(crate) fn record<C: ExecutionContext>(
        &mut self,
        ctx: &C,
        op: u8,
        gas_cost: Option<u64>,
        capture: StepCapture,
    ) -> u64 {
        let depth = ctx.call_depth();
        let context = ctx.context_id();
        let gas = ctx.gas_remaining();
        let index = self.execution_trace.len();
        let mut accounted = 0;

        if depth > self.depth {
            // Context ids may be reused within a batch: the opening step wins.
            let call_type = self.pending_call.take().unwrap_or_default();
            self.call_data.insert(context, ContextData { call_type });
            log::trace!(
                "Entering {:?} context {} at depth {} from context {}",
                call_type,
                context,
                depth,
                self.prev_context
            );
            self.call_tree.enter(call_type, context, depth, gas, index);
            self.stack_frames.push(vec![]);
            self.depth = depth;
        } else {
            while depth < self.depth && self.call_tree.open_frames() > 1 {
                self.leave_frame();
            }
            accounted += self.price_pending_step(gas);
        }

        let stack = if capture.stack {
            ctx.stack().to_vec()
        } else {
            vec![]
        };
        if let Some(frame) = self.stack_frames.last_mut() {
            frame.clone_from(&stack);
        }

        self.execution_trace.push(OpcodeStep {
            pc: ctx.program_counter(),
            op,
            opcode: get_mnemonic(op),
            depth,
            context,
            gas,
            gas_cost: gas_cost.unwrap_or_default(),
            stack,
            memory: capture.memory,
            error: None,
        });

        if let Some(node) = self.call_tree.current_mut() {
            match gas_cost {
                Some(cost) => node.gas_left = gas.saturating_sub(cost),
                None => node.unpriced_step = Some(index),
            }
        }
        if let Some(cost) = gas_cost {
            accounted += cost;
        }
        self.tx_step_gas += accounted;
        self.pending_call = CallType::from_opcode(op);
        self.prev_context = context;

        accounted
    }

    /// Tag the last step of the transaction and the current frame with a
    /// fault. Returns the position of the step within the transaction.
    pub(crate) fn mark_fault(&mut self, message: &str) -> Option<usize> {
        if let Some(node) = self.call_tree.current_mut() {
            node.error = Some(message.to_owned());
        }
        let step = self.steps_in_tx().checked_sub(1)?;
        if let Some(last) = self.execution_trace.last_mut() {
            last.error = Some(message.to_owned());
        }
        Some(step)
    }

    /// Close the transaction. Returns the range of its steps in the execution
    /// trace, its call tree, and the step gas accounted for it, including the
    /// backfilled cost of its last step.
    pub(crate) fn finish_tx(&mut self, gas_remaining: u64, gas_used: u64) -> FinishedTx {
        while self.call_tree.open_frames() > 1 {
            self.leave_frame();
        }
        let last_cost = self.price_pending_step(gas_remaining);
        self.tx_step_gas += last_cost;
        self.call_tree.finish(gas_remaining, gas_used);
        self.depth = 1;
        self.pending_call = None;
        self.stack_frames.clear();

        FinishedTx {
            steps: self.tx_first_step..self.execution_trace.len(),
            call_trace: mem::take(&mut self.call_tree),
            last_step_cost: last_cost,
            step_gas: mem::take(&mut self.tx_step_gas),
        }
    }

    pub fn execution_trace(&self) -> &[OpcodeStep] {
        &self.execution_trace
    }

    /// Number of steps recorded since the current transaction started.
    pub fn steps_in_tx(&self) -> usize {
        self.execution_trace.len() - self.tx_first_step
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn call_tree(&self) -> &CallTree {
        &self.call_tree
    }

    pub fn context_data(&self, context: u64) -> Option<&ContextData> {
        self.call_data.get(&context)
    }

    /// Stack snapshot of the innermost open frame, as of its last step.
    pub fn current_stack(&self) -> Option<&[U256]> {
        self.stack_frames.last().map(Vec::as_slice)
    }

    fn leave_frame(&mut self) {
        if let Some(node) = self.call_tree.current_mut() {
            // A frame's last step (RETURN, STOP...) is never followed by
            // another step of the same frame.
            if let Some(step) = node.unpriced_step.take() {
                node.gas_left = self.execution_trace[step].gas;
            }
        }
        if let Some(closed) = self.call_tree.exit() {
            log::trace!(
                "Leaving context {} (depth {}), gas used {}",
                closed.context,
                closed.depth,
                closed.gas_used
            );
        }
        self.stack_frames.pop();
        self.depth = self.call_tree.current().map_or(1, |node| node.depth);
    }

    /// Set the cost of the current frame's unpriced step from the gas left
    /// now.
    fn price_pending_step(&mut self, gas: u64) -> u64 {
        let Some(node) = self.call_tree.current_mut() else {
            return 0;
        };
        let Some(index) = node.unpriced_step.take() else {
            return 0;
        };
        let step = &mut self.execution_trace[index];
        step.gas_cost = step.gas.saturating_sub(gas);
        node.gas_left = gas;
        step.gas_cost
    }
}

/// What the recorder hands back when a transaction finishes.
#[derive(Debug)]
pub(crate) struct FinishedTx {
    pub(crate) steps: Range<usize>,
    pub(crate) call_trace: CallTree,
    pub(crate) last_step_cost: u64,
    pub(crate) step_gas: u64,
}
