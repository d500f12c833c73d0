//! The tracer itself: batch-scoped state and the event handlers mutating it.

use std::mem;
use std::time::Instant;

use ethereum_types::{Address, H256, U256};
use strum::{Display, IntoStaticStr};

use crate::command::{Event, EventKind, RomCommand};
use crate::config::TracerConfig;
use crate::context::ExecutionContext;
use crate::error::{MalformedEvent, TracerError, TracerResult};
use crate::limbs::Limbs;
use crate::logs::{LogEntry, LogRecorder};
use crate::metrics::{MetricsCollector, NoopMetrics};
use crate::rw_addresses::ReadWriteAddresses;
use crate::steps::{StepCapture, StepRecorder};
use crate::storage::DeltaStorage;
use crate::trace::{Fault, FinalTrace, Response, TraceView, TxContext, TxOutcome};

/// Where the tracer stands in the batch lifecycle.
///
/// Event ordering is the interpreter's responsibility: the phase is only
/// tracked to refuse handing out a trace that is not complete yet.
#[derive(Clone, Copy, Debug, Default, Display, Eq, IntoStaticStr, PartialEq)]
pub enum TracerPhase {
    #[default]
    Uninitialized,
    BatchStarted,
    TxStarted,
    TxFinished,
    BatchFinished,
}

/// Everything the tracer accumulates over a batch.
#[derive(Clone, Debug, Default)]
struct BatchState {
    tx_count: u64,
    /// Gas limit of the transaction being traced.
    init_gas: u64,
    /// Gas accounted for so far: gas used by finished transactions, plus step
    /// costs of the current one.
    acc_batch_gas: u64,
    read_write_addresses: ReadWriteAddresses,
    delta_storage: DeltaStorage,
    logs: LogRecorder,
    steps: StepRecorder,
    final_trace: FinalTrace,
    current_tx: Option<TxContext>,
}

/// State that only makes sense between two consecutive events, and which a
/// snapshot does not carry over.
#[derive(Debug, Default)]
struct Transient {
    last_fault: Option<Fault>,
    /// Memory attached to the last step that recorded one.
    previous_memory: Option<Vec<u8>>,
    batch_started_at: Option<Instant>,
    tx_started_at: Option<Instant>,
}

/// A copy of the batch-scoped state of a [`FullTracer`], see
/// [`FullTracer::snapshot`].
#[derive(Clone, Debug)]
pub struct TracerSnapshot {
    state: BatchState,
    phase: TracerPhase,
}

impl TracerSnapshot {
    pub fn phase(&self) -> TracerPhase {
        self.phase
    }
}

/// Turns the event stream of the interpreter into a [`FinalTrace`].
///
/// One tracer serves one batch at a time: `onStartBatch` resets it.
#[derive(Debug)]
pub struct FullTracer<M = NoopMetrics> {
    config: TracerConfig,
    phase: TracerPhase,
    state: BatchState,
    transient: Transient,
    metrics: M,
}

impl Default for FullTracer {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

impl FullTracer {
    pub fn new(config: TracerConfig) -> Self {
        Self::with_metrics(config, NoopMetrics)
    }
}

impl<M: MetricsCollector> FullTracer<M> {
    /// Creates a tracer reporting the time spent in every handler to
    /// `metrics`.
    pub fn with_metrics(config: TracerConfig, metrics: M) -> Self {
        Self {
            config,
            phase: TracerPhase::default(),
            state: BatchState::default(),
            transient: Transient::default(),
            metrics,
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn phase(&self) -> TracerPhase {
        self.phase
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn into_metrics(self) -> M {
        self.metrics
    }

    /// Decode `cmd` and route it to its handler.
    ///
    /// A malformed command leaves the tracer untouched, but the batch it
    /// belongs to cannot be traced correctly anymore.
    pub fn handle_event<C: ExecutionContext>(
        &mut self,
        ctx: &C,
        cmd: &RomCommand,
    ) -> TracerResult<()> {
        let started = M::ENABLED.then(Instant::now);
        let event = Event::try_from(cmd)?;
        let kind = event.kind();

        self.dispatch(ctx, event)?;

        if let Some(started) = started {
            self.metrics.record(kind, started.elapsed());
        }
        if kind == EventKind::FinishBatch {
            self.metrics.batch_finished();
        }
        Ok(())
    }

    fn dispatch<C: ExecutionContext>(&mut self, ctx: &C, event: Event) -> TracerResult<()> {
        match event {
            Event::StartBatch => self.on_start_batch(ctx),
            Event::FinishBatch => self.on_finish_batch(ctx)?,
            Event::ProcessTx(tx) => self.on_process_tx(ctx, tx),
            Event::FinishTx(outcome) => self.on_finish_tx(ctx, outcome),
            Event::Opcode {
                op,
                gas_cost,
                access,
            } => {
                if let Some((address, key_type, value)) = access {
                    self.add_read_write_address(&address, &key_type, value)?;
                }
                self.on_opcode(ctx, op, gas_cost);
            }
            Event::UpdateStorage {
                address,
                slot,
                value,
                previous,
            } => self.on_update_storage(address, slot, value, previous),
            Event::StoreLog {
                tx_index,
                log_index,
                entry,
            } => {
                let tx_index = tx_index.unwrap_or_else(|| self.current_tx_index());
                self.on_store_log(tx_index, log_index, entry);
            }
            Event::Fault { message } => self.on_error(&message),
        }
        Ok(())
    }

    /// Reset every batch accumulator.
    pub fn on_start_batch<C: ExecutionContext>(&mut self, _ctx: &C) {
        self.state = BatchState::default();
        self.transient = Transient {
            batch_started_at: Some(Instant::now()),
            ..Default::default()
        };
        self.phase = TracerPhase::BatchStarted;
        log::debug!("Batch started");
    }

    /// Copy the roots reported by the interpreter and seal the final trace.
    pub fn on_finish_batch<C: ExecutionContext>(&mut self, ctx: &C) -> TracerResult<()> {
        let roots = ctx.batch_roots().ok_or(MalformedEvent::MissingField {
            event: EventKind::FinishBatch.as_str(),
            field: "roots",
        })?;

        let final_trace = &mut self.state.final_trace;
        final_trace.new_state_root = roots.new_state_root;
        final_trace.new_acc_input_hash = roots.new_acc_input_hash;
        final_trace.new_local_exit_root = roots.new_local_exit_root;
        final_trace.cumulative_gas_used = self.state.acc_batch_gas;
        self.phase = TracerPhase::BatchFinished;

        log::debug!(
            "Batch finished: {} transactions, {} gas, {} steps, new state root {:?}{}",
            self.state.tx_count,
            final_trace.cumulative_gas_used,
            self.state.steps.execution_trace().len(),
            final_trace.new_state_root,
            elapsed(self.transient.batch_started_at.take())
        );
        Ok(())
    }

    /// Open a transaction. Its frame is a `CREATE` when `tx` has no
    /// recipient.
    pub fn on_process_tx<C: ExecutionContext>(&mut self, ctx: &C, tx: TxContext) {
        self.state.tx_count += 1;
        self.state.init_gas = tx.gas_limit;
        self.state.delta_storage.clear();
        self.state
            .steps
            .start_tx(tx.call_type(), ctx.context_id(), tx.gas_limit);
        self.transient.last_fault = None;
        self.transient.previous_memory = None;
        self.transient.tx_started_at = Some(Instant::now());
        self.phase = TracerPhase::TxStarted;

        log::debug!(
            "Processing transaction {} from {:?} to {:?}, gas limit {}",
            self.current_tx_index(),
            tx.from,
            tx.to,
            tx.gas_limit
        );
        self.state.current_tx = Some(tx);
    }

    /// Close the current transaction and append its [`Response`].
    pub fn on_finish_tx<C: ExecutionContext>(&mut self, ctx: &C, outcome: TxOutcome) {
        let gas_remaining = ctx.gas_remaining();
        let gas_used = self.state.init_gas.saturating_sub(gas_remaining);
        let finished = self.state.steps.finish_tx(gas_remaining, gas_used);

        // Step costs are only an estimate of what the transaction consumed.
        self.state.acc_batch_gas += finished.last_step_cost;
        self.state.acc_batch_gas = self
            .state
            .acc_batch_gas
            .saturating_sub(finished.step_gas)
            + gas_used;

        let tx_index = self.current_tx_index();
        let creates = finished
            .call_trace
            .root()
            .is_some_and(|root| root.call_type.is_create());
        if creates != outcome.created_address.is_some() {
            log::warn!(
                "Transaction {} reported created address {:?} for a {} frame",
                tx_index,
                outcome.created_address,
                if creates { "CREATE" } else { "CALL" }
            );
        }
        let fault = self.transient.last_fault.take();
        let response = Response {
            tx_index,
            context: self.state.current_tx.take().unwrap_or_default(),
            gas_used,
            success: fault.is_none(),
            error: fault.map(|fault| fault.message),
            created_address: outcome.created_address,
            return_data: outcome.return_data,
            state_root: outcome.state_root,
            logs: self.state.logs.tx_logs(tx_index).cloned().collect(),
            storage_changes: self
                .state
                .delta_storage
                .changes(self.config.skip_noop_storage_writes),
            steps: finished.steps,
            call_trace: finished.call_trace,
        };

        log::debug!(
            "Transaction {} finished: success {}, {} gas used, {} steps{}",
            tx_index,
            response.success,
            gas_used,
            response.opcode_count(),
            elapsed(self.transient.tx_started_at.take())
        );
        self.state.final_trace.responses.push(response);
        self.phase = TracerPhase::TxFinished;
    }

    /// Record one executed instruction.
    pub fn on_opcode<C: ExecutionContext>(&mut self, ctx: &C, op: u8, gas_cost: Option<u64>) {
        let memory = if self.config.capture_memory {
            self.memory_if_changed(ctx.memory())
        } else {
            None
        };
        let capture = StepCapture {
            stack: self.config.capture_stack,
            memory,
        };
        let accounted = self.state.steps.record(ctx, op, gas_cost, capture);
        self.state.acc_batch_gas += accounted;

        log::trace!(
            "{} at pc {} (context {}, depth {}), gas {}",
            crate::opcodes::get_mnemonic(op),
            ctx.program_counter(),
            ctx.context_id(),
            ctx.call_depth(),
            ctx.gas_remaining()
        );
    }

    fn memory_if_changed(&mut self, memory: &[u8]) -> Option<Vec<u8>> {
        if self.transient.previous_memory.as_deref() == Some(memory) {
            return None;
        }
        self.transient.previous_memory = Some(memory.to_vec());
        Some(memory.to_vec())
    }

    /// Record a storage write of the current transaction. `previous` is the
    /// value of the slot at transaction start.
    pub fn on_update_storage(&mut self, address: Address, slot: H256, value: U256, previous: U256) {
        log::trace!("SSTORE {:?}[{:?}] = {}", address, slot, value);
        self.state
            .delta_storage
            .record(address, slot, value, previous);
    }

    pub fn on_store_log(&mut self, tx_index: u64, log_index: u64, entry: LogEntry) {
        self.state.logs.store(tx_index, log_index, entry);
    }

    /// Record an EVM-level failure. The transaction goes on: the interpreter
    /// still reports its end through `onFinishTx`.
    pub fn on_error(&mut self, message: &str) {
        let step = self.state.steps.mark_fault(message);
        log::debug!(
            "Transaction {} faulted at step {:?}: {} (stack {:?})",
            self.current_tx_index(),
            step,
            message,
            self.state.steps.current_stack().unwrap_or_default()
        );
        self.transient.last_fault = Some(Fault {
            message: message.to_owned(),
            step,
        });
    }

    /// Record an observation of a state leaf in the read/write address set.
    pub fn add_read_write_address(
        &mut self,
        address: &Limbs,
        key_type: &Limbs,
        value: U256,
    ) -> TracerResult<()> {
        self.state
            .read_write_addresses
            .add(address, key_type, value)
            .map_err(TracerError::from)
    }

    /// Index of the transaction being traced, or of the last one traced.
    pub fn current_tx_index(&self) -> u64 {
        self.state.tx_count.saturating_sub(1)
    }

    /// Fault recorded since the current transaction started, if any.
    pub fn last_fault(&self) -> Option<&Fault> {
        self.transient.last_fault.as_ref()
    }

    /// The step recorder, for inspecting the batch while it runs.
    pub fn steps(&self) -> &StepRecorder {
        &self.state.steps
    }

    pub fn delta_storage(&self) -> &DeltaStorage {
        &self.state.delta_storage
    }

    /// Copy the batch-scoped state. The pending fault, the memory used to
    /// deduplicate snapshots and the timers are left out.
    pub fn snapshot(&self) -> TracerSnapshot {
        TracerSnapshot {
            state: self.state.clone(),
            phase: self.phase,
        }
    }

    /// Go back to the state captured by `snapshot`.
    pub fn restore(&mut self, snapshot: TracerSnapshot) {
        self.state = snapshot.state;
        self.phase = snapshot.phase;
        self.transient = Transient::default();
    }

    /// Returns a view over the trace of the batch. Only available once
    /// `onFinishBatch` has been handled.
    pub fn final_trace(&self) -> TracerResult<TraceView<'_>> {
        if self.phase != TracerPhase::BatchFinished {
            return Err(TracerError::BatchNotFinished(self.phase.into()));
        }
        Ok(TraceView::new(
            &self.state.final_trace,
            &self.state.read_write_addresses,
            self.state.steps.execution_trace(),
        ))
    }

    /// Hands the final trace over, leaving the tracer uninitialized.
    pub fn take_final_trace(&mut self) -> TracerResult<FinalTrace> {
        if self.phase != TracerPhase::BatchFinished {
            return Err(TracerError::BatchNotFinished(self.phase.into()));
        }
        self.phase = TracerPhase::Uninitialized;
        Ok(mem::take(&mut self.state).final_trace)
    }
}

fn elapsed(started_at: Option<Instant>) -> String {
    started_at
        .map(|started_at| format!(" in {:?}", started_at.elapsed()))
        .unwrap_or_default()
}
