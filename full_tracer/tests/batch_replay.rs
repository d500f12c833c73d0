use anyhow::Result;
use ethereum_types::{Address, H160, H256, U256};
use full_tracer::limbs::{self, Access, KeyType, SmtKeyType, F};
use full_tracer::opcodes::CallType;
use full_tracer::{
    BatchRoots, ContextSnapshot, EventKind, FullTracer, MalformedEvent, RomCommand,
    TimeMetrics, TracerConfig, TracerError, TracerPhase, TracerResult, TxContext,
};
use hex_literal::hex;
use plonky2::field::types::Field;

const SENDER: Address = H160([0xaa; 20]);
const CONTRACT: Address = H160([0xcc; 20]);

fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

/// Drives a tracer the way the ROM does, keeping track of the interpreter
/// state handed along with every command.
struct Rom<M = full_tracer::NoopMetrics> {
    tracer: FullTracer<M>,
    ctx: ContextSnapshot,
}

impl Rom {
    fn new() -> Self {
        Self::with_config(TracerConfig::default())
    }

    fn with_config(config: TracerConfig) -> Self {
        init_logger();
        Self {
            tracer: FullTracer::new(config),
            ctx: ContextSnapshot::default(),
        }
    }
}

impl<M: full_tracer::MetricsCollector> Rom<M> {
    fn send(&mut self, cmd: RomCommand) -> TracerResult<()> {
        self.tracer.handle_event(&self.ctx, &cmd)
    }

    /// Move the interpreter to `context` at `depth`, with `gas` left.
    fn at(&mut self, context: u64, depth: u64, gas: u64) -> &mut Self {
        self.ctx.context_id = context;
        self.ctx.depth = depth;
        self.ctx.gas_remaining = gas;
        self
    }

    fn start_batch(&mut self) -> TracerResult<()> {
        self.send(RomCommand::new(EventKind::StartBatch))
    }

    fn process_tx(&mut self, tx: TxContext) -> TracerResult<()> {
        self.at(1, 1, tx.gas_limit);
        self.send(RomCommand {
            tx: Some(tx),
            ..RomCommand::new(EventKind::ProcessTx)
        })
    }

    fn opcode(&mut self, op: u8, gas_cost: Option<u64>) -> TracerResult<()> {
        self.ctx.pc += 1;
        self.send(RomCommand {
            op: Some(op),
            gas_cost,
            ..RomCommand::new(EventKind::Opcode)
        })
    }

    /// Run `ops` in the current frame, each priced as given, starting from the
    /// gas currently left.
    fn run(&mut self, ops: &[(u8, u64)]) -> TracerResult<()> {
        for &(op, cost) in ops {
            self.opcode(op, Some(cost))?;
            self.ctx.gas_remaining -= cost;
        }
        Ok(())
    }

    fn finish_tx(&mut self, gas_left: u64) -> TracerResult<()> {
        self.at(1, 1, gas_left);
        self.send(RomCommand::new(EventKind::FinishTx))
    }

    fn finish_batch(&mut self) -> TracerResult<()> {
        self.ctx.roots = Some(roots());
        self.send(RomCommand::new(EventKind::FinishBatch))
    }
}

fn roots() -> BatchRoots {
    BatchRoots {
        new_state_root: H256(hex!(
            "b1b8b5a8e5c3d7f0b6f5a0fa2b7d9bd0d7c4f7c2e4aa53a7a0a9f5c0cfd3e1aa"
        )),
        new_acc_input_hash: H256::repeat_byte(0x11),
        new_local_exit_root: H256::repeat_byte(0x22),
    }
}

fn call(gas_limit: u64) -> TxContext {
    TxContext {
        from: SENDER,
        to: Some(CONTRACT),
        gas_limit,
        gas_price: U256::from(1_000_000_000u64),
        ..Default::default()
    }
}

fn update_storage(slot: u64, value: u64, previous: u64) -> RomCommand {
    RomCommand {
        address: Some(limbs::address_to_limbs(CONTRACT)),
        key: Some(limbs::slot_to_limbs(H256::from_low_u64_be(slot))),
        value: Some(value.into()),
        previous: Some(previous.into()),
        ..RomCommand::new(EventKind::UpdateStorage)
    }
}

fn store_log(log_index: u64, topic: u8) -> RomCommand {
    RomCommand {
        address: Some(limbs::address_to_limbs(CONTRACT)),
        log_index: Some(log_index),
        topics: vec![H256::repeat_byte(topic)],
        data: vec![topic],
        ..RomCommand::new(EventKind::StoreLog)
    }
}

fn touch(address: Address, kind: SmtKeyType, access: Access, value: u64) -> RomCommand {
    RomCommand {
        op: Some(0x31),
        gas_cost: Some(100),
        address: Some(limbs::address_to_limbs(address)),
        key: Some(limbs::key_type_to_limbs(KeyType { kind, access })),
        value: Some(value.into()),
        ..RomCommand::new(EventKind::Opcode)
    }
}

fn fault(message: &str) -> RomCommand {
    RomCommand {
        message: Some(message.into()),
        ..RomCommand::new(EventKind::Fault)
    }
}

#[test]
fn empty_batch() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    assert_eq!(trace.cumulative_gas_used(), 0);
    assert!(trace.responses().is_empty());
    assert!(trace.execution_trace().is_empty());
    assert!(trace.read_write_addresses().is_empty());
    assert_eq!(trace.new_state_root(), roots().new_state_root);
    assert_eq!(trace.new_acc_input_hash(), H256::repeat_byte(0x11));
    assert_eq!(trace.new_local_exit_root(), H256::repeat_byte(0x22));
    Ok(())
}

#[test]
fn opcode_counts_partition_the_execution_trace() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;

    rom.process_tx(call(100_000))?;
    rom.run(&[(0x60, 3), (0x60, 3), (0x01, 3)])?;
    rom.finish_tx(70_000)?;

    rom.process_tx(call(50_000))?;
    rom.run(&[(0x5f, 2), (0x00, 0)])?;
    rom.finish_tx(28_000)?;

    rom.finish_batch()?;
    let trace = rom.tracer.final_trace()?;

    let responses = trace.responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].opcode_count(), 3);
    assert_eq!(responses[1].opcode_count(), 2);
    assert_eq!(
        responses.iter().map(|r| r.opcode_count()).sum::<usize>(),
        trace.execution_trace().len()
    );

    let second: Vec<_> = trace
        .steps_of(&responses[1])
        .iter()
        .map(|step| step.opcode)
        .collect();
    assert_eq!(second, ["PUSH0", "STOP"]);

    assert_eq!(responses[0].gas_used, 30_000);
    assert_eq!(responses[1].gas_used, 22_000);
    assert_eq!(trace.cumulative_gas_used(), 52_000);
    assert_eq!(responses[1].tx_index, 1);
    assert!(responses.iter().all(|r| r.success));
    Ok(())
}

#[test]
fn storage_writes_are_coalesced_per_transaction() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;

    rom.process_tx(call(100_000))?;
    rom.send(update_storage(1, 1, 0))?;
    rom.send(update_storage(1, 2, 1))?;
    // Written back to its original value.
    rom.send(update_storage(2, 5, 4))?;
    rom.send(update_storage(2, 4, 5))?;
    rom.finish_tx(90_000)?;

    rom.process_tx(call(100_000))?;
    rom.send(update_storage(3, 7, 0))?;
    rom.finish_tx(90_000)?;

    rom.finish_batch()?;
    let trace = rom.tracer.final_trace()?;

    let first = &trace.responses()[0].storage_changes;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].address, CONTRACT);
    assert_eq!(first[0].slot, H256::from_low_u64_be(1));
    assert_eq!(first[0].baseline, U256::zero());
    assert_eq!(first[0].current, U256::from(2));

    let second = &trace.responses()[1].storage_changes;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].slot, H256::from_low_u64_be(3));
    Ok(())
}

#[test]
fn noop_storage_writes_can_be_kept() -> Result<()> {
    let mut rom = Rom::with_config(TracerConfig {
        skip_noop_storage_writes: false,
        ..Default::default()
    });
    rom.start_batch()?;
    rom.process_tx(call(100_000))?;
    rom.send(update_storage(2, 5, 4))?;
    rom.send(update_storage(2, 4, 5))?;
    rom.finish_tx(90_000)?;
    rom.finish_batch()?;

    let changes = &rom.tracer.final_trace()?.responses()[0].storage_changes;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].baseline, changes[0].current);
    Ok(())
}

#[test]
fn logs_come_back_in_index_order() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(100_000))?;
    rom.send(store_log(2, 0xc2))?;
    rom.send(store_log(0, 0xc0))?;
    rom.send(store_log(1, 0xc1))?;
    // Logs of other transactions stay with them.
    rom.send(RomCommand {
        tx_index: Some(5),
        ..store_log(0, 0xff)
    })?;
    rom.finish_tx(90_000)?;
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    let logs = &trace.responses()[0].logs;
    assert_eq!(
        logs.iter().map(|log| log.index).collect::<Vec<_>>(),
        [0, 1, 2]
    );
    assert_eq!(logs[2].topics, [H256::repeat_byte(0xc2)]);
    assert_eq!(logs[2].data, [0xc2]);
    assert_eq!(logs[0].address, CONTRACT);
    Ok(())
}

#[test]
fn faults_fail_the_transaction_without_dropping_steps() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;

    rom.process_tx(call(10_000))?;
    rom.run(&[(0x60, 3), (0x60, 3)])?;
    rom.opcode(0x55, Some(20_000))?;
    rom.send(fault("out of gas"))?;
    rom.finish_tx(0)?;

    rom.process_tx(call(10_000))?;
    rom.run(&[(0x00, 0)])?;
    rom.finish_tx(9_000)?;

    rom.finish_batch()?;
    let trace = rom.tracer.final_trace()?;
    let [failed, ok] = trace.responses() else {
        panic!("expected two responses");
    };

    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("out of gas"));
    assert_eq!(failed.gas_used, 10_000);
    let steps = trace.steps_of(failed);
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[2].opcode, "SSTORE");
    assert_eq!(steps[2].error.as_deref(), Some("out of gas"));
    assert!(steps[..2].iter().all(|step| step.error.is_none()));
    assert_eq!(
        failed.call_trace.root().and_then(|root| root.error.as_deref()),
        Some("out of gas")
    );

    assert!(ok.success);
    assert_eq!(ok.error, None);
    assert_eq!(trace.cumulative_gas_used(), 11_000);
    Ok(())
}

#[test]
fn fault_before_any_step() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(20_000))?;
    rom.send(fault("intrinsic gas too low"))?;

    let fault = rom.tracer.last_fault().cloned();
    assert_eq!(fault.map(|fault| fault.step), Some(None));

    rom.finish_tx(20_000)?;
    rom.finish_batch()?;
    let response = &rom.tracer.final_trace()?.responses()[0];
    assert!(!response.success);
    assert_eq!(response.opcode_count(), 0);
    Ok(())
}

#[test]
fn addresses_are_deduplicated() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(100_000))?;
    rom.send(touch(SENDER, SmtKeyType::Balance, Access::Read, 1_000))?;
    rom.send(touch(SENDER, SmtKeyType::Balance, Access::Read, 1_000))?;
    rom.send(touch(SENDER, SmtKeyType::Nonce, Access::Read, 4))?;
    rom.send(touch(SENDER, SmtKeyType::Nonce, Access::Write, 5))?;
    rom.send(touch(CONTRACT, SmtKeyType::Code, Access::Read, 0x1234))?;
    rom.finish_tx(90_000)?;
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    let set = trace.read_write_addresses();
    assert_eq!(set.len(), 2);

    let sender = set
        .get("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        .expect("sender was touched");
    assert!(sender.read);
    assert!(sender.written);
    assert_eq!(sender.value, U256::from(5));
    assert_eq!(sender.balance, Some(U256::from(1_000)));
    assert_eq!(sender.nonce, Some(U256::from(5)));

    let contract = set
        .get("0xcccccccccccccccccccccccccccccccccccccccc")
        .expect("contract was touched");
    assert!(contract.read);
    assert!(!contract.written);
    assert_eq!(contract.value, U256::from(0x1234));

    // Every touch is also a step.
    assert_eq!(trace.responses()[0].opcode_count(), 5);
    assert_eq!(trace.execution_trace()[0].opcode, "BALANCE");
    Ok(())
}

#[test]
fn nested_calls_build_the_call_tree() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(100_000))?;

    rom.run(&[(0x60, 3)])?;
    rom.opcode(0xf4, Some(700))?;
    // DELEGATECALL into context 2 with 50 000 gas.
    rom.at(2, 2, 50_000).run(&[(0x60, 3), (0xf1, 700)])?;
    // CALL into context 3.
    rom.at(3, 3, 20_000).run(&[(0x00, 0)])?;
    // Back in context 2.
    rom.at(2, 2, 68_297 - 50_000).run(&[(0xf3, 0)])?;
    // Back in the transaction frame.
    rom.at(1, 1, 99_297 - 50_000 + 18_297).run(&[(0x00, 0)])?;
    rom.finish_tx(67_594)?;
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    let tree = &trace.responses()[0].call_trace;
    assert_eq!(tree.nodes().len(), 3);

    let root = tree.root().expect("transaction frame");
    assert_eq!(root.call_type, CallType::Call);
    assert_eq!(root.gas, 100_000);
    assert_eq!(root.gas_used, 32_406);

    let delegate: Vec<_> = tree.children(0).collect();
    assert_eq!(delegate.len(), 1);
    let delegate = delegate[0];
    assert_eq!(delegate.call_type, CallType::Delegatecall);
    assert_eq!(delegate.caller_context, 1);
    assert_eq!(delegate.context, 2);
    assert_eq!(delegate.depth, 2);
    assert_eq!(delegate.first_step, 2);
    assert_eq!(root.subcalls_gas_used, delegate.gas_used);

    let inner: Vec<_> = tree.children(1).collect();
    assert_eq!(inner.len(), 1);
    assert_eq!(inner[0].call_type, CallType::Call);
    assert_eq!(inner[0].caller_context, 2);
    assert_eq!(inner[0].gas, 20_000);
    assert_eq!(inner[0].gas_used, 0);
    assert_eq!(delegate.subcalls_gas_used, 0);
    assert_eq!(delegate.gas_used, 50_000 - 18_297);

    let depths: Vec<_> = trace.execution_trace().iter().map(|s| s.depth).collect();
    assert_eq!(depths, [1, 1, 2, 2, 3, 2, 1]);
    Ok(())
}

#[test]
fn reentered_contexts_take_the_call_type_of_their_opener() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    for opener in [0xfa, 0xf1] {
        rom.process_tx(call(100_000))?;
        rom.run(&[(opener, 100)])?;
        // Both transactions enter context 2.
        rom.at(2, 2, 50_000).run(&[(0x00, 0)])?;
        rom.at(1, 1, 99_900).run(&[(0x00, 0)])?;
        rom.finish_tx(99_900)?;
    }
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    let call_types: Vec<_> = trace
        .responses()
        .iter()
        .map(|response| response.call_trace.nodes()[1].call_type)
        .collect();
    assert_eq!(call_types, [CallType::Staticcall, CallType::Call]);
    Ok(())
}

#[test]
fn unpriced_steps_are_backfilled_and_reconciled() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(30_000))?;

    rom.at(1, 1, 9_000).opcode(0x60, None)?;
    rom.at(1, 1, 8_997).opcode(0x60, None)?;
    rom.at(1, 1, 8_994).opcode(0x01, None)?;
    rom.finish_tx(8_991)?;
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    let costs: Vec<_> = trace
        .execution_trace()
        .iter()
        .map(|step| step.gas_cost)
        .collect();
    assert_eq!(costs, [3, 3, 3]);
    // The intrinsic cost never shows up as a step, the response is
    // authoritative.
    assert_eq!(trace.responses()[0].gas_used, 21_009);
    assert_eq!(trace.cumulative_gas_used(), 21_009);
    Ok(())
}

#[test]
fn malformed_commands_are_rejected() {
    let mut rom = Rom::new();
    rom.start_batch().unwrap();

    let unknown = RomCommand {
        event: "onSelfDestruct".into(),
        ..Default::default()
    };
    assert_eq!(
        rom.send(unknown),
        Err(TracerError::Malformed(MalformedEvent::UnknownEvent(
            "onSelfDestruct".into()
        )))
    );

    assert_eq!(
        rom.send(RomCommand::new(EventKind::ProcessTx)),
        Err(MalformedEvent::MissingField {
            event: "onProcessTx",
            field: "tx"
        }
        .into())
    );

    let mut address = limbs::address_to_limbs(CONTRACT);
    address[3] = F::from_canonical_u64(1 << 40);
    assert_eq!(
        rom.send(RomCommand {
            address: Some(address),
            ..update_storage(1, 1, 0)
        }),
        Err(MalformedEvent::LimbOutOfRange {
            index: 3,
            value: 1 << 40
        }
        .into())
    );

    let wide = limbs::u256_to_limbs(U256::one() << 200);
    assert!(matches!(
        rom.send(RomCommand {
            address: Some(wide),
            ..store_log(0, 0)
        }),
        Err(TracerError::Malformed(MalformedEvent::AddressOverflow(_)))
    ));

    let mut bad_key = touch(SENDER, SmtKeyType::Balance, Access::Read, 0);
    bad_key.key = Some(limbs::u256_to_limbs(U256::from(0x205)));
    assert!(matches!(
        rom.send(bad_key),
        Err(TracerError::Malformed(MalformedEvent::UnknownKeyType(_)))
    ));

    // No step was recorded for the rejected commands.
    assert_eq!(rom.tracer.steps().execution_trace().len(), 0);
    assert_eq!(rom.tracer.phase(), TracerPhase::BatchStarted);
}

#[test]
fn finishing_a_batch_requires_roots() {
    let mut rom = Rom::new();
    rom.start_batch().unwrap();
    assert_eq!(
        rom.send(RomCommand::new(EventKind::FinishBatch)),
        Err(MalformedEvent::MissingField {
            event: "onFinishBatch",
            field: "roots"
        }
        .into())
    );
}

#[test]
fn snapshots_leave_the_pending_fault_out() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(50_000))?;
    rom.run(&[(0x60, 3)])?;
    rom.send(fault("execution reverted"))?;

    let snapshot = rom.tracer.snapshot();
    assert_eq!(snapshot.phase(), TracerPhase::TxStarted);

    rom.run(&[(0x60, 3), (0x60, 3)])?;
    rom.send(update_storage(1, 1, 0))?;
    rom.tracer.restore(snapshot);

    assert!(rom.tracer.last_fault().is_none());
    assert_eq!(rom.tracer.steps().execution_trace().len(), 1);
    assert!(rom.tracer.delta_storage().is_empty());
    // The step tag is part of the trace, and survives.
    assert_eq!(
        rom.tracer.steps().execution_trace()[0].error.as_deref(),
        Some("execution reverted")
    );

    rom.finish_tx(29_000)?;
    rom.finish_batch()?;
    let trace = rom.tracer.final_trace()?;
    assert!(trace.responses()[0].success);
    assert_eq!(trace.responses()[0].opcode_count(), 1);
    Ok(())
}

#[test]
fn trace_is_gated_until_the_batch_finishes() -> Result<()> {
    let mut rom = Rom::new();
    assert_eq!(
        rom.tracer.final_trace().err(),
        Some(TracerError::BatchNotFinished("Uninitialized"))
    );

    rom.start_batch()?;
    rom.process_tx(call(50_000))?;
    assert_eq!(
        rom.tracer.final_trace().err(),
        Some(TracerError::BatchNotFinished("TxStarted"))
    );

    rom.finish_tx(50_000)?;
    rom.finish_batch()?;
    assert!(rom.tracer.final_trace().is_ok());

    // A new batch starts from scratch.
    rom.start_batch()?;
    assert!(rom.tracer.final_trace().is_err());
    assert!(rom.tracer.steps().execution_trace().is_empty());
    Ok(())
}

#[test]
fn deployments_report_the_created_address() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(TxContext {
        from: SENDER,
        gas_limit: 100_000,
        input: hex!("6080604052").to_vec(),
        ..Default::default()
    })?;
    rom.run(&[(0x60, 3), (0x60, 3), (0x52, 12), (0xf3, 0)])?;

    let created = Address::from(hex!("5fbdb2315678afecb367f032d93f642f64180aa3"));
    rom.ctx.gas_remaining = 40_000;
    rom.send(RomCommand {
        created_address: Some(created),
        return_data: vec![0xfe],
        state_root: Some(H256::repeat_byte(3)),
        ..RomCommand::new(EventKind::FinishTx)
    })?;
    rom.finish_batch()?;

    let trace = rom.tracer.final_trace()?;
    let response = &trace.responses()[0];
    assert_eq!(response.created_address, Some(created));
    assert_eq!(response.return_data, [0xfe]);
    assert_eq!(response.state_root, Some(H256::repeat_byte(3)));
    assert_eq!(response.context.input, hex!("6080604052"));
    assert_eq!(
        response.call_trace.root().map(|root| root.call_type),
        Some(CallType::Create)
    );
    Ok(())
}

#[test]
fn final_trace_serializes_to_json() -> Result<()> {
    let mut rom = Rom::new();
    rom.start_batch()?;
    rom.process_tx(call(50_000))?;
    rom.send(touch(SENDER, SmtKeyType::Balance, Access::Write, 7))?;
    rom.finish_tx(29_000)?;
    rom.finish_batch()?;

    let json = serde_json::to_value(rom.tracer.final_trace()?)?;
    assert_eq!(json["cumulative_gas_used"], 21_000);
    assert_eq!(json["responses"][0]["tx"]["to"], "0xcccccccccccccccccccccccccccccccccccccccc");
    assert_eq!(json["responses"][0]["success"], true);
    assert_eq!(json["execution_trace"][0]["opcode"], "BALANCE");
    assert_eq!(
        json["read_write_addresses"]["0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"]["written"],
        true
    );
    Ok(())
}

#[test]
fn timing_metrics_count_events() -> Result<()> {
    init_logger();
    let mut rom = Rom {
        tracer: FullTracer::with_metrics(TracerConfig::default(), TimeMetrics::default()),
        ctx: ContextSnapshot::default(),
    };
    rom.start_batch()?;
    rom.process_tx(call(50_000))?;
    rom.run(&[(0x60, 3), (0x60, 3), (0x00, 0)])?;
    rom.finish_tx(29_000)?;
    rom.finish_batch()?;

    let metrics = rom.tracer.metrics();
    assert_eq!(metrics.get(EventKind::Opcode).map(|m| m.count), Some(3));
    assert_eq!(metrics.get(EventKind::StartBatch).map(|m| m.count), Some(1));
    assert_eq!(metrics.get(EventKind::Fault), None);
    Ok(())
}
