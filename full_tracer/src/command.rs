//! Commands emitted by the interpreter, and their typed counterpart.

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::MalformedEvent;
use crate::limbs::{self, Limbs};
use crate::logs::LogEntry;
use crate::serde_hex;
use crate::trace::{TxContext, TxOutcome};

/// Tag of a tracer event.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    Ord,
    PartialEq,
    PartialOrd,
)]
pub enum EventKind {
    #[strum(serialize = "onStartBatch")]
    StartBatch,
    #[strum(serialize = "onFinishBatch")]
    FinishBatch,
    #[strum(serialize = "onProcessTx")]
    ProcessTx,
    #[strum(serialize = "onFinishTx")]
    FinishTx,
    #[strum(serialize = "onOpcode")]
    Opcode,
    #[strum(serialize = "onUpdateStorage")]
    UpdateStorage,
    #[strum(serialize = "onStoreLog")]
    StoreLog,
    #[strum(serialize = "onError")]
    Fault,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A raw command as emitted by the interpreter: a tag plus whichever payload
/// fields the event carries.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RomCommand {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_cost: Option<u64>,
    /// Address limbs, see [`crate::limbs`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Limbs>,
    /// Key limbs: the key type for `onOpcode`, the slot for
    /// `onUpdateStorage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Limbs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<H256>,
    #[serde(with = "serde_hex")]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_address: Option<Address>,
    #[serde(with = "serde_hex")]
    pub return_data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_root: Option<H256>,
}

impl RomCommand {
    /// Creates a command with the tag of `kind` and no payload.
    pub fn new(kind: EventKind) -> Self {
        Self {
            event: kind.to_string(),
            ..Default::default()
        }
    }
}

/// A decoded command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    StartBatch,
    FinishBatch,
    ProcessTx(TxContext),
    FinishTx(TxOutcome),
    Opcode {
        op: u8,
        /// Cost of the step, when the interpreter knows it up front.
        gas_cost: Option<u64>,
        /// State leaf the step touched, if any: address, key type and value.
        access: Option<(Limbs, Limbs, U256)>,
    },
    UpdateStorage {
        address: Address,
        slot: H256,
        value: U256,
        previous: U256,
    },
    StoreLog {
        /// Defaults to the transaction being traced.
        tx_index: Option<u64>,
        log_index: u64,
        entry: LogEntry,
    },
    Fault {
        message: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StartBatch => EventKind::StartBatch,
            Event::FinishBatch => EventKind::FinishBatch,
            Event::ProcessTx(_) => EventKind::ProcessTx,
            Event::FinishTx(_) => EventKind::FinishTx,
            Event::Opcode { .. } => EventKind::Opcode,
            Event::UpdateStorage { .. } => EventKind::UpdateStorage,
            Event::StoreLog { .. } => EventKind::StoreLog,
            Event::Fault { .. } => EventKind::Fault,
        }
    }
}

fn require<T>(kind: EventKind, field: &'static str, value: Option<T>) -> Result<T, MalformedEvent> {
    value.ok_or_else(|| missing(kind, field))
}

impl TryFrom<&RomCommand> for Event {
    type Error = MalformedEvent;

    fn try_from(cmd: &RomCommand) -> Result<Self, Self::Error> {
        let kind: EventKind = cmd
            .event
            .parse()
            .map_err(|_| MalformedEvent::UnknownEvent(cmd.event.clone()))?;

        Ok(match kind {
            EventKind::StartBatch => Event::StartBatch,
            EventKind::FinishBatch => Event::FinishBatch,
            EventKind::ProcessTx => Event::ProcessTx(require(kind, "tx", cmd.tx.clone())?),
            EventKind::FinishTx => Event::FinishTx(TxOutcome {
                created_address: cmd.created_address,
                return_data: cmd.return_data.clone(),
                state_root: cmd.state_root,
            }),
            EventKind::Opcode => {
                // A step touching state carries the three of them.
                let access = match (cmd.address, cmd.key) {
                    (Some(address), Some(key)) => {
                        Some((address, key, require(kind, "value", cmd.value)?))
                    }
                    (None, None) => None,
                    (Some(_), None) => return Err(missing(kind, "key")),
                    (None, Some(_)) => return Err(missing(kind, "address")),
                };
                Event::Opcode {
                    op: require(kind, "op", cmd.op)?,
                    gas_cost: cmd.gas_cost,
                    access,
                }
            }
            EventKind::UpdateStorage => Event::UpdateStorage {
                address: limbs::limbs_to_address(&require(kind, "address", cmd.address)?)?,
                slot: limbs::limbs_to_slot(&require(kind, "key", cmd.key)?)?,
                value: require(kind, "value", cmd.value)?,
                previous: require(kind, "previous", cmd.previous)?,
            },
            EventKind::StoreLog => Event::StoreLog {
                tx_index: cmd.tx_index,
                log_index: require(kind, "log_index", cmd.log_index)?,
                entry: LogEntry {
                    address: limbs::limbs_to_address(&require(kind, "address", cmd.address)?)?,
                    topics: cmd.topics.clone(),
                    data: cmd.data.clone(),
                    index: 0,
                },
            },
            EventKind::Fault => Event::Fault {
                message: require(kind, "message", cmd.message.clone())?,
            },
        })
    }
}

fn missing(kind: EventKind, field: &'static str) -> MalformedEvent {
    MalformedEvent::MissingField {
        event: kind.as_str(),
        field,
    }
}
