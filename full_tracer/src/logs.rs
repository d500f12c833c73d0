//! Logs emitted by the batch, per transaction and per index.

use std::collections::BTreeMap;

use ethereum_types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::serde_hex;

/// A log emitted by `LOG0`..`LOG4`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "serde_hex")]
    pub data: Vec<u8>,
    /// Position of the log within its transaction.
    pub index: u64,
}

/// Logs keyed by transaction index then log index.
#[derive(Clone, Debug, Default)]
pub struct LogRecorder {
    logs: BTreeMap<u64, BTreeMap<u64, LogEntry>>,
}

impl LogRecorder {
    /// Store a log. The interpreter never reuses a `(tx_index, log_index)`
    /// pair; if it does anyway, the later log wins.
    pub fn store(&mut self, tx_index: u64, log_index: u64, mut entry: LogEntry) {
        entry.index = log_index;
        if let Some(previous) = self
            .logs
            .entry(tx_index)
            .or_default()
            .insert(log_index, entry)
        {
            log::warn!(
                "Log {} of transaction {} stored twice, dropping {:?}",
                log_index,
                tx_index,
                previous
            );
        }
    }

    /// Returns the logs of a transaction, ordered by log index.
    pub fn tx_logs(&self, tx_index: u64) -> impl Iterator<Item = &LogEntry> {
        self.logs.get(&tx_index).into_iter().flat_map(|logs| logs.values())
    }
}
