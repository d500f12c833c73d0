//! Net storage changes of the transaction being traced.

use std::collections::BTreeMap;

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Value of a slot when the transaction first wrote it, and after its last
/// write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageDelta {
    pub baseline: U256,
    pub current: U256,
}

impl StorageDelta {
    /// Returns `true` if the writes left the slot as it was.
    pub fn is_noop(&self) -> bool {
        self.baseline == self.current
    }
}

/// A [`StorageDelta`] along with the slot it applies to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StorageChange {
    pub address: Address,
    pub slot: H256,
    pub baseline: U256,
    pub current: U256,
}

/// Storage writes of one transaction, coalesced per `(address, slot)`.
#[derive(Clone, Debug, Default)]
pub struct DeltaStorage {
    deltas: BTreeMap<(Address, H256), StorageDelta>,
}

impl DeltaStorage {
    /// Record a write of `value` to `slot`. `previous` is the value the slot
    /// held at transaction start; it is only used for the first write of the
    /// slot, later writes only replace the current value.
    pub fn record(&mut self, address: Address, slot: H256, value: U256, previous: U256) {
        self.deltas
            .entry((address, slot))
            .and_modify(|delta| delta.current = value)
            .or_insert(StorageDelta {
                baseline: previous,
                current: value,
            });
    }

    pub fn get(&self, address: Address, slot: H256) -> Option<&StorageDelta> {
        self.deltas.get(&(address, slot))
    }

    /// Returns the changes ordered by address then slot, optionally leaving
    /// out the slots that ended up unchanged.
    pub fn changes(&self, skip_noop: bool) -> Vec<StorageChange> {
        self.deltas
            .iter()
            .filter(|(_, delta)| !(skip_noop && delta.is_noop()))
            .map(|(&(address, slot), delta)| StorageChange {
                address,
                slot,
                baseline: delta.baseline,
                current: delta.current,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.deltas.clear();
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}
