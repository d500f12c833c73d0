//! Deduplicated set of the addresses touched during the batch.

use std::collections::BTreeMap;

use ethereum_types::U256;
use serde::Serialize;

use crate::error::MalformedEvent;
use crate::limbs::{self, Limbs, SmtKeyType};

/// What the batch did with an address.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InfoReadWrite {
    /// The address was observed. Always `true` for entries of the set.
    pub read: bool,
    /// At least one observation was a write.
    pub written: bool,
    /// Value of the first observation, then of the last write.
    pub value: U256,
    /// Last known balance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    /// Last known nonce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
}

/// Read/write address set, keyed by canonical address string.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReadWriteAddresses(BTreeMap<String, InfoReadWrite>);

impl ReadWriteAddresses {
    /// Record an observation of the state leaf designated by `address` and
    /// `key_type`, holding `value`.
    ///
    /// The first observation of an address inserts it as read. Writes mark it
    /// as written and replace the stored value; reads of a known address leave
    /// it untouched.
    pub fn add(
        &mut self,
        address: &Limbs,
        key_type: &Limbs,
        value: U256,
    ) -> Result<(), MalformedEvent> {
        let address = limbs::canonical_address(&limbs::limbs_to_address(address)?);
        let key_type = limbs::limbs_to_key_type(key_type)?;

        let info = self.0.entry(address).or_insert_with(|| InfoReadWrite {
            read: true,
            value,
            ..Default::default()
        });

        let known = match key_type.kind {
            SmtKeyType::Balance => Some(&mut info.balance),
            SmtKeyType::Nonce => Some(&mut info.nonce),
            _ => None,
        };

        if key_type.is_write() {
            info.written = true;
            info.value = value;
            if let Some(known) = known {
                *known = Some(value);
            }
        } else if let Some(known) = known {
            known.get_or_insert(value);
        }

        Ok(())
    }

    /// Returns the entry of a canonical address.
    pub fn get(&self, address: &str) -> Option<&InfoReadWrite> {
        self.0.get(address)
    }

    /// Iterates over the set in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &InfoReadWrite)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
