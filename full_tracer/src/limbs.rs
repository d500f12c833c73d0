//! Conversions between the executor's field-element limbs and canonical
//! Ethereum identifiers.
//!
//! Values wider than a field element (addresses, storage slots, 256-bit
//! words) are carried by the executor as 8 Goldilocks elements, each holding
//! 32 bits. Limb `i` holds bits `[32 * i, 32 * i + 32)` of the scalar, so the
//! canonical big-endian byte form is `limb7 || limb6 || ... || limb0`.
//!
//! Decoding is total for well-formed input. A limb whose canonical value does
//! not fit in 32 bits is a [`MalformedEvent::LimbOutOfRange`].

use ethereum_types::{Address, BigEndianHash, H256, U256};
use plonky2::field::goldilocks_field::GoldilocksField;
use plonky2::field::types::{Field, PrimeField64};
use serde::{Deserialize, Serialize};

use crate::error::MalformedEvent;

/// The field the executor works over.
pub type F = GoldilocksField;

/// Number of limbs used to carry a 256-bit scalar.
pub const NUM_LIMBS: usize = 8;

/// Width of a single limb, in bits.
pub const LIMB_BITS: usize = 32;

/// A 256-bit scalar split into [`NUM_LIMBS`] field elements.
pub type Limbs = [F; NUM_LIMBS];

/// Bit of the key type discriminator flagging a write access.
pub const KEY_TYPE_WRITE_FLAG: u64 = 1 << 8;

const ADDRESS_BITS: usize = 160;

/// Pack 8 32-bit limbs in little-endian order into a [`U256`].
pub fn limbs_to_u256(limbs: &Limbs) -> Result<U256, MalformedEvent> {
    limbs
        .iter()
        .enumerate()
        .rev()
        .try_fold(U256::zero(), |acc, (index, limb)| {
            let value = limb.to_canonical_u64();
            if value > u32::MAX as u64 {
                return Err(MalformedEvent::LimbOutOfRange { index, value });
            }
            Ok((acc << LIMB_BITS) | U256::from(value))
        })
}

/// Split a [`U256`] into 8 32-bit limbs in little-endian order.
pub fn u256_to_limbs(x: U256) -> Limbs {
    std::array::from_fn(|i| F::from_canonical_u32((x >> (LIMB_BITS * i)).low_u32()))
}

/// Decode an address. The scalar must fit in 160 bits.
pub fn limbs_to_address(limbs: &Limbs) -> Result<Address, MalformedEvent> {
    let scalar = limbs_to_u256(limbs)?;
    if scalar.bits() > ADDRESS_BITS {
        return Err(MalformedEvent::AddressOverflow(scalar));
    }
    let mut be = [0u8; 32];
    scalar.to_big_endian(&mut be);
    Ok(Address::from_slice(&be[12..]))
}

/// Encode an address with the packing [`limbs_to_address`] expects.
pub fn address_to_limbs(address: Address) -> Limbs {
    u256_to_limbs(U256::from_big_endian(address.as_bytes()))
}

/// Decode a storage slot into its 32-byte big-endian key.
pub fn limbs_to_slot(limbs: &Limbs) -> Result<H256, MalformedEvent> {
    limbs_to_u256(limbs).map(|scalar| H256::from_uint(&scalar))
}

/// Encode a 32-byte storage key.
pub fn slot_to_limbs(slot: H256) -> Limbs {
    u256_to_limbs(slot.into_uint())
}

/// Canonical string identity of an address: `0x` followed by 40 lowercase hex
/// digits.
pub fn canonical_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Leaf types of the state SMT. The values match the executor's key type
/// constants.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SmtKeyType {
    /// Account balance.
    Balance = 0,
    /// Account nonce.
    Nonce = 1,
    /// Contract code hash.
    Code = 2,
    /// Contract storage slot.
    Storage = 3,
    /// Contract code length.
    CodeLength = 4,
}

impl TryFrom<u64> for SmtKeyType {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Balance,
            1 => Self::Nonce,
            2 => Self::Code,
            3 => Self::Storage,
            4 => Self::CodeLength,
            _ => return Err(()),
        })
    }
}

/// Whether a state access reads or writes the leaf.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Access {
    /// The leaf is only read.
    Read,
    /// The leaf is written.
    Write,
}

/// Decoded key type discriminator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct KeyType {
    /// The SMT leaf being accessed.
    pub kind: SmtKeyType,
    /// Read or write.
    pub access: Access,
}

impl KeyType {
    /// Returns `true` for write accesses.
    pub const fn is_write(&self) -> bool {
        matches!(self.access, Access::Write)
    }
}

/// Decode the key type discriminator: the low byte is the [`SmtKeyType`], and
/// [`KEY_TYPE_WRITE_FLAG`] marks a write. Any other bit is rejected.
pub fn limbs_to_key_type(limbs: &Limbs) -> Result<KeyType, MalformedEvent> {
    let scalar = limbs_to_u256(limbs)?;
    let mask = U256::from(0xff | KEY_TYPE_WRITE_FLAG);
    if scalar & !mask != U256::zero() {
        return Err(MalformedEvent::UnknownKeyType(scalar));
    }
    let raw = scalar.low_u64();
    let kind =
        SmtKeyType::try_from(raw & 0xff).map_err(|_| MalformedEvent::UnknownKeyType(scalar))?;
    let access = if raw & KEY_TYPE_WRITE_FLAG != 0 {
        Access::Write
    } else {
        Access::Read
    };
    Ok(KeyType { kind, access })
}

/// Encode a key type discriminator.
pub fn key_type_to_limbs(key_type: KeyType) -> Limbs {
    let mut raw = key_type.kind as u64;
    if key_type.is_write() {
        raw |= KEY_TYPE_WRITE_FLAG;
    }
    u256_to_limbs(U256::from(raw))
}
