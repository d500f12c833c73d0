//! Like `#[serde(with = "::hex")]`, but tolerates and emits leading `0x`
//! prefixes.

use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

pub(crate) fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: hex::ToHex,
{
    let s = data.encode_hex::<String>();
    serializer.serialize_str(&format!("0x{}", s))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
where
    T: hex::FromHex,
    T::Error: std::fmt::Display,
{
    let s = String::deserialize(deserializer)?;
    match s.strip_prefix("0x") {
        Some(rest) => T::from_hex(rest),
        None => T::from_hex(&*s),
    }
    .map_err(D::Error::custom)
}

/// Serializer of the parent module, for optional byte strings.
pub(crate) mod opt {
    use serde::Serializer;

    pub(crate) fn serialize<S: Serializer, T>(
        data: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
    {
        match data {
            Some(bytes) => super::serialize(bytes.as_ref(), serializer),
            None => serializer.serialize_none(),
        }
    }
}
