//! Error types returned by the tracer.
//!
//! EVM-level failures (out of gas, reverts, invalid opcodes...) are *not*
//! errors from the tracer's point of view: they are recorded through
//! [`FullTracer::on_error`](crate::FullTracer::on_error) and surface in the
//! transaction [`Response`](crate::trace::Response). The types here only
//! describe defects in what the interpreter handed to the tracer.

use ethereum_types::U256;
use thiserror::Error;

/// Stores the result of tracer operations. Returns a [`TracerError`] upon
/// failure.
pub type TracerResult<T> = Result<T, TracerError>;

/// An error type for tracer operations.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TracerError {
    /// The interpreter emitted an event the tracer cannot interpret. Once this
    /// is returned, the rest of the batch trace must not be trusted.
    #[error(transparent)]
    Malformed(#[from] MalformedEvent),

    /// The final trace was requested before `onFinishBatch` was processed.
    #[error("The final trace is only available once the batch has finished (current phase: {0})")]
    BatchNotFinished(&'static str),
}

/// A dispatched event that is missing payload or carries values outside of
/// the encoding the interpreter is supposed to respect.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum MalformedEvent {
    /// The command tag does not name any known event.
    #[error("Unknown tracer event `{0}`")]
    UnknownEvent(String),

    /// A payload field required by the event is absent.
    #[error("Event `{event}` is missing the required field `{field}`")]
    MissingField {
        /// Tag of the offending event.
        event: &'static str,
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field element limb does not fit in the 32-bit limb range.
    #[error("Limb {index} has value {value:#x}, which does not fit in 32 bits")]
    LimbOutOfRange {
        /// Position of the limb, 0 being the least significant one.
        index: usize,
        /// Canonical value of the field element.
        value: u64,
    },

    /// The decoded scalar does not fit in a 160-bit address.
    #[error("Value {0:#x} does not fit in a 160-bit address")]
    AddressOverflow(U256),

    /// The key type discriminator is not one of the known SMT key types.
    #[error("Unknown key type discriminator {0:#x}")]
    UnknownKeyType(U256),
}
