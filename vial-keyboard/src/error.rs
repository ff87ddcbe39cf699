//! Keyboard interface error types

use thiserror::Error;
use vial_transport::TransportError;

use crate::kbinfo::Feature;

/// Errors from turning user input or wire bytes into feature records.
///
/// Every variant names the token that caused the failure; a parse that
/// hits one of these applies nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid key: \"{0}\"")]
    InvalidKey(String),

    #[error("invalid token: \"{0}\"")]
    InvalidToken(String),

    #[error("invalid delay: \"{0}\"")]
    InvalidDelay(String),

    #[error("duplicate token: \"{0}\"")]
    DuplicateToken(String),

    #[error("too many trigger keys in \"{0}\" (at most 4)")]
    TooManyTriggers(String),

    #[error("no trigger keys in \"{0}\"")]
    NoTriggers(String),

    #[error("definition needs at least one of TAP, HOLD, DOUBLE, TAPHOLD: \"{0}\"")]
    MissingKeyAction(String),

    #[error("text cannot be sent by a macro: \"{0}\"")]
    UnencodableText(String),

    #[error("{0} needs a newer Vial protocol to be used in a macro")]
    UnencodableKey(String),

    #[error("macros need {needed} bytes but the keyboard only has {capacity}")]
    MacroBufferOverflow { needed: usize, capacity: usize },

    #[error("empty definition")]
    Empty,

    #[error("keyboard definition: {0}")]
    Definition(String),
}

/// Errors from keyboard operations
#[derive(Error, Debug)]
pub enum KeyboardError {
    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed input or wire data
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Feature not supported by this firmware
    #[error("{0} support is not available in this keyboard's firmware")]
    NotSupported(Feature),

    /// Feature data was never fetched for this invocation
    #[error("{0} data must be loaded before it can be used")]
    NotLoaded(Feature),

    /// Slot id beyond the device-declared capacity
    #[error("{feature} {id} is out of range (valid ids: 0-{})", .capacity.saturating_sub(1))]
    OutOfRange {
        feature: Feature,
        id: usize,
        capacity: usize,
    },

    /// Addressable slot that holds nothing
    #[error("{feature} {id} not found (slot is empty)")]
    NotFound { feature: Feature, id: usize },

    /// Every slot is in use
    #[error("no free {feature} slot ({used} of {capacity} in use)")]
    NoFreeSlot {
        feature: Feature,
        capacity: usize,
        used: usize,
    },

    /// Device returned unexpected response
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Firmware answered with the "unhandled" marker
    #[error("Command 0x{0:02X} rejected by firmware")]
    Unhandled(u8),

    /// Vial security lock is engaged
    #[error("Keyboard is locked; run `unlock` first")]
    Locked,
}
