//! Domain errors

use thiserror::Error;

/// Identifier parse / validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("Malformed {kind} identifier '{value}'")]
    Malformed { kind: &'static str, value: String },

    #[error("Invalid country code '{value}' in {kind} identifier")]
    InvalidCountry { kind: &'static str, value: String },

    #[error("Empty suffix in {kind} identifier")]
    EmptySuffix { kind: &'static str },

    #[error("Invalid character '{character}' in {kind} identifier")]
    InvalidCharacter { kind: &'static str, character: char },
}

/// Structural failures of registry mutations.
///
/// These are reported inside a [`CommandResult`](super::CommandResult),
/// never raised, so batch callers can keep processing siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Vetoed: {kind} '{id}' was rejected by a subscriber")]
    VetoRejected { kind: &'static str, id: String },

    #[error("{kind} '{id}' was modified concurrently")]
    ConcurrentModification { kind: &'static str, id: String },
}

/// Failures reported by a remote delegate or the roaming network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Remote endpoint rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}
