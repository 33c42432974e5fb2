//! # Error Types

use core::fmt;

use crate::CertId;

/// Result type for key manager operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors returned by the key manager API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    /// Engine is not initialized
    NotInitialized,
    /// Unknown slot, element or request kind
    ParamMismatch,
    /// Data does not fit the slot or the caller buffer
    SizeMismatch,
    /// Slot holds no certificate
    Empty,
    /// Certificate is not in a parsed state
    Invalid,
    /// Element is absent from the certificate
    NotFound,
    /// A verification workflow is running
    Busy,
    /// A certificate of the chain is malformed
    ChainInvalid,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "key manager not initialized"),
            Self::ParamMismatch => write!(f, "parameter mismatch"),
            Self::SizeMismatch => write!(f, "size mismatch"),
            Self::Empty => write!(f, "certificate slot empty"),
            Self::Invalid => write!(f, "certificate not parsed"),
            Self::NotFound => write!(f, "element not found"),
            Self::Busy => write!(f, "verification in progress"),
            Self::ChainInvalid => write!(f, "certificate chain invalid"),
        }
    }
}

/// Static configuration rejected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Number of slot configurations differs from the slot count
    SlotCount {
        /// Slots the engine was built for
        expected: usize,
        /// Configurations supplied
        found: usize,
    },
    /// Issuer id outside the slot table
    IssuerOutOfRange(CertId),
    /// Issuer chain longer than the chain stack, or cyclic
    ChainTooDeep(CertId),
    /// `max_len` exceeds the slot capacity
    CapacityExceeded(CertId),
    /// Too many configured elements or iterations
    ElementLayout(CertId),
    /// Two persistent slots share a storage block
    DuplicateBlock(CertId),
    /// Two slots share a name
    DuplicateName(CertId),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotCount { expected, found } => {
                write!(f, "expected {} slot configurations, found {}", expected, found)
            }
            Self::IssuerOutOfRange(id) => write!(f, "{}: issuer out of range", id),
            Self::ChainTooDeep(id) => write!(f, "{}: issuer chain too deep or cyclic", id),
            Self::CapacityExceeded(id) => write!(f, "{}: max_len exceeds slot capacity", id),
            Self::ElementLayout(id) => write!(f, "{}: unsupported element layout", id),
            Self::DuplicateBlock(id) => write!(f, "{}: storage block already in use", id),
            Self::DuplicateName(id) => write!(f, "{}: name already in use", id),
        }
    }
}
