//! # TrustKeep HAL - Collaborator Abstraction Layer
//!
//! This crate defines the contracts the key manager core consumes but does
//! not implement itself:
//!
//! - [`parser::CertificateParser`]: turns raw certificate bytes into element spans
//! - [`crypto::SignatureService`]: key installation and signature verification,
//!   synchronous or asynchronous
//! - [`storage::BlockStore`]: durable block read/write with polled completion
//!
//! The `soft` feature provides software implementations of the crypto and
//! storage contracts for hosted targets and tests.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod crypto;
pub mod parser;
pub mod storage;

#[cfg(feature = "soft")]
pub mod soft;

use core::fmt;

pub use crypto::{
    CompletionSignal, JobId, KeySlotId, ProcessingMode, SignatureService, VerifyOutcome,
    VerifyStatus,
};
pub use parser::{
    CertificateParser, ElementConfig, ParseOutcome, ParsedElements, Span, StructureKind,
};
pub use storage::{BlockId, BlockStore, WriteStatus};

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors reported by collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Invalid parameter provided
    InvalidParameter,
    /// Key or block slot is outside the collaborator's range
    SlotOutOfRange,
    /// No key material was installed in the slot
    KeyNotInstalled,
    /// Key material is installed but not activated
    KeyNotValid,
    /// Caller buffer too small for the stored data
    BufferTooSmall,
    /// Element has more occurrences than configured
    TooManyOccurrences,
    /// Collaborator is processing another request
    Busy,
    /// Hardware or driver reported an error
    HardwareError,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::SlotOutOfRange => write!(f, "slot out of range"),
            Self::KeyNotInstalled => write!(f, "key not installed"),
            Self::KeyNotValid => write!(f, "key not activated"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::TooManyOccurrences => write!(f, "too many element occurrences"),
            Self::Busy => write!(f, "collaborator busy"),
            Self::HardwareError => write!(f, "hardware error"),
        }
    }
}
