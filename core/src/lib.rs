//! # TrustKeep Core - Certificate Store and Chain-of-Trust Verification
//!
//! This crate stores certificates in fixed-size slots, builds the issuer
//! chain from a certificate up to its self-signed root, and verifies every
//! link through an injected signature service.
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------+
//! |                       KeyManager                          |
//! |   install / verify / service / read / tick / callbacks    |
//! +-------------------------------+--------------------------+
//! |  VerificationScheduler        |  ServiceWorkflow         |
//! |  (10-state machine)           |  (install+verify+persist)|
//! +---------------+---------------+--------------------------+
//! |  ChainStack   |  CertificateTable  ->  Key buffers        |
//! +---------------+-------------------------------------------+
//! |  trustkeep-hal: CertificateParser, SignatureService,      |
//! |                 BlockStore, CompletionSignal              |
//! +----------------------------------------------------------+
//! ```
//!
//! Nothing here allocates. Capacities are const generics:
//! `SLOTS` certificates of at most `CAP` bytes, chains of at most `DEPTH`
//! certificates.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod key;
pub mod manager;
pub mod rules;
pub mod scheduler;
pub mod service;
pub mod stack;
pub mod table;

#[cfg(test)]
mod testing;


use core::fmt;

pub use config::{CertificateConfig, EngineConfig, StorageClass};
pub use error::{ConfigError, KeyError, KeyResult};
pub use manager::{ElementCursor, EngineState, KeyManager, ServiceCallback, VerifyCallback};
pub use scheduler::{Completion, Step, VerificationScheduler};
pub use rules::{ElementRule, LengthRange, RequirePresent, RequireValue};
pub use service::{ServiceKind, ServiceOutcome};

pub use trustkeep_hal as hal;

// =============================================================================
// Identifiers and Status
// =============================================================================

/// Certificate slot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CertId(pub u16);

impl CertId {
    /// Slot as an array index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cert#{}", self.0)
    }
}

/// Certificate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertStatus {
    /// Slot holds no certificate
    #[default]
    NotAvailable,
    /// Certificate installed, not parsed yet
    NotParsed,
    /// Parsed successfully, chain not verified
    ParsedNotValidated,
    /// Signature chain verified up to the root
    Valid,
    /// Encoding is malformed
    InvalidFormat,
    /// Element values or element rules rejected the certificate
    InvalidContent,
    /// Certificate type not supported
    InvalidType,
    /// Signature check against the issuer key failed
    SignatureFailed,
    /// A certificate further up the chain is not trustworthy
    InvalidChainOfTrust,
}

impl CertStatus {
    /// Parse rejected the certificate
    pub const fn is_malformed(self) -> bool {
        matches!(self, Self::InvalidFormat | Self::InvalidContent | Self::InvalidType)
    }

    /// Element references are available
    pub const fn has_elements(self) -> bool {
        matches!(self, Self::Valid | Self::ParsedNotValidated)
    }
}

/// Element of a certificate that can be read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementId {
    /// Issuer name
    Issuer,
    /// Subject name
    Subject,
    /// Signature value
    SignatureValue,
    /// Subject public key
    PublicKey,
    /// Signed region
    TbsCertificate,
    /// Element `n` of the slot's configured element list
    Configured(u16),
}

impl ElementId {
    /// First occurrence of this element in a parse result
    pub fn locate(self, elements: &hal::ParsedElements) -> Option<hal::Span> {
        match self {
            Self::Issuer => elements.issuer,
            Self::Subject => elements.subject,
            Self::SignatureValue => elements.signature,
            Self::PublicKey => elements.public_key,
            Self::TbsCertificate => elements.tbs,
            Self::Configured(n) => elements.occurrences(n as usize).first().copied(),
        }
    }
}

static_assertions::assert_impl_all!(CertId: Send, Sync, Copy);
static_assertions::assert_impl_all!(CertStatus: Send, Sync, Copy);
