//! # Service Workflow Types
//!
//! A service request installs a certificate, verifies its chain and, for
//! persistent slots, writes it to storage, reporting one [`ServiceOutcome`].

use core::fmt;

use crate::CertStatus;

/// Kind of service request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Install a root into an empty root slot
    SetRoot,
    /// Install an intermediate or leaf into an empty slot
    SetIntermediate,
    /// Replace the certificate of an occupied root slot
    UpdateRoot,
    /// Replace the certificate of an occupied non-root slot
    UpdateIntermediate,
}

impl ServiceKind {
    /// Whether the request targets a root slot
    pub const fn targets_root(self) -> bool {
        matches!(self, Self::SetRoot | Self::UpdateRoot)
    }

    /// Whether the request replaces existing content
    pub const fn is_update(self) -> bool {
        matches!(self, Self::UpdateRoot | Self::UpdateIntermediate)
    }

    /// Whether the request applies to a slot with the given role and status
    pub fn permits(self, is_root: bool, status: CertStatus) -> bool {
        let occupied = status != CertStatus::NotAvailable;
        self.targets_root() == is_root && self.is_update() == occupied
    }
}

/// Terminal result of a service request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Chain verified and, if persistent, stored
    Ok,
    /// The requested certificate itself failed
    CertInvalid,
    /// A certificate further up the chain failed
    ChainInvalid,
    /// Storage write failed
    WriteFail,
}

impl fmt::Display for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::CertInvalid => write!(f, "certificate invalid"),
            Self::ChainInvalid => write!(f, "chain invalid"),
            Self::WriteFail => write!(f, "write failed"),
        }
    }
}
