//! # Key Manager Configuration
//!
//! Slot configurations are static and borrowed for the lifetime of the
//! engine. Each slot names its issuer; a slot naming itself is a root.

use crate::hal::{BlockId, ElementConfig, JobId, KeySlotId, ProcessingMode};
use crate::rules::ElementRule;
use crate::CertId;

/// Where a certificate's raw bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    /// RAM only, lost on reset
    #[default]
    Volatile,
    /// Mirrored to a durable storage block and reloaded at start-up
    Persistent {
        /// Storage block holding the certificate
        block: BlockId,
    },
}

impl StorageClass {
    /// Storage block, if persistent
    pub const fn block(self) -> Option<BlockId> {
        match self {
            Self::Volatile => None,
            Self::Persistent { block } => Some(block),
        }
    }
}

/// Configuration of one certificate slot
#[derive(Debug, Clone, Copy)]
pub struct CertificateConfig<'a> {
    /// Name used by service requests
    pub name: &'a str,
    /// Maximum certificate length in bytes
    pub max_len: usize,
    /// Slot of the certificate that signs this one
    pub issuer: CertId,
    /// Signature service key slot receiving this certificate's public key
    pub key_slot: KeySlotId,
    /// Job verifying certificates issued by this one
    pub job: JobId,
    /// Processing mode of `job`
    pub mode: ProcessingMode,
    /// Storage class of the raw bytes
    pub storage: StorageClass,
    /// Rules evaluated after a successful parse
    pub rules: &'a [&'a dyn ElementRule],
    /// Additional elements extracted by the parser
    pub elements: &'a [ElementConfig],
}

impl<'a> CertificateConfig<'a> {
    /// Default maximum certificate length
    pub const DEFAULT_MAX_LEN: usize = 1024;

    /// Create a volatile, synchronous slot without rules or extra elements
    pub const fn new(name: &'a str, issuer: CertId, key_slot: KeySlotId, job: JobId) -> Self {
        Self {
            name,
            max_len: Self::DEFAULT_MAX_LEN,
            issuer,
            key_slot,
            job,
            mode: ProcessingMode::Sync,
            storage: StorageClass::Volatile,
            rules: &[],
            elements: &[],
        }
    }

    /// Set the maximum certificate length
    pub const fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Set the processing mode of the verification job
    pub const fn mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Mirror the slot into a storage block
    pub const fn persistent(mut self, block: BlockId) -> Self {
        self.storage = StorageClass::Persistent { block };
        self
    }

    /// Set the element rules
    pub const fn rules(mut self, rules: &'a [&'a dyn ElementRule]) -> Self {
        self.rules = rules;
        self
    }

    /// Set the configured elements
    pub const fn elements(mut self, elements: &'a [ElementConfig]) -> Self {
        self.elements = elements;
        self
    }

    /// Whether `id` names a root slot with this configuration
    pub const fn is_root(&self, id: CertId) -> bool {
        self.issuer.0 == id.0
    }
}

/// Engine-wide behavior switches
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parse installed certificates while no workflow is running
    pub preparse: bool,
    /// Persist the target of a failed service request anyway
    pub persist_on_failure: bool,
    /// Upper bound on scheduler states executed per tick
    pub max_steps_per_tick: usize,
}

impl EngineConfig {
    /// Default step bound per tick
    pub const DEFAULT_MAX_STEPS: usize = 64;

    /// Create default configuration
    pub const fn new() -> Self {
        Self {
            preparse: true,
            persist_on_failure: true,
            max_steps_per_tick: Self::DEFAULT_MAX_STEPS,
        }
    }

    /// Configuration that only does work when asked: no pre-parse,
    /// no persistence of failed service requests
    pub const fn on_demand() -> Self {
        Self {
            preparse: false,
            persist_on_failure: false,
            ..Self::new()
        }
    }

    /// Execute at most one scheduler state per tick
    pub const fn single_step() -> Self {
        Self {
            max_steps_per_tick: 1,
            ..Self::new()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
