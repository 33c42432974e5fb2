//! # Software Collaborators
//!
//! Software implementations of the crypto and storage contracts, used on
//! hosted targets and by the test suites.
//!
//! NOTE: [`SoftSignatureService`] binds job `n` to key slot `n`.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::crypto::{
    CompletionSignal, JobId, KeySlotId, ProcessingMode, SignatureService, VerifyOutcome,
    VerifyStatus,
};
use crate::storage::{BlockId, BlockStore, WriteStatus};
use crate::{HalError, HalResult};

/// Ed25519 public key length
pub const ED25519_KEY_LEN: usize = 32;

// =============================================================================
// Signature Service
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct KeyEntry {
    key: VerifyingKey,
    active: bool,
}

/// Ed25519 signature service with `KEYS` key slots
#[derive(Debug)]
pub struct SoftSignatureService<const KEYS: usize> {
    keys: [Option<KeyEntry>; KEYS],
    pending: Option<(JobId, VerifyOutcome)>,
    verifications: u32,
}

impl<const KEYS: usize> SoftSignatureService<KEYS> {
    /// Create a service with every key slot empty
    pub const fn new() -> Self {
        Self {
            keys: [None; KEYS],
            pending: None,
            verifications: 0,
        }
    }

    /// Whether a key slot holds an activated key
    pub fn is_active(&self, slot: KeySlotId) -> bool {
        matches!(self.keys.get(slot.index()), Some(Some(KeyEntry { active: true, .. })))
    }

    /// Whether an asynchronous job is waiting to complete
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of signature checks performed
    pub fn verifications(&self) -> u32 {
        self.verifications
    }

    /// Complete the outstanding asynchronous job through `signal`
    ///
    /// Returns `false` when no job was pending.
    pub fn complete_pending(&mut self, signal: &CompletionSignal) -> bool {
        match self.pending.take() {
            Some((job, outcome)) => {
                signal.complete(job, outcome);
                true
            }
            None => false,
        }
    }

    fn check(&self, job: JobId, message: &[u8], signature: &[u8]) -> HalResult<VerifyOutcome> {
        let entry = self
            .keys
            .get(job.index())
            .copied()
            .ok_or(HalError::SlotOutOfRange)?
            .ok_or(HalError::KeyNotInstalled)?;
        if !entry.active {
            return Err(HalError::KeyNotValid);
        }

        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(VerifyOutcome::Mismatch);
        };
        Ok(match entry.key.verify(message, &signature) {
            Ok(()) => VerifyOutcome::Match,
            Err(_) => VerifyOutcome::Mismatch,
        })
    }
}

impl<const KEYS: usize> Default for SoftSignatureService<KEYS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const KEYS: usize> SignatureService for SoftSignatureService<KEYS> {
    fn install_key(&mut self, slot: KeySlotId, key: &[u8]) -> HalResult<()> {
        let entry = self
            .keys
            .get_mut(slot.index())
            .ok_or(HalError::SlotOutOfRange)?;
        let bytes: &[u8; ED25519_KEY_LEN] =
            key.try_into().map_err(|_| HalError::InvalidParameter)?;
        let key = VerifyingKey::from_bytes(bytes).map_err(|_| HalError::InvalidParameter)?;

        *entry = Some(KeyEntry { key, active: false });
        Ok(())
    }

    fn activate_key(&mut self, slot: KeySlotId) -> HalResult<()> {
        match self.keys.get_mut(slot.index()) {
            Some(Some(entry)) => {
                entry.active = true;
                Ok(())
            }
            Some(None) => Err(HalError::KeyNotInstalled),
            None => Err(HalError::SlotOutOfRange),
        }
    }

    fn verify_signature(
        &mut self,
        job: JobId,
        mode: ProcessingMode,
        message: &[u8],
        signature: &[u8],
    ) -> HalResult<VerifyStatus> {
        if self.pending.is_some() {
            return Err(HalError::Busy);
        }

        let outcome = self.check(job, message, signature)?;
        self.verifications += 1;

        match mode {
            ProcessingMode::Sync => Ok(VerifyStatus::Done(outcome)),
            ProcessingMode::Async => {
                self.pending = Some((job, outcome));
                Ok(VerifyStatus::Pending)
            }
        }
    }
}

// =============================================================================
// RAM Block Store
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct InFlight {
    block: BlockId,
    remaining: u32,
    len: usize,
}

/// Volatile block store with `BLOCKS` blocks of `SIZE` bytes
///
/// Writes complete after `latency` polls. Failures can be injected for
/// write requests and for write completion.
#[derive(Debug)]
pub struct RamBlockStore<const BLOCKS: usize, const SIZE: usize> {
    blocks: [[u8; SIZE]; BLOCKS],
    lengths: [usize; BLOCKS],
    staging: [u8; SIZE],
    in_flight: Option<InFlight>,
    last: [Option<WriteStatus>; BLOCKS],
    latency: u32,
    reject_writes: bool,
    fail_writes: bool,
    fail_reads: bool,
    writes: u32,
}

impl<const BLOCKS: usize, const SIZE: usize> RamBlockStore<BLOCKS, SIZE> {
    /// Create an empty store whose writes complete on the first poll
    pub const fn new() -> Self {
        Self {
            blocks: [[0; SIZE]; BLOCKS],
            lengths: [0; BLOCKS],
            staging: [0; SIZE],
            in_flight: None,
            last: [None; BLOCKS],
            latency: 0,
            reject_writes: false,
            fail_writes: false,
            fail_reads: false,
            writes: 0,
        }
    }

    /// Number of `Pending` polls before a write completes
    pub fn set_latency(&mut self, polls: u32) {
        self.latency = polls;
    }

    /// Reject write requests outright
    pub fn set_reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    /// Accept write requests but complete them with `NotOk`
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Fail every read request
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Store block content directly, bypassing the write path
    pub fn preload(&mut self, block: BlockId, data: &[u8]) -> HalResult<()> {
        let i = self.check_block(block)?;
        if data.len() > SIZE {
            return Err(HalError::BufferTooSmall);
        }
        self.blocks[i][..data.len()].copy_from_slice(data);
        self.lengths[i] = data.len();
        Ok(())
    }

    /// Committed content of a block
    pub fn block(&self, block: BlockId) -> Option<&[u8]> {
        let i = block.index();
        self.blocks.get(i).map(|b| &b[..self.lengths[i]])
    }

    /// Number of committed writes
    pub fn writes(&self) -> u32 {
        self.writes
    }

    fn check_block(&self, block: BlockId) -> HalResult<usize> {
        if block.index() < BLOCKS {
            Ok(block.index())
        } else {
            Err(HalError::SlotOutOfRange)
        }
    }
}

impl<const BLOCKS: usize, const SIZE: usize> Default for RamBlockStore<BLOCKS, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BLOCKS: usize, const SIZE: usize> BlockStore for RamBlockStore<BLOCKS, SIZE> {
    fn read_block(&mut self, block: BlockId, buf: &mut [u8]) -> HalResult<usize> {
        let i = self.check_block(block)?;
        if self.fail_reads {
            return Err(HalError::HardwareError);
        }
        let len = self.lengths[i];
        let dst = buf.get_mut(..len).ok_or(HalError::BufferTooSmall)?;
        dst.copy_from_slice(&self.blocks[i][..len]);
        Ok(len)
    }

    fn write_block(&mut self, block: BlockId, data: &[u8]) -> HalResult<()> {
        let i = self.check_block(block)?;
        if self.in_flight.is_some() {
            return Err(HalError::Busy);
        }
        if self.reject_writes {
            return Err(HalError::HardwareError);
        }
        if data.len() > SIZE {
            return Err(HalError::BufferTooSmall);
        }

        self.staging[..data.len()].copy_from_slice(data);
        self.in_flight = Some(InFlight {
            block,
            remaining: self.latency,
            len: data.len(),
        });
        self.last[i] = Some(WriteStatus::Pending);
        Ok(())
    }

    fn poll_status(&mut self, block: BlockId) -> WriteStatus {
        let Some(mut job) = self.in_flight.filter(|j| j.block == block) else {
            return self
                .last
                .get(block.index())
                .copied()
                .flatten()
                .unwrap_or(WriteStatus::NotOk);
        };

        if job.remaining > 0 {
            job.remaining -= 1;
            self.in_flight = Some(job);
            return WriteStatus::Pending;
        }

        self.in_flight = None;
        let i = block.index();
        let status = if self.fail_writes {
            WriteStatus::NotOk
        } else {
            self.blocks[i][..job.len].copy_from_slice(&self.staging[..job.len]);
            self.lengths[i] = job.len;
            self.writes += 1;
            WriteStatus::Ok
        };
        self.last[i] = Some(status);
        status
    }
}
