//! # Signature Service Contract
//!
//! Keys are installed into numbered key slots and must be activated before
//! use. Verification is requested per job; a job is bound to one key slot by
//! the service configuration. A job may complete synchronously or report
//! [`VerifyStatus::Pending`] and deliver its outcome later through a
//! [`CompletionSignal`].

use core::sync::atomic::{AtomicU32, Ordering};

use crate::HalResult;

/// Key slot inside the signature service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct KeySlotId(pub u16);

impl KeySlotId {
    /// Slot as an array index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Verification job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct JobId(pub u16);

impl JobId {
    /// Job as an array index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a job is processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Result is returned by the request itself
    #[default]
    Sync,
    /// Result is delivered later through the completion signal
    Async,
}

/// Result of a signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature matches the message and key
    Match,
    /// Signature does not match
    Mismatch,
}

/// Status of an accepted verification request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    /// Job completed during the request
    Done(VerifyOutcome),
    /// Job is running; the outcome arrives through the completion signal
    Pending,
}

/// Signature service
pub trait SignatureService {
    /// Write key material into a key slot; the slot becomes inactive
    fn install_key(&mut self, slot: KeySlotId, key: &[u8]) -> HalResult<()>;

    /// Mark the key in a slot valid for use
    fn activate_key(&mut self, slot: KeySlotId) -> HalResult<()>;

    /// Check `signature` over `message` with the key bound to `job`
    fn verify_signature(
        &mut self,
        job: JobId,
        mode: ProcessingMode,
        message: &[u8],
        signature: &[u8],
    ) -> HalResult<VerifyStatus>;
}

// =============================================================================
// Completion Signal
// =============================================================================

/// One-slot mailbox for asynchronous verification results
///
/// Written from the crypto driver's completion context, which may be an
/// interrupt handler preempting the scheduler on the same core, and read by
/// the verification scheduler. The job and outcome live in one atomic word
/// next to a "signaled" bit, so every operation is a single atomic access
/// and neither side can block the other.
#[derive(Debug)]
pub struct CompletionSignal {
    word: AtomicU32,
}

static_assertions::assert_impl_all!(CompletionSignal: Send, Sync);

const SIGNALED: u32 = 1 << 31;
const MISMATCH: u32 = 1 << 16;
const JOB_MASK: u32 = 0xFFFF;

fn pack(job: JobId, outcome: VerifyOutcome) -> u32 {
    let outcome = match outcome {
        VerifyOutcome::Match => 0,
        VerifyOutcome::Mismatch => MISMATCH,
    };
    SIGNALED | outcome | u32::from(job.0)
}

fn unpack(word: u32) -> Option<(JobId, VerifyOutcome)> {
    if word & SIGNALED == 0 {
        return None;
    }
    let outcome = if word & MISMATCH != 0 {
        VerifyOutcome::Mismatch
    } else {
        VerifyOutcome::Match
    };
    Some((JobId((word & JOB_MASK) as u16), outcome))
}

impl CompletionSignal {
    /// Create an empty signal
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    /// Discard any stale result
    pub fn clear(&self) {
        self.word.store(0, Ordering::Release);
    }

    /// Deliver the outcome of `job`
    pub fn complete(&self, job: JobId, outcome: VerifyOutcome) {
        let previous = self.word.swap(pack(job, outcome), Ordering::AcqRel);
        if previous & SIGNALED != 0 {
            log::warn!("trustkeep-hal: completion for job {} overwrites unread result", job.0);
        }
    }

    /// Take the delivered result, if any
    pub fn take(&self) -> Option<(JobId, VerifyOutcome)> {
        unpack(self.word.swap(0, Ordering::AcqRel))
    }

    /// Whether a result is waiting
    pub fn is_signaled(&self) -> bool {
        self.word.load(Ordering::Acquire) & SIGNALED != 0
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_take_clears() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_signaled());

        signal.complete(JobId(3), VerifyOutcome::Match);
        assert!(signal.is_signaled());
        assert_eq!(signal.take(), Some((JobId(3), VerifyOutcome::Match)));
        assert_eq!(signal.take(), None);
    }

    #[test]
    fn test_signal_clear() {
        let signal = CompletionSignal::new();
        signal.complete(JobId(1), VerifyOutcome::Mismatch);
        signal.clear();
        assert!(!signal.is_signaled());
    }

    #[test]
    fn test_signal_keeps_job_and_outcome() {
        let signal = CompletionSignal::new();
        signal.complete(JobId(u16::MAX), VerifyOutcome::Mismatch);
        assert_eq!(signal.take(), Some((JobId(u16::MAX), VerifyOutcome::Mismatch)));

        signal.complete(JobId(0), VerifyOutcome::Match);
        signal.complete(JobId(5), VerifyOutcome::Mismatch);
        assert_eq!(signal.take(), Some((JobId(5), VerifyOutcome::Mismatch)));
    }

    #[test]
    fn test_signal_from_other_context() {
        let signal = std::sync::Arc::new(CompletionSignal::new());
        let producer = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.complete(JobId(9), VerifyOutcome::Match))
        };

        let received = loop {
            if let Some(result) = signal.take() {
                break result;
            }
            core::hint::spin_loop();
        };
        producer.join().unwrap();
        assert_eq!(received, (JobId(9), VerifyOutcome::Match));
    }
}
