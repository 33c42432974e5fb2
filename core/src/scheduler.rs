//! # Verification Scheduler
//!
//! Cooperative state machine verifying one certificate chain at a time.
//!
//! ```text
//!  Init ─> Parse ─> PrepareRoot ─> Verify ─> [WaitCallback] ─> StoreKey ─> Advance
//!            ▲                       ▲                                       │
//!            └──── next, unparsed ───┴────────── next, parsed ───────────────┤
//!                                                                   target   ▼
//!  any failure ─> Error ──────────────────────────────────> [PersistKey] ─> Finish
//! ```
//!
//! The chain is pushed leaf first and popped root first, so every link is
//! checked with an issuer key that was itself verified earlier in the same
//! run. The machine suspends in `WaitCallback` until the signature service
//! delivers an outcome through the [`CompletionSignal`], and in `PersistKey`
//! while a storage write is pending.

use crate::config::EngineConfig;
use crate::error::{KeyError, KeyResult};
use crate::hal::{
    BlockStore, CertificateParser, CompletionSignal, JobId, SignatureService, VerifyOutcome,
    VerifyStatus, WriteStatus,
};
use crate::service::ServiceOutcome;
use crate::stack::ChainStack;
use crate::table::CertificateTable;
use crate::{CertId, CertStatus, ElementId};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Push the chain, pick the root
    Init,
    /// Parse the current certificate
    Parse,
    /// Install the root's own key for its self-signature check
    PrepareRoot,
    /// Compare names and request the signature check
    Verify,
    /// Wait for an asynchronous signature result
    WaitCallback,
    /// Install the verified certificate's public key
    StoreKey,
    /// Move to the next certificate towards the target
    Advance,
    /// Unwind the remaining chain
    Error,
    /// Write the target to storage
    PersistKey,
    /// Report the outcome
    Finish,
}

/// Terminal report of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Plain verification finished with the target's final status
    Verified {
        /// Target certificate
        cert: CertId,
        /// Final status of the target
        status: CertStatus,
    },
    /// Service request finished
    Serviced {
        /// Target certificate
        cert: CertId,
        /// Outcome of the request
        outcome: ServiceOutcome,
    },
}

/// Result of running the scheduler for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No workflow
    Idle,
    /// Workflow suspended or out of step budget
    Pending,
    /// Workflow finished
    Finished(Completion),
}

/// Collaborators a run needs
pub(crate) struct Collaborators<'r, P, S, B> {
    pub parser: &'r P,
    pub crypto: &'r mut S,
    pub store: &'r mut B,
    pub signal: &'r CompletionSignal,
    pub engine: &'r EngineConfig,
}

#[derive(Debug, Clone, Copy)]
struct Workflow {
    target: CertId,
    current: CertId,
    step: Step,
    outcome: ServiceOutcome,
    service: bool,
    awaiting: Option<JobId>,
    write_issued: bool,
}

impl Workflow {
    /// Abort at `id`; a failing target is reported as `CertInvalid`
    fn fail_at(&mut self, id: CertId) {
        self.outcome = if id == self.target {
            ServiceOutcome::CertInvalid
        } else {
            ServiceOutcome::ChainInvalid
        };
        self.step = Step::Error;
    }

    fn abort(&mut self, outcome: ServiceOutcome) {
        self.outcome = outcome;
        self.step = Step::Error;
    }
}

enum Flow {
    Continue,
    Suspend,
    Done(Completion),
}

/// Chain verification state machine with a chain stack of `DEPTH`
#[derive(Debug, Default)]
pub struct VerificationScheduler<const DEPTH: usize> {
    stack: ChainStack<DEPTH>,
    workflow: Option<Workflow>,
}

impl<const DEPTH: usize> VerificationScheduler<DEPTH> {
    /// Create an idle scheduler
    pub const fn new() -> Self {
        Self {
            stack: ChainStack::new(),
            workflow: None,
        }
    }

    /// Whether a workflow is running
    pub fn is_active(&self) -> bool {
        self.workflow.is_some()
    }

    /// State of the running workflow
    pub fn step(&self) -> Option<Step> {
        self.workflow.map(|w| w.step)
    }

    /// Target of the running workflow
    pub fn target(&self) -> Option<CertId> {
        self.workflow.map(|w| w.target)
    }

    /// Start a workflow for `target`
    pub fn start(&mut self, target: CertId, service: bool) -> KeyResult<()> {
        if self.workflow.is_some() {
            return Err(KeyError::Busy);
        }
        self.stack.clear();
        self.workflow = Some(Workflow {
            target,
            current: target,
            step: Step::Init,
            outcome: ServiceOutcome::Ok,
            service,
            awaiting: None,
            write_issued: false,
        });
        Ok(())
    }

    /// Drop the running workflow without reporting
    pub fn reset(&mut self) {
        self.stack.clear();
        self.workflow = None;
    }

    /// Execute states until the workflow suspends, finishes, or the step
    /// budget is used up
    pub(crate) fn run<P, S, B, const SLOTS: usize, const CAP: usize>(
        &mut self,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Progress
    where
        P: CertificateParser,
        S: SignatureService,
        B: BlockStore,
    {
        for _ in 0..env.engine.max_steps_per_tick.max(1) {
            let Some(mut wf) = self.workflow else {
                return Progress::Idle;
            };
            let step = wf.step;

            let flow = match step {
                Step::Init => self.init(&mut wf, table),
                Step::Parse => Self::parse(&mut wf, table, env),
                Step::PrepareRoot => Self::prepare_root(&mut wf, table, env),
                Step::Verify => Self::verify(&mut wf, table, env),
                Step::WaitCallback => Self::wait_callback(&mut wf, table, env),
                Step::StoreKey => Self::store_key(&mut wf, table, env),
                Step::Advance => self.advance(&mut wf, table),
                Step::Error => self.unwind(&mut wf, table, env),
                Step::PersistKey => Self::persist(&mut wf, table, env),
                Step::Finish => Self::finish(&wf, table),
            };

            if wf.step != step {
                log::debug!("trustkeep: {} {:?} -> {:?}", wf.current, step, wf.step);
            }

            match flow {
                Flow::Continue => self.workflow = Some(wf),
                Flow::Suspend => {
                    self.workflow = Some(wf);
                    return Progress::Pending;
                }
                Flow::Done(completion) => {
                    self.reset();
                    return Progress::Finished(completion);
                }
            }
        }
        Progress::Pending
    }

    // =========================================================================
    // States
    // =========================================================================

    fn init<const SLOTS: usize, const CAP: usize>(
        &mut self,
        wf: &mut Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
    ) -> Flow {
        let status = table.status(wf.target).unwrap_or_default();
        if status.is_malformed() {
            log::warn!("trustkeep: {} is malformed ({:?})", wf.target, status);
            wf.abort(ServiceOutcome::CertInvalid);
            return Flow::Continue;
        }

        self.stack.clear();
        let mut id = wf.target;
        loop {
            if self.stack.push(id).is_err() {
                log::error!("trustkeep: chain of {} exceeds stack depth {}", wf.target, DEPTH);
                wf.abort(ServiceOutcome::ChainInvalid);
                return Flow::Continue;
            }
            if table.is_root(id) {
                break;
            }
            match table.issuer_of(id) {
                Ok(issuer) => id = issuer,
                Err(_) => {
                    wf.abort(ServiceOutcome::ChainInvalid);
                    return Flow::Continue;
                }
            }
        }
        log::debug!("trustkeep: {} chain depth {}", wf.target, self.stack.len());

        self.enter_next(wf, table);
        Flow::Continue
    }

    fn parse<P, S, B, const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Flow
    where
        P: CertificateParser,
    {
        let status = table.parse(wf.current, env.parser);
        if status == CertStatus::ParsedNotValidated {
            wf.step = if table.is_root(wf.current) {
                Step::PrepareRoot
            } else {
                Step::Verify
            };
        } else {
            log::warn!("trustkeep: {} rejected by parser ({:?})", wf.current, status);
            wf.fail_at(wf.current);
        }
        Flow::Continue
    }

    fn prepare_root<P, S, B, const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Flow
    where
        S: SignatureService,
    {
        if Self::install_public_key(wf.current, table, env) {
            wf.step = Step::Verify;
        } else {
            wf.abort(ServiceOutcome::ChainInvalid);
        }
        Flow::Continue
    }

    fn verify<P, S, B, const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Flow
    where
        S: SignatureService,
    {
        let current = wf.current;
        let Ok(issuer) = table.issuer_of(current) else {
            wf.fail_at(current);
            return Flow::Continue;
        };

        let names_match = match (
            table.chain_element(current, ElementId::Issuer),
            table.chain_element(issuer, ElementId::Subject),
        ) {
            (Some(issuer_name), Some(subject)) => issuer_name == subject,
            _ => false,
        };
        if !names_match {
            log::warn!("trustkeep: {} issuer name does not match {}", current, issuer);
            table.set_status(current, CertStatus::InvalidChainOfTrust);
            wf.abort(ServiceOutcome::ChainInvalid);
            return Flow::Continue;
        }

        let (Some(message), Some(signature), Ok(issuer_config)) = (
            table.chain_element(current, ElementId::TbsCertificate),
            table.chain_element(current, ElementId::SignatureValue),
            table.config(issuer),
        ) else {
            wf.fail_at(current);
            return Flow::Continue;
        };
        // Mode is a property of the issuer's job
        let (job, mode) = (issuer_config.job, issuer_config.mode);

        env.signal.clear();
        match env.crypto.verify_signature(job, mode, message, signature) {
            Ok(VerifyStatus::Done(outcome)) => Self::apply(wf, table, outcome),
            Ok(VerifyStatus::Pending) => {
                wf.awaiting = Some(job);
                wf.step = Step::WaitCallback;
            }
            Err(e) => {
                // `current` keeps the status it had; members below it are
                // marked by the unwind
                log::error!("trustkeep: {} signature request failed: {}", current, e);
                wf.abort(ServiceOutcome::ChainInvalid);
            }
        }
        Flow::Continue
    }

    fn wait_callback<P, S, B, const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Flow {
        match env.signal.take() {
            Some((job, outcome)) if Some(job) == wf.awaiting => {
                wf.awaiting = None;
                Self::apply(wf, table, outcome);
                Flow::Continue
            }
            Some((job, _)) => {
                log::warn!("trustkeep: ignoring completion for unexpected job {}", job.0);
                Flow::Suspend
            }
            None => Flow::Suspend,
        }
    }

    fn apply<const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
        outcome: VerifyOutcome,
    ) {
        match outcome {
            VerifyOutcome::Match => {
                table.set_status(wf.current, CertStatus::Valid);
                wf.step = Step::StoreKey;
            }
            VerifyOutcome::Mismatch => {
                log::warn!("trustkeep: {} signature check failed", wf.current);
                table.set_status(wf.current, CertStatus::SignatureFailed);
                wf.fail_at(wf.current);
            }
        }
    }

    fn store_key<P, S, B, const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Flow
    where
        S: SignatureService,
    {
        if Self::install_public_key(wf.current, table, env) {
            wf.step = Step::Advance;
        } else {
            wf.abort(ServiceOutcome::ChainInvalid);
        }
        Flow::Continue
    }

    fn advance<const SLOTS: usize, const CAP: usize>(
        &mut self,
        wf: &mut Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
    ) -> Flow {
        if wf.current == wf.target {
            wf.step = if Self::needs_persist(wf, table) {
                Step::PersistKey
            } else {
                Step::Finish
            };
        } else {
            self.enter_next(wf, table);
        }
        Flow::Continue
    }

    fn unwind<P, S, B, const SLOTS: usize, const CAP: usize>(
        &mut self,
        wf: &mut Workflow,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
        env: &Collaborators<'_, P, S, B>,
    ) -> Flow {
        while let Some(id) = self.stack.pop() {
            table.set_status(id, CertStatus::InvalidChainOfTrust);
        }
        log::warn!("trustkeep: {} verification aborted: {}", wf.target, wf.outcome);

        wf.step = if env.engine.persist_on_failure && Self::needs_persist(wf, table) {
            Step::PersistKey
        } else {
            Step::Finish
        };
        Flow::Continue
    }

    fn persist<P, S, B, const SLOTS: usize, const CAP: usize>(
        wf: &mut Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> Flow
    where
        B: BlockStore,
    {
        let block = table.config(wf.target).ok().and_then(|c| c.storage.block());
        let (Some(block), Ok(slot)) = (block, table.slot(wf.target)) else {
            wf.step = Step::Finish;
            return Flow::Continue;
        };

        if !wf.write_issued {
            match env.store.write_block(block, slot.bytes()) {
                Ok(()) => wf.write_issued = true,
                Err(e) => {
                    log::error!("trustkeep: {} write to block {} rejected: {}", wf.target, block.0, e);
                    wf.outcome = ServiceOutcome::WriteFail;
                    wf.step = Step::Finish;
                }
            }
            return Flow::Continue;
        }

        match env.store.poll_status(block) {
            WriteStatus::Pending => Flow::Suspend,
            WriteStatus::Ok => {
                wf.step = Step::Finish;
                Flow::Continue
            }
            WriteStatus::NotOk => {
                log::error!("trustkeep: {} write to block {} failed", wf.target, block.0);
                wf.outcome = ServiceOutcome::WriteFail;
                wf.step = Step::Finish;
                Flow::Continue
            }
        }
    }

    fn finish<const SLOTS: usize, const CAP: usize>(
        wf: &Workflow,
        table: &mut CertificateTable<'_, SLOTS, CAP>,
    ) -> Flow {
        table.set_service_requested(wf.target, false);
        let completion = if wf.service {
            Completion::Serviced {
                cert: wf.target,
                outcome: wf.outcome,
            }
        } else {
            Completion::Verified {
                cert: wf.target,
                status: table.status(wf.target).unwrap_or_default(),
            }
        };
        log::info!("trustkeep: {} finished: {:?}", wf.target, completion);
        Flow::Done(completion)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Pop the next certificate towards the target and pick its first state
    fn enter_next<const SLOTS: usize, const CAP: usize>(
        &mut self,
        wf: &mut Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
    ) {
        let Some(id) = self.stack.pop() else {
            wf.abort(ServiceOutcome::ChainInvalid);
            return;
        };
        wf.current = id;
        if !table.is_parsed(id) {
            wf.step = Step::Parse;
        } else if !table.has_chain_elements(id) {
            log::warn!("trustkeep: {} has no usable parse result", id);
            wf.fail_at(id);
        } else if table.is_root(id) {
            wf.step = Step::PrepareRoot;
        } else {
            wf.step = Step::Verify;
        }
    }

    fn install_public_key<P, S, B, const SLOTS: usize, const CAP: usize>(
        id: CertId,
        table: &CertificateTable<'_, SLOTS, CAP>,
        env: &mut Collaborators<'_, P, S, B>,
    ) -> bool
    where
        S: SignatureService,
    {
        let (Ok(config), Some(key)) = (table.config(id), table.chain_element(id, ElementId::PublicKey))
        else {
            return false;
        };
        let slot = config.key_slot;
        match env
            .crypto
            .install_key(slot, key)
            .and_then(|()| env.crypto.activate_key(slot))
        {
            Ok(()) => true,
            Err(e) => {
                log::error!("trustkeep: {} key install into slot {} failed: {}", id, slot.0, e);
                false
            }
        }
    }

    fn needs_persist<const SLOTS: usize, const CAP: usize>(
        wf: &Workflow,
        table: &CertificateTable<'_, SLOTS, CAP>,
    ) -> bool {
        wf.service
            && table
                .config(wf.target)
                .map_or(false, |c| c.storage.block().is_some())
    }
}
