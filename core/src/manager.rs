//! # Key Manager
//!
//! Public surface of the engine: lifecycle, certificate install and read
//! back, verification and service requests, the `tick` driver, and the
//! completion callbacks.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninit --init()--> Startup --first tick (load persistent slots)--> Idle
//!   ^                                                                  |
//!   +-------------------------------deinit()---------------------------+
//! ```
//!
//! Every request fails with [`KeyError::NotInitialized`] before `init` and
//! with [`KeyError::Busy`] until the start-up load has run.

use crate::config::{CertificateConfig, EngineConfig};
use crate::error::{ConfigError, KeyError, KeyResult};
use crate::hal::parser::{MAX_CONFIGURED_ELEMENTS, MAX_ELEMENT_ITERATIONS};
use crate::hal::{
    BlockStore, CertificateParser, CompletionSignal, JobId, SignatureService, VerifyOutcome,
};
use crate::scheduler::{Collaborators, Completion, Progress, Step, VerificationScheduler};
use crate::service::{ServiceKind, ServiceOutcome};
use crate::stack::ChainStack;
use crate::table::CertificateTable;
use crate::{CertId, CertStatus, ElementId};

/// Callback receiving the final status of a verification
pub type VerifyCallback = fn(CertId, CertStatus);

/// Callback receiving the outcome of a service request
pub type ServiceCallback = fn(CertId, ServiceOutcome);

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not initialized
    Uninit,
    /// Initialized, persistent slots not loaded yet
    Startup,
    /// Ready for requests
    Idle,
}

/// Position of an iteration over a repeatable element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementCursor {
    cert: CertId,
    element: u16,
    next: usize,
}

impl ElementCursor {
    /// Certificate being iterated
    pub fn cert(&self) -> CertId {
        self.cert
    }

    /// Configured element being iterated
    pub fn element(&self) -> u16 {
        self.element
    }
}

/// Certificate store and chain verification engine
///
/// `SLOTS` certificates of at most `CAP` bytes each; issuer chains of at
/// most `DEPTH` certificates.
#[derive(Debug)]
pub struct KeyManager<'a, P, S, B, const SLOTS: usize, const CAP: usize, const DEPTH: usize> {
    state: EngineState,
    table: CertificateTable<'a, SLOTS, CAP>,
    scheduler: VerificationScheduler<DEPTH>,
    parser: P,
    crypto: S,
    store: B,
    signal: &'a CompletionSignal,
    engine: EngineConfig,
    verify_callback: Option<VerifyCallback>,
    service_callback: Option<ServiceCallback>,
}

impl<'a, P, S, B, const SLOTS: usize, const CAP: usize, const DEPTH: usize>
    KeyManager<'a, P, S, B, SLOTS, CAP, DEPTH>
where
    P: CertificateParser,
    S: SignatureService,
    B: BlockStore,
{
    /// Create an uninitialized engine over validated configuration
    pub fn new(
        configs: &'a [CertificateConfig<'a>],
        engine: EngineConfig,
        parser: P,
        crypto: S,
        store: B,
        signal: &'a CompletionSignal,
    ) -> Result<Self, ConfigError> {
        validate::<SLOTS, CAP, DEPTH>(configs)?;

        Ok(Self {
            state: EngineState::Uninit,
            table: CertificateTable::new(configs),
            scheduler: VerificationScheduler::new(),
            parser,
            crypto,
            store,
            signal,
            engine,
            verify_callback: None,
            service_callback: None,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initialize: every slot empty, persistent slots load on the next tick
    pub fn init(&mut self) {
        self.table.reset();
        self.scheduler.reset();
        self.signal.clear();
        self.state = EngineState::Startup;
        log::info!("trustkeep: initialized with {} slots", SLOTS);
    }

    /// Zero all key material and return to `Uninit`
    pub fn deinit(&mut self) {
        if let Some(target) = self.scheduler.target() {
            log::warn!("trustkeep: deinit drops workflow for {}", target);
        }
        self.table.reset();
        self.scheduler.reset();
        self.signal.clear();
        self.state = EngineState::Uninit;
        log::info!("trustkeep: deinitialized");
    }

    /// Lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether a verification workflow is running
    pub fn is_busy(&self) -> bool {
        self.scheduler.is_active()
    }

    /// Scheduler state of the running workflow
    pub fn current_step(&self) -> Option<Step> {
        self.scheduler.step()
    }

    fn ensure_ready(&self) -> KeyResult<()> {
        match self.state {
            EngineState::Uninit => Err(KeyError::NotInitialized),
            EngineState::Startup => Err(KeyError::Busy),
            EngineState::Idle => Ok(()),
        }
    }

    fn ensure_idle(&self) -> KeyResult<()> {
        self.ensure_ready()?;
        if self.scheduler.is_active() {
            log::warn!("trustkeep: request rejected, verification in progress");
            return Err(KeyError::Busy);
        }
        Ok(())
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    /// Install raw certificate bytes into a volatile slot
    ///
    /// Empty `bytes` clear the slot. Slots on the chain of a running
    /// workflow are `Busy`; persistent slots are written only through
    /// service requests.
    pub fn install_certificate(&mut self, id: CertId, bytes: &[u8]) -> KeyResult<()> {
        self.ensure_ready()?;
        let config = self.table.config(id)?;
        if config.storage.block().is_some() {
            log::warn!("trustkeep: {} is persistent, use a service request", id);
            return Err(KeyError::ParamMismatch);
        }
        if let Some(target) = self.scheduler.target() {
            if self.table.chain_contains(target, id) {
                log::warn!("trustkeep: {} is on the active chain", id);
                return Err(KeyError::Busy);
            }
        }

        self.table.install(id, bytes).map_err(|e| {
            log::warn!("trustkeep: {} install rejected: {}", id, e);
            e
        })?;
        log::debug!("trustkeep: {} installed {} bytes", id, bytes.len());
        Ok(())
    }

    /// Raw bytes of an installed certificate
    pub fn get_certificate(&self, id: CertId) -> KeyResult<&[u8]> {
        self.ensure_ready()?;
        self.table.raw(id)
    }

    /// Copy the raw bytes of an installed certificate into `buf`
    pub fn read_certificate(&self, id: CertId, buf: &mut [u8]) -> KeyResult<usize> {
        self.ensure_ready()?;
        self.table.read_into(id, buf)
    }

    /// Status of a certificate
    pub fn get_status(&self, id: CertId) -> KeyResult<CertStatus> {
        self.ensure_ready()?;
        self.table.status(id)
    }

    /// Slot configured under `name`
    pub fn find_certificate(&self, name: &str) -> Option<CertId> {
        self.table.find(name)
    }

    // =========================================================================
    // Elements
    // =========================================================================

    /// Bytes of a single-occurrence element of a parsed certificate
    pub fn get_element(&self, id: CertId, element: ElementId) -> KeyResult<&[u8]> {
        self.ensure_ready()?;
        self.table.element(id, element)
    }

    /// Copy a single-occurrence element into `buf`
    pub fn read_element(&self, id: CertId, element: ElementId, buf: &mut [u8]) -> KeyResult<usize> {
        let bytes = self.get_element(id, element)?;
        let dst = buf.get_mut(..bytes.len()).ok_or(KeyError::SizeMismatch)?;
        dst.copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// First occurrence of repeatable configured element `element`
    pub fn element_first(&self, id: CertId, element: u16) -> KeyResult<(ElementCursor, &[u8])> {
        self.ensure_ready()?;
        let bytes = self.table.occurrence(id, element, 0)?;
        let cursor = ElementCursor {
            cert: id,
            element,
            next: 1,
        };
        Ok((cursor, bytes))
    }

    /// Next occurrence; `NotFound` once the occurrences are exhausted
    pub fn element_next(&self, cursor: &mut ElementCursor) -> KeyResult<&[u8]> {
        self.ensure_ready()?;
        let bytes = self
            .table
            .occurrence(cursor.cert, cursor.element, cursor.next)?;
        cursor.next += 1;
        Ok(bytes)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Start verifying `id` and its issuer chain
    ///
    /// Completes on a later [`tick`](Self::tick) through the verify callback.
    /// The chain is checked first, exactly as for
    /// [`verify_chain`](Self::verify_chain): an empty member fails with
    /// `Empty` and a malformed issuer with `ChainInvalid`, before any
    /// signature is checked.
    pub fn verify_certificate(&mut self, id: CertId) -> KeyResult<()> {
        self.ensure_idle()?;
        self.check_chain(id)?;
        self.scheduler.start(id, false)?;
        log::info!("trustkeep: verification of {} started", id);
        Ok(())
    }

    /// Check the chain of `id` for empty or malformed members, then start
    /// verifying it
    ///
    /// Members are checked root first. The first empty member fails the
    /// request with `Empty`, the first issuer that failed to parse (format
    /// or content) with `ChainInvalid`. Every later member that is neither
    /// empty nor malformed is marked `InvalidChainOfTrust`.
    pub fn verify_chain(&mut self, id: CertId) -> KeyResult<()> {
        self.ensure_idle()?;
        self.check_chain(id)?;
        self.scheduler.start(id, false)?;
        log::info!("trustkeep: chain verification of {} started", id);
        Ok(())
    }

    fn check_chain(&mut self, target: CertId) -> KeyResult<()> {
        if self.table.status(target)? == CertStatus::NotAvailable {
            return Err(KeyError::Empty);
        }

        let mut chain = ChainStack::<DEPTH>::new();
        let mut id = target;
        loop {
            chain.push(id).map_err(|_| KeyError::ChainInvalid)?;
            if self.table.is_root(id) {
                break;
            }
            id = self.table.issuer_of(id)?;
        }

        let mut failure = None;
        for id in chain.iter().rev() {
            let status = self.table.status(id)?;
            match status {
                CertStatus::NotAvailable => {
                    failure = failure.or(Some(KeyError::Empty));
                }
                CertStatus::InvalidFormat | CertStatus::InvalidContent if id != target => {
                    if failure.is_none() {
                        log::warn!("trustkeep: {} chain member {} is {:?}", target, id, status);
                        failure = Some(KeyError::ChainInvalid);
                    }
                }
                CertStatus::InvalidFormat | CertStatus::InvalidContent => {}
                _ if failure.is_some() => {
                    self.table.set_status(id, CertStatus::InvalidChainOfTrust);
                }
                _ => {}
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Install, verify and (for persistent slots) store a certificate
    ///
    /// The request must match the slot: set requests need an empty slot,
    /// update requests an occupied one, and root requests a root slot.
    /// Rejected requests return `ParamMismatch` and start nothing.
    pub fn service_certificate(
        &mut self,
        kind: ServiceKind,
        id: CertId,
        bytes: &[u8],
    ) -> KeyResult<()> {
        self.ensure_idle()?;
        let status = self.table.status(id)?;
        if bytes.is_empty() || !kind.permits(self.table.is_root(id), status) {
            log::warn!("trustkeep: {:?} does not apply to {} ({:?})", kind, id, status);
            return Err(KeyError::ParamMismatch);
        }

        self.table
            .install(id, bytes)
            .map_err(|_| KeyError::ParamMismatch)?;
        self.check_chain(id).map_err(|e| {
            log::warn!("trustkeep: {:?} for {} rejected: {}", kind, id, e);
            KeyError::ParamMismatch
        })?;

        self.scheduler.start(id, true)?;
        self.table.set_service_requested(id, true);
        log::info!("trustkeep: {:?} for {} started", kind, id);
        Ok(())
    }

    /// [`service_certificate`](Self::service_certificate) addressed by slot name
    pub fn service_certificate_by_name(
        &mut self,
        kind: ServiceKind,
        name: &str,
        bytes: &[u8],
    ) -> KeyResult<()> {
        self.ensure_idle()?;
        let id = self.table.find(name).ok_or(KeyError::ParamMismatch)?;
        self.service_certificate(kind, id, bytes)
    }

    /// Whether `id` is the target of a running service request
    pub fn is_service_requested(&self, id: CertId) -> bool {
        self.table.is_service_requested(id)
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Advance the engine
    ///
    /// Runs the start-up load, the running workflow until it suspends or
    /// finishes, or parses every installed but unparsed slot when idle.
    /// Returns the completion of a workflow that finished during this tick,
    /// after invoking its callback.
    pub fn tick(&mut self) -> Option<Completion> {
        match self.state {
            EngineState::Uninit => None,
            EngineState::Startup => {
                self.table.load_persistent(&mut self.store);
                self.state = EngineState::Idle;
                log::info!("trustkeep: persistent slots loaded");
                None
            }
            EngineState::Idle if !self.scheduler.is_active() => {
                if self.engine.preparse {
                    self.preparse();
                }
                None
            }
            EngineState::Idle => {
                let mut env = Collaborators {
                    parser: &self.parser,
                    crypto: &mut self.crypto,
                    store: &mut self.store,
                    signal: self.signal,
                    engine: &self.engine,
                };
                match self.scheduler.run(&mut self.table, &mut env) {
                    Progress::Finished(completion) => {
                        self.notify(completion);
                        Some(completion)
                    }
                    Progress::Idle | Progress::Pending => None,
                }
            }
        }
    }

    /// Tick until the running workflow finishes
    ///
    /// Spins while the workflow waits on an asynchronous signature result or
    /// a storage write. Returns `None` when no workflow was running.
    pub fn run_to_completion(&mut self) -> Option<Completion> {
        loop {
            if self.state == EngineState::Uninit {
                return None;
            }
            if let Some(completion) = self.tick() {
                return Some(completion);
            }
            if self.state == EngineState::Idle && !self.scheduler.is_active() {
                return None;
            }
            core::hint::spin_loop();
        }
    }

    fn preparse(&mut self) {
        for _ in 0..SLOTS {
            let Some(id) = self.table.next_unparsed() else {
                break;
            };
            self.table.parse(id, &self.parser);
        }
    }

    fn notify(&self, completion: Completion) {
        match completion {
            Completion::Verified { cert, status } => {
                if let Some(callback) = self.verify_callback {
                    callback(cert, status);
                }
            }
            Completion::Serviced { cert, outcome } => {
                if let Some(callback) = self.service_callback {
                    callback(cert, outcome);
                }
            }
        }
    }

    // =========================================================================
    // Callbacks and Collaborators
    // =========================================================================

    /// Register the verification completion callback
    pub fn register_verify_callback(&mut self, callback: VerifyCallback) {
        self.verify_callback = Some(callback);
    }

    /// Register the service completion callback
    pub fn register_service_callback(&mut self, callback: ServiceCallback) {
        self.service_callback = Some(callback);
    }

    /// Completion entry point for the signature service
    pub fn on_verify_complete(&self, job: JobId, outcome: VerifyOutcome) {
        self.signal.complete(job, outcome);
    }

    /// Signature service
    pub fn signature_service(&self) -> &S {
        &self.crypto
    }

    /// Signature service, mutable
    pub fn signature_service_mut(&mut self) -> &mut S {
        &mut self.crypto
    }

    /// Block store
    pub fn block_store(&self) -> &B {
        &self.store
    }

    /// Block store, mutable
    pub fn block_store_mut(&mut self) -> &mut B {
        &mut self.store
    }
}

// =============================================================================
// Configuration Validation
// =============================================================================

fn validate<const SLOTS: usize, const CAP: usize, const DEPTH: usize>(
    configs: &[CertificateConfig<'_>],
) -> Result<(), ConfigError> {
    if configs.len() != SLOTS || SLOTS > usize::from(u16::MAX) {
        return Err(ConfigError::SlotCount {
            expected: SLOTS,
            found: configs.len(),
        });
    }

    for (i, config) in configs.iter().enumerate() {
        let id = CertId(i as u16);
        if config.issuer.index() >= SLOTS {
            return Err(ConfigError::IssuerOutOfRange(id));
        }
        if config.max_len > CAP {
            return Err(ConfigError::CapacityExceeded(id));
        }
        if config.elements.len() > MAX_CONFIGURED_ELEMENTS
            || config
                .elements
                .iter()
                .any(|e| e.max_iterations == 0 || e.max_iterations > MAX_ELEMENT_ITERATIONS)
        {
            return Err(ConfigError::ElementLayout(id));
        }
        if let Some(block) = config.storage.block() {
            if configs[..i].iter().any(|c| c.storage.block() == Some(block)) {
                return Err(ConfigError::DuplicateBlock(id));
            }
        }
        if configs[..i].iter().any(|c| c.name == config.name) {
            return Err(ConfigError::DuplicateName(id));
        }
    }

    for (i, _) in configs.iter().enumerate() {
        let mut current = CertId(i as u16);
        let mut depth = 1;
        while !configs[current.index()].is_root(current) {
            current = configs[current.index()].issuer;
            depth += 1;
            if depth > DEPTH {
                return Err(ConfigError::ChainTooDeep(CertId(i as u16)));
            }
        }
        if depth > DEPTH {
            return Err(ConfigError::ChainTooDeep(CertId(i as u16)));
        }
    }

    Ok(())
}
