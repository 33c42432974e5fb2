//! # Certificate Table
//!
//! Fixed array of certificate slots. Each slot owns its key buffer, its
//! status, and the element spans of the last successful parse. Spans are
//! dropped on every install, so they always refer to the current content.

use bitflags::bitflags;

use crate::config::CertificateConfig;
use crate::error::{KeyError, KeyResult};
use crate::hal::{BlockStore, CertificateParser, ElementConfig, ParseOutcome, ParsedElements};
use crate::key::Key;
use crate::{CertId, CertStatus, ElementId};

bitflags! {
    /// Per-slot flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u8 {
        /// A parse attempt was made for the current content
        const PARSED = 1 << 0;
        /// Slot is the target of a service request
        const SERVICE_REQUESTED = 1 << 1;
    }
}

/// One certificate slot
#[derive(Debug, Clone)]
pub struct CertificateSlot<const CAP: usize> {
    key: Key<CAP>,
    status: CertStatus,
    flags: SlotFlags,
    elements: ParsedElements,
}

impl<const CAP: usize> CertificateSlot<CAP> {
    fn new(max_len: usize) -> Self {
        Self {
            key: Key::new(max_len),
            status: CertStatus::NotAvailable,
            flags: SlotFlags::empty(),
            elements: ParsedElements::new(),
        }
    }

    /// Current status
    pub fn status(&self) -> CertStatus {
        self.status
    }

    /// Slot flags
    pub fn flags(&self) -> SlotFlags {
        self.flags
    }

    /// Raw certificate bytes
    pub fn bytes(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// Element spans of the last successful parse
    pub fn elements(&self) -> &ParsedElements {
        &self.elements
    }

    fn reset(&mut self) {
        self.key.zeroize();
        self.elements.clear();
        self.flags = SlotFlags::empty();
        self.status = CertStatus::NotAvailable;
    }
}

/// Table of `SLOTS` certificates of at most `CAP` bytes each
#[derive(Debug)]
pub struct CertificateTable<'a, const SLOTS: usize, const CAP: usize> {
    configs: &'a [CertificateConfig<'a>],
    slots: [CertificateSlot<CAP>; SLOTS],
}

impl<'a, const SLOTS: usize, const CAP: usize> CertificateTable<'a, SLOTS, CAP> {
    /// Create a table over validated configurations (one per slot)
    pub fn new(configs: &'a [CertificateConfig<'a>]) -> Self {
        Self {
            configs,
            slots: core::array::from_fn(|i| {
                CertificateSlot::new(configs.get(i).map_or(0, |c| c.max_len))
            }),
        }
    }

    /// Slot configuration
    pub fn config(&self, id: CertId) -> KeyResult<&CertificateConfig<'a>> {
        self.configs.get(id.index()).ok_or(KeyError::ParamMismatch)
    }

    /// Slot
    pub fn slot(&self, id: CertId) -> KeyResult<&CertificateSlot<CAP>> {
        self.slots.get(id.index()).ok_or(KeyError::ParamMismatch)
    }

    fn slot_mut(&mut self, id: CertId) -> KeyResult<&mut CertificateSlot<CAP>> {
        self.slots.get_mut(id.index()).ok_or(KeyError::ParamMismatch)
    }

    /// Whether `id` names a slot
    pub fn contains(&self, id: CertId) -> bool {
        id.index() < SLOTS
    }

    /// Slot configured under `name`
    pub fn find(&self, name: &str) -> Option<CertId> {
        self.configs
            .iter()
            .take(SLOTS)
            .position(|c| c.name == name)
            .map(|i| CertId(i as u16))
    }

    /// Issuer of a slot
    pub fn issuer_of(&self, id: CertId) -> KeyResult<CertId> {
        self.config(id).map(|c| c.issuer)
    }

    /// Whether a slot is a root
    pub fn is_root(&self, id: CertId) -> bool {
        self.config(id).map_or(false, |c| c.is_root(id))
    }

    /// Whether `id` lies on the issuer chain of `leaf`
    pub fn chain_contains(&self, leaf: CertId, id: CertId) -> bool {
        let mut current = leaf;
        for _ in 0..SLOTS {
            if current == id {
                return true;
            }
            match self.config(current) {
                Ok(c) if !c.is_root(current) => current = c.issuer,
                _ => return false,
            }
        }
        false
    }

    // =========================================================================
    // Content
    // =========================================================================

    /// Replace the content of a slot
    ///
    /// Empty `bytes` clear the slot. The status becomes `NotAvailable` or
    /// `NotParsed`; element spans and the parsed flag are dropped.
    pub fn install(&mut self, id: CertId, bytes: &[u8]) -> KeyResult<()> {
        let slot = self.slot_mut(id)?;
        if bytes.len() > slot.key.max_len() {
            return Err(KeyError::SizeMismatch);
        }
        slot.key.store(bytes)?;
        slot.elements.clear();
        slot.flags.remove(SlotFlags::PARSED);
        slot.status = if bytes.is_empty() {
            CertStatus::NotAvailable
        } else {
            CertStatus::NotParsed
        };
        Ok(())
    }

    /// Raw bytes of an installed certificate
    pub fn raw(&self, id: CertId) -> KeyResult<&[u8]> {
        let slot = self.slot(id)?;
        if slot.status == CertStatus::NotAvailable {
            return Err(KeyError::Empty);
        }
        Ok(slot.bytes())
    }

    /// Copy the raw bytes of an installed certificate into `buf`
    pub fn read_into(&self, id: CertId, buf: &mut [u8]) -> KeyResult<usize> {
        self.raw(id)?;
        self.slot(id)?.key.copy_to(buf)
    }

    /// Status of a slot
    pub fn status(&self, id: CertId) -> KeyResult<CertStatus> {
        self.slot(id).map(|s| s.status)
    }

    pub(crate) fn set_status(&mut self, id: CertId, status: CertStatus) {
        if let Ok(slot) = self.slot_mut(id) {
            slot.status = status;
        }
    }

    /// Whether a parse attempt was made for the current content
    pub fn is_parsed(&self, id: CertId) -> bool {
        self.slot(id)
            .map_or(false, |s| s.flags.contains(SlotFlags::PARSED))
    }

    /// Whether a slot is the target of a service request
    pub fn is_service_requested(&self, id: CertId) -> bool {
        self.slot(id)
            .map_or(false, |s| s.flags.contains(SlotFlags::SERVICE_REQUESTED))
    }

    pub(crate) fn set_service_requested(&mut self, id: CertId, requested: bool) {
        if let Ok(slot) = self.slot_mut(id) {
            slot.flags.set(SlotFlags::SERVICE_REQUESTED, requested);
        }
    }

    // =========================================================================
    // Elements
    // =========================================================================

    fn parsed_slot(&self, id: CertId) -> KeyResult<&CertificateSlot<CAP>> {
        let slot = self.slot(id)?;
        match slot.status {
            CertStatus::NotAvailable => Err(KeyError::Empty),
            s if s.has_elements() => Ok(slot),
            _ => Err(KeyError::Invalid),
        }
    }

    /// Bytes of a single-occurrence element
    ///
    /// Repeatable configured elements are read through [`Self::occurrence`].
    pub fn element(&self, id: CertId, element: ElementId) -> KeyResult<&[u8]> {
        let layout = match element {
            ElementId::Configured(n) => Some(self.layout(id, n)?),
            _ => None,
        };
        let slot = self.parsed_slot(id)?;
        if layout.map_or(false, |l| l.is_repeatable()) {
            return Err(KeyError::ParamMismatch);
        }
        element
            .locate(&slot.elements)
            .and_then(|span| span.slice(slot.bytes()))
            .ok_or(KeyError::NotFound)
    }

    /// Bytes of occurrence `nth` of repeatable configured element `index`
    pub fn occurrence(&self, id: CertId, index: u16, nth: usize) -> KeyResult<&[u8]> {
        let layout = self.layout(id, index)?;
        let slot = self.parsed_slot(id)?;
        if !layout.is_repeatable() {
            return Err(KeyError::ParamMismatch);
        }
        slot.elements
            .occurrences(index as usize)
            .get(nth)
            .and_then(|span| span.slice(slot.bytes()))
            .ok_or(KeyError::NotFound)
    }

    fn layout(&self, id: CertId, index: u16) -> KeyResult<&ElementConfig> {
        self.config(id)?
            .elements
            .get(index as usize)
            .ok_or(KeyError::ParamMismatch)
    }

    /// Element bytes from the last successful parse, whatever the status
    pub(crate) fn chain_element(&self, id: CertId, element: ElementId) -> Option<&[u8]> {
        let slot = self.slot(id).ok()?;
        element.locate(&slot.elements)?.slice(slot.bytes())
    }

    /// Whether a slot holds every element chain verification reads
    pub(crate) fn has_chain_elements(&self, id: CertId) -> bool {
        self.slot(id).map_or(false, |s| {
            s.status != CertStatus::NotAvailable && s.elements.is_complete()
        })
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    /// Parse a slot and run its element rules; returns the new status
    pub fn parse<P: CertificateParser>(&mut self, id: CertId, parser: &P) -> CertStatus {
        let Some(config) = self.configs.get(id.index()) else {
            return CertStatus::NotAvailable;
        };
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return CertStatus::NotAvailable;
        };
        if slot.status == CertStatus::NotAvailable {
            return slot.status;
        }

        slot.elements.clear();
        slot.flags.insert(SlotFlags::PARSED);

        let data = slot.key.as_bytes();
        let status = match parser.parse(data, config.elements, &mut slot.elements) {
            ParseOutcome::Ok => {
                if !slot.elements.is_complete() || !slot.elements.fits_within(data.len()) {
                    CertStatus::InvalidFormat
                } else {
                    let mandatory_present = config
                        .elements
                        .iter()
                        .enumerate()
                        .filter(|(_, layout)| layout.mandatory)
                        .all(|(i, _)| !slot.elements.occurrences(i).is_empty());
                    let rules_pass = config
                        .rules
                        .iter()
                        .all(|rule| rule.check(data, &slot.elements));
                    if mandatory_present && rules_pass {
                        CertStatus::ParsedNotValidated
                    } else {
                        CertStatus::InvalidContent
                    }
                }
            }
            ParseOutcome::InvalidFormat => CertStatus::InvalidFormat,
            ParseOutcome::InvalidContent => CertStatus::InvalidContent,
            ParseOutcome::InvalidType => CertStatus::InvalidType,
        };

        if status != CertStatus::ParsedNotValidated {
            slot.elements.clear();
        }
        slot.status = status;
        log::debug!("trustkeep: {} parsed -> {:?}", id, status);
        status
    }

    /// First slot that is installed but has not been parsed yet
    pub fn next_unparsed(&self) -> Option<CertId> {
        self.slots
            .iter()
            .position(|s| s.status == CertStatus::NotParsed && !s.flags.contains(SlotFlags::PARSED))
            .map(|i| CertId(i as u16))
    }

    // =========================================================================
    // Persistence and Reset
    // =========================================================================

    /// Load every persistent slot from `store`
    ///
    /// A slot whose block is empty or unreadable stays `NotAvailable`.
    pub fn load_persistent<B: BlockStore>(&mut self, store: &mut B) {
        for (i, (config, slot)) in self.configs.iter().zip(self.slots.iter_mut()).enumerate() {
            let Some(block) = config.storage.block() else {
                continue;
            };
            slot.reset();
            match slot.key.load_with(|buf| store.read_block(block, buf)) {
                Ok(0) => {}
                Ok(len) => {
                    slot.status = CertStatus::NotParsed;
                    log::debug!("trustkeep: cert#{} loaded {} bytes from block {}", i, len, block.0);
                }
                Err(e) => {
                    log::warn!("trustkeep: cert#{} block {} read failed: {}", i, block.0, e);
                }
            }
        }
    }

    /// Zero every slot
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{ElementConfig, JobId, KeySlotId, StructureKind};
    use crate::rules::{ElementRule, RequireValue};
    use crate::testing::{CertBuilder, TlvParser};

    const EXTENSIONS: [ElementConfig; 2] = [
        ElementConfig::single(StructureKind::SerialNumber),
        ElementConfig::repeated(StructureKind::Extension, 3),
    ];

    fn configs() -> [CertificateConfig<'static>; 2] {
        [
            CertificateConfig::new("root", CertId(0), KeySlotId(0), JobId(0)).max_len(256),
            CertificateConfig::new("leaf", CertId(0), KeySlotId(1), JobId(1))
                .max_len(256)
                .elements(&EXTENSIONS),
        ]
    }

    #[test]
    fn test_install_and_read() {
        let configs = configs();
        let mut table = CertificateTable::<2, 256>::new(&configs);
        assert_eq!(table.status(CertId(1)), Ok(CertStatus::NotAvailable));
        assert_eq!(table.raw(CertId(1)), Err(KeyError::Empty));

        table.install(CertId(1), b"blob").unwrap();
        assert_eq!(table.status(CertId(1)), Ok(CertStatus::NotParsed));
        assert_eq!(table.raw(CertId(1)), Ok(&b"blob"[..]));

        let mut buf = [0u8; 2];
        assert_eq!(table.read_into(CertId(1), &mut buf), Err(KeyError::SizeMismatch));
        assert_eq!(table.install(CertId(2), b"x"), Err(KeyError::ParamMismatch));
        assert_eq!(table.install(CertId(1), &[0; 257]), Err(KeyError::SizeMismatch));
        assert_eq!(table.status(CertId(1)), Ok(CertStatus::NotParsed));

        table.install(CertId(1), &[]).unwrap();
        assert_eq!(table.status(CertId(1)), Ok(CertStatus::NotAvailable));
    }

    #[test]
    fn test_parse_and_elements() {
        let configs = configs();
        let mut table = CertificateTable::<2, 256>::new(&configs);
        let cert = CertBuilder::new(b"Root CA", b"Device 7")
            .serial(b"\x01\x02")
            .extension(b"ext-a")
            .extension(b"ext-b")
            .sign(&crate::testing::signing_key(1), &crate::testing::public_key(2));

        table.install(CertId(1), &cert).unwrap();
        assert_eq!(table.element(CertId(1), ElementId::Subject), Err(KeyError::Invalid));

        assert_eq!(table.parse(CertId(1), &TlvParser), CertStatus::ParsedNotValidated);
        assert!(table.is_parsed(CertId(1)));
        assert_eq!(table.element(CertId(1), ElementId::Subject), Ok(&b"Device 7"[..]));
        assert_eq!(table.element(CertId(1), ElementId::Issuer), Ok(&b"Root CA"[..]));
        assert_eq!(
            table.element(CertId(1), ElementId::Configured(0)),
            Ok(&b"\x01\x02"[..])
        );
        assert_eq!(
            table.element(CertId(1), ElementId::Configured(1)),
            Err(KeyError::ParamMismatch)
        );
        assert_eq!(table.occurrence(CertId(1), 1, 1), Ok(&b"ext-b"[..]));
        assert_eq!(table.occurrence(CertId(1), 1, 2), Err(KeyError::NotFound));
        assert_eq!(table.occurrence(CertId(1), 0, 0), Err(KeyError::ParamMismatch));

        table.install(CertId(1), &cert).unwrap();
        assert!(!table.is_parsed(CertId(1)));
        assert_eq!(table.element(CertId(1), ElementId::Subject), Err(KeyError::Invalid));
    }

    #[test]
    fn test_cleared_slot_elements_are_empty() {
        let configs = configs();
        let mut table = CertificateTable::<2, 256>::new(&configs);
        let cert = CertBuilder::new(b"Root CA", b"Device 7")
            .extension(b"ext-a")
            .sign(&crate::testing::signing_key(1), &crate::testing::public_key(2));
        table.install(CertId(1), &cert).unwrap();
        table.parse(CertId(1), &TlvParser);
        table.install(CertId(1), &[]).unwrap();

        assert_eq!(table.element(CertId(1), ElementId::Configured(1)), Err(KeyError::Empty));
        assert_eq!(table.element(CertId(1), ElementId::Configured(0)), Err(KeyError::Empty));
        assert_eq!(table.occurrence(CertId(1), 1, 0), Err(KeyError::Empty));
        assert_eq!(table.occurrence(CertId(1), 0, 0), Err(KeyError::Empty));
        assert_eq!(
            table.element(CertId(1), ElementId::Configured(2)),
            Err(KeyError::ParamMismatch)
        );
    }

    #[test]
    fn test_parse_failures() {
        static ACME_ONLY: RequireValue = RequireValue {
            element: ElementId::Issuer,
            value: b"ACME",
        };
        static RULES: [&dyn ElementRule; 1] = [&ACME_ONLY];

        let configs = [
            CertificateConfig::new("root", CertId(0), KeySlotId(0), JobId(0)).max_len(256),
            CertificateConfig::new("leaf", CertId(0), KeySlotId(1), JobId(1))
                .max_len(256)
                .rules(&RULES),
        ];
        let mut table = CertificateTable::<2, 256>::new(&configs);

        table.install(CertId(0), b"\xff\x00").unwrap();
        assert_eq!(table.parse(CertId(0), &TlvParser), CertStatus::InvalidFormat);
        assert!(table.is_parsed(CertId(0)));

        let cert = CertBuilder::new(b"Other", b"Device")
            .sign(&crate::testing::signing_key(1), &crate::testing::public_key(2));
        table.install(CertId(1), &cert).unwrap();
        assert_eq!(table.parse(CertId(1), &TlvParser), CertStatus::InvalidContent);
        assert_eq!(table.element(CertId(1), ElementId::Issuer), Err(KeyError::Invalid));
    }

    #[test]
    fn test_chain_helpers() {
        let configs = configs();
        let table = CertificateTable::<2, 256>::new(&configs);
        assert!(table.is_root(CertId(0)));
        assert!(!table.is_root(CertId(1)));
        assert!(table.chain_contains(CertId(1), CertId(0)));
        assert!(!table.chain_contains(CertId(0), CertId(1)));
        assert_eq!(table.find("leaf"), Some(CertId(1)));
        assert_eq!(table.find("nope"), None);
    }

    #[test]
    fn test_next_unparsed() {
        let configs = configs();
        let mut table = CertificateTable::<2, 256>::new(&configs);
        assert_eq!(table.next_unparsed(), None);

        table.install(CertId(1), b"\xff\x00").unwrap();
        table.install(CertId(0), b"\xff\x00").unwrap();
        assert_eq!(table.next_unparsed(), Some(CertId(0)));
        table.parse(CertId(0), &TlvParser);
        assert_eq!(table.next_unparsed(), Some(CertId(1)));
        table.parse(CertId(1), &TlvParser);
        assert_eq!(table.next_unparsed(), None);
    }
}
