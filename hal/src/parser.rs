//! # Certificate Parser Contract
//!
//! A parser locates the elements of a certificate inside its raw encoding.
//! It never copies: every element is reported as a [`Span`] into the buffer
//! it was given, so element references stay valid exactly as long as the
//! buffer content is unchanged.

use crate::{HalError, HalResult};

/// Maximum number of configured elements per certificate
pub const MAX_CONFIGURED_ELEMENTS: usize = 8;

/// Maximum number of occurrences tracked for one configured element
pub const MAX_ELEMENT_ITERATIONS: usize = 4;

/// Byte range of an element inside a certificate buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Offset of the first byte
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl Span {
    /// Create a new span
    #[inline]
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Offset one past the last byte, `None` if it does not fit a `usize`
    #[inline]
    pub const fn end(self) -> Option<usize> {
        self.offset.checked_add(self.len)
    }

    /// Resolve the span against a buffer, `None` if it falls outside
    pub fn slice(self, data: &[u8]) -> Option<&[u8]> {
        data.get(self.offset..self.end()?)
    }

    fn lies_within(self, len: usize) -> bool {
        matches!(self.end(), Some(end) if end <= len)
    }
}

/// Result of a parse request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Certificate decoded, element spans are filled in
    Ok,
    /// Encoding is malformed
    InvalidFormat,
    /// Encoding is well formed but a value is unacceptable
    InvalidContent,
    /// Certificate type is not supported
    InvalidType,
}

/// Certificate structure an element is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    /// Certificate extension (may repeat)
    Extension,
    /// Issuer distinguished name
    IssuerName,
    /// Issuer unique identifier
    IssuerUniqueId,
    /// Serial number
    SerialNumber,
    /// Signature value
    Signature,
    /// Signature algorithm
    SignatureAlgorithm,
    /// Signature algorithm identifier
    SignatureAlgorithmId,
    /// Subject distinguished name
    SubjectName,
    /// Subject public key algorithm
    SubjectPublicKeyAlgorithm,
    /// Subject public key
    SubjectPublicKey,
    /// Subject unique identifier
    SubjectUniqueId,
    /// Validity period end
    ValidityNotAfter,
    /// Validity period start
    ValidityNotBefore,
    /// Version number
    VersionNumber,
}

/// Configured element a parser must extract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementConfig {
    /// Structure the element is read from
    pub structure: StructureKind,
    /// Maximum number of occurrences (1 for single elements)
    pub max_iterations: usize,
    /// Certificate is rejected when the element is absent
    pub mandatory: bool,
}

impl ElementConfig {
    /// Single, optional element
    pub const fn single(structure: StructureKind) -> Self {
        Self {
            structure,
            max_iterations: 1,
            mandatory: false,
        }
    }

    /// Repeatable element with up to `max_iterations` occurrences
    pub const fn repeated(structure: StructureKind, max_iterations: usize) -> Self {
        Self {
            structure,
            max_iterations,
            mandatory: false,
        }
    }

    /// Mark the element as mandatory
    pub const fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Whether the element may occur more than once
    pub const fn is_repeatable(&self) -> bool {
        self.max_iterations > 1
    }
}

/// Element spans produced by a successful parse
#[derive(Debug, Clone)]
pub struct ParsedElements {
    /// Issuer name
    pub issuer: Option<Span>,
    /// Subject name
    pub subject: Option<Span>,
    /// Signature value
    pub signature: Option<Span>,
    /// Subject public key
    pub public_key: Option<Span>,
    /// Signed region of the certificate
    pub tbs: Option<Span>,
    configured: [heapless::Vec<Span, MAX_ELEMENT_ITERATIONS>; MAX_CONFIGURED_ELEMENTS],
}

impl ParsedElements {
    /// Create an empty element set
    pub fn new() -> Self {
        Self {
            issuer: None,
            subject: None,
            signature: None,
            public_key: None,
            tbs: None,
            configured: core::array::from_fn(|_| heapless::Vec::new()),
        }
    }

    /// Drop every element reference
    pub fn clear(&mut self) {
        self.issuer = None;
        self.subject = None;
        self.signature = None;
        self.public_key = None;
        self.tbs = None;
        for occurrences in self.configured.iter_mut() {
            occurrences.clear();
        }
    }

    /// Record one occurrence of configured element `index`
    pub fn push_occurrence(&mut self, index: usize, span: Span) -> HalResult<()> {
        self.configured
            .get_mut(index)
            .ok_or(HalError::SlotOutOfRange)?
            .push(span)
            .map_err(|_| HalError::TooManyOccurrences)
    }

    /// Occurrences recorded for configured element `index`
    pub fn occurrences(&self, index: usize) -> &[Span] {
        self.configured
            .get(index)
            .map(|o| o.as_slice())
            .unwrap_or_default()
    }

    /// Whether all chain-verification elements are present
    pub fn is_complete(&self) -> bool {
        self.issuer.is_some()
            && self.subject.is_some()
            && self.signature.is_some()
            && self.public_key.is_some()
            && self.tbs.is_some()
    }

    /// Whether every recorded span lies within `len` bytes
    pub fn fits_within(&self, len: usize) -> bool {
        let fixed = [self.issuer, self.subject, self.signature, self.public_key, self.tbs];
        fixed.iter().flatten().all(|s| s.lies_within(len))
            && self
                .configured
                .iter()
                .flat_map(|o| o.iter())
                .all(|s| s.lies_within(len))
    }
}

impl Default for ParsedElements {
    fn default() -> Self {
        Self::new()
    }
}

/// Certificate parser
pub trait CertificateParser {
    /// Parse `raw`, filling `out` with the chain elements and every element
    /// named in `layout` (by layout index)
    ///
    /// `out` is cleared by the caller before the call.
    fn parse(&self, raw: &[u8], layout: &[ElementConfig], out: &mut ParsedElements)
        -> ParseOutcome;
}
