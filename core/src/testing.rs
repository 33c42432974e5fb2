//! # Test Support
//!
//! A compact tag-length-value certificate encoding with a builder and a
//! parser, Ed25519 keys from fixed seeds, and a four-slot chain layout.
//!
//! ```text
//! cert := TLV(TBS, field*) TLV(SIGNATURE, sig)
//! TLV  := tag:u8 len:u16be value
//! ```
//!
//! The signature covers the whole TBS record, header included.

use ed25519_dalek::{Signer, SigningKey};

use crate::config::CertificateConfig;
use crate::hal::soft::{RamBlockStore, SoftSignatureService};
use crate::hal::{
    BlockId, CertificateParser, ElementConfig, JobId, KeySlotId, ParseOutcome, ParsedElements,
    ProcessingMode, Span, StructureKind,
};
use crate::manager::KeyManager;
use crate::CertId;

pub const TAG_TBS: u8 = 0x01;
pub const TAG_SIGNATURE: u8 = 0x02;
pub const TAG_ATTRIBUTE_CERT: u8 = 0x07;

pub const TAG_ISSUER: u8 = 0x10;
pub const TAG_SUBJECT: u8 = 0x11;
pub const TAG_PUBLIC_KEY: u8 = 0x12;
pub const TAG_SERIAL: u8 = 0x13;
pub const TAG_VERSION: u8 = 0x14;
pub const TAG_NOT_BEFORE: u8 = 0x15;
pub const TAG_NOT_AFTER: u8 = 0x16;
pub const TAG_EXTENSION: u8 = 0x30;

pub const SLOTS: usize = 4;
pub const CAP: usize = 512;
pub const DEPTH: usize = 4;

pub type SoftCrypto = SoftSignatureService<8>;
pub type SoftStore = RamBlockStore<4, CAP>;
pub type TestManager<'a> = KeyManager<'a, TlvParser, SoftCrypto, SoftStore, SLOTS, CAP, DEPTH>;

// =============================================================================
// Keys
// =============================================================================

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_key(seed: u8) -> [u8; 32] {
    signing_key(seed).verifying_key().to_bytes()
}

// =============================================================================
// Builder
// =============================================================================

fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
}

pub struct CertBuilder {
    fields: Vec<(u8, Vec<u8>)>,
    outer_tag: u8,
}

impl CertBuilder {
    pub fn new(issuer: &[u8], subject: &[u8]) -> Self {
        Self {
            fields: vec![(TAG_ISSUER, issuer.to_vec()), (TAG_SUBJECT, subject.to_vec())],
            outer_tag: TAG_TBS,
        }
    }

    pub fn field(mut self, tag: u8, value: &[u8]) -> Self {
        self.fields.push((tag, value.to_vec()));
        self
    }

    pub fn serial(self, value: &[u8]) -> Self {
        self.field(TAG_SERIAL, value)
    }

    pub fn extension(self, value: &[u8]) -> Self {
        self.field(TAG_EXTENSION, value)
    }

    pub fn attribute_certificate(mut self) -> Self {
        self.outer_tag = TAG_ATTRIBUTE_CERT;
        self
    }

    /// Encode with `public_key` as the subject key, signed by `issuer_key`
    pub fn sign(self, issuer_key: &SigningKey, public_key: &[u8]) -> Vec<u8> {
        let mut inner = Vec::new();
        for (tag, value) in &self.fields {
            push_tlv(&mut inner, *tag, value);
        }
        push_tlv(&mut inner, TAG_PUBLIC_KEY, public_key);

        let mut cert = Vec::new();
        push_tlv(&mut cert, self.outer_tag, &inner);
        let signature = issuer_key.sign(&cert).to_bytes();
        push_tlv(&mut cert, TAG_SIGNATURE, &signature);
        cert
    }
}

/// Flip one bit of the signature
pub fn corrupt_signature(cert: &mut [u8]) {
    let last = cert.len() - 1;
    cert[last] ^= 0x01;
}

// =============================================================================
// Parser
// =============================================================================

fn read_tlv(data: &[u8], pos: usize, limit: usize) -> Option<(u8, Span, usize)> {
    let header = data.get(pos..pos + 3)?;
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;
    let value = Span::new(pos + 3, len);
    let end = value.end().filter(|&end| end <= limit)?;
    Some((header[0], value, end))
}

fn structure_tag(structure: StructureKind) -> Option<u8> {
    match structure {
        StructureKind::SerialNumber => Some(TAG_SERIAL),
        StructureKind::VersionNumber => Some(TAG_VERSION),
        StructureKind::ValidityNotBefore => Some(TAG_NOT_BEFORE),
        StructureKind::ValidityNotAfter => Some(TAG_NOT_AFTER),
        StructureKind::Extension => Some(TAG_EXTENSION),
        StructureKind::IssuerName => Some(TAG_ISSUER),
        StructureKind::SubjectName => Some(TAG_SUBJECT),
        StructureKind::SubjectPublicKey => Some(TAG_PUBLIC_KEY),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TlvParser;

impl CertificateParser for TlvParser {
    fn parse(&self, raw: &[u8], layout: &[ElementConfig], out: &mut ParsedElements) -> ParseOutcome {
        let Some((tag, tbs, next)) = read_tlv(raw, 0, raw.len()) else {
            return ParseOutcome::InvalidFormat;
        };
        if tag == TAG_ATTRIBUTE_CERT {
            return ParseOutcome::InvalidType;
        }
        if tag != TAG_TBS {
            return ParseOutcome::InvalidFormat;
        }
        match read_tlv(raw, next, raw.len()) {
            Some((TAG_SIGNATURE, signature, end)) if end == raw.len() => {
                out.signature = Some(signature);
            }
            _ => return ParseOutcome::InvalidFormat,
        }
        out.tbs = Some(Span::new(0, next));

        let mut pos = tbs.offset;
        while pos < next {
            let Some((tag, value, after)) = read_tlv(raw, pos, next) else {
                return ParseOutcome::InvalidFormat;
            };
            let fixed = match tag {
                TAG_ISSUER => Some(&mut out.issuer),
                TAG_SUBJECT => Some(&mut out.subject),
                TAG_PUBLIC_KEY => Some(&mut out.public_key),
                _ => None,
            };
            if let Some(field) = fixed {
                if field.replace(value).is_some() {
                    return ParseOutcome::InvalidContent;
                }
            }
            for (i, element) in layout.iter().enumerate() {
                if structure_tag(element.structure) == Some(tag)
                    && out.occurrences(i).len() < element.max_iterations
                {
                    let _ = out.push_occurrence(i, value);
                }
            }
            pos = after;
        }

        if out.issuer.is_none() || out.subject.is_none() || out.public_key.is_none() {
            return ParseOutcome::InvalidFormat;
        }
        ParseOutcome::Ok
    }
}

// =============================================================================
// Chain Fixture
// =============================================================================

/// Subject name of chain member `i`
pub fn chain_name(i: usize) -> Vec<u8> {
    format!("Chain CA {}", i).into_bytes()
}

/// Certificate for chain slot `i`: issued by slot `i - 1`, the root self-signed
pub fn chain_cert(i: usize) -> Vec<u8> {
    let issuer = if i == 0 { 0 } else { i - 1 };
    CertBuilder::new(&chain_name(issuer), &chain_name(i))
        .serial(&[i as u8])
        .sign(&signing_key(issuer as u8 + 1), &public_key(i as u8 + 1))
}

/// Slot `i` issued by slot `i - 1`; slot 0 is the root
pub fn chain_configs(mode: ProcessingMode) -> [CertificateConfig<'static>; SLOTS] {
    core::array::from_fn(|i| {
        let issuer = if i == 0 { 0 } else { i as u16 - 1 };
        CertificateConfig::new(CHAIN_NAMES[i], CertId(issuer), KeySlotId(i as u16), JobId(i as u16))
            .max_len(CAP)
            .mode(mode)
            .elements(&SERIAL_ONLY)
    })
}

pub const CHAIN_NAMES: [&str; SLOTS] = ["root", "ca", "sub-ca", "device"];

pub const SERIAL_ONLY: [ElementConfig; 1] =
    [ElementConfig::single(StructureKind::SerialNumber).mandatory()];

/// Chain layout with the last slot mirrored to block 0
pub fn persistent_configs(mode: ProcessingMode) -> [CertificateConfig<'static>; SLOTS] {
    let mut configs = chain_configs(mode);
    configs[SLOTS - 1] = configs[SLOTS - 1].persistent(BlockId(0));
    configs
}

/// Initialized manager with the start-up load already run
pub fn manager<'a>(
    configs: &'a [CertificateConfig<'a>],
    engine: crate::config::EngineConfig,
    signal: &'a crate::hal::CompletionSignal,
) -> TestManager<'a> {
    let mut manager = TestManager::new(
        configs,
        engine,
        TlvParser,
        SoftCrypto::new(),
        SoftStore::new(),
        signal,
    )
    .expect("valid test configuration");
    manager.init();
    assert!(manager.tick().is_none());
    manager
}

/// Install chain slots `0..=last`
pub fn install_chain(manager: &mut TestManager<'_>, last: usize) {
    for i in 0..=last {
        manager
            .install_certificate(CertId(i as u16), &chain_cert(i))
            .expect("install chain member");
    }
}

/// Tick until the running workflow finishes, completing asynchronous jobs
pub fn drive(manager: &mut TestManager<'_>, signal: &crate::hal::CompletionSignal) -> crate::Completion {
    for _ in 0..256 {
        if let Some(completion) = manager.tick() {
            return completion;
        }
        manager.signature_service_mut().complete_pending(signal);
    }
    panic!("workflow did not finish");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_reads_builder_output() {
        let cert = CertBuilder::new(b"Issuer", b"Subject")
            .serial(b"\x2a")
            .extension(b"e1")
            .sign(&signing_key(1), &public_key(2));

        let layout = [
            ElementConfig::single(StructureKind::SerialNumber),
            ElementConfig::repeated(StructureKind::Extension, 2),
        ];
        let mut out = ParsedElements::new();
        assert_eq!(TlvParser.parse(&cert, &layout, &mut out), ParseOutcome::Ok);
        assert!(out.is_complete());
        assert_eq!(out.issuer.and_then(|s| s.slice(&cert)), Some(&b"Issuer"[..]));
        assert_eq!(out.occurrences(0).len(), 1);
        assert_eq!(out.occurrences(1).len(), 1);
        assert_eq!(out.public_key.map(|s| s.len), Some(32));
        assert_eq!(out.signature.map(|s| s.len), Some(64));
    }

    #[test]
    fn test_parser_rejections() {
        let mut out = ParsedElements::new();
        assert_eq!(TlvParser.parse(&[], &[], &mut out), ParseOutcome::InvalidFormat);

        let mut truncated = chain_cert(0);
        truncated.pop();
        out.clear();
        assert_eq!(TlvParser.parse(&truncated, &[], &mut out), ParseOutcome::InvalidFormat);

        let attribute = CertBuilder::new(b"a", b"b")
            .attribute_certificate()
            .sign(&signing_key(1), &public_key(1));
        out.clear();
        assert_eq!(TlvParser.parse(&attribute, &[], &mut out), ParseOutcome::InvalidType);

        let duplicate = CertBuilder::new(b"a", b"b")
            .field(TAG_SUBJECT, b"c")
            .sign(&signing_key(1), &public_key(1));
        out.clear();
        assert_eq!(TlvParser.parse(&duplicate, &[], &mut out), ParseOutcome::InvalidContent);
    }
}
