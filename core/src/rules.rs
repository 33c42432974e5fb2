//! # Element Rules
//!
//! Rules run after a successful parse. A certificate failing any rule of
//! its slot is marked `InvalidContent`.

use core::fmt::Debug;

use crate::hal::ParsedElements;
use crate::ElementId;

/// Predicate over a parsed certificate
pub trait ElementRule: Debug + Sync {
    /// Whether the certificate in `data` satisfies the rule
    fn check(&self, data: &[u8], elements: &ParsedElements) -> bool;
}

fn element<'d>(data: &'d [u8], elements: &ParsedElements, id: ElementId) -> Option<&'d [u8]> {
    id.locate(elements).and_then(|span| span.slice(data))
}

/// Element must be present
#[derive(Debug, Clone, Copy)]
pub struct RequirePresent(pub ElementId);

impl ElementRule for RequirePresent {
    fn check(&self, data: &[u8], elements: &ParsedElements) -> bool {
        element(data, elements, self.0).is_some()
    }
}

/// Element must equal a fixed value
#[derive(Debug, Clone, Copy)]
pub struct RequireValue {
    /// Element to compare
    pub element: ElementId,
    /// Expected bytes
    pub value: &'static [u8],
}

impl ElementRule for RequireValue {
    fn check(&self, data: &[u8], elements: &ParsedElements) -> bool {
        element(data, elements, self.element) == Some(self.value)
    }
}

/// Element length must lie in `min..=max`
#[derive(Debug, Clone, Copy)]
pub struct LengthRange {
    /// Element to measure
    pub element: ElementId,
    /// Minimum length
    pub min: usize,
    /// Maximum length
    pub max: usize,
}

impl ElementRule for LengthRange {
    fn check(&self, data: &[u8], elements: &ParsedElements) -> bool {
        element(data, elements, self.element)
            .map_or(false, |bytes| (self.min..=self.max).contains(&bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Span;

    fn sample() -> ([u8; 8], ParsedElements) {
        let data = *b"ACMEleaf";
        let mut elements = ParsedElements::new();
        elements.issuer = Some(Span::new(0, 4));
        elements.subject = Some(Span::new(4, 4));
        elements.push_occurrence(0, Span::new(0, 2)).unwrap();
        (data, elements)
    }

    #[test]
    fn test_require_present() {
        let (data, elements) = sample();
        assert!(RequirePresent(ElementId::Issuer).check(&data, &elements));
        assert!(RequirePresent(ElementId::Configured(0)).check(&data, &elements));
        assert!(!RequirePresent(ElementId::PublicKey).check(&data, &elements));
        assert!(!RequirePresent(ElementId::Configured(1)).check(&data, &elements));
    }

    #[test]
    fn test_require_value() {
        let (data, elements) = sample();
        let rule = RequireValue {
            element: ElementId::Issuer,
            value: b"ACME",
        };
        assert!(rule.check(&data, &elements));

        let rule = RequireValue {
            element: ElementId::Subject,
            value: b"ACME",
        };
        assert!(!rule.check(&data, &elements));
    }

    #[test]
    fn test_length_range() {
        let (data, elements) = sample();
        let rule = LengthRange {
            element: ElementId::Configured(0),
            min: 1,
            max: 2,
        };
        assert!(rule.check(&data, &elements));

        let rule = LengthRange {
            element: ElementId::Subject,
            min: 5,
            max: 64,
        };
        assert!(!rule.check(&data, &elements));
    }
}
