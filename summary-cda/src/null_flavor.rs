//! nullFlavor-aware scalar reads.
//!
//! Every scalar pulled out of a CDA document goes through [`resolve_value`], so
//! callers never see a raw nullFlavor code where a value was expected.

use summary_core::{NullFlavor, Recorded};

use crate::xml::XmlElement;

/// Where the scalar lives on the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource<'a> {
    Attribute(&'a str),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedValue {
    /// The literal value, or the nullFlavor phrase when `is_null`.
    pub value: Option<String>,
    pub is_null: bool,
    pub null_flavor: Option<NullFlavor>,
}

impl ResolvedValue {
    fn absent() -> Self {
        Self {
            value: None,
            is_null: false,
            null_flavor: None,
        }
    }

    pub fn into_recorded(self) -> Recorded<String> {
        match (self.null_flavor, self.value) {
            (Some(flavor), _) => Recorded::Null(flavor),
            (None, Some(value)) => Recorded::Value(value),
            (None, None) => Recorded::Absent,
        }
    }
}

/// Read a scalar from `element`. A `nullFlavor` attribute on the element takes
/// precedence over any literal value it may also carry.
pub fn resolve_value(element: Option<&XmlElement>, source: ValueSource<'_>) -> ResolvedValue {
    let Some(element) = element else {
        return ResolvedValue::absent();
    };

    if let Some(code) = element.attribute_text("nullFlavor") {
        let flavor = NullFlavor::from_code(&code);
        return ResolvedValue {
            value: Some(flavor.phrase().to_string()),
            is_null: true,
            null_flavor: Some(flavor),
        };
    }

    let value = match source {
        ValueSource::Attribute(name) => element.attribute_text(name),
        ValueSource::Text => {
            let text = element.flattened_text();
            (!text.is_empty()).then_some(text)
        }
    };

    ResolvedValue {
        value,
        is_null: false,
        null_flavor: None,
    }
}

pub fn recorded_attribute(element: Option<&XmlElement>, attribute: &str) -> Recorded<String> {
    resolve_value(element, ValueSource::Attribute(attribute)).into_recorded()
}

pub fn recorded_text(element: Option<&XmlElement>) -> Recorded<String> {
    resolve_value(element, ValueSource::Text).into_recorded()
}
