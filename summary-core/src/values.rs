//! Display-ready value types shared by the CDA and FHIR extractors.
//!
//! Units are always carried verbatim from the source. Nothing in here converts
//! between units; `ug` stays `ug` and `mg/mL` stays `mg/mL`.

use serde::{Deserialize, Serialize};

use crate::entry::CodedValue;

/// Measured amount (FHIR `Quantity`, CDA `PQ`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuantityValue {
    pub value: Option<f64>,
    pub comparator: Option<String>,
    pub unit: Option<String>,
    pub system: Option<String>,
    pub code: Option<String>,
}

impl QuantityValue {
    pub fn new(value: Option<f64>, unit: Option<String>) -> Self {
        Self {
            value,
            unit,
            ..Self::default()
        }
    }

    /// Unit as written in the source, falling back to the coded unit.
    pub fn unit_text(&self) -> Option<&str> {
        self.unit
            .as_deref()
            .or(self.code.as_deref())
            .filter(|unit| !unit.is_empty() && *unit != "1")
    }

    pub fn display(&self) -> Option<String> {
        let number = self.value.map(format_numeric);
        let unit = self.unit_text();
        let text = match (number, unit) {
            (Some(number), Some(unit)) => format!("{number} {unit}"),
            (Some(number), None) => number,
            (None, Some(unit)) => unit.to_string(),
            (None, None) => return None,
        };
        Some(match self.comparator.as_deref() {
            Some(comparator) if !comparator.is_empty() => format!("{comparator}{text}"),
            _ => text,
        })
    }
}

/// Interval between two quantities. Either bound may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RangeValue {
    pub low: Option<QuantityValue>,
    pub high: Option<QuantityValue>,
}

impl RangeValue {
    pub fn display(&self) -> Option<String> {
        let low = self.low.as_ref().and_then(QuantityValue::display);
        let high = self.high.as_ref().and_then(QuantityValue::display);
        match (low, high) {
            (Some(low), Some(high)) => Some(format!("{low} - {high}")),
            (Some(low), None) => Some(format!(">= {low}")),
            (None, Some(high)) => Some(format!("<= {high}")),
            (None, None) => None,
        }
    }
}

/// Numerator over denominator, e.g. a strength of 500 mg per 5 mL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RatioValue {
    pub numerator: Option<QuantityValue>,
    pub denominator: Option<QuantityValue>,
}

impl RatioValue {
    pub fn display(&self) -> Option<String> {
        let numerator = self.numerator.as_ref().and_then(QuantityValue::display)?;
        match self.denominator.as_ref().and_then(QuantityValue::display) {
            Some(denominator) => Some(format!("{numerator}/{denominator}")),
            None => Some(numerator),
        }
    }
}

/// Start/end pair. `is_ongoing` is set when a start exists without an end.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeriodValue {
    pub start: Option<String>,
    pub end: Option<String>,
    pub is_ongoing: bool,
}

impl PeriodValue {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        let is_ongoing = start.is_some() && end.is_none();
        Self {
            start,
            end,
            is_ongoing,
        }
    }
}

/// Structured part of a FHIR `Timing.repeat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepeatPattern {
    pub frequency: Option<u32>,
    pub frequency_max: Option<u32>,
    pub period: Option<f64>,
    pub period_unit: Option<String>,
    pub when: Vec<String>,
    pub day_of_week: Vec<String>,
    pub time_of_day: Vec<String>,
    pub count: Option<u32>,
    pub bounds: Option<PeriodValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimingValue {
    pub repeat_pattern: Option<RepeatPattern>,
    pub code: Option<String>,
    pub events: Vec<String>,
    pub human_readable: String,
}

/// Coded concept with its preferred display text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConceptValue {
    pub text: Option<String>,
    pub codings: Vec<CodedValue>,
    pub preferred_display: Option<String>,
}

impl ConceptValue {
    pub fn new(text: Option<String>, codings: Vec<CodedValue>) -> Self {
        let mut concept = Self {
            text: text.filter(|t| !t.trim().is_empty()),
            codings,
            preferred_display: None,
        };
        concept.refresh_preferred();
        concept
    }

    /// Preferred display: `text`, then the first coding display, then
    /// `{system}:{code}` as a last resort.
    pub fn refresh_preferred(&mut self) {
        self.preferred_display = self
            .text
            .clone()
            .or_else(|| {
                self.codings
                    .iter()
                    .find_map(|coding| coding.best_display().map(str::to_string))
            })
            .or_else(|| {
                self.codings.iter().find_map(|coding| {
                    let code = coding.code.value()?;
                    let system = coding
                        .system_name
                        .as_deref()
                        .or(coding.system.as_deref())?;
                    Some(format!("{system}:{code}"))
                })
            });
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttachmentValue {
    pub content_type: Option<String>,
    pub language: Option<String>,
    /// Base64 payload kept as received.
    pub inline_data: Option<String>,
    pub url: Option<String>,
    pub size: Option<u64>,
    pub size_display: Option<String>,
    pub title: Option<String>,
    pub creation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationValue {
    pub author: Option<String>,
    pub time: Option<String>,
    pub text: Option<String>,
}

/// Value carried by a clinical entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueData {
    Quantity(QuantityValue),
    Range(RangeValue),
    Ratio(RatioValue),
    Concept(ConceptValue),
    Period(PeriodValue),
    Attachment(AttachmentValue),
    /// Date-valued observation (e.g. expected delivery date).
    Date { raw: String, formatted: Option<String> },
    Text { value: String, unit: Option<String> },
}

impl ValueData {
    pub fn text(value: impl Into<String>) -> Self {
        ValueData::Text {
            value: value.into(),
            unit: None,
        }
    }

    pub fn display(&self) -> Option<String> {
        match self {
            ValueData::Quantity(quantity) => quantity.display(),
            ValueData::Range(range) => range.display(),
            ValueData::Ratio(ratio) => ratio.display(),
            ValueData::Concept(concept) => concept.preferred_display.clone(),
            ValueData::Period(period) => match (&period.start, &period.end) {
                (Some(start), Some(end)) => Some(format!("{start} - {end}")),
                (Some(start), None) => Some(format!("from {start}")),
                (None, Some(end)) => Some(format!("until {end}")),
                (None, None) => None,
            },
            ValueData::Attachment(attachment) => attachment
                .title
                .clone()
                .or_else(|| attachment.content_type.clone()),
            ValueData::Date { raw, formatted } => {
                Some(formatted.clone().unwrap_or_else(|| raw.clone()))
            }
            ValueData::Text { value, unit } => match unit {
                Some(unit) if !unit.is_empty() => Some(format!("{value} {unit}")),
                _ => Some(value.clone()),
            },
        }
    }
}

/// Render a decimal without trailing noise (`500.0` becomes `500`).
pub fn format_numeric(value: f64) -> String {
    if (value.fract() - 0.0).abs() < f64::EPSILON {
        format!("{value:.0}")
    } else if (value * 10.0).fract().abs() < f64::EPSILON {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Human readable byte count for attachments.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let size = bytes as f64;
    if size >= MB {
        format!("{:.1} MB", size / MB)
    } else if size >= KB {
        format!("{:.1} KB", size / KB)
    } else {
        format!("{bytes} bytes")
    }
}
