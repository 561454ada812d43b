//! Processors for the FHIR data types that carry clinical values.
//!
//! All of them are pure and tolerant: a missing sub-field yields a partial
//! result, and only input that is not an object at all yields `None`.

use serde_json::Value;
use summary_core::values::{format_numeric, format_size};
use summary_core::{
    AnnotationValue, AttachmentValue, CodedValue, ConceptValue, PeriodValue, QuantityValue,
    RangeValue, RatioValue, Recorded, RepeatPattern, TimingValue,
};

pub fn quantity(value: &Value) -> Option<QuantityValue> {
    value.as_object()?;
    Some(QuantityValue {
        value: number(value.get("value")),
        comparator: text(value, "comparator"),
        unit: text(value, "unit"),
        system: text(value, "system"),
        code: text(value, "code"),
    })
}

pub fn range(value: &Value) -> Option<RangeValue> {
    value.as_object()?;
    Some(RangeValue {
        low: value.get("low").and_then(quantity),
        high: value.get("high").and_then(quantity),
    })
}

pub fn ratio(value: &Value) -> Option<RatioValue> {
    value.as_object()?;
    Some(RatioValue {
        numerator: value.get("numerator").and_then(quantity),
        denominator: value.get("denominator").and_then(quantity),
    })
}

pub fn period(value: &Value) -> Option<PeriodValue> {
    value.as_object()?;
    Some(PeriodValue::new(text(value, "start"), text(value, "end")))
}

pub fn timing(value: &Value) -> Option<TimingValue> {
    value.as_object()?;
    let repeat_pattern = value.get("repeat").and_then(repeat);
    let code = value.get("code").and_then(codeable_concept);
    let events: Vec<String> = strings(value.get("event"));

    let human_readable = code
        .as_ref()
        .and_then(|concept| concept.preferred_display.clone())
        .or_else(|| repeat_pattern.as_ref().and_then(describe_repeat))
        .or_else(|| (!events.is_empty()).then(|| events.join(", ")))
        .unwrap_or_default();

    Some(TimingValue {
        repeat_pattern,
        code: code.and_then(|concept| concept.preferred_display),
        events,
        human_readable,
    })
}

fn repeat(value: &Value) -> Option<RepeatPattern> {
    value.as_object()?;
    let bounds = value.get("boundsPeriod").and_then(period);
    Some(RepeatPattern {
        frequency: unsigned(value.get("frequency")),
        frequency_max: unsigned(value.get("frequencyMax")),
        period: number(value.get("period")),
        period_unit: text(value, "periodUnit"),
        when: strings(value.get("when")),
        day_of_week: strings(value.get("dayOfWeek")),
        time_of_day: strings(value.get("timeOfDay")),
        count: unsigned(value.get("count")),
        bounds,
    })
}

/// Sentence form of a repeat pattern, e.g. "2 times every day, after meals".
fn describe_repeat(pattern: &RepeatPattern) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(period) = pattern.period {
        let unit = pattern.period_unit.as_deref().unwrap_or_default();
        let every = if (period - 1.0).abs() < f64::EPSILON {
            format!("every {}", unit_name(unit, false))
        } else {
            format!("every {} {}", format_numeric(period), unit_name(unit, true))
        };
        let frequency = match (pattern.frequency, pattern.frequency_max) {
            (Some(low), Some(high)) if high > low => Some(format!("{low}-{high} times")),
            (Some(1), _) | (None, _) => None,
            (Some(times), _) => Some(format!("{times} times")),
        };
        parts.push(match frequency {
            Some(frequency) => format!("{frequency} {every}"),
            None => every,
        });
    }
    if !pattern.when.is_empty() {
        parts.push(
            pattern
                .when
                .iter()
                .map(|code| event_label(code).unwrap_or(code.as_str()))
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    if !pattern.day_of_week.is_empty() {
        parts.push(format!("on {}", pattern.day_of_week.join(", ")));
    }
    if !pattern.time_of_day.is_empty() {
        parts.push(format!("at {}", pattern.time_of_day.join(", ")));
    }
    if let Some(count) = pattern.count {
        parts.push(format!("{count} doses"));
    }

    (!parts.is_empty()).then(|| parts.join(", "))
}

fn unit_name(unit: &str, plural: bool) -> &str {
    let (singular, many) = match unit {
        "s" => ("second", "seconds"),
        "min" => ("minute", "minutes"),
        "h" => ("hour", "hours"),
        "d" => ("day", "days"),
        "wk" => ("week", "weeks"),
        "mo" => ("month", "months"),
        "a" => ("year", "years"),
        other => (other, other),
    };
    if plural {
        many
    } else {
        singular
    }
}

fn event_label(code: &str) -> Option<&'static str> {
    Some(match code {
        "AC" => "before meals",
        "ACM" => "before breakfast",
        "ACD" => "before lunch",
        "ACV" => "before dinner",
        "PC" => "after meals",
        "PCM" => "after breakfast",
        "PCD" => "after lunch",
        "PCV" => "after dinner",
        "C" => "with meals",
        "HS" => "at bedtime",
        "WAKE" => "upon waking",
        "MORN" => "in the morning",
        "NIGHT" => "at night",
        _ => return None,
    })
}

pub fn coding(value: &Value) -> CodedValue {
    CodedValue::new(
        text(value, "system"),
        Recorded::non_empty(value.get("code").and_then(Value::as_str)),
        Recorded::non_empty(value.get("display").and_then(Value::as_str)),
    )
}

/// Preferred display: `text`, then the first `coding.display`, then
/// `system:code`.
pub fn codeable_concept(value: &Value) -> Option<ConceptValue> {
    value.as_object()?;
    let codings = value
        .get("coding")
        .and_then(Value::as_array)
        .map(|codings| codings.iter().map(coding).collect())
        .unwrap_or_default();
    Some(ConceptValue::new(text(value, "text"), codings))
}

/// First coding of a concept, or a text-only code when the concept has no codings.
pub fn primary_coding(value: &Value) -> Option<CodedValue> {
    let concept = codeable_concept(value)?;
    match concept.codings.into_iter().next() {
        Some(mut first) => {
            if !first.raw_display.is_value() {
                if let Some(text) = concept.text {
                    first.raw_display = Recorded::Value(text);
                    first.resolved_display = first.raw_display.clone();
                }
            }
            Some(first)
        }
        None => concept
            .text
            .map(|text| CodedValue::new(None, Recorded::Absent, Recorded::Value(text))),
    }
}

pub fn attachment(value: &Value) -> Option<AttachmentValue> {
    value.as_object()?;
    let inline_data = text(value, "data");
    let size = unsigned_u64(value.get("size")).or_else(|| {
        inline_data.as_deref().map(|data| {
            let padding = data.chars().rev().take_while(|c| *c == '=').count();
            ((data.len() / 4) * 3).saturating_sub(padding) as u64
        })
    });
    Some(AttachmentValue {
        content_type: text(value, "contentType"),
        language: text(value, "language"),
        inline_data,
        url: text(value, "url"),
        size_display: size.map(format_size),
        size,
        title: text(value, "title"),
        creation: text(value, "creation"),
    })
}

pub fn annotation(value: &Value) -> Option<AnnotationValue> {
    value.as_object()?;
    let author = text(value, "authorString").or_else(|| {
        value
            .get("authorReference")
            .and_then(|reference| text(reference, "display"))
    });
    Some(AnnotationValue {
        author,
        time: text(value, "time"),
        text: text(value, "text"),
    })
}

/// Trimmed, non-empty string field.
pub fn text(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// FHIR decimals are sometimes serialized as strings.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn unsigned(value: Option<&Value>) -> Option<u32> {
    unsigned_u64(value).and_then(|number| u32::try_from(number).ok())
}

fn unsigned_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn quantity_unit_is_not_converted() {
        let dose = quantity(&json!({
            "value": 500,
            "unit": "ug",
            "system": "http://unitsofmeasure.org",
            "code": "ug"
        }))
        .unwrap();
        assert_eq!(dose.display().as_deref(), Some("500 ug"));
    }

    const UCUM: &str = "http://unitsofmeasure.org";

    #[test]
    fn ratio_keeps_both_units() {
        let strength = ratio(&json!({
            "numerator": {"value": 250, "unit": "mg", "system": UCUM, "code": "mg"},
            "denominator": {"value": 5, "unit": "mL", "system": UCUM, "code": "mL"}
        }))
        .unwrap();
        assert_eq!(strength.display().as_deref(), Some("250 mg/5 mL"));
    }

    #[test]
    fn concept_display_preference() {
        let with_text = codeable_concept(&json!({
            "text": "Asthma",
            "coding": [{"display": "Asthma (disorder)"}]
        }));
        assert_eq!(with_text.unwrap().preferred_display.as_deref(), Some("Asthma"));

        let display_only = codeable_concept(&json!({
            "coding": [{"code": "195967001", "display": "Asthma (disorder)"}]
        }));
        assert_eq!(
            display_only.unwrap().preferred_display.as_deref(),
            Some("Asthma (disorder)")
        );

        let code_only = codeable_concept(&json!({
            "coding": [{"system": "http://snomed.info/sct", "code": "195967001"}]
        }));
        assert_eq!(
            code_only.unwrap().preferred_display.as_deref(),
            Some("SNOMED CT:195967001")
        );
    }

    #[test]
    fn partial_inputs_give_partial_results() {
        let open = period(&json!({"start": "2024-01-01"})).unwrap();
        assert!(open.is_ongoing);
        assert!(quantity(&json!("not an object")).is_none());

        let note = annotation(&json!({"text": "Reviewed"})).unwrap();
        assert_eq!(note.text.as_deref(), Some("Reviewed"));
        assert!(note.author.is_none());
    }

    #[test]
    fn timing_reads_like_a_prescription() {
        let schedule = timing(&json!({
            "repeat": {"frequency": 2, "period": 1, "periodUnit": "d", "when": ["PC"]}
        }))
        .unwrap();
        assert_eq!(schedule.human_readable, "2 times every day, after meals");

        let hourly =
            timing(&json!({"repeat": {"frequency": 1, "period": 8, "periodUnit": "h"}})).unwrap();
        assert_eq!(hourly.human_readable, "every 8 hours");

        let coded = timing(&json!({"code": {"text": "Twice a day"}})).unwrap();
        assert_eq!(coded.human_readable, "Twice a day");
    }

    #[test]
    fn attachment_size_display() {
        let pdf = attachment(&json!({"contentType": "application/pdf", "size": 2048})).unwrap();
        assert_eq!(pdf.size_display.as_deref(), Some("2.0 KB"));
    }
}
