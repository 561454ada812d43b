//! Clinical section entries.

use serde::{Deserialize, Serialize};

use crate::codesystems;
use crate::model::{Recorded, SectionType, SourceKind};
use crate::values::ValueData;

/// Outcome of terminology resolution for one code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodeResolution {
    /// Not looked up yet.
    #[default]
    Pending,
    Resolved,
    /// Lookup failed, timed out or found nothing. The raw display stays in place.
    Unresolved,
    /// Nothing to look up (null-flavored code or no code system).
    NotApplicable,
}

/// One code with its source display and, after enhancement, its resolved display.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodedValue {
    pub system: Option<String>,
    pub system_name: Option<String>,
    pub code: Recorded<String>,
    pub raw_display: Recorded<String>,
    pub resolved_display: Recorded<String>,
    pub resolution: CodeResolution,
}

impl CodedValue {
    pub fn new(
        system: Option<String>,
        code: Recorded<String>,
        raw_display: Recorded<String>,
    ) -> Self {
        let system_name = system
            .as_deref()
            .and_then(codesystems::name_for_system)
            .map(str::to_string);
        let resolution = if code.is_value() && system.is_some() {
            CodeResolution::Pending
        } else {
            CodeResolution::NotApplicable
        };
        Self {
            system,
            system_name,
            resolved_display: raw_display.clone(),
            code,
            raw_display,
            resolution,
        }
    }

    /// Record the terminology answer. A miss keeps the raw display untouched.
    pub fn apply_resolution(&mut self, display: Option<String>) {
        match display.filter(|text| !text.trim().is_empty()) {
            Some(text) => {
                self.resolved_display = Recorded::Value(text);
                self.resolution = CodeResolution::Resolved;
            }
            None => {
                self.resolved_display = self.raw_display.clone();
                self.resolution = CodeResolution::Unresolved;
            }
        }
    }

    /// Best human text available. Returns `None` rather than falling back to the code.
    pub fn best_display(&self) -> Option<&str> {
        self.resolved_display
            .value()
            .or_else(|| self.raw_display.value())
            .map(String::as_str)
    }
}

/// Point in time or interval, with the canonical display filled during enhancement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EffectiveTime {
    pub point: Recorded<String>,
    pub low: Recorded<String>,
    pub high: Recorded<String>,
    /// Dosing frequency when the source carried a periodic interval.
    pub frequency: Option<String>,
    pub formatted: Option<String>,
}

impl EffectiveTime {
    pub fn point(value: Recorded<String>) -> Self {
        Self {
            point: value,
            ..Self::default()
        }
    }

    pub fn interval(low: Recorded<String>, high: Recorded<String>) -> Self {
        Self {
            low,
            high,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.point, Recorded::Absent)
            && matches!(self.low, Recorded::Absent)
            && matches!(self.high, Recorded::Absent)
    }

    pub fn is_ongoing(&self) -> bool {
        self.low.is_value() && !self.high.is_value()
    }

    /// Earliest raw timestamp, used for ordering.
    pub fn sort_key(&self) -> Option<&str> {
        self.point
            .value()
            .or_else(|| self.low.value())
            .or_else(|| self.high.value())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reaction {
    pub manifestation: Option<CodedValue>,
    pub severity: Option<String>,
    pub onset: Recorded<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AllergyDetails {
    pub agent: Option<CodedValue>,
    pub category: Option<String>,
    pub criticality: Option<String>,
    pub severity: Option<String>,
    pub clinical_status: Option<String>,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Ingredient {
    pub substance: CodedValue,
    pub strength: Option<ValueData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MedicationDetails {
    pub product: Option<CodedValue>,
    pub dose_form: Option<CodedValue>,
    pub ingredients: Vec<Ingredient>,
    pub dose: Option<ValueData>,
    pub route: Option<CodedValue>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProblemDetails {
    pub problem: Option<CodedValue>,
    pub onset: Recorded<String>,
    pub resolution: Recorded<String>,
    pub clinical_status: Option<String>,
    pub severity: Option<String>,
}

/// Typed field set per entry family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryDetails {
    Allergy(AllergyDetails),
    Medication(MedicationDetails),
    Problem(ProblemDetails),
    Generic,
}

impl Default for EntryDetails {
    fn default() -> Self {
        EntryDetails::Generic
    }
}

/// Nested entry linked through a CDA `entryRelationship` or a FHIR sub-structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryRelationship {
    pub type_code: Option<String>,
    pub inversion: bool,
    pub entry: ClinicalSectionEntry,
}

/// One clinical fact: a medication, an allergy, a problem...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalSectionEntry {
    pub source_id: Option<String>,
    pub section: SectionType,
    pub source: SourceKind,
    pub details: EntryDetails,
    pub display_name: Recorded<String>,
    pub status_code: Option<String>,
    pub effective_time: EffectiveTime,
    pub codes: Vec<CodedValue>,
    pub value: Option<ValueData>,
    pub relationships: Vec<EntryRelationship>,
    pub notes: Vec<String>,
}

impl ClinicalSectionEntry {
    pub fn new(section: SectionType, source: SourceKind) -> Self {
        Self {
            source_id: None,
            section,
            source,
            details: EntryDetails::Generic,
            display_name: Recorded::Absent,
            status_code: None,
            effective_time: EffectiveTime::default(),
            codes: Vec::new(),
            value: None,
            relationships: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Visit every code in the entry, its typed details and nested relationships.
    pub fn for_each_code_mut(&mut self, f: &mut dyn FnMut(&mut CodedValue)) {
        for code in &mut self.codes {
            f(code);
        }
        match &mut self.details {
            EntryDetails::Allergy(allergy) => {
                if let Some(agent) = allergy.agent.as_mut() {
                    f(agent);
                }
                for reaction in &mut allergy.reactions {
                    if let Some(manifestation) = reaction.manifestation.as_mut() {
                        f(manifestation);
                    }
                }
            }
            EntryDetails::Medication(medication) => {
                if let Some(product) = medication.product.as_mut() {
                    f(product);
                }
                if let Some(form) = medication.dose_form.as_mut() {
                    f(form);
                }
                if let Some(route) = medication.route.as_mut() {
                    f(route);
                }
                for ingredient in &mut medication.ingredients {
                    f(&mut ingredient.substance);
                }
            }
            EntryDetails::Problem(problem) => {
                if let Some(code) = problem.problem.as_mut() {
                    f(code);
                }
            }
            EntryDetails::Generic => {}
        }
        if let Some(ValueData::Concept(concept)) = self.value.as_mut() {
            for coding in &mut concept.codings {
                f(coding);
            }
        }
        for relationship in &mut self.relationships {
            relationship.entry.for_each_code_mut(f);
        }
    }

    /// Primary code of the entry (the one that names it).
    pub fn primary_code(&self) -> Option<&CodedValue> {
        let typed = match &self.details {
            EntryDetails::Allergy(allergy) => allergy.agent.as_ref(),
            EntryDetails::Medication(medication) => medication
                .product
                .as_ref()
                .or_else(|| medication.ingredients.first().map(|i| &i.substance)),
            EntryDetails::Problem(problem) => problem.problem.as_ref(),
            EntryDetails::Generic => None,
        };
        typed.or_else(|| self.codes.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_code_keeps_raw_display() {
        let mut code = CodedValue::new(
            Some("2.16.840.1.113883.6.73".into()),
            Recorded::Value("C09AA05".into()),
            Recorded::Value("ramipril".into()),
        );
        assert_eq!(code.system_name.as_deref(), Some("ATC"));
        code.apply_resolution(None);
        assert_eq!(code.resolution, CodeResolution::Unresolved);
        assert_eq!(code.resolved_display, Recorded::Value("ramipril".into()));
    }

    #[test]
    fn missing_display_is_never_replaced_by_code() {
        let mut code = CodedValue::new(
            Some("http://snomed.info/sct".into()),
            Recorded::Value("91936005".into()),
            Recorded::Absent,
        );
        code.apply_resolution(None);
        assert_eq!(code.best_display(), None);
    }
}
