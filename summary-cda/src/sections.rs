//! Structured entry extraction for CDA clinical sections.
//!
//! Each `entry` is walked by act class. Concern acts (the allergy and problem
//! wrappers) are unwrapped to the observation they carry, organizers are
//! flattened into their component observations. Narrative-only sections are
//! legitimate and simply yield no entries.

use std::collections::HashMap;

use summary_core::{
    AllergyDetails, ClinicalSectionEntry, CodedValue, ConceptValue, EffectiveTime, EntryDetails,
    EntryRelationship, Ingredient, MedicationDetails, NullFlavor, ProblemDetails, QuantityValue,
    RangeValue, RatioValue, Reaction, Recorded, SectionType, SourceKind, ValueData,
};
use tracing::debug;

use crate::locator::ElementLocator;
use crate::null_flavor::recorded_attribute;
use crate::xml::XmlElement;

const ACT_CLASSES: &[&str] = &[
    "substanceAdministration",
    "observation",
    "act",
    "procedure",
    "supply",
    "organizer",
    "encounter",
];

const CLINICAL_STATUS_CODE: &str = "33999-4";
const SEVERITY_CODE: &str = "SEV";
const CRITICALITY_CODES: &[&str] = &["CRIT", "82606-5"];
const INSTRUCTION_CODES: &[&str] = &["PINSTRUCT", "89187-7"];

/// Extract every structured entry of one `section` element.
pub fn extract_section(
    section: &XmlElement,
    section_type: SectionType,
    locator: &ElementLocator,
) -> Vec<ClinicalSectionEntry> {
    let narrative = NarrativeIndex::build(section, locator);
    let extractor = EntryExtractor {
        section_type,
        locator,
        narrative: &narrative,
    };

    let entries: Vec<ClinicalSectionEntry> = locator
        .children(section, &["entry"])
        .into_iter()
        .flat_map(|entry| extractor.extract_entry(entry))
        .collect();

    debug!(section = %section_type, entries = entries.len(), "extracted CDA section");
    entries
}

/// `ID` attributes of the section narrative, for `originalText/reference` lookups.
#[derive(Debug, Default)]
struct NarrativeIndex {
    by_id: HashMap<String, String>,
}

impl NarrativeIndex {
    fn build(section: &XmlElement, locator: &ElementLocator) -> Self {
        let mut by_id = HashMap::new();
        if let Some(text) = locator.child(section, &["text"]) {
            for element in text.descendants() {
                if let Some(id) = element.attribute("ID").or_else(|| element.attribute("id")) {
                    let content = element.flattened_text();
                    if !content.is_empty() {
                        by_id.insert(id.to_string(), content);
                    }
                }
            }
        }
        Self { by_id }
    }

    fn resolve(&self, reference: &str) -> Option<&str> {
        self.by_id
            .get(reference.trim().trim_start_matches('#'))
            .map(String::as_str)
    }
}

struct EntryExtractor<'a> {
    section_type: SectionType,
    locator: &'a ElementLocator,
    narrative: &'a NarrativeIndex,
}

impl EntryExtractor<'_> {
    fn extract_entry(&self, entry: &XmlElement) -> Vec<ClinicalSectionEntry> {
        match self.locator.child(entry, ACT_CLASSES) {
            Some(act) => self.extract_act(act),
            None => Vec::new(),
        }
    }

    fn extract_act(&self, act: &XmlElement) -> Vec<ClinicalSectionEntry> {
        if self.locator.is(act, &["organizer"]) {
            let organizer_time = self.effective_time(act);
            let mut entries: Vec<ClinicalSectionEntry> = self
                .locator
                .children(act, &["component"])
                .into_iter()
                .filter_map(|component| self.locator.child(component, ACT_CLASSES))
                .flat_map(|inner| self.extract_act(inner))
                .collect();
            for entry in &mut entries {
                if entry.effective_time.is_empty() {
                    entry.effective_time = organizer_time.clone();
                }
            }
            return entries;
        }
        vec![self.build_entry(act)]
    }

    fn build_entry(&self, act: &XmlElement) -> ClinicalSectionEntry {
        let (primary, concern) = self.unwrap_concern(act);
        let mut entry = self.base_entry(primary);

        if let Some(concern) = concern {
            // Observations inside a concern are always "completed"; the concern
            // carries the tracking status.
            if let Some(status) = self
                .locator
                .child(concern, &["statusCode"])
                .and_then(|status| status.attribute_text("code"))
            {
                entry.status_code = Some(status);
            }
            if entry.effective_time.is_empty() {
                entry.effective_time = self.effective_time(concern);
            }
            if entry.source_id.is_none() {
                entry.source_id = self.source_id(concern);
            }
        }

        entry.details = match self.section_type {
            SectionType::Allergies => EntryDetails::Allergy(self.allergy_details(primary, &entry)),
            SectionType::Medications => {
                EntryDetails::Medication(self.medication_details(primary, &entry))
            }
            SectionType::Problems | SectionType::PastIllness => {
                EntryDetails::Problem(self.problem_details(primary, &entry))
            }
            _ => EntryDetails::Generic,
        };

        if matches!(
            self.section_type,
            SectionType::Immunizations | SectionType::MedicalDevices
        ) {
            if let Some(subject) = self.subject_code(primary) {
                entry.codes.insert(0, subject);
            }
        }

        entry.display_name = self.display_name(primary, &entry);
        entry
    }

    /// Concern `act` wrappers carry the real observation in an entryRelationship.
    fn unwrap_concern<'x>(&self, act: &'x XmlElement) -> (&'x XmlElement, Option<&'x XmlElement>) {
        let wraps_concerns = matches!(
            self.section_type,
            SectionType::Allergies | SectionType::Problems | SectionType::PastIllness
        );
        if !wraps_concerns || !self.locator.is(act, &["act"]) {
            return (act, None);
        }
        let inner = self
            .locator
            .children(act, &["entryRelationship"])
            .into_iter()
            .filter_map(|rel| self.locator.child(rel, &["observation"]))
            .next();
        match inner {
            Some(observation) => (observation, Some(act)),
            None => (act, None),
        }
    }

    /// Fields common to every act class.
    fn base_entry(&self, act: &XmlElement) -> ClinicalSectionEntry {
        let mut entry = ClinicalSectionEntry::new(self.section_type, SourceKind::Cda);
        entry.source_id = self.source_id(act);
        entry.codes = self
            .locator
            .child(act, &["code"])
            .map(|code| self.coded_values(code))
            .unwrap_or_default();
        entry.status_code = self
            .locator
            .child(act, &["statusCode"])
            .and_then(|status| status.attribute_text("code"));
        entry.effective_time = self.effective_time(act);
        entry.value = self
            .locator
            .child(act, &["value"])
            .and_then(|value| self.value_data(value));

        if let Some(text) = self.locator.child(act, &["text"]).and_then(|t| self.text_content(t)) {
            entry.notes.push(text);
        }
        if act.attribute("negationInd") == Some("true") {
            entry.notes.push("Negation indicated".to_string());
        }

        entry.relationships = self
            .locator
            .children(act, &["entryRelationship"])
            .into_iter()
            .filter_map(|rel| {
                let inner = self.locator.child(rel, ACT_CLASSES)?;
                let mut nested = self.base_entry(inner);
                nested.display_name = self.generic_display(inner, &nested);
                Some(EntryRelationship {
                    type_code: rel.attribute_text("typeCode"),
                    inversion: rel.attribute("inversionInd") == Some("true"),
                    entry: nested,
                })
            })
            .collect();

        entry
    }

    fn source_id(&self, act: &XmlElement) -> Option<String> {
        let id = self.locator.child(act, &["id"])?;
        id.attribute_text("extension").or_else(|| id.attribute_text("root"))
    }

    /// Product or device code that names a substance administration or supply.
    fn subject_code(&self, act: &XmlElement) -> Option<CodedValue> {
        let material = self
            .locator
            .path(act, &["consumable", "manufacturedProduct", "manufacturedMaterial"])
            .or_else(|| {
                self.locator
                    .path(act, &["product", "manufacturedProduct", "manufacturedMaterial"])
            });
        if let Some(material) = material {
            return self.named_code(material, &["code"]);
        }
        let device = self
            .locator
            .children(act, &["participant"])
            .into_iter()
            .find_map(|p| self.locator.path(p, &["participantRole", "playingDevice"]))?;
        self.named_code(device, &["code"])
    }

    /// Code of `holder`, with the holder's `name` standing in for a missing display.
    fn named_code(&self, holder: &XmlElement, code_names: &[&str]) -> Option<CodedValue> {
        let name = self
            .locator
            .child(holder, &["name"])
            .map(XmlElement::flattened_text)
            .filter(|text| !text.is_empty());
        match self.locator.child(holder, code_names) {
            Some(code) => {
                let mut coded = self.coded_value(code);
                if !coded.raw_display.is_value() {
                    if let Some(name) = name {
                        coded.raw_display = Recorded::Value(name);
                        coded.resolved_display = coded.raw_display.clone();
                    }
                }
                Some(coded)
            }
            None => name.map(|name| CodedValue::new(None, Recorded::Absent, Recorded::Value(name))),
        }
    }

    fn coded_value(&self, element: &XmlElement) -> CodedValue {
        let system = element.attribute_text("codeSystem");
        let original = self.original_text(element);
        if let Some(code) = element.attribute_text("nullFlavor") {
            let flavor = NullFlavor::from_code(&code);
            return CodedValue::new(
                system,
                Recorded::Null(flavor.clone()),
                original.or(Recorded::Null(flavor)),
            );
        }
        let display = Recorded::non_empty(element.attribute("displayName")).or(original);
        CodedValue::new(system, Recorded::non_empty(element.attribute("code")), display)
    }

    /// Primary code followed by its `translation` children.
    fn coded_values(&self, element: &XmlElement) -> Vec<CodedValue> {
        std::iter::once(self.coded_value(element))
            .chain(
                self.locator
                    .children(element, &["translation"])
                    .into_iter()
                    .map(|translation| self.coded_value(translation)),
            )
            .collect()
    }

    fn original_text(&self, element: &XmlElement) -> Recorded<String> {
        match self.locator.child(element, &["originalText"]) {
            Some(original) => Recorded::from_option(self.text_content(original)),
            None => Recorded::Absent,
        }
    }

    /// Inline text, or the narrative fragment it points at through `reference`.
    fn text_content(&self, element: &XmlElement) -> Option<String> {
        if let Some(reference) = self
            .locator
            .child(element, &["reference"])
            .and_then(|r| r.attribute("value"))
        {
            if let Some(text) = self.narrative.resolve(reference) {
                return Some(text.to_string());
            }
        }
        let text = element.flattened_text();
        (!text.is_empty()).then_some(text)
    }

    fn effective_time(&self, act: &XmlElement) -> EffectiveTime {
        let mut time = EffectiveTime::default();
        for element in self.locator.children(act, &["effectiveTime"]) {
            if let Some(frequency) = self.frequency(element) {
                time.frequency = Some(frequency);
                continue;
            }
            if let Some(code) = element.attribute_text("nullFlavor") {
                if time.is_empty() {
                    time.point = Recorded::Null(NullFlavor::from_code(&code));
                }
                continue;
            }
            let low = self.locator.child(element, &["low"]);
            let high = self.locator.child(element, &["high"]);
            let center = self.locator.child(element, &["center"]);
            if low.is_some() || high.is_some() {
                time.low = recorded_attribute(low, "value");
                time.high = recorded_attribute(high, "value");
            } else if center.is_some() {
                time.point = recorded_attribute(center, "value");
            } else {
                time.point = recorded_attribute(Some(element), "value");
            }
        }
        time
    }

    /// Periodic (`PIVL_TS`) or event-related (`EIVL_TS`) dosing frequency.
    fn frequency(&self, element: &XmlElement) -> Option<String> {
        let kind = element.xsi_type().map(str::to_ascii_uppercase);
        if kind.as_deref() == Some("EIVL_TS") {
            let event = self
                .locator
                .child(element, &["event"])
                .and_then(|e| e.attribute_text("code"))?;
            return Some(event_label(&event).map(str::to_string).unwrap_or(event));
        }
        let period = self.locator.child(element, &["period"])?;
        if kind.is_some() && kind.as_deref() != Some("PIVL_TS") {
            return None;
        }
        let value = period.attribute_text("value")?;
        let unit = period.attribute_text("unit").unwrap_or_default();
        Some(period_phrase(&value, &unit))
    }

    fn value_data(&self, element: &XmlElement) -> Option<ValueData> {
        if let Some(code) = element.attribute_text("nullFlavor") {
            return Some(ValueData::text(NullFlavor::from_code(&code).phrase()));
        }
        let kind = element.xsi_type().map(str::to_ascii_uppercase);
        match kind.as_deref() {
            Some("PQ") => Some(ValueData::Quantity(physical_quantity(element))),
            Some("IVL_PQ") => Some(ValueData::Range(RangeValue {
                low: self.locator.child(element, &["low"]).map(physical_quantity),
                high: self.locator.child(element, &["high"]).map(physical_quantity),
            })),
            Some("RTO") | Some("RTO_PQ_PQ") | Some("RTO_QTY_QTY") => {
                Some(ValueData::Ratio(self.ratio(element)))
            }
            Some("CD") | Some("CE") | Some("CV") | Some("CO") | Some("CS") => {
                Some(ValueData::Concept(self.concept(element)))
            }
            Some("TS") => element.attribute_text("value").map(|raw| ValueData::Date {
                raw,
                formatted: None,
            }),
            Some("IVL_TS") => Some(ValueData::Period(summary_core::PeriodValue::new(
                self.locator
                    .child(element, &["low"])
                    .and_then(|low| low.attribute_text("value")),
                self.locator
                    .child(element, &["high"])
                    .and_then(|high| high.attribute_text("value")),
            ))),
            Some("INT") | Some("REAL") => Some(ValueData::Quantity(QuantityValue::new(
                element.attribute("value").and_then(parse_number),
                None,
            ))),
            Some("BL") => element.attribute_text("value").map(ValueData::text),
            Some(_) => self.text_content(element).map(ValueData::text),
            None => {
                if element.attribute("unit").is_some() {
                    Some(ValueData::Quantity(physical_quantity(element)))
                } else if element.attribute("code").is_some()
                    || element.attribute("codeSystem").is_some()
                {
                    Some(ValueData::Concept(self.concept(element)))
                } else if let Some(value) = element.attribute_text("value") {
                    Some(ValueData::text(value))
                } else {
                    self.text_content(element).map(ValueData::text)
                }
            }
        }
    }

    fn concept(&self, element: &XmlElement) -> ConceptValue {
        let text = self.original_text(element).into_value();
        ConceptValue::new(text, self.coded_values(element))
    }

    fn ratio(&self, element: &XmlElement) -> RatioValue {
        RatioValue {
            numerator: self.locator.child(element, &["numerator"]).map(physical_quantity),
            denominator: self.locator.child(element, &["denominator"]).map(physical_quantity),
        }
    }

    /// Observations nested under `act` through entryRelationship, with their type codes.
    fn related_observations<'x>(
        &self,
        act: &'x XmlElement,
    ) -> Vec<(Option<String>, &'x XmlElement)> {
        self.locator
            .children(act, &["entryRelationship"])
            .into_iter()
            .filter_map(|rel| {
                let observation = self.locator.child(rel, &["observation", "act"])?;
                Some((rel.attribute_text("typeCode"), observation))
            })
            .collect()
    }

    fn related_by_code<'x>(&self, act: &'x XmlElement, codes: &[&str]) -> Option<&'x XmlElement> {
        self.related_observations(act)
            .into_iter()
            .map(|(_, observation)| observation)
            .find(|observation| {
                self.locator
                    .child(observation, &["code"])
                    .and_then(|code| code.attribute("code"))
                    .is_some_and(|code| codes.contains(&code))
            })
    }

    /// Display of the coded `value` of a related status/severity observation.
    fn related_value_display(&self, act: &XmlElement, codes: &[&str]) -> Option<String> {
        let observation = self.related_by_code(act, codes)?;
        let value = self.locator.child(observation, &["value"])?;
        self.coded_value(value).raw_display.into_value()
    }

    fn allergy_details(
        &self,
        observation: &XmlElement,
        entry: &ClinicalSectionEntry,
    ) -> AllergyDetails {
        let agent = self
            .locator
            .children(observation, &["participant"])
            .into_iter()
            .filter(|p| p.attribute("typeCode").map_or(true, |code| code == "CSM"))
            .find_map(|p| self.locator.path(p, &["participantRole", "playingEntity"]))
            .and_then(|entity| self.named_code(entity, &["code"]))
            .or_else(|| match &entry.value {
                Some(ValueData::Concept(concept)) => concept.codings.first().cloned(),
                _ => None,
            });

        let reactions = self
            .related_observations(observation)
            .into_iter()
            .filter(|(type_code, _)| type_code.as_deref() == Some("MFST"))
            .map(|(_, reaction)| Reaction {
                manifestation: self
                    .locator
                    .child(reaction, &["value"])
                    .map(|value| self.coded_value(value)),
                severity: self.related_value_display(reaction, &[SEVERITY_CODE]),
                onset: {
                    let time = self.effective_time(reaction);
                    time.point.or(time.low)
                },
            })
            .collect();

        AllergyDetails {
            agent,
            category: entry
                .codes
                .first()
                .and_then(|code| code.raw_display.value().cloned()),
            criticality: self.related_value_display(observation, CRITICALITY_CODES),
            severity: self.related_value_display(observation, &[SEVERITY_CODE]),
            clinical_status: self
                .related_value_display(observation, &[CLINICAL_STATUS_CODE])
                .or_else(|| entry.status_code.clone()),
            reactions,
        }
    }

    fn medication_details(
        &self,
        act: &XmlElement,
        entry: &ClinicalSectionEntry,
    ) -> MedicationDetails {
        let material = self
            .locator
            .path(act, &["consumable", "manufacturedProduct", "manufacturedMaterial"]);

        let ingredients = material
            .map(|material| {
                self.locator
                    .children(material, &["ingredient"])
                    .into_iter()
                    .filter_map(|ingredient| self.ingredient(ingredient))
                    .collect()
            })
            .unwrap_or_default();

        let dose = self.locator.child(act, &["doseQuantity"]).map(|dose| {
            let low = self.locator.child(dose, &["low"]);
            let high = self.locator.child(dose, &["high"]);
            if low.is_some() || high.is_some() {
                ValueData::Range(RangeValue {
                    low: low.map(physical_quantity),
                    high: high.map(physical_quantity),
                })
            } else {
                ValueData::Quantity(physical_quantity(dose))
            }
        });

        let instructions = self
            .related_by_code(act, INSTRUCTION_CODES)
            .and_then(|instruction| self.locator.child(instruction, &["text"]))
            .and_then(|text| self.text_content(text));

        MedicationDetails {
            product: material.and_then(|m| self.named_code(m, &["code"])),
            dose_form: material
                .and_then(|m| self.locator.child(m, &["formCode"]))
                .map(|form| self.coded_value(form)),
            ingredients,
            dose,
            route: self
                .locator
                .child(act, &["routeCode"])
                .map(|route| self.coded_value(route)),
            frequency: entry.effective_time.frequency.clone(),
            instructions,
        }
    }

    fn ingredient(&self, ingredient: &XmlElement) -> Option<Ingredient> {
        let substance_holder = self
            .locator
            .child(ingredient, &["ingredientSubstance", "ingredientManufacturedMaterial"])?;
        let substance = self.named_code(substance_holder, &["code"])?;
        let strength = self
            .locator
            .child(ingredient, &["quantity"])
            .map(|quantity| ValueData::Ratio(self.ratio(quantity)));
        Some(Ingredient { substance, strength })
    }

    fn problem_details(
        &self,
        observation: &XmlElement,
        entry: &ClinicalSectionEntry,
    ) -> ProblemDetails {
        let problem = match &entry.value {
            Some(ValueData::Concept(concept)) => concept.codings.first().cloned(),
            _ => None,
        }
        .or_else(|| entry.codes.first().cloned());

        ProblemDetails {
            problem,
            onset: entry
                .effective_time
                .low
                .clone()
                .or(entry.effective_time.point.clone()),
            resolution: entry.effective_time.high.clone(),
            clinical_status: self
                .related_value_display(observation, &[CLINICAL_STATUS_CODE])
                .or_else(|| entry.status_code.clone()),
            severity: self.related_value_display(observation, &[SEVERITY_CODE]),
        }
    }

    fn display_name(&self, act: &XmlElement, entry: &ClinicalSectionEntry) -> Recorded<String> {
        let typed = match &entry.details {
            EntryDetails::Allergy(allergy) => allergy.agent.as_ref().map(|a| a.raw_display.clone()),
            EntryDetails::Medication(medication) => medication
                .product
                .as_ref()
                .map(|p| p.raw_display.clone())
                .or_else(|| {
                    medication
                        .ingredients
                        .first()
                        .map(|i| i.substance.raw_display.clone())
                }),
            EntryDetails::Problem(problem) => {
                problem.problem.as_ref().map(|p| p.raw_display.clone())
            }
            EntryDetails::Generic => None,
        };
        typed
            .unwrap_or_default()
            .or(self.generic_display(act, entry))
    }

    fn generic_display(&self, act: &XmlElement, entry: &ClinicalSectionEntry) -> Recorded<String> {
        let from_code = entry
            .codes
            .first()
            .map(|code| code.raw_display.clone())
            .unwrap_or_default();
        let from_value = match &entry.value {
            Some(ValueData::Concept(concept)) => Recorded::from_option(concept.text.clone())
                .or(concept
                    .codings
                    .first()
                    .map(|c| c.raw_display.clone())
                    .unwrap_or_default()),
            _ => Recorded::Absent,
        };
        let from_text = Recorded::from_option(
            self.locator
                .child(act, &["text"])
                .and_then(|text| self.text_content(text)),
        );
        // A null-flavored code display is only used when nothing better exists.
        match from_code {
            Recorded::Value(_) => from_code,
            other => from_value.or(from_text).or(other),
        }
    }
}

fn physical_quantity(element: &XmlElement) -> QuantityValue {
    QuantityValue::new(
        element.attribute("value").and_then(parse_number),
        element.attribute_text("unit"),
    )
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn period_phrase(value: &str, unit: &str) -> String {
    let (singular, plural) = match unit {
        "s" => ("second", "seconds"),
        "min" => ("minute", "minutes"),
        "h" => ("hour", "hours"),
        "d" => ("day", "days"),
        "wk" => ("week", "weeks"),
        "mo" => ("month", "months"),
        "a" => ("year", "years"),
        other => (other, other),
    };
    match parse_number(value) {
        Some(number) if (number - 1.0).abs() < f64::EPSILON => format!("every {singular}"),
        Some(number) => format!("every {} {plural}", summary_core::values::format_numeric(number)),
        None => format!("every {value} {plural}"),
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
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_phrases_are_readable() {
        assert_eq!(period_phrase("8", "h"), "every 8 hours");
        assert_eq!(period_phrase("1", "d"), "every day");
        assert_eq!(period_phrase("0.5", "d"), "every 0.5 days");
    }
}
