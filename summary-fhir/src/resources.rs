//! FHIR resource to clinical entry mappers.

use serde_json::Value;
use summary_core::{
    AllergyDetails, ClinicalSectionEntry, CodedValue, ConceptValue, EffectiveTime, EntryDetails,
    EntryRelationship, Ingredient, MedicationDetails, ProblemDetails, QuantityValue, Reaction,
    Recorded, SectionType, SourceKind, ValueData,
};

use crate::datatypes::{
    annotation, attachment, codeable_concept, period, primary_coding, quantity, range, ratio,
    text, timing,
};
use crate::index::{resource_key, resource_type, ResourceIndex};

/// Section a resource belongs to when no Composition says otherwise.
pub fn section_for_resource(resource: &Value) -> Option<SectionType> {
    Some(match resource_type(resource)? {
        "AllergyIntolerance" => SectionType::Allergies,
        "MedicationStatement" | "MedicationRequest" | "MedicationAdministration" => {
            SectionType::Medications
        }
        "Condition" => SectionType::Problems,
        "Procedure" => SectionType::Procedures,
        "Immunization" => SectionType::Immunizations,
        "Device" | "DeviceUseStatement" => SectionType::MedicalDevices,
        "CarePlan" => SectionType::PlanOfCare,
        "Consent" => SectionType::AdvanceDirectives,
        "Observation" => observation_section(resource),
        _ => return None,
    })
}

fn observation_section(resource: &Value) -> SectionType {
    let categories: Vec<String> = resource
        .get("category")
        .and_then(Value::as_array)
        .map(|categories| {
            categories
                .iter()
                .filter_map(codeable_concept)
                .flat_map(|concept| concept.codings)
                .filter_map(|coding| coding.code.into_value())
                .collect()
        })
        .unwrap_or_default();
    let has = |code: &str| categories.iter().any(|category| category == code);

    if has("vital-signs") {
        SectionType::VitalSigns
    } else if has("social-history") {
        SectionType::SocialHistory
    } else if is_pregnancy_observation(resource) {
        SectionType::PregnancyHistory
    } else if has("functional-status") || has("survey") {
        SectionType::FunctionalStatus
    } else {
        SectionType::Results
    }
}

fn is_pregnancy_observation(resource: &Value) -> bool {
    const PREGNANCY_CODES: &[&str] = &["82810-3", "11778-8", "11636-8", "11637-6", "11638-4"];
    resource
        .get("code")
        .and_then(codeable_concept)
        .is_some_and(|concept| {
            concept
                .codings
                .iter()
                .filter_map(|coding| coding.code.value())
                .any(|code| PREGNANCY_CODES.contains(&code.as_str()))
        })
}

/// Map one resource into an entry of `section`.
pub fn map_resource(
    resource: &Value,
    section: SectionType,
    index: &ResourceIndex,
) -> ClinicalSectionEntry {
    let mut entry = ClinicalSectionEntry::new(section, SourceKind::Fhir);
    entry.source_id = resource_key(resource);
    entry.status_code = text(resource, "status")
        .or_else(|| resource.get("clinicalStatus").and_then(status_label));
    entry.notes = notes(resource);

    match resource_type(resource).unwrap_or_default() {
        "AllergyIntolerance" => map_allergy(resource, &mut entry),
        "MedicationStatement" | "MedicationRequest" | "MedicationAdministration" => {
            map_medication(resource, index, &mut entry)
        }
        "Condition" => map_condition(resource, &mut entry),
        "Procedure" => {
            entry.codes = codes(resource.get("code"));
            entry.effective_time = effective(resource, &["performed"]);
        }
        "Immunization" => map_immunization(resource, &mut entry),
        "Observation" => map_observation(resource, &mut entry),
        "DeviceUseStatement" => map_device_use(resource, index, &mut entry),
        "Device" => {
            entry.codes = codes(resource.get("type"));
        }
        "CarePlan" => {
            entry.codes = resource
                .get("category")
                .and_then(Value::as_array)
                .and_then(|categories| categories.first())
                .map(|category| codes(Some(category)))
                .unwrap_or_default();
            entry.effective_time = effective(resource, &["period", "created"]);
            if let Some(description) =
                text(resource, "description").or_else(|| text(resource, "title"))
            {
                entry.value = Some(ValueData::text(description));
            }
        }
        "Consent" => {
            entry.codes = codes(resource.get("scope"));
            entry.effective_time = effective(resource, &["dateTime"]);
            entry.value = resource
                .get("provision")
                .and_then(|provision| text(provision, "type"))
                .map(ValueData::text);
        }
        _ => {
            entry.codes = codes(resource.get("code"));
            entry.effective_time = effective(resource, &["effective", "date"]);
        }
    }

    entry.display_name = display_name(resource, &entry);
    entry
}

fn map_allergy(resource: &Value, entry: &mut ClinicalSectionEntry) {
    entry.codes = codes(resource.get("code"));
    entry.effective_time = effective(resource, &["onset", "recordedDate"]);

    let reactions: Vec<Reaction> = array(resource, "reaction")
        .iter()
        .map(|reaction| Reaction {
            manifestation: array(reaction, "manifestation")
                .first()
                .and_then(|manifestation| primary_coding(manifestation)),
            severity: text(reaction, "severity").map(|severity| capitalize(&severity)),
            onset: Recorded::from_option(text(reaction, "onset")),
        })
        .collect();

    let category = array(resource, "category")
        .iter()
        .filter_map(|category| category.as_str())
        .map(capitalize)
        .collect::<Vec<_>>();

    entry.details = EntryDetails::Allergy(AllergyDetails {
        agent: resource.get("code").and_then(primary_coding),
        category: (!category.is_empty()).then(|| category.join(", ")),
        criticality: text(resource, "criticality").map(|criticality| capitalize(&criticality)),
        severity: reactions.iter().find_map(|reaction| reaction.severity.clone()),
        clinical_status: resource.get("clinicalStatus").and_then(status_label),
        reactions,
    });
}

fn map_medication(resource: &Value, index: &ResourceIndex, entry: &mut ClinicalSectionEntry) {
    let medication = resource
        .get("medicationReference")
        .and_then(|reference| index.resolve_reference(reference));

    let (product, dose_form, ingredients) = match medication {
        Some(medication) => (
            medication.get("code").and_then(primary_coding),
            medication.get("form").and_then(primary_coding),
            array(medication, "ingredient")
                .iter()
                .filter_map(|ingredient| map_ingredient(ingredient, index))
                .collect(),
        ),
        None => {
            let product = resource
                .get("medicationCodeableConcept")
                .and_then(primary_coding)
                .or_else(|| {
                    // Unresolvable reference: keep its display text only.
                    resource
                        .get("medicationReference")
                        .and_then(|reference| text(reference, "display"))
                        .map(display_only)
                });
            (product, None, Vec::new())
        }
    };

    entry.codes = medication
        .map(|medication| codes(medication.get("code")))
        .unwrap_or_else(|| codes(resource.get("medicationCodeableConcept")));

    let dosage = resource
        .get("dosage")
        .or_else(|| resource.get("dosageInstruction"))
        .and_then(Value::as_array)
        .and_then(|dosages| dosages.first());
    let dose_and_rate = dosage.and_then(|dosage| array(dosage, "doseAndRate").first().copied());
    let dose = dose_and_rate.and_then(|dose| {
        dose.get("doseQuantity")
            .and_then(quantity)
            .map(ValueData::Quantity)
            .or_else(|| dose.get("doseRange").and_then(range).map(ValueData::Range))
    });
    let schedule = dosage.and_then(|dosage| dosage.get("timing")).and_then(timing);

    entry.effective_time = effective(resource, &["effective", "authoredOn"]);
    if entry.effective_time.is_empty() {
        if let Some(bounds) = schedule
            .as_ref()
            .and_then(|schedule| schedule.repeat_pattern.as_ref())
            .and_then(|pattern| pattern.bounds.as_ref())
        {
            entry.effective_time = EffectiveTime::interval(
                Recorded::from_option(bounds.start.clone()),
                Recorded::from_option(bounds.end.clone()),
            );
        }
    }
    entry.effective_time.frequency = schedule
        .map(|schedule| schedule.human_readable)
        .filter(|frequency| !frequency.is_empty());

    entry.details = EntryDetails::Medication(MedicationDetails {
        product,
        dose_form,
        ingredients,
        dose,
        route: dosage
            .and_then(|dosage| dosage.get("route"))
            .and_then(primary_coding),
        frequency: entry.effective_time.frequency.clone(),
        instructions: dosage.and_then(|dosage| {
            text(dosage, "patientInstruction").or_else(|| text(dosage, "text"))
        }),
    });
}

fn map_ingredient(ingredient: &Value, index: &ResourceIndex) -> Option<Ingredient> {
    let substance = ingredient
        .get("itemCodeableConcept")
        .and_then(primary_coding)
        .or_else(|| {
            let reference = ingredient.get("itemReference")?;
            index
                .resolve_reference(reference)
                .and_then(|item| item.get("code"))
                .and_then(primary_coding)
                .or_else(|| {
                    text(reference, "display").map(display_only)
                })
        })?;
    Some(Ingredient {
        substance,
        strength: ingredient.get("strength").and_then(ratio).map(ValueData::Ratio),
    })
}

fn map_condition(resource: &Value, entry: &mut ClinicalSectionEntry) {
    entry.codes = codes(resource.get("code"));
    let onset = effective(resource, &["onset"]);
    let abatement = effective(resource, &["abatement"]);
    let onset_value = onset.point.clone().or(onset.low.clone());
    let resolution = abatement.point.clone().or(abatement.high.clone()).or(abatement.low);

    entry.effective_time = EffectiveTime::interval(onset_value.clone(), resolution.clone());
    if entry.effective_time.is_empty() {
        entry.effective_time = effective(resource, &["recordedDate"]);
    }

    entry.details = EntryDetails::Problem(ProblemDetails {
        problem: resource.get("code").and_then(primary_coding),
        onset: onset_value,
        resolution,
        clinical_status: resource.get("clinicalStatus").and_then(status_label),
        severity: resource.get("severity").and_then(status_label),
    });
}

fn map_immunization(resource: &Value, entry: &mut ClinicalSectionEntry) {
    entry.codes = codes(resource.get("vaccineCode"));
    entry.effective_time = effective(resource, &["occurrence", "recorded"]);
    for protocol in array(resource, "protocolApplied") {
        if let Some(dose) = protocol
            .get("doseNumberPositiveInt")
            .and_then(Value::as_u64)
            .map(|dose| dose.to_string())
            .or_else(|| text(protocol, "doseNumberString"))
        {
            entry.notes.push(format!("Dose {dose}"));
        }
    }
    if let Some(lot) = text(resource, "lotNumber") {
        entry.notes.push(format!("Lot {lot}"));
    }
}

fn map_observation(resource: &Value, entry: &mut ClinicalSectionEntry) {
    entry.codes = codes(resource.get("code"));
    entry.effective_time = effective(resource, &["effective", "issued"]);
    entry.value = observation_value(resource);

    entry.relationships = array(resource, "component")
        .iter()
        .map(|component| {
            let mut nested = ClinicalSectionEntry::new(entry.section, SourceKind::Fhir);
            nested.codes = codes(component.get("code"));
            nested.value = observation_value(component);
            nested.display_name = component
                .get("code")
                .and_then(codeable_concept)
                .and_then(|concept| concept.preferred_display)
                .map_or(Recorded::Absent, Recorded::Value);
            EntryRelationship {
                type_code: Some("COMP".to_string()),
                inversion: false,
                entry: nested,
            }
        })
        .collect();
}

fn map_device_use(resource: &Value, index: &ResourceIndex, entry: &mut ClinicalSectionEntry) {
    let device = resource
        .get("device")
        .and_then(|reference| index.resolve_reference(reference));
    entry.codes = device
        .map(|device| codes(device.get("type")))
        .unwrap_or_default();
    if entry.codes.is_empty() {
        if let Some(name) = device
            .and_then(|device| array(device, "deviceName").first().copied())
            .and_then(|name| text(name, "name"))
            .or_else(|| resource.get("device").and_then(|reference| text(reference, "display")))
        {
            entry
                .codes
                .push(display_only(name));
        }
    }
    entry.effective_time = effective(resource, &["timing", "recordedOn"]);
}

/// `value[x]` of an observation or observation component.
fn observation_value(resource: &Value) -> Option<ValueData> {
    if let Some(value) = resource.get("valueQuantity").and_then(quantity) {
        return Some(ValueData::Quantity(value));
    }
    if let Some(value) = resource.get("valueCodeableConcept").and_then(codeable_concept) {
        return Some(ValueData::Concept(value));
    }
    if let Some(value) = text(resource, "valueString") {
        return Some(ValueData::text(value));
    }
    if let Some(value) = resource.get("valueBoolean").and_then(Value::as_bool) {
        return Some(ValueData::text(if value { "Yes" } else { "No" }));
    }
    if let Some(value) = resource.get("valueInteger").and_then(Value::as_i64) {
        return Some(ValueData::Quantity(QuantityValue::new(Some(value as f64), None)));
    }
    if let Some(value) = resource.get("valueRange").and_then(range) {
        return Some(ValueData::Range(value));
    }
    if let Some(value) = resource.get("valueRatio").and_then(ratio) {
        return Some(ValueData::Ratio(value));
    }
    if let Some(value) = resource.get("valuePeriod").and_then(period) {
        return Some(ValueData::Period(value));
    }
    if let Some(raw) = text(resource, "valueDateTime").or_else(|| text(resource, "valueTime")) {
        return Some(ValueData::Date {
            raw,
            formatted: None,
        });
    }
    if let Some(value) = resource.get("valueAttachment").and_then(attachment) {
        return Some(ValueData::Attachment(value));
    }
    resource
        .get("dataAbsentReason")
        .and_then(status_label)
        .map(ValueData::text)
}

/// First of `{prefix}DateTime`, `{prefix}Period`, `{prefix}Instant`,
/// `{prefix}String` or the bare `{prefix}` string.
fn effective(resource: &Value, prefixes: &[&str]) -> EffectiveTime {
    for prefix in prefixes {
        for suffix in ["DateTime", "Instant", "String", "Date", ""] {
            if let Some(value) = text(resource, &format!("{prefix}{suffix}")) {
                return EffectiveTime::point(Recorded::Value(value));
            }
        }
        if let Some(value) = resource.get(format!("{prefix}Period").as_str()).and_then(period) {
            return EffectiveTime::interval(
                Recorded::from_option(value.start),
                Recorded::from_option(value.end),
            );
        }
        if let Some(value) = resource.get(*prefix).and_then(period) {
            return EffectiveTime::interval(
                Recorded::from_option(value.start),
                Recorded::from_option(value.end),
            );
        }
    }
    EffectiveTime::default()
}

fn codes(concept: Option<&Value>) -> Vec<CodedValue> {
    let Some(concept) = concept.and_then(codeable_concept) else {
        return Vec::new();
    };
    let ConceptValue {
        text: label,
        codings,
        ..
    } = concept;
    if codings.is_empty() {
        return label
            .map(|label| vec![display_only(label)])
            .unwrap_or_default();
    }
    codings
}

/// Text, display or capitalized code of a status-like concept.
/// A code known only by its display text.
fn display_only(display: String) -> CodedValue {
    CodedValue::new(None, Recorded::Absent, Recorded::Value(display))
}

fn status_label(concept: &Value) -> Option<String> {
    let concept = codeable_concept(concept)?;
    concept
        .text
        .or_else(|| {
            concept
                .codings
                .iter()
                .find_map(|coding| coding.raw_display.value().cloned())
        })
        .or_else(|| {
            concept
                .codings
                .iter()
                .find_map(|coding| coding.code.value().map(|code| capitalize(code)))
        })
}

fn notes(resource: &Value) -> Vec<String> {
    array(resource, "note")
        .iter()
        .filter_map(|note| annotation(note))
        .filter_map(|note| match (note.text, note.author) {
            (Some(text), Some(author)) => Some(format!("{text} ({author})")),
            (Some(text), None) => Some(text),
            (None, _) => None,
        })
        .collect()
}

fn display_name(resource: &Value, entry: &ClinicalSectionEntry) -> Recorded<String> {
    let typed = match &entry.details {
        EntryDetails::Allergy(allergy) => allergy.agent.as_ref(),
        EntryDetails::Medication(medication) => medication
            .product
            .as_ref()
            .or_else(|| medication.ingredients.first().map(|i| &i.substance)),
        EntryDetails::Problem(problem) => problem.problem.as_ref(),
        EntryDetails::Generic => None,
    };
    if let Some(name) = typed.and_then(|code| code.raw_display.value()) {
        return Recorded::Value(name.clone());
    }
    let concept_field = match resource_type(resource).unwrap_or_default() {
        "Immunization" => "vaccineCode",
        "Device" => "type",
        "Consent" => "scope",
        _ => "code",
    };
    resource
        .get(concept_field)
        .and_then(codeable_concept)
        .and_then(|concept| concept.preferred_display)
        .or_else(|| entry.codes.iter().find_map(|code| code.raw_display.value().cloned()))
        .map_or(Recorded::Absent, Recorded::Value)
}

fn array<'a>(value: &'a Value, field: &str) -> Vec<&'a Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

fn capitalize(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn observation_category_picks_section() {
        let vital = json!({
            "resourceType": "Observation",
            "category": [{"coding": [{"code": "vital-signs"}]}]
        });
        assert_eq!(section_for_resource(&vital), Some(SectionType::VitalSigns));

        let lab = json!({"resourceType": "Observation", "code": {"text": "Glucose"}});
        assert_eq!(section_for_resource(&lab), Some(SectionType::Results));

        assert_eq!(section_for_resource(&json!({"resourceType": "Practitioner"})), None);
    }

    #[test]
    fn condition_onset_and_abatement() {
        let condition = json!({
            "resourceType": "Condition",
            "id": "c1",
            "clinicalStatus": {"coding": [{"code": "resolved"}]},
            "code": {"coding": [{
                "system": "http://snomed.info/sct",
                "code": "38341003",
                "display": "Hypertension"
            }]},
            "onsetDateTime": "2019-03-02",
            "abatementDateTime": "2021-07-15"
        });
        let entry = map_resource(&condition, SectionType::Problems, &ResourceIndex::default());
        assert_eq!(entry.source_id.as_deref(), Some("Condition/c1"));
        assert_eq!(entry.display_name, Recorded::Value("Hypertension".to_string()));
        let EntryDetails::Problem(problem) = &entry.details else {
            panic!("expected problem details");
        };
        assert_eq!(problem.clinical_status.as_deref(), Some("Resolved"));
        assert_eq!(problem.onset, Recorded::Value("2019-03-02".to_string()));
        assert_eq!(problem.resolution, Recorded::Value("2021-07-15".to_string()));
    }
}
