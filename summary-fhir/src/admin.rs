//! Administrative record from the Composition header and the resources it
//! references.

use serde_json::Value;
use summary_core::{
    Address, AdministrativeRecord, ContactInfo, Identifier, OrganizationRecord,
    PatientDemographics, PersonKind, PersonRecord, Recorded, Telecom,
};
use tracing::debug;

use crate::composition::CompositionFilterResult;
use crate::datatypes::{codeable_concept, text};
use crate::index::{resource_type, ResourceIndex};

pub fn extract_administrative(
    composition: &Value,
    index: &ResourceIndex,
    care_team: &CompositionFilterResult,
) -> AdministrativeRecord {
    let patient = composition
        .get("subject")
        .and_then(|subject| index.resolve_reference(subject))
        .filter(|resource| resource_type(resource) == Some("Patient"));

    let mut record = AdministrativeRecord {
        document_id: Recorded::from_option(
            composition
                .get("identifier")
                .and_then(|identifier| text(identifier, "value"))
                .or_else(|| text(composition, "id")),
        ),
        title: Recorded::from_option(text(composition, "title")),
        effective_time: Recorded::from_option(text(composition, "date")),
        language: Recorded::from_option(text(composition, "language")),
        patient: patient.map(patient_demographics).unwrap_or_default(),
        patient_contact: patient.map(contact_info).unwrap_or_default(),
        ..AdministrativeRecord::default()
    };

    let authors = array(composition, "author");
    record.author = match authors.first() {
        Some(reference) => Recorded::Value(author_record(reference, index)),
        None => Recorded::Absent,
    };

    record.custodian = composition
        .get("custodian")
        .and_then(|reference| index.resolve_reference(reference))
        .map_or(Recorded::Absent, |org| Recorded::Value(organization(org)));

    for attester in array(composition, "attester") {
        let Some(party) = attester.get("party") else {
            continue;
        };
        let mut person = author_record(party, index);
        person.time = Recorded::from_option(text(attester, "time"));
        match text(attester, "mode").as_deref() {
            Some("legal") => {
                person.role = person.role.or(Recorded::Value("Legal Authenticator".to_string()));
                record.legal_authenticator = Recorded::Value(person);
            }
            mode => {
                if !person.role.is_value() {
                    person.role = Recorded::from_option(mode.map(attester_label));
                }
                record.participants.push(person);
            }
        }
    }

    if let Some(patient) = patient {
        for contact in array(patient, "contact") {
            record.participants.push(patient_contact(contact));
        }
    }

    for event in array(composition, "event") {
        for performer in array(event, "detail") {
            if let Some(resolved) = index.resolve_reference(performer) {
                if let Some("Practitioner" | "PractitionerRole") = resource_type(resolved) {
                    record
                        .service_event_performers
                        .push(author_record(performer, index));
                }
            }
        }
    }

    record.care_team = care_team.resources(index).map(practitioner).collect();

    debug!(
        care_team = record.care_team.len(),
        participants = record.participants.len(),
        "extracted FHIR administrative data"
    );
    record
}

/// Person record for an author-like reference. Devices become `System` records.
fn author_record(reference: &Value, index: &ResourceIndex) -> PersonRecord {
    let Some(resolved) = index.resolve_reference(reference) else {
        return PersonRecord {
            name: Recorded::from_option(text(reference, "display")),
            ..PersonRecord::default()
        };
    };

    match resource_type(resolved).unwrap_or_default() {
        "Practitioner" => practitioner(resolved),
        "PractitionerRole" => {
            let mut person = resolved
                .get("practitioner")
                .and_then(|reference| index.resolve_reference(reference))
                .map(practitioner)
                .unwrap_or_default();
            person.role =
                first_concept_label(resolved, "code").map_or(person.role, Recorded::Value);
            person.organization = resolved
                .get("organization")
                .and_then(|reference| index.resolve_reference(reference))
                .map(organization);
            person.contact_info.telecoms.extend(telecoms(resolved));
            person
        }
        "Device" => PersonRecord {
            kind: PersonKind::System,
            name: Recorded::from_option(
                array(resolved, "deviceName")
                    .first()
                    .and_then(|name| text(name, "name"))
                    .or_else(|| text(reference, "display")),
            ),
            role: Recorded::Value("System".to_string()),
            identifiers: identifiers(resolved),
            organization: resolved
                .get("owner")
                .and_then(|reference| index.resolve_reference(reference))
                .map(organization),
            ..PersonRecord::default()
        },
        "Organization" => {
            let org = organization(resolved);
            PersonRecord {
                name: org.name.clone(),
                identifiers: org.identifiers.clone(),
                contact_info: org.contact_info.clone(),
                organization: Some(org),
                ..PersonRecord::default()
            }
        }
        _ => PersonRecord {
            name: Recorded::from_option(
                human_name(resolved).or_else(|| text(reference, "display")),
            ),
            identifiers: identifiers(resolved),
            contact_info: contact_info(resolved),
            ..PersonRecord::default()
        },
    }
}

fn practitioner(resource: &Value) -> PersonRecord {
    PersonRecord {
        kind: PersonKind::Person,
        name: Recorded::from_option(human_name(resource)),
        role: array(resource, "qualification")
            .first()
            .and_then(|qualification| first_concept_label(qualification, "code"))
            .map_or(Recorded::Absent, Recorded::Value),
        identifiers: identifiers(resource),
        contact_info: contact_info(resource),
        organization: None,
        time: Recorded::Absent,
    }
}

fn organization(resource: &Value) -> OrganizationRecord {
    OrganizationRecord {
        name: Recorded::from_option(text(resource, "name")),
        identifiers: identifiers(resource),
        contact_info: contact_info(resource),
    }
}

fn patient_demographics(patient: &Value) -> PatientDemographics {
    PatientDemographics {
        identifiers: identifiers(patient),
        name: Recorded::from_option(human_name(patient)),
        birth_date: Recorded::from_option(text(patient, "birthDate")),
        gender: Recorded::from_option(text(patient, "gender").map(|gender| match gender.as_str() {
            "male" => "Male".to_string(),
            "female" => "Female".to_string(),
            "other" => "Other".to_string(),
            "unknown" => "Unknown".to_string(),
            _ => gender,
        })),
    }
}

fn patient_contact(contact: &Value) -> PersonRecord {
    let name = contact.get("name").and_then(format_human_name);
    let mut info = ContactInfo {
        addresses: contact.get("address").map(address).into_iter().collect(),
        telecoms: telecoms(contact),
    };
    info.addresses.retain(|address| !address.is_empty());
    PersonRecord {
        name: Recorded::from_option(name),
        role: first_concept_label(contact, "relationship")
            .map_or(Recorded::Absent, Recorded::Value),
        contact_info: info,
        organization: contact
            .get("organization")
            .and_then(|org| text(org, "display"))
            .map(|name| OrganizationRecord {
                name: Recorded::Value(name),
                ..OrganizationRecord::default()
            }),
        ..PersonRecord::default()
    }
}

/// Official name first, then any name. `text` wins over the structured parts.
fn human_name(resource: &Value) -> Option<String> {
    let names = array(resource, "name");
    names
        .iter()
        .find(|name| name.get("use").and_then(Value::as_str) == Some("official"))
        .or_else(|| names.first())
        .and_then(|name| format_human_name(name))
}

fn format_human_name(name: &Value) -> Option<String> {
    if let Some(text) = text(name, "text") {
        return Some(text);
    }
    let mut parts: Vec<String> = strings(name, "prefix");
    parts.extend(strings(name, "given"));
    parts.extend(text(name, "family"));
    parts.extend(strings(name, "suffix"));
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn identifiers(resource: &Value) -> Vec<Identifier> {
    array(resource, "identifier")
        .iter()
        .map(|identifier| Identifier {
            system: text(identifier, "system"),
            value: Recorded::from_option(text(identifier, "value")),
        })
        .collect()
}

fn contact_info(resource: &Value) -> ContactInfo {
    ContactInfo {
        addresses: array(resource, "address")
            .iter()
            .map(|value| address(value))
            .filter(|address| !address.is_empty())
            .collect(),
        telecoms: telecoms(resource),
    }
}

fn address(value: &Value) -> Address {
    let mut lines = strings(value, "line");
    if lines.is_empty() {
        lines.extend(text(value, "text"));
    }
    Address {
        use_code: text(value, "use"),
        lines,
        city: text(value, "city"),
        postal_code: text(value, "postalCode"),
        state: text(value, "state"),
        country: text(value, "country"),
    }
}

fn telecoms(resource: &Value) -> Vec<Telecom> {
    array(resource, "telecom")
        .iter()
        .filter_map(|telecom| {
            Some(Telecom {
                system: text(telecom, "system").unwrap_or_else(|| "other".to_string()),
                value: text(telecom, "value")?,
                use_code: text(telecom, "use"),
            })
        })
        .collect()
}

fn first_concept_label(resource: &Value, field: &str) -> Option<String> {
    let value = resource.get(field)?;
    let concept = match value {
        Value::Array(items) => items.first().and_then(codeable_concept),
        other => codeable_concept(other),
    }?;
    concept.preferred_display
}

fn attester_label(mode: &str) -> String {
    match mode {
        "professional" => "Professional Attester".to_string(),
        "personal" => "Personal Attester".to_string(),
        "official" => "Official Attester".to_string(),
        other => other.to_string(),
    }
}

fn array<'a>(value: &'a Value, field: &str) -> Vec<&'a Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

fn strings(value: &Value, field: &str) -> Vec<String> {
    array(value, field)
        .into_iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}
