use std::fs;

use serde_json::{json, Value};
use summary_core::{
    DocumentFormat, EntryDetails, Recorded, SectionType, SummaryError, ValueData,
};
use summary_fhir::{
    parse_bundle_str, parse_bundle_value, parse_bundle_value_with, practitioner_filter,
    CompositionSelector, FhirDocument,
};

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn fixture_json() -> Value {
    let raw = fs::read_to_string(fixture_path("ips_bundle.json")).expect("fixture readable");
    serde_json::from_str(&raw).expect("fixture is valid JSON")
}

fn load_bundle() -> FhirDocument {
    let raw = fs::read_to_string(fixture_path("ips_bundle.json")).expect("fixture readable");
    parse_bundle_str(&raw).expect("bundle parses")
}

fn with_composition(bundle: &mut Value, edit: impl FnOnce(&mut Value)) {
    let entries = bundle["entry"].as_array_mut().expect("entries");
    let composition = entries
        .iter_mut()
        .find(|entry| entry["resource"]["resourceType"] == "Composition")
        .expect("composition entry");
    edit(&mut composition["resource"]);
}

#[test]
fn unreferenced_practitioners_never_reach_the_care_team() {
    let document = load_bundle();
    let composition = document.composition().expect("composition");

    let index = document.index();
    let filter = practitioner_filter(composition, index);
    assert!(filter.contains(index.position("Practitioner/prac-a").expect("prac-a indexed")));
    assert!(!filter.contains(index.position("Practitioner/prac-b").expect("prac-b indexed")));
    assert_eq!(filter.len(), 1);

    let admin = document.administrative();
    let names: Vec<&str> = admin
        .care_team
        .iter()
        .filter_map(|person| person.name.value().map(String::as_str))
        .collect();
    assert_eq!(names, vec!["Dr. Ana Costa"]);
}

#[test]
fn empty_author_list_gives_empty_care_team() {
    let mut bundle = fixture_json();
    with_composition(&mut bundle, |composition| {
        composition["author"] = json!([]);
    });
    let document = parse_bundle_value(bundle, "v-test".to_string()).expect("bundle parses");

    let composition = document.composition().expect("composition");
    let filter = practitioner_filter(composition, document.index());
    assert!(filter.is_empty());

    let admin = document.administrative();
    assert!(admin.care_team.is_empty());
    assert_eq!(admin.author, Recorded::Absent);
}

fn practitioner_entry(full_url: &str, id: Option<&str>, name: &str) -> Value {
    let mut resource = json!({
        "resourceType": "Practitioner",
        "name": [{"text": name}]
    });
    if let Some(id) = id {
        resource["id"] = json!(id);
    }
    json!({"fullUrl": full_url, "resource": resource})
}

fn composition_entry(full_url: &str, id: &str, patient: &str, author: &str) -> Value {
    json!({
        "fullUrl": full_url,
        "resource": {
            "resourceType": "Composition",
            "id": id,
            "title": format!("Patient summary {id}"),
            "subject": {"reference": patient},
            "author": [{"reference": author}],
            "section": [{
                "code": {"coding": [{"system": "http://loinc.org", "code": "11450-4"}]},
                "entry": []
            }]
        }
    })
}

fn patient_entry(full_url: &str, id: &str) -> Value {
    json!({"fullUrl": full_url, "resource": {"resourceType": "Patient", "id": id}})
}

fn care_team_names(document: &FhirDocument) -> Vec<String> {
    document
        .administrative()
        .care_team
        .into_iter()
        .filter_map(|person| person.name.into_value())
        .collect()
}

#[test]
fn shared_practitioner_id_resolves_to_the_referenced_entry() {
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "document",
        "entry": [
            composition_entry("urn:uuid:comp", "comp", "urn:uuid:pat", "urn:uuid:mine"),
            patient_entry("urn:uuid:pat", "pat"),
            practitioner_entry("urn:uuid:other", Some("A"), "Dr Other Patient"),
            practitioner_entry("urn:uuid:mine", Some("A"), "Dr Mine")
        ]
    });
    let document = parse_bundle_value(bundle, "v-test".to_string()).expect("bundle parses");

    let composition = document.composition().expect("composition");
    let filter = practitioner_filter(composition, document.index());
    assert_eq!(filter.len(), 1);
    assert!(filter.contains(document.index().position("urn:uuid:mine").expect("indexed")));
    assert_eq!(care_team_names(&document), vec!["Dr Mine".to_string()]);
}

#[test]
fn author_known_only_by_uuid_reaches_the_care_team() {
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "document",
        "entry": [
            composition_entry("urn:uuid:comp", "comp", "urn:uuid:pat", "urn:uuid:mine"),
            patient_entry("urn:uuid:pat", "pat"),
            practitioner_entry("urn:uuid:mine", None, "Dr Mine")
        ]
    });
    let document = parse_bundle_value(bundle, "v-test".to_string()).expect("bundle parses");

    assert_eq!(care_team_names(&document), vec!["Dr Mine".to_string()]);
}

#[test]
fn bundle_with_two_compositions_needs_a_selection() {
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "document",
        "entry": [
            composition_entry(
                "urn:uuid:comp-other",
                "comp-other",
                "urn:uuid:pat-other",
                "urn:uuid:dr-other"
            ),
            composition_entry(
                "urn:uuid:comp-mine",
                "comp-mine",
                "urn:uuid:pat-mine",
                "urn:uuid:dr-mine"
            ),
            patient_entry("urn:uuid:pat-other", "pat-other"),
            patient_entry("urn:uuid:pat-mine", "pat-mine"),
            practitioner_entry("urn:uuid:dr-other", Some("dr-other"), "Dr Other Patient"),
            practitioner_entry("urn:uuid:dr-mine", Some("dr-mine"), "Dr Mine")
        ]
    });

    assert!(matches!(
        parse_bundle_value(bundle.clone(), "v-test".to_string()),
        Err(SummaryError::UnsupportedDocument(_))
    ));

    let by_subject = parse_bundle_value_with(
        bundle.clone(),
        "v-test".to_string(),
        &CompositionSelector::Subject("Patient/pat-mine".to_string()),
    )
    .expect("subject selects a Composition");
    assert_eq!(
        by_subject.composition().and_then(|c| c["id"].as_str()),
        Some("comp-mine")
    );
    assert_eq!(care_team_names(&by_subject), vec!["Dr Mine".to_string()]);
    assert_ne!(by_subject.version(), "v-test");

    let by_reference = parse_bundle_value_with(
        bundle.clone(),
        "v-test".to_string(),
        &CompositionSelector::Reference("comp-other".to_string()),
    )
    .expect("reference selects a Composition");
    assert_eq!(care_team_names(&by_reference), vec!["Dr Other Patient".to_string()]);
    assert_ne!(by_reference.version(), by_subject.version());

    assert!(matches!(
        parse_bundle_value_with(
            bundle,
            "v-test".to_string(),
            &CompositionSelector::Subject("Patient/nobody".to_string()),
        ),
        Err(SummaryError::UnsupportedDocument(_))
    ));
}

#[test]
fn header_resolves_roles_and_patient() {
    let document = load_bundle();
    let admin = document.administrative();

    assert_eq!(admin.document_id, Recorded::Value("DOC-2024-0311".to_string()));
    assert_eq!(admin.patient.name, Recorded::Value("Maria Helena Sousa".to_string()));
    assert_eq!(admin.patient.gender, Recorded::Value("Female".to_string()));
    assert_eq!(document.patient_id(), Recorded::Value("123456789".to_string()));
    assert_eq!(document.country_code().as_deref(), Some("PT"));

    let Recorded::Value(author) = &admin.author else {
        panic!("author expected");
    };
    assert_eq!(author.name.value().map(String::as_str), Some("Dr. Ana Costa"));
    assert_eq!(author.role.value().map(String::as_str), Some("General practitioner"));
    assert_eq!(
        author
            .organization
            .as_ref()
            .and_then(|org| org.name.value())
            .map(String::as_str),
        Some("Unidade de Saude Familiar Ribeira")
    );

    let Recorded::Value(legal) = &admin.legal_authenticator else {
        panic!("legal authenticator expected");
    };
    assert_eq!(legal.role.value().map(String::as_str), Some("Legal Authenticator"));

    assert_eq!(admin.participants.len(), 1);
    assert_eq!(
        admin.participants[0].role.value().map(String::as_str),
        Some("Next-of-Kin")
    );
}

#[test]
fn unresolved_section_references_are_omitted() {
    let document = load_bundle();
    let assembled = document.assemble().expect("composition assembles");

    assert_eq!(assembled.unresolved_references, vec!["Condition/cond-missing".to_string()]);
    // Nested sections come after their parents.
    let order: Vec<Option<SectionType>> =
        assembled.sections.iter().map(|s| s.section_type).collect();
    assert_eq!(
        order,
        vec![
            Some(SectionType::Allergies),
            Some(SectionType::Medications),
            Some(SectionType::Problems),
            Some(SectionType::Results),
            None,
            Some(SectionType::VitalSigns),
        ]
    );

    let problems = document.extract_section(SectionType::Problems);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].source_id.as_deref(), Some("Condition/cond-1"));
}

#[test]
fn medication_keeps_strength_and_dose_units() {
    let document = load_bundle();
    let medications = document.extract_section(SectionType::Medications);
    assert_eq!(medications.len(), 1);

    let entry = &medications[0];
    assert_eq!(entry.display_name, Recorded::Value("amoxicillin".to_string()));
    assert_eq!(entry.effective_time.low, Recorded::Value("2024-02-01".to_string()));

    let EntryDetails::Medication(details) = &entry.details else {
        panic!("medication details expected");
    };
    assert_eq!(
        details.dose_form.as_ref().and_then(|form| form.best_display()),
        Some("Oral suspension")
    );
    assert_eq!(details.ingredients.len(), 1);
    assert_eq!(
        details.ingredients[0].strength.as_ref().and_then(ValueData::display).as_deref(),
        Some("250 mg/5 mL")
    );
    assert_eq!(details.dose.as_ref().and_then(ValueData::display).as_deref(), Some("5 mL"));
    assert_eq!(details.frequency.as_deref(), Some("every 8 hours"));
    assert_eq!(
        details.route.as_ref().and_then(|route| route.best_display()),
        Some("Oral use")
    );
    assert_eq!(details.instructions.as_deref(), Some("5 mL every 8 hours for 7 days"));
}

#[test]
fn observations_keep_micrograms_and_components() {
    let document = load_bundle();
    let sections = document.extract_all();

    let results = &sections[&SectionType::Results];
    assert_eq!(results.len(), 1, "the unmapped section must not add entries");
    assert_eq!(
        results[0].value.as_ref().and_then(ValueData::display).as_deref(),
        Some("500 ug")
    );

    let vitals = &sections[&SectionType::VitalSigns];
    assert_eq!(vitals.len(), 1);
    let components: Vec<String> = vitals[0]
        .relationships
        .iter()
        .filter_map(|rel| rel.entry.value.as_ref().and_then(ValueData::display))
        .collect();
    assert_eq!(components, vec!["128 mmHg".to_string(), "82 mmHg".to_string()]);
}

#[test]
fn allergy_fields_are_labelled() {
    let document = load_bundle();
    let allergies = document.extract_section(SectionType::Allergies);
    let EntryDetails::Allergy(allergy) = &allergies[0].details else {
        panic!("allergy details expected");
    };
    assert_eq!(allergy.agent.as_ref().and_then(|a| a.best_display()), Some("Penicillin"));
    assert_eq!(allergy.criticality.as_deref(), Some("High"));
    assert_eq!(allergy.severity.as_deref(), Some("Moderate"));
    assert_eq!(allergy.clinical_status.as_deref(), Some("Active"));
    assert_eq!(allergy.category.as_deref(), Some("Medication"));

    let narratives = document.narratives();
    assert_eq!(
        narratives[&SectionType::Allergies].text.as_deref(),
        Some("Penicillin allergy")
    );
}

#[test]
fn bundle_without_composition_groups_by_type_for_its_patient() {
    let mut bundle = fixture_json();
    bundle["entry"]
        .as_array_mut()
        .expect("entries")
        .retain(|entry| entry["resource"]["resourceType"] != "Composition");
    let document = parse_bundle_value(bundle, "v-test".to_string()).expect("bundle parses");

    let sections = document.extract_all();
    let results: Vec<&str> = sections[&SectionType::Results]
        .iter()
        .filter_map(|entry| entry.source_id.as_deref())
        .collect();
    assert_eq!(results, vec!["Observation/obs-1"]);
    assert_eq!(sections[&SectionType::Allergies].len(), 1);
    assert_eq!(sections[&SectionType::VitalSigns].len(), 1);
}

#[test]
fn section_lookups_agree_with_the_full_extraction() {
    let document = load_bundle();
    let all = document.extract_all();
    assert_eq!(all.len(), 5);
    for (section, entries) in &all {
        assert_eq!(&document.extract_section(*section), entries);
    }
    assert!(document.extract_section(SectionType::MedicalDevices).is_empty());
}

#[test]
fn clinical_document_carries_version_and_format() {
    let document = load_bundle();
    let clinical = document.to_clinical_document();
    assert_eq!(clinical.format, DocumentFormat::Fhir);
    assert_eq!(clinical.version.len(), 64);
    assert_eq!(clinical.version, document.version());
    assert!(clinical.entry_count() >= 5);
}

#[test]
fn malformed_or_foreign_input_is_rejected() {
    assert!(matches!(
        parse_bundle_str("{\"resourceType\": \"Bundle\""),
        Err(SummaryError::MalformedInput { .. })
    ));
    assert!(matches!(
        parse_bundle_str(r#"{"resourceType": "Patient", "id": "x"}"#),
        Err(SummaryError::UnsupportedDocument(_))
    ));
}
