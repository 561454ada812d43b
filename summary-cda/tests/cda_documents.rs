use std::fs;

use summary_cda::{extract_section, parse_cda, parse_xml, CdaDocument, ElementLocator};
use summary_core::{
    DocumentFormat, EntryDetails, NullFlavor, PersonKind, Recorded, SectionType, ValueData,
};

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn load(name: &str, format: DocumentFormat) -> CdaDocument {
    let xml = fs::read_to_string(fixture_path(name)).expect("fixture should be readable");
    parse_cda(&xml, format).expect("fixture should parse")
}

fn value(recorded: &Recorded<String>) -> &str {
    recorded.value().map(String::as_str).unwrap_or("<missing>")
}

#[test]
fn namespace_variants_extract_identically() {
    let plain = load("patient_summary_l3.xml", DocumentFormat::CdaL3);
    let variants = [
        load("patient_summary_l3_prefixed.xml", DocumentFormat::CdaL3),
        load("patient_summary_l3_inner_prefix.xml", DocumentFormat::CdaL3),
    ];

    let expected_admin = plain.administrative();
    let expected_sections = plain.extract_all();
    assert!(!expected_sections.is_empty());

    for variant in &variants {
        assert_eq!(variant.administrative(), expected_admin);
        assert_eq!(variant.extract_all(), expected_sections);
        assert_eq!(variant.patient_id(), plain.patient_id());
        assert_eq!(variant.narratives(), plain.narratives());
    }
}

#[test]
fn header_roles_and_contacts() {
    let doc = load("patient_summary_l3.xml", DocumentFormat::CdaL3);
    let admin = doc.administrative();

    assert_eq!(value(&admin.document_id), "PS-2024-0042");
    assert_eq!(value(&admin.title), "Patient Summary");
    assert_eq!(value(&doc.patient_id()), "PT-998877");
    assert_eq!(doc.country_code().as_deref(), Some("PT"));

    assert_eq!(value(&admin.patient.name), "Maria Silva");
    assert_eq!(value(&admin.patient.gender), "Female");
    assert_eq!(admin.patient_contact.addresses.len(), 1);
    let systems: Vec<&str> = admin
        .patient_contact
        .telecoms
        .iter()
        .map(|telecom| telecom.system.as_str())
        .collect();
    assert_eq!(systems, ["phone", "email"]);

    let author = admin.author.value().expect("author should be present");
    assert_eq!(author.kind, PersonKind::Person);
    assert_eq!(value(&author.name), "Dr. Ana Costa");
    assert_eq!(value(&author.role), "Medical Doctors");
    let organization = author.organization.as_ref().expect("author organization");
    assert_eq!(value(&organization.name), "Hospital de Santa Maria");

    let custodian = admin.custodian.value().expect("custodian should be present");
    assert_eq!(value(&custodian.name), "Servicos Partilhados do Ministerio da Saude");
    assert!(custodian.contact_info.telecoms.is_empty());

    let legal = admin
        .legal_authenticator
        .value()
        .expect("legal authenticator should be present");
    assert_eq!(legal.name, Recorded::Null(NullFlavor::Masked));
    assert_eq!(legal.name.display(), "Masked");
    assert_eq!(value(&legal.role), "Legal Authenticator");

    let participants: Vec<(&str, &str)> = admin
        .participants
        .iter()
        .map(|p| (value(&p.name), value(&p.role)))
        .collect();
    assert_eq!(
        participants,
        [
            ("Joao Silva", "Guardian"),
            ("Rui Pereira", "Primary care physician")
        ]
    );

    assert_eq!(admin.service_event_performers.len(), 1);
    assert_eq!(value(&admin.service_event_performers[0].name), "Carla Dias");
    assert_eq!(value(&admin.service_event_performers[0].role), "Performer");
}

#[test]
fn level_one_document_with_reduced_header() {
    let doc = load("patient_summary_l1.xml", DocumentFormat::CdaL1);
    let admin = doc.administrative();

    let author = admin.author.value().expect("device author");
    assert_eq!(author.kind, PersonKind::System);
    assert_eq!(value(&author.name), "PS Converter 2.1");
    assert_eq!(value(&author.role), "System");

    assert_eq!(admin.custodian, Recorded::Absent);
    assert_eq!(admin.legal_authenticator, Recorded::Absent);
    assert_eq!(admin.patient.birth_date.display(), "Unknown");
    assert_eq!(doc.country_code(), None);

    let attachments = doc.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].content_type.as_deref(), Some("application/pdf"));
    assert_eq!(attachments[0].size, Some(15));
    assert_eq!(attachments[0].inline_data.as_deref(), Some("JVBERi0xLjQKJSVFT0YK"));

    let document = doc.to_clinical_document();
    assert_eq!(document.format, DocumentFormat::CdaL1);
    assert_eq!(document.entry_count(), 0);
    assert_eq!(document.version.len(), 64);
}

#[test]
fn allergy_concern_is_unwrapped() {
    let doc = load("patient_summary_l3.xml", DocumentFormat::CdaL3);
    let allergies = doc.extract_section(SectionType::Allergies);
    assert_eq!(allergies.len(), 1);

    let entry = &allergies[0];
    assert_eq!(entry.source_id.as_deref(), Some("ALG-1-OBS"));
    assert_eq!(value(&entry.display_name), "amoxicillin");
    let EntryDetails::Allergy(allergy) = &entry.details else {
        panic!("expected allergy details, got {:?}", entry.details);
    };
    let agent = allergy.agent.as_ref().expect("agent");
    assert_eq!(value(&agent.code), "J01CA04");
    assert_eq!(agent.system_name.as_deref(), Some("ATC"));
    assert_eq!(allergy.category.as_deref(), Some("Drug allergy"));
    assert_eq!(allergy.criticality.as_deref(), Some("High criticality"));
    assert_eq!(allergy.clinical_status.as_deref(), Some("Active"));
    assert_eq!(allergy.reactions.len(), 1);
    let reaction = &allergy.reactions[0];
    assert_eq!(
        reaction.manifestation.as_ref().and_then(|m| m.best_display()),
        Some("Urticaria")
    );
    assert_eq!(reaction.severity.as_deref(), Some("Moderate"));
    assert_eq!(value(&reaction.onset), "20100513");
}

#[test]
fn medication_details_keep_units_and_frequency() {
    let doc = load("patient_summary_l3.xml", DocumentFormat::CdaL3);
    let medications = doc.extract_section(SectionType::Medications);
    assert_eq!(medications.len(), 2);

    let EntryDetails::Medication(levothyroxine) = &medications[0].details else {
        panic!("expected medication details");
    };
    assert_eq!(value(&medications[0].display_name), "levothyroxine sodium");
    assert_eq!(levothyroxine.frequency.as_deref(), Some("every 24 hours"));
    assert_eq!(
        levothyroxine.dose.as_ref().and_then(ValueData::display).as_deref(),
        Some("100 ug")
    );
    assert_eq!(
        levothyroxine.route.as_ref().and_then(|r| r.best_display()),
        Some("Oral use")
    );
    assert_eq!(
        levothyroxine.instructions.as_deref(),
        Some("Take on an empty stomach")
    );
    assert_eq!(value(&medications[0].effective_time.low), "20230201");
    assert_eq!(
        medications[0].effective_time.high,
        Recorded::Null(NullFlavor::Unknown)
    );

    let EntryDetails::Medication(salbutamol) = &medications[1].details else {
        panic!("expected medication details");
    };
    assert_eq!(
        value(&medications[1].display_name),
        "Salbutamol 100 micrograms/dose inhaler"
    );
    assert_eq!(salbutamol.frequency.as_deref(), Some("at bedtime"));
    assert_eq!(
        salbutamol.dose.as_ref().and_then(ValueData::display).as_deref(),
        Some("1 - 2")
    );
    let Some(ValueData::Ratio(strength)) = salbutamol.ingredients[0].strength.as_ref() else {
        panic!("expected ratio strength");
    };
    assert_eq!(
        strength.numerator.as_ref().and_then(|q| q.unit.as_deref()),
        Some("ug")
    );
    assert_eq!(
        strength.denominator.as_ref().and_then(|q| q.unit.as_deref()),
        Some("{dose}")
    );
    assert_eq!(strength.display().as_deref(), Some("100 ug/1 {dose}"));
}

#[test]
fn problems_results_and_title_matched_sections() {
    let doc = load("patient_summary_l3.xml", DocumentFormat::CdaL3);
    let sections = doc.extract_all();

    let problems = &sections[&SectionType::Problems];
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].source_id.as_deref(), Some("PRB-1"));
    let EntryDetails::Problem(problem) = &problems[0].details else {
        panic!("expected problem details");
    };
    assert_eq!(
        problem.problem.as_ref().map(|p| value(&p.code)),
        Some("E03.9")
    );
    assert_eq!(value(&problem.onset), "20150704");
    assert_eq!(problem.resolution, Recorded::Absent);

    let results = &sections[&SectionType::Results];
    assert_eq!(results.len(), 2, "organizer components are flattened");
    assert_eq!(value(&results[0].effective_time.point), "20240110");
    assert_eq!(
        results[0].value.as_ref().and_then(ValueData::display).as_deref(),
        Some("5.2 mmol/L")
    );
    assert_eq!(value(&results[1].effective_time.point), "20240111");
    assert_eq!(
        results[1].value.as_ref().and_then(ValueData::display).as_deref(),
        Some(">= 1 mmol/L")
    );

    let pregnancy = &sections[&SectionType::PregnancyHistory];
    assert!(matches!(
        pregnancy[0].value,
        Some(ValueData::Date { ref raw, .. }) if raw == "20240920"
    ));

    assert!(sections[&SectionType::Procedures].is_empty());
    let narratives = doc.narratives();
    assert_eq!(
        narratives[&SectionType::Procedures].text.as_deref(),
        Some("No procedures recorded.")
    );
}

#[test]
fn narrative_reference_stands_in_for_missing_display() {
    let section = parse_xml(
        r##"<section xmlns="urn:hl7-org:v3" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
              <text><paragraph ID="proc-1">Appendectomy</paragraph></text>
              <entry>
                <procedure classCode="PROC" moodCode="EVN">
                  <code code="80146002" codeSystem="2.16.840.1.113883.6.96">
                    <originalText><reference value="#proc-1"/></originalText>
                  </code>
                  <effectiveTime nullFlavor="UNK"/>
                </procedure>
              </entry>
            </section>"##,
    )
    .expect("section should parse");
    let locator = ElementLocator::for_root(&section);

    let entries = extract_section(&section, SectionType::Procedures, &locator);
    assert_eq!(entries.len(), 1);
    assert_eq!(value(&entries[0].display_name), "Appendectomy");
    assert_eq!(entries[0].effective_time.point.display(), "Unknown");
}

#[test]
fn malformed_xml_is_fatal() {
    let err = parse_cda("<ClinicalDocument><title>", DocumentFormat::CdaL3)
        .expect_err("unclosed elements must fail");
    assert!(err.to_string().contains("CDA XML"));
}
