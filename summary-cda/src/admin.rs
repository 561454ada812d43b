//! CDA header extraction: author, custodian, legal authenticator,
//! participants, service-event performers and patient contact data.
//!
//! Level 1 documents often carry only part of the header. Missing pieces come
//! back as `Recorded::Absent` or `Recorded::Null`, never as an error.

use summary_core::{
    Address, AdministrativeRecord, ContactInfo, Identifier, NullFlavor, OrganizationRecord,
    PatientDemographics, PersonKind, PersonRecord, Recorded, Telecom,
};
use tracing::debug;

use crate::locator::ElementLocator;
use crate::null_flavor::{recorded_attribute, recorded_text};
use crate::xml::XmlElement;

const PERSON_ELEMENTS: &[&str] = &[
    "assignedPerson",
    "associatedPerson",
    "guardianPerson",
    "informationRecipient",
];

const ORGANIZATION_ELEMENTS: &[&str] = &[
    "representedOrganization",
    "scopingOrganization",
    "representedCustodianOrganization",
    "guardianOrganization",
    "receivedOrganization",
];

pub fn extract_administrative(root: &XmlElement, locator: &ElementLocator) -> AdministrativeRecord {
    let mut record = AdministrativeRecord {
        document_id: presence(locator.child(root, &["id"]), |id| identifier(id).value).flatten(),
        title: recorded_text(locator.child(root, &["title"])),
        effective_time: recorded_attribute(locator.child(root, &["effectiveTime"]), "value"),
        language: recorded_attribute(locator.child(root, &["languageCode"]), "code"),
        ..AdministrativeRecord::default()
    };

    if let Some(patient_role) = locator.path(root, &["recordTarget", "patientRole"]) {
        record.patient = extract_patient(patient_role, locator);
        record.patient_contact = extract_contact(patient_role, locator);
        for guardian in locator.path_all(patient_role, &["patient", "guardian"]) {
            let mut person = extract_person(guardian, locator);
            if !person.role.is_value() {
                person.role = Recorded::Value("Guardian".to_string());
            }
            record.participants.push(person);
        }
    }

    record.author = presence(locator.child(root, &["author"]), |author| {
        extract_author(author, locator)
    });

    record.custodian = presence(
        locator.path(root, &["custodian", "assignedCustodian"]),
        |assigned| {
            locator
                .child(assigned, &["representedCustodianOrganization"])
                .map(|org| extract_organization(org, locator))
                .unwrap_or_default()
        },
    );

    record.legal_authenticator = presence(locator.child(root, &["legalAuthenticator"]), |legal| {
        extract_legal_authenticator(legal, locator)
    });

    for participant in locator.children(root, &["participant"]) {
        if let Some(person) = extract_participant(participant, locator) {
            record.participants.push(person);
        }
    }

    for performer in locator.path_all(root, &["documentationOf", "serviceEvent", "performer"]) {
        record
            .service_event_performers
            .push(extract_performer(performer, locator));
    }

    debug!(
        participants = record.participants.len(),
        performers = record.service_event_performers.len(),
        "extracted CDA administrative data"
    );
    record
}

fn extract_author(author: &XmlElement, locator: &ElementLocator) -> PersonRecord {
    let time = recorded_attribute(locator.child(author, &["time"]), "value");
    let Some(assigned) = locator.child(author, &["assignedAuthor"]) else {
        return PersonRecord {
            time,
            ..PersonRecord::default()
        };
    };

    if let Some(device) = locator.child(assigned, &["assignedAuthoringDevice"]) {
        let name = recorded_text(locator.child(device, &["softwareName"]))
            .or(recorded_text(locator.child(device, &["manufacturerModelName"])));
        return PersonRecord {
            kind: PersonKind::System,
            name,
            role: Recorded::Value("System".to_string()),
            identifiers: identifiers(assigned, locator),
            contact_info: extract_contact(assigned, locator),
            organization: locator
                .child(assigned, ORGANIZATION_ELEMENTS)
                .map(|org| extract_organization(org, locator)),
            time,
        };
    }

    let mut person = extract_person(assigned, locator);
    if !person.role.is_value() {
        person.role = coded_display(locator.child(author, &["functionCode"])).or(person.role);
    }
    person.time = time;
    person
}

fn extract_legal_authenticator(legal: &XmlElement, locator: &ElementLocator) -> PersonRecord {
    let time = recorded_attribute(locator.child(legal, &["time"]), "value");
    let mut person = locator
        .child(legal, &["assignedEntity"])
        .map(|entity| extract_person(entity, locator))
        .unwrap_or_default();
    if matches!(person.role, Recorded::Absent) {
        person.role = Recorded::Value("Legal Authenticator".to_string());
    }
    person.time = time;
    person
}

fn extract_participant(participant: &XmlElement, locator: &ElementLocator) -> Option<PersonRecord> {
    let entity = locator.child(participant, &["associatedEntity"])?;
    let mut person = extract_person(entity, locator);
    if !person.role.is_value() {
        person.role = coded_display(locator.child(participant, &["functionCode"]))
            .or(person.role)
            .or(Recorded::from_option(
                entity
                    .attribute("classCode")
                    .and_then(participant_class_label)
                    .map(str::to_string),
            ));
    }
    let time = locator.child(participant, &["time"]);
    person.time = recorded_attribute(time, "value")
        .or(recorded_attribute(time.and_then(|t| locator.child(t, &["low"])), "value"));
    Some(person)
}

fn extract_performer(performer: &XmlElement, locator: &ElementLocator) -> PersonRecord {
    let mut person = locator
        .child(performer, &["assignedEntity"])
        .map(|entity| extract_person(entity, locator))
        .unwrap_or_default();
    let function = coded_display(locator.child(performer, &["functionCode"]));
    if function.is_value() {
        person.role = function;
    } else if !person.role.is_value() {
        person.role = Recorded::from_option(
            performer
                .attribute("typeCode")
                .and_then(performer_type_label)
                .map(str::to_string),
        )
        .or(person.role);
    }
    let time = locator.child(performer, &["time"]);
    person.time = recorded_attribute(time.and_then(|t| locator.child(t, &["low"])), "value")
        .or(recorded_attribute(time, "value"));
    person
}

/// Person-shaped entity (`assignedAuthor`, `assignedEntity`, `associatedEntity`, `guardian`).
pub fn extract_person(entity: &XmlElement, locator: &ElementLocator) -> PersonRecord {
    let name = match locator.child(entity, PERSON_ELEMENTS) {
        Some(person) => {
            presence(Some(person), |p| person_name(locator.child(p, &["name"]), locator)).flatten()
        }
        None => Recorded::Absent,
    };

    PersonRecord {
        kind: PersonKind::Person,
        name,
        role: coded_display(locator.child(entity, &["code"])),
        identifiers: identifiers(entity, locator),
        contact_info: extract_contact(entity, locator),
        organization: locator
            .child(entity, ORGANIZATION_ELEMENTS)
            .map(|org| extract_organization(org, locator)),
        time: Recorded::Absent,
    }
}

/// Organization sub-record, shared by author, custodian and legal authenticator.
pub fn extract_organization(org: &XmlElement, locator: &ElementLocator) -> OrganizationRecord {
    if let Some(code) = org.attribute_text("nullFlavor") {
        return OrganizationRecord {
            name: Recorded::Null(NullFlavor::from_code(&code)),
            ..OrganizationRecord::default()
        };
    }
    OrganizationRecord {
        name: recorded_text(locator.child(org, &["name"])),
        identifiers: identifiers(org, locator),
        contact_info: extract_contact(org, locator),
    }
}

fn extract_patient(patient_role: &XmlElement, locator: &ElementLocator) -> PatientDemographics {
    let patient = locator.child(patient_role, &["patient"]);
    let gender = patient.and_then(|p| locator.child(p, &["administrativeGenderCode"]));
    PatientDemographics {
        identifiers: identifiers(patient_role, locator),
        name: person_name(patient.and_then(|p| locator.child(p, &["name"])), locator),
        birth_date: recorded_attribute(
            patient.and_then(|p| locator.child(p, &["birthTime"])),
            "value",
        ),
        gender: coded_display(gender).or(Recorded::from_option(
            gender
                .and_then(|g| g.attribute("code"))
                .and_then(gender_label)
                .map(str::to_string),
        )),
    }
}

pub fn extract_contact(element: &XmlElement, locator: &ElementLocator) -> ContactInfo {
    let addresses = locator
        .children(element, &["addr"])
        .into_iter()
        .filter(|addr| addr.attribute("nullFlavor").is_none())
        .map(|addr| address(addr, locator))
        .filter(|address| !address.is_empty())
        .collect();

    let telecoms = locator
        .children(element, &["telecom"])
        .into_iter()
        .filter(|telecom| telecom.attribute("nullFlavor").is_none())
        .filter_map(telecom)
        .collect();

    ContactInfo {
        addresses,
        telecoms,
    }
}

fn address(addr: &XmlElement, locator: &ElementLocator) -> Address {
    let text_of = |names: &[&str]| {
        locator
            .child(addr, names)
            .filter(|el| el.attribute("nullFlavor").is_none())
            .map(XmlElement::flattened_text)
            .filter(|text| !text.is_empty())
    };

    let mut lines: Vec<String> = locator
        .children(addr, &["streetAddressLine"])
        .into_iter()
        .map(XmlElement::flattened_text)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        let street = [text_of(&["houseNumber"]), text_of(&["streetName"])]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !street.is_empty() {
            lines.push(street);
        }
    }

    let mut address = Address {
        use_code: addr.attribute_text("use"),
        lines,
        city: text_of(&["city"]),
        postal_code: text_of(&["postalCode"]),
        state: text_of(&["state"]),
        country: text_of(&["country"]),
    };
    if address.is_empty() {
        if let Some(text) = addr.own_text() {
            address.lines.push(text);
        }
    }
    address
}

fn telecom(element: &XmlElement) -> Option<Telecom> {
    let raw = element.attribute_text("value")?;
    let (system, value) = match raw.split_once(':') {
        Some((scheme, rest)) => {
            let system = match scheme.to_ascii_lowercase().as_str() {
                "tel" => "phone",
                "mailto" => "email",
                "fax" => "fax",
                "http" | "https" => "url",
                _ => "other",
            };
            let value = if system == "url" { raw.clone() } else { rest.trim().to_string() };
            (system, value)
        }
        None => ("other", raw.clone()),
    };
    Some(Telecom {
        system: system.to_string(),
        value,
        use_code: element.attribute_text("use"),
    })
}

fn identifiers(element: &XmlElement, locator: &ElementLocator) -> Vec<Identifier> {
    locator
        .children(element, &["id"])
        .into_iter()
        .map(identifier)
        .collect()
}

/// `root` + `extension` become system + value. A bare `root` is the identifier itself.
fn identifier(id: &XmlElement) -> Identifier {
    if let Some(code) = id.attribute_text("nullFlavor") {
        return Identifier {
            system: id.attribute_text("root"),
            value: Recorded::Null(NullFlavor::from_code(&code)),
        };
    }
    match (id.attribute_text("root"), id.attribute_text("extension")) {
        (root, Some(extension)) => Identifier {
            system: root,
            value: Recorded::Value(extension),
        },
        (Some(root), None) => Identifier {
            system: None,
            value: Recorded::Value(root),
        },
        (None, None) => Identifier::default(),
    }
}

/// `prefix given family suffix`, or the plain text when the name is unstructured.
fn person_name(name: Option<&XmlElement>, locator: &ElementLocator) -> Recorded<String> {
    let Some(name) = name else {
        return Recorded::Absent;
    };
    if let Some(code) = name.attribute_text("nullFlavor") {
        return Recorded::Null(NullFlavor::from_code(&code));
    }

    let parts_of = |part: &str| {
        locator
            .children(name, &[part])
            .into_iter()
            .filter(|el| el.attribute("nullFlavor").is_none())
            .map(XmlElement::flattened_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
    };

    let parts: Vec<String> = ["prefix", "given", "family", "suffix"]
        .into_iter()
        .flat_map(parts_of)
        .collect();
    if parts.is_empty() {
        Recorded::non_empty(name.own_text().as_deref())
    } else {
        Recorded::Value(parts.join(" "))
    }
}

/// Display name of a coded element. Never falls back to the bare code.
fn coded_display(code: Option<&XmlElement>) -> Recorded<String> {
    let Some(code) = code else {
        return Recorded::Absent;
    };
    if let Some(flavor) = code.attribute_text("nullFlavor") {
        return Recorded::Null(NullFlavor::from_code(&flavor));
    }
    Recorded::non_empty(code.attribute("displayName"))
}

fn participant_class_label(class_code: &str) -> Option<&'static str> {
    Some(match class_code {
        "ECON" => "Emergency Contact",
        "NOK" => "Next of Kin",
        "GUARD" => "Guardian",
        "CAREGIVER" => "Caregiver",
        "PRS" => "Personal Relationship",
        "AGNT" => "Agent",
        "PROV" => "Healthcare Provider",
        _ => return None,
    })
}

fn performer_type_label(type_code: &str) -> Option<&'static str> {
    Some(match type_code {
        "PRF" => "Performer",
        "PPRF" => "Primary Performer",
        "SPRF" => "Secondary Performer",
        _ => return None,
    })
}

fn gender_label(code: &str) -> Option<&'static str> {
    Some(match code {
        "M" => "Male",
        "F" => "Female",
        "UN" => "Undifferentiated",
        _ => return None,
    })
}

/// `Absent` when the element is missing, `Null` when it is null-flavored,
/// otherwise whatever `build` makes of it.
fn presence<T>(element: Option<&XmlElement>, build: impl FnOnce(&XmlElement) -> T) -> Recorded<T> {
    match element {
        None => Recorded::Absent,
        Some(element) => match element.attribute_text("nullFlavor") {
            Some(code) => Recorded::Null(NullFlavor::from_code(&code)),
            None => Recorded::Value(build(element)),
        },
    }
}
