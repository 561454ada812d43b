//! Code systems seen in cross-border summaries, by OID and by FHIR URI.

struct KnownSystem {
    oid: &'static str,
    uri: &'static str,
    name: &'static str,
}

const KNOWN_SYSTEMS: &[KnownSystem] = &[
    KnownSystem {
        oid: "2.16.840.1.113883.6.73",
        uri: "http://www.whocc.no/atc",
        name: "ATC",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.6.96",
        uri: "http://snomed.info/sct",
        name: "SNOMED CT",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.6.1",
        uri: "http://loinc.org",
        name: "LOINC",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.6.3",
        uri: "http://hl7.org/fhir/sid/icd-10",
        name: "ICD-10",
    },
    KnownSystem {
        oid: "0.4.0.127.0.16.1.1.2.1",
        uri: "http://standardterms.edqm.eu",
        name: "EDQM",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.6.8",
        uri: "http://unitsofmeasure.org",
        name: "UCUM",
    },
    KnownSystem {
        oid: "1.3.6.1.4.1.12559.11.10.1.3.1.44.5",
        uri: "http://www.orpha.net",
        name: "Orphanet",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.5.4",
        uri: "http://terminology.hl7.org/CodeSystem/v3-ActCode",
        name: "HL7 ActCode",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.5.111",
        uri: "http://terminology.hl7.org/CodeSystem/v3-RoleCode",
        name: "HL7 RoleCode",
    },
    KnownSystem {
        oid: "2.16.840.1.113883.5.1063",
        uri: "http://terminology.hl7.org/CodeSystem/v3-SeverityObservation",
        name: "HL7 Severity",
    },
    KnownSystem {
        oid: "1.0.3166.1",
        uri: "urn:iso:std:iso:3166",
        name: "ISO 3166",
    },
];

/// Strip `urn:oid:` so OIDs compare equal however they were written.
pub fn normalize_system(system: &str) -> &str {
    let trimmed = system.trim();
    trimmed.strip_prefix("urn:oid:").unwrap_or(trimmed)
}

fn lookup(system: &str) -> Option<&'static KnownSystem> {
    let normalized = normalize_system(system);
    KNOWN_SYSTEMS
        .iter()
        .find(|known| known.oid == normalized || known.uri.eq_ignore_ascii_case(normalized))
}

/// Short name ("ATC", "SNOMED CT", ...) for an OID or URI.
pub fn name_for_system(system: &str) -> Option<&'static str> {
    lookup(system).map(|known| known.name)
}

/// OID for a system given either form. Unknown systems come back normalized.
pub fn oid_for_system(system: &str) -> String {
    match lookup(system) {
        Some(known) => known.oid.to_string(),
        None => normalize_system(system).to_string(),
    }
}

pub fn uri_for_system(system: &str) -> Option<&'static str> {
    lookup(system).map(|known| known.uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_and_uri_forms_agree() {
        assert_eq!(name_for_system("urn:oid:2.16.840.1.113883.6.96"), Some("SNOMED CT"));
        assert_eq!(name_for_system("http://snomed.info/sct"), Some("SNOMED CT"));
        assert_eq!(oid_for_system("http://loinc.org"), "2.16.840.1.113883.6.1");
        assert_eq!(oid_for_system("urn:oid:1.2.3"), "1.2.3");
    }
}
