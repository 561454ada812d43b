//! Format tags, section types and missing-data markers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire format a document arrived in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// CDA R2 with a `nonXMLBody` (usually an embedded PDF).
    CdaL1,
    /// CDA R2 with a fully structured body.
    CdaL3,
    /// FHIR R4 `Bundle` JSON.
    Fhir,
}

impl DocumentFormat {
    pub fn is_cda(self) -> bool {
        matches!(self, DocumentFormat::CdaL1 | DocumentFormat::CdaL3)
    }

    pub fn source_kind(self) -> SourceKind {
        if self.is_cda() {
            SourceKind::Cda
        } else {
            SourceKind::Fhir
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentFormat::CdaL1 => "CDA L1",
            DocumentFormat::CdaL3 => "CDA L3",
            DocumentFormat::Fhir => "FHIR",
        })
    }
}

/// Which extractor produced an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cda,
    Fhir,
}

/// Clinical section of a patient summary, keyed by its LOINC section code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Allergies,
    Medications,
    Problems,
    Procedures,
    Immunizations,
    VitalSigns,
    Results,
    MedicalDevices,
    PregnancyHistory,
    PastIllness,
    SocialHistory,
    FunctionalStatus,
    PlanOfCare,
    AdvanceDirectives,
}

impl SectionType {
    pub const ALL: [SectionType; 14] = [
        SectionType::Allergies,
        SectionType::Medications,
        SectionType::Problems,
        SectionType::Procedures,
        SectionType::Immunizations,
        SectionType::VitalSigns,
        SectionType::Results,
        SectionType::MedicalDevices,
        SectionType::PregnancyHistory,
        SectionType::PastIllness,
        SectionType::SocialHistory,
        SectionType::FunctionalStatus,
        SectionType::PlanOfCare,
        SectionType::AdvanceDirectives,
    ];

    /// LOINC code used for this section in both CDA and FHIR documents.
    pub fn loinc_code(self) -> &'static str {
        match self {
            SectionType::Allergies => "48765-2",
            SectionType::Medications => "10160-0",
            SectionType::Problems => "11450-4",
            SectionType::Procedures => "47519-4",
            SectionType::Immunizations => "11369-6",
            SectionType::VitalSigns => "8716-3",
            SectionType::Results => "30954-2",
            SectionType::MedicalDevices => "46264-8",
            SectionType::PregnancyHistory => "10162-6",
            SectionType::PastIllness => "11348-0",
            SectionType::SocialHistory => "29762-2",
            SectionType::FunctionalStatus => "47420-5",
            SectionType::PlanOfCare => "18776-5",
            SectionType::AdvanceDirectives => "42348-3",
        }
    }

    /// Resolve a LOINC section code. A few national dialects use alternative
    /// codes for the same section, those are folded in here.
    pub fn from_loinc(code: &str) -> Option<Self> {
        let section = match code.trim() {
            "48765-2" => SectionType::Allergies,
            "10160-0" | "10183-2" => SectionType::Medications,
            "11450-4" => SectionType::Problems,
            "47519-4" => SectionType::Procedures,
            "11369-6" => SectionType::Immunizations,
            "8716-3" => SectionType::VitalSigns,
            "30954-2" => SectionType::Results,
            "46264-8" => SectionType::MedicalDevices,
            "10162-6" => SectionType::PregnancyHistory,
            "11348-0" => SectionType::PastIllness,
            "29762-2" => SectionType::SocialHistory,
            "47420-5" => SectionType::FunctionalStatus,
            "18776-5" => SectionType::PlanOfCare,
            "42348-3" => SectionType::AdvanceDirectives,
            _ => return None,
        };
        Some(section)
    }

    /// English section heading.
    pub fn label(self) -> &'static str {
        match self {
            SectionType::Allergies => "Allergies and Intolerances",
            SectionType::Medications => "Medication Summary",
            SectionType::Problems => "Active Problems",
            SectionType::Procedures => "History of Procedures",
            SectionType::Immunizations => "Immunizations",
            SectionType::VitalSigns => "Vital Signs",
            SectionType::Results => "Diagnostic Results",
            SectionType::MedicalDevices => "Medical Devices",
            SectionType::PregnancyHistory => "History of Pregnancies",
            SectionType::PastIllness => "History of Past Illness",
            SectionType::SocialHistory => "Social History",
            SectionType::FunctionalStatus => "Functional Status",
            SectionType::PlanOfCare => "Plan of Care",
            SectionType::AdvanceDirectives => "Advance Directives",
        }
    }

    /// Stable key used in cache keys and logs.
    pub fn key(self) -> &'static str {
        match self {
            SectionType::Allergies => "allergies",
            SectionType::Medications => "medications",
            SectionType::Problems => "problems",
            SectionType::Procedures => "procedures",
            SectionType::Immunizations => "immunizations",
            SectionType::VitalSigns => "vital_signs",
            SectionType::Results => "results",
            SectionType::MedicalDevices => "medical_devices",
            SectionType::PregnancyHistory => "pregnancy_history",
            SectionType::PastIllness => "past_illness",
            SectionType::SocialHistory => "social_history",
            SectionType::FunctionalStatus => "functional_status",
            SectionType::PlanOfCare => "plan_of_care",
            SectionType::AdvanceDirectives => "advance_directives",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// HL7 `nullFlavor` reason codes.
///
/// Serialized as the bare HL7 code; renderers should call [`NullFlavor::phrase`]
/// instead of showing the code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NullFlavor {
    NoInformation,
    Invalid,
    Derived,
    Other,
    NegativeInfinity,
    PositiveInfinity,
    Unencoded,
    Masked,
    NotApplicable,
    Unknown,
    AskedButUnknown,
    TemporarilyUnavailable,
    NotAsked,
    Unavailable,
    SufficientQuantity,
    Trace,
    NotPresent,
    Unrecognized(String),
}

impl NullFlavor {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "NI" => NullFlavor::NoInformation,
            "INV" => NullFlavor::Invalid,
            "DER" => NullFlavor::Derived,
            "OTH" => NullFlavor::Other,
            "NINF" => NullFlavor::NegativeInfinity,
            "PINF" => NullFlavor::PositiveInfinity,
            "UNC" => NullFlavor::Unencoded,
            "MSK" => NullFlavor::Masked,
            "NA" => NullFlavor::NotApplicable,
            "UNK" => NullFlavor::Unknown,
            "ASKU" => NullFlavor::AskedButUnknown,
            "NAV" => NullFlavor::TemporarilyUnavailable,
            "NASK" => NullFlavor::NotAsked,
            "NAVU" => NullFlavor::Unavailable,
            "QS" => NullFlavor::SufficientQuantity,
            "TRC" => NullFlavor::Trace,
            "NP" => NullFlavor::NotPresent,
            _ => NullFlavor::Unrecognized(code.trim().to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            NullFlavor::NoInformation => "NI",
            NullFlavor::Invalid => "INV",
            NullFlavor::Derived => "DER",
            NullFlavor::Other => "OTH",
            NullFlavor::NegativeInfinity => "NINF",
            NullFlavor::PositiveInfinity => "PINF",
            NullFlavor::Unencoded => "UNC",
            NullFlavor::Masked => "MSK",
            NullFlavor::NotApplicable => "NA",
            NullFlavor::Unknown => "UNK",
            NullFlavor::AskedButUnknown => "ASKU",
            NullFlavor::TemporarilyUnavailable => "NAV",
            NullFlavor::NotAsked => "NASK",
            NullFlavor::Unavailable => "NAVU",
            NullFlavor::SufficientQuantity => "QS",
            NullFlavor::Trace => "TRC",
            NullFlavor::NotPresent => "NP",
            NullFlavor::Unrecognized(code) => code,
        }
    }

    /// Human phrase shown in place of the missing value. Never the raw code.
    pub fn phrase(&self) -> &'static str {
        match self {
            NullFlavor::NoInformation => "No Information",
            NullFlavor::Invalid => "Invalid",
            NullFlavor::Derived => "Derived",
            NullFlavor::Other => "Other",
            NullFlavor::NegativeInfinity => "Negative Infinity",
            NullFlavor::PositiveInfinity => "Positive Infinity",
            NullFlavor::Unencoded => "Not Encoded",
            NullFlavor::Masked => "Masked",
            NullFlavor::NotApplicable => "Not Applicable",
            NullFlavor::Unknown => "Unknown",
            NullFlavor::AskedButUnknown => "Asked but Unknown",
            NullFlavor::TemporarilyUnavailable => "Temporarily Unavailable",
            NullFlavor::NotAsked => "Not Asked",
            NullFlavor::Unavailable => "Not Available",
            NullFlavor::SufficientQuantity => "Sufficient Quantity",
            NullFlavor::Trace => "Trace",
            NullFlavor::NotPresent => "Not Present",
            NullFlavor::Unrecognized(_) => "Not Recorded",
        }
    }
}

impl From<String> for NullFlavor {
    fn from(code: String) -> Self {
        NullFlavor::from_code(&code)
    }
}

impl From<NullFlavor> for String {
    fn from(flavor: NullFlavor) -> Self {
        flavor.code().to_string()
    }
}

impl fmt::Display for NullFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phrase())
    }
}

/// Phrase used when an element is simply missing from the source.
pub const NOT_RECORDED: &str = "Not Recorded";

/// A value that may be present, explicitly null-flavored, or absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Recorded<T> {
    Value(T),
    Null(NullFlavor),
    Absent,
}

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Recorded::Absent
    }
}

impl<T> Recorded<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Recorded::Value(value),
            None => Recorded::Absent,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Recorded::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Recorded::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Recorded::Value(_))
    }

    pub fn null_flavor(&self) -> Option<&NullFlavor> {
        match self {
            Recorded::Null(flavor) => Some(flavor),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recorded<U> {
        match self {
            Recorded::Value(value) => Recorded::Value(f(value)),
            Recorded::Null(flavor) => Recorded::Null(flavor),
            Recorded::Absent => Recorded::Absent,
        }
    }

    /// Keeps `self` unless it is `Absent`.
    pub fn or(self, other: Recorded<T>) -> Recorded<T> {
        match self {
            Recorded::Absent => other,
            recorded => recorded,
        }
    }
}

impl<T> Recorded<Recorded<T>> {
    pub fn flatten(self) -> Recorded<T> {
        match self {
            Recorded::Value(inner) => inner,
            Recorded::Null(flavor) => Recorded::Null(flavor),
            Recorded::Absent => Recorded::Absent,
        }
    }
}

impl Recorded<String> {
    /// Text for display: the value, the nullFlavor phrase, or "Not Recorded".
    pub fn display(&self) -> &str {
        match self {
            Recorded::Value(value) => value,
            Recorded::Null(flavor) => flavor.phrase(),
            Recorded::Absent => NOT_RECORDED,
        }
    }

    /// Treats blank strings as absent.
    pub fn non_empty(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(text) if !text.is_empty() => Recorded::Value(text.to_string()),
            _ => Recorded::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_flavor_phrase_is_never_the_code() {
        for code in [
            "NI", "INV", "DER", "OTH", "NINF", "PINF", "UNC", "MSK", "NA", "UNK", "ASKU", "NAV",
            "NASK", "NAVU", "QS", "TRC", "NP", "XYZ",
        ] {
            let flavor = NullFlavor::from_code(code);
            assert_ne!(flavor.phrase(), code);
            assert_eq!(flavor.code(), code);
        }
    }

    #[test]
    fn recorded_serializes_with_status_tag() {
        let value = serde_json::to_value(Recorded::Null::<String>(NullFlavor::Unknown)).unwrap();
        assert_eq!(value, serde_json::json!({"status": "null", "value": "UNK"}));

        let absent = serde_json::to_value(Recorded::<String>::Absent).unwrap();
        assert_eq!(absent, serde_json::json!({"status": "absent"}));
    }

    #[test]
    fn section_codes_round_trip() {
        for section in SectionType::ALL {
            assert_eq!(SectionType::from_loinc(section.loinc_code()), Some(section));
        }
    }
}
