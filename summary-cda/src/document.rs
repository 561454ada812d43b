//! Entry point for CDA documents: parse once, then hand out header data,
//! per-section entries and the L1 embedded attachment.

use std::collections::BTreeMap;

use summary_core::fingerprint::document_fingerprint;
use summary_core::values::format_size;
use summary_core::{
    AdministrativeRecord, AttachmentValue, ClinicalDocument, ClinicalSectionEntry,
    DocumentFormat, Recorded, SectionNarrative, SectionType, SummaryError, SummaryResult,
};
use tracing::{debug, info};

use crate::admin::extract_administrative;
use crate::locator::ElementLocator;
use crate::null_flavor::{recorded_attribute, recorded_text};
use crate::sections::extract_section;
use crate::xml::{parse_xml, XmlElement};

/// Section title fragments used when a section carries no recognised LOINC
/// code. Matched case-insensitively against the section `title`.
const TITLE_KEYWORDS: &[(&str, SectionType)] = &[
    ("allerg", SectionType::Allergies),
    ("intoleran", SectionType::Allergies),
    ("medication", SectionType::Medications),
    ("médicament", SectionType::Medications),
    ("medicament", SectionType::Medications),
    ("farmac", SectionType::Medications),
    ("past illness", SectionType::PastIllness),
    ("antécédents", SectionType::PastIllness),
    ("problem", SectionType::Problems),
    ("problèm", SectionType::Problems),
    ("diagnos", SectionType::Problems),
    ("procedur", SectionType::Procedures),
    ("intervention", SectionType::Procedures),
    ("immuni", SectionType::Immunizations),
    ("vaccin", SectionType::Immunizations),
    ("vital", SectionType::VitalSigns),
    ("result", SectionType::Results),
    ("résultat", SectionType::Results),
    ("device", SectionType::MedicalDevices),
    ("dispositi", SectionType::MedicalDevices),
    ("pregnan", SectionType::PregnancyHistory),
    ("grossesse", SectionType::PregnancyHistory),
    ("embarazo", SectionType::PregnancyHistory),
    ("social", SectionType::SocialHistory),
    ("functional", SectionType::FunctionalStatus),
    ("plan of care", SectionType::PlanOfCare),
    ("care plan", SectionType::PlanOfCare),
    ("advance directive", SectionType::AdvanceDirectives),
];

/// A parsed CDA document with its sections extracted. Immutable once built.
#[derive(Debug, Clone)]
pub struct CdaDocument {
    root: XmlElement,
    locator: ElementLocator,
    format: DocumentFormat,
    entries: BTreeMap<SectionType, Vec<ClinicalSectionEntry>>,
    version: String,
}

/// Parse `xml` as a CDA document of the caller-supplied level.
pub fn parse_cda(xml: &str, format: DocumentFormat) -> SummaryResult<CdaDocument> {
    if !format.is_cda() {
        return Err(SummaryError::UnsupportedDocument(format!(
            "{format} is not a CDA document format"
        )));
    }

    let root = parse_xml(xml)?;
    if root.local_name() != "ClinicalDocument" {
        return Err(SummaryError::UnsupportedDocument(format!(
            "expected ClinicalDocument root, found {}",
            root.qualified_name()
        )));
    }

    let locator = ElementLocator::for_root(&root);
    let version = document_fingerprint(xml.as_bytes());
    info!(
        %format,
        prefixes = ?locator.root_prefixes(),
        version = summary_core::fingerprint::short_fingerprint(&version),
        "parsed CDA document"
    );

    let mut document = CdaDocument {
        root,
        locator,
        format,
        entries: BTreeMap::new(),
        version,
    };
    document.entries = document.collect_entries();
    Ok(document)
}

impl CdaDocument {
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    pub fn locator(&self) -> &ElementLocator {
        &self.locator
    }

    pub fn administrative(&self) -> AdministrativeRecord {
        extract_administrative(&self.root, &self.locator)
    }

    /// Extension of the first patient identifier, or its root when there is none.
    pub fn patient_id(&self) -> Recorded<String> {
        let Some(id) = self
            .locator
            .path(&self.root, &["recordTarget", "patientRole", "id"])
        else {
            return Recorded::Absent;
        };
        match recorded_attribute(Some(id), "extension") {
            Recorded::Absent => recorded_attribute(Some(id), "root"),
            recorded => recorded,
        }
    }

    /// Country of the patient address, then of the custodian, then the realm.
    pub fn country_code(&self) -> Option<String> {
        let patient_country = self
            .locator
            .path(&self.root, &["recordTarget", "patientRole", "addr", "country"]);
        let custodian_country = self.locator.path(
            &self.root,
            &[
                "custodian",
                "assignedCustodian",
                "representedCustodianOrganization",
                "addr",
                "country",
            ],
        );
        patient_country
            .into_iter()
            .chain(custodian_country)
            .find_map(|country| recorded_text(Some(country)).into_value())
            .or_else(|| {
                self.locator
                    .child(&self.root, &["realmCode"])
                    .and_then(|realm| realm.attribute_text("code"))
            })
            .map(|code| code.to_ascii_uppercase())
    }

    /// Top-level sections of the structured body that map to a known section type.
    pub fn sections(&self) -> Vec<(SectionType, &XmlElement)> {
        self.locator
            .path_all(
                &self.root,
                &["component", "structuredBody", "component", "section"],
            )
            .into_iter()
            .filter_map(|section| {
                let section_type = self.identify_section(section)?;
                Some((section_type, section))
            })
            .collect()
    }

    fn identify_section(&self, section: &XmlElement) -> Option<SectionType> {
        let by_code = self
            .locator
            .child(section, &["code"])
            .and_then(|code| code.attribute("code"))
            .and_then(SectionType::from_loinc);
        if by_code.is_some() {
            return by_code;
        }
        let title = self
            .locator
            .child(section, &["title"])?
            .flattened_text()
            .to_lowercase();
        TITLE_KEYWORDS
            .iter()
            .find(|(keyword, _)| title.contains(keyword))
            .map(|(_, section_type)| *section_type)
    }

    /// Entries of one section type. A document may split a type across several
    /// sections; their entries are concatenated in document order.
    pub fn extract_section(&self, section_type: SectionType) -> Vec<ClinicalSectionEntry> {
        self.entries.get(&section_type).cloned().unwrap_or_default()
    }

    pub fn extract_all(&self) -> BTreeMap<SectionType, Vec<ClinicalSectionEntry>> {
        self.entries.clone()
    }

    fn collect_entries(&self) -> BTreeMap<SectionType, Vec<ClinicalSectionEntry>> {
        let mut out: BTreeMap<SectionType, Vec<ClinicalSectionEntry>> = BTreeMap::new();
        for (section_type, section) in self.sections() {
            out.entry(section_type)
                .or_default()
                .extend(extract_section(section, section_type, &self.locator));
        }
        out
    }

    pub fn narratives(&self) -> BTreeMap<SectionType, SectionNarrative> {
        let mut out = BTreeMap::new();
        for (section_type, section) in self.sections() {
            let text = self
                .locator
                .child(section, &["text"])
                .map(XmlElement::flattened_text)
                .filter(|text| !text.is_empty());
            out.entry(section_type).or_insert_with(|| SectionNarrative {
                title: recorded_text(self.locator.child(section, &["title"])),
                text,
            });
        }
        out
    }

    /// Documents embedded in a Level 1 `nonXMLBody`.
    pub fn attachments(&self) -> Vec<AttachmentValue> {
        self.locator
            .path_all(&self.root, &["component", "nonXMLBody", "text"])
            .into_iter()
            .map(|text| {
                let inline: String = text
                    .flattened_text()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let is_base64 = text
                    .attribute("representation")
                    .is_some_and(|representation| representation.eq_ignore_ascii_case("B64"));
                let size = is_base64.then(|| decoded_len(&inline));
                AttachmentValue {
                    content_type: text.attribute_text("mediaType"),
                    language: self
                        .locator
                        .child(&self.root, &["languageCode"])
                        .and_then(|language| language.attribute_text("code")),
                    size_display: size.map(format_size),
                    size,
                    inline_data: (!inline.is_empty()).then_some(inline),
                    title: recorded_text(self.locator.child(&self.root, &["title"])).into_value(),
                    ..AttachmentValue::default()
                }
            })
            .collect()
    }

    pub fn to_clinical_document(&self) -> ClinicalDocument {
        let sections = self.extract_all();
        let document = ClinicalDocument {
            format: self.format,
            patient_id: self.patient_id(),
            country_code: self.country_code(),
            version: self.version.clone(),
            administrative: self.administrative(),
            narratives: self.narratives(),
            attachments: self.attachments(),
            sections,
        };
        debug!(
            entries = document.entry_count(),
            sections = document.sections.len(),
            "assembled CDA clinical document"
        );
        document
    }
}

/// Byte length of a base64 payload without decoding it.
fn decoded_len(base64: &str) -> u64 {
    let padding = base64.chars().rev().take_while(|c| *c == '=').count();
    ((base64.len() / 4) * 3).saturating_sub(padding) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoded_length_accounts_for_padding() {
        assert_eq!(decoded_len("SGVsbG8="), 5);
        assert_eq!(decoded_len("SGVsbG8h"), 6);
        assert_eq!(decoded_len(""), 0);
    }

    #[test]
    fn rejects_fhir_format_and_foreign_roots() {
        assert!(matches!(
            parse_cda("<ClinicalDocument/>", DocumentFormat::Fhir),
            Err(SummaryError::UnsupportedDocument(_))
        ));
        assert!(matches!(
            parse_cda("<Bundle/>", DocumentFormat::CdaL3),
            Err(SummaryError::UnsupportedDocument(_))
        ));
    }
}
