//! Entry point for FHIR document bundles.

use std::collections::BTreeMap;

use serde_json::Value;
use summary_core::fingerprint::{document_fingerprint, short_fingerprint};
use summary_core::{
    AdministrativeRecord, AttachmentValue, ClinicalDocument, ClinicalSectionEntry,
    DocumentFormat, Recorded, SectionNarrative, SectionType, SummaryError, SummaryResult,
};
use tracing::{debug, info, warn};

use crate::admin::extract_administrative;
use crate::composition::{assemble_sections, practitioner_filter, AssembledComposition};
use crate::datatypes::{attachment, text};
use crate::index::ResourceIndex;
use crate::resources::{map_resource, section_for_resource};

/// Which Composition of a bundle describes the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompositionSelector {
    /// The bundle's only Composition. A bundle carrying several is refused
    /// rather than guessed at.
    #[default]
    Sole,
    /// A Composition by `Composition/{id}`, `fullUrl` or bare id.
    Reference(String),
    /// The Composition whose `subject` resolves to this Patient reference.
    Subject(String),
}

impl CompositionSelector {
    fn describe(&self) -> Option<String> {
        match self {
            CompositionSelector::Sole => None,
            CompositionSelector::Reference(reference) => Some(format!("composition={reference}")),
            CompositionSelector::Subject(reference) => Some(format!("subject={reference}")),
        }
    }
}

/// A parsed bundle with its resource index and extracted sections. Immutable
/// once built.
#[derive(Debug, Clone)]
pub struct FhirDocument {
    bundle_id: Option<String>,
    bundle_type: Option<String>,
    index: ResourceIndex,
    composition: Option<usize>,
    sections: BTreeMap<SectionType, Vec<ClinicalSectionEntry>>,
    version: String,
}

/// Parse a bundle from its JSON text.
pub fn parse_bundle_str(bundle_json: &str) -> SummaryResult<FhirDocument> {
    parse_bundle_str_with(bundle_json, &CompositionSelector::Sole)
}

/// Parse a bundle from its JSON text, reading the Composition `selector` picks.
pub fn parse_bundle_str_with(
    bundle_json: &str,
    selector: &CompositionSelector,
) -> SummaryResult<FhirDocument> {
    let value: Value = serde_json::from_str(bundle_json)
        .map_err(|err| SummaryError::malformed_json(err.to_string()))?;
    parse_bundle_value_with(value, document_fingerprint(bundle_json.as_bytes()), selector)
}

/// Build a document from an already decoded bundle.
pub fn parse_bundle_value(bundle: Value, version: String) -> SummaryResult<FhirDocument> {
    parse_bundle_value_with(bundle, version, &CompositionSelector::Sole)
}

pub fn parse_bundle_value_with(
    bundle: Value,
    version: String,
    selector: &CompositionSelector,
) -> SummaryResult<FhirDocument> {
    let resource_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| SummaryError::malformed_json("missing resourceType"))?;
    if resource_type != "Bundle" {
        return Err(SummaryError::UnsupportedDocument(format!(
            "expected resourceType Bundle, received {resource_type}"
        )));
    }

    let bundle_id = text(&bundle, "id");
    let bundle_type = text(&bundle, "type");
    let index = ResourceIndex::build(bundle);
    let composition = select_composition(&index, selector)?;
    // The same bundle read through another Composition is another document.
    let version = match selector.describe() {
        Some(choice) => document_fingerprint(format!("{version}\n{choice}").as_bytes()),
        None => version,
    };
    info!(
        resources = index.len(),
        bundle_type = bundle_type.as_deref().unwrap_or("unknown"),
        version = short_fingerprint(&version),
        "parsed FHIR bundle"
    );

    let mut document = FhirDocument {
        bundle_id,
        bundle_type,
        index,
        composition,
        sections: BTreeMap::new(),
        version,
    };
    document.sections = document.collect_sections();
    Ok(document)
}

fn select_composition(
    index: &ResourceIndex,
    selector: &CompositionSelector,
) -> SummaryResult<Option<usize>> {
    let candidates = index.positions_of_type("Composition");
    let selected = match selector {
        CompositionSelector::Sole => {
            return match candidates.len() {
                0 | 1 => Ok(candidates.first().copied()),
                found => Err(SummaryError::UnsupportedDocument(format!(
                    "bundle holds {found} Compositions, select one by reference or subject"
                ))),
            };
        }
        CompositionSelector::Reference(reference) => index
            .position(&format!("Composition/{reference}"))
            .or_else(|| index.position(reference))
            .filter(|position| candidates.contains(position)),
        CompositionSelector::Subject(patient) => {
            let patient = index.position(patient);
            candidates.iter().copied().find(|position| {
                patient.is_some()
                    && index
                        .get(*position)
                        .and_then(|composition| composition.get("subject"))
                        .and_then(|subject| subject.get("reference"))
                        .and_then(Value::as_str)
                        .and_then(|reference| index.position(reference))
                        == patient
            })
        }
    };
    match selected {
        Some(position) => Ok(Some(position)),
        None => Err(SummaryError::UnsupportedDocument(format!(
            "no Composition in the bundle matches {}",
            selector.describe().unwrap_or_default()
        ))),
    }
}

impl FhirDocument {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn bundle_id(&self) -> Option<&str> {
        self.bundle_id.as_deref()
    }

    pub fn bundle_type(&self) -> Option<&str> {
        self.bundle_type.as_deref()
    }

    pub fn index(&self) -> &ResourceIndex {
        &self.index
    }

    /// The Composition this document was read through.
    pub fn composition(&self) -> Option<&Value> {
        self.composition.and_then(|position| self.index.get(position))
    }

    /// The subject of the Composition, or the only Patient in the bundle.
    pub fn patient(&self) -> Option<&Value> {
        if let Some(composition) = self.composition() {
            return composition
                .get("subject")
                .and_then(|subject| self.index.resolve_reference(subject));
        }
        let mut patients = self.index.of_type("Patient");
        match (patients.next(), patients.next()) {
            (Some(patient), None) => Some(patient),
            _ => None,
        }
    }

    pub fn patient_id(&self) -> Recorded<String> {
        let Some(patient) = self.patient() else {
            return Recorded::Absent;
        };
        Recorded::from_option(
            patient
                .get("identifier")
                .and_then(Value::as_array)
                .and_then(|identifiers| identifiers.first())
                .and_then(|identifier| text(identifier, "value"))
                .or_else(|| text(patient, "id")),
        )
    }

    pub fn country_code(&self) -> Option<String> {
        self.patient()?
            .get("address")
            .and_then(Value::as_array)?
            .iter()
            .find_map(|address| text(address, "country"))
            .map(|country| country.to_ascii_uppercase())
    }

    pub fn assemble(&self) -> SummaryResult<AssembledComposition> {
        let composition = self
            .composition()
            .ok_or_else(|| SummaryError::UnsupportedDocument("bundle has no Composition".into()))?;
        let id = text(composition, "id").unwrap_or_default();
        assemble_sections(&id, &self.index)
    }

    pub fn administrative(&self) -> AdministrativeRecord {
        match self.composition() {
            Some(composition) => {
                let care_team = practitioner_filter(composition, &self.index);
                extract_administrative(composition, &self.index, &care_team)
            }
            None => AdministrativeRecord::default(),
        }
    }

    /// Entries of one section type.
    pub fn extract_section(&self, section_type: SectionType) -> Vec<ClinicalSectionEntry> {
        self.sections.get(&section_type).cloned().unwrap_or_default()
    }

    /// Every section with entries.
    pub fn extract_all(&self) -> BTreeMap<SectionType, Vec<ClinicalSectionEntry>> {
        self.sections.clone()
    }

    /// Map every section once, following the Composition. Bundles without one
    /// are grouped by resource type, keeping only resources about the bundle's
    /// patient.
    fn collect_sections(&self) -> BTreeMap<SectionType, Vec<ClinicalSectionEntry>> {
        let mut out: BTreeMap<SectionType, Vec<ClinicalSectionEntry>> = BTreeMap::new();

        match self.assemble() {
            Ok(assembled) => {
                for section in &assembled.sections {
                    let Some(section_type) = section.section_type else {
                        debug!(
                            code = ?section.code,
                            title = ?section.title,
                            "skipping unmapped section"
                        );
                        continue;
                    };
                    let entries = out.entry(section_type).or_default();
                    for resource in section.resources.iter().filter_map(|p| self.index.get(*p)) {
                        entries.push(map_resource(resource, section_type, &self.index));
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "no Composition, grouping resources by type");
                let patient = self.patient();
                for resource_type in FALLBACK_TYPES {
                    for resource in self.index.of_type(resource_type) {
                        if !self.is_about(resource, patient) {
                            continue;
                        }
                        if let Some(section_type) = section_for_resource(resource) {
                            out.entry(section_type)
                                .or_default()
                                .push(map_resource(resource, section_type, &self.index));
                        }
                    }
                }
            }
        }
        out
    }

    /// True when the resource's `subject` (or `patient`) resolves to `patient`.
    /// Resources that name no subject are kept; anything pointing elsewhere,
    /// or anywhere at all when the patient is unknown, is not.
    fn is_about(&self, resource: &Value, patient: Option<&Value>) -> bool {
        let Some(subject) = resource.get("subject").or_else(|| resource.get("patient")) else {
            return true;
        };
        match (self.index.resolve_reference(subject), patient) {
            (Some(resolved), Some(patient)) => std::ptr::eq(resolved, patient),
            _ => false,
        }
    }

    pub fn narratives(&self) -> BTreeMap<SectionType, SectionNarrative> {
        let mut out = BTreeMap::new();
        if let Ok(assembled) = self.assemble() {
            for section in assembled.sections {
                if let Some(section_type) = section.section_type {
                    out.entry(section_type).or_insert(SectionNarrative {
                        title: Recorded::from_option(section.title),
                        text: section.text,
                    });
                }
            }
        }
        out
    }

    /// Documents carried as `Binary` or `DocumentReference` content.
    pub fn attachments(&self) -> Vec<AttachmentValue> {
        let binaries = self.index.of_type("Binary").filter_map(attachment);
        let references = self.index.of_type("DocumentReference").flat_map(|reference| {
            reference
                .get("content")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|content| content.get("attachment").and_then(attachment))
        });
        binaries.chain(references).collect()
    }

    pub fn to_clinical_document(&self) -> ClinicalDocument {
        let document = ClinicalDocument {
            format: DocumentFormat::Fhir,
            patient_id: self.patient_id(),
            country_code: self.country_code(),
            version: self.version.clone(),
            administrative: self.administrative(),
            sections: self.extract_all(),
            narratives: self.narratives(),
            attachments: self.attachments(),
        };
        debug!(
            entries = document.entry_count(),
            sections = document.sections.len(),
            "assembled FHIR clinical document"
        );
        document
    }
}

const FALLBACK_TYPES: &[&str] = &[
    "AllergyIntolerance",
    "MedicationStatement",
    "MedicationRequest",
    "MedicationAdministration",
    "Condition",
    "Procedure",
    "Immunization",
    "Observation",
    "DeviceUseStatement",
    "CarePlan",
    "Consent",
];
