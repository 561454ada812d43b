//! Parsed inputs handed to the pipeline.

use std::collections::BTreeMap;

use summary_cda::{parse_cda, CdaDocument};
use summary_core::fingerprint::document_fingerprint;
use summary_core::{
    AdministrativeRecord, ClinicalDocument, ClinicalSectionEntry, DocumentFormat, SectionType,
    SourceKind, SummaryResult,
};
use summary_fhir::{parse_bundle_str_with, CompositionSelector, FhirDocument};

/// One parsed document in either wire format.
#[derive(Debug, Clone)]
pub enum SourceDocument {
    Cda(CdaDocument),
    Fhir(FhirDocument),
}

impl SourceDocument {
    pub fn parse(raw: &str, format: DocumentFormat) -> SummaryResult<Self> {
        Self::parse_with(raw, format, &CompositionSelector::Sole)
    }

    /// Parse `raw`, reading a FHIR bundle through the Composition `selector`
    /// picks. CDA documents ignore the selector.
    pub fn parse_with(
        raw: &str,
        format: DocumentFormat,
        selector: &CompositionSelector,
    ) -> SummaryResult<Self> {
        match format {
            DocumentFormat::CdaL1 | DocumentFormat::CdaL3 => parse_cda(raw, format).map(Self::Cda),
            DocumentFormat::Fhir => parse_bundle_str_with(raw, selector).map(Self::Fhir),
        }
    }

    pub fn format(&self) -> DocumentFormat {
        match self {
            SourceDocument::Cda(document) => document.format(),
            SourceDocument::Fhir(_) => DocumentFormat::Fhir,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.format().source_kind()
    }

    pub fn version(&self) -> &str {
        match self {
            SourceDocument::Cda(document) => document.version(),
            SourceDocument::Fhir(document) => document.version(),
        }
    }

    pub fn administrative(&self) -> AdministrativeRecord {
        match self {
            SourceDocument::Cda(document) => document.administrative(),
            SourceDocument::Fhir(document) => document.administrative(),
        }
    }

    pub fn extract_section(&self, section_type: SectionType) -> Vec<ClinicalSectionEntry> {
        match self {
            SourceDocument::Cda(document) => document.extract_section(section_type),
            SourceDocument::Fhir(document) => document.extract_section(section_type),
        }
    }

    pub fn extract_all(&self) -> BTreeMap<SectionType, Vec<ClinicalSectionEntry>> {
        match self {
            SourceDocument::Cda(document) => document.extract_all(),
            SourceDocument::Fhir(document) => document.extract_all(),
        }
    }

    pub fn to_clinical_document(&self) -> ClinicalDocument {
        match self {
            SourceDocument::Cda(document) => document.to_clinical_document(),
            SourceDocument::Fhir(document) => document.to_clinical_document(),
        }
    }
}

impl From<CdaDocument> for SourceDocument {
    fn from(document: CdaDocument) -> Self {
        SourceDocument::Cda(document)
    }
}

impl From<FhirDocument> for SourceDocument {
    fn from(document: FhirDocument) -> Self {
        SourceDocument::Fhir(document)
    }
}

/// The document being viewed plus, optionally, a second rendition of the same
/// summary (typically the FHIR bundle next to a CDA). The secondary document
/// only fills sections the primary leaves empty.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub primary: SourceDocument,
    pub secondary: Option<SourceDocument>,
    version: String,
}

impl DocumentInput {
    pub fn new(primary: impl Into<SourceDocument>) -> Self {
        let primary = primary.into();
        Self {
            version: primary.version().to_string(),
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<SourceDocument>) -> Self {
        let secondary = secondary.into();
        self.version = document_fingerprint(
            format!("{}+{}", self.primary.version(), secondary.version()).as_bytes(),
        );
        self.secondary = Some(secondary);
        self
    }

    /// Cache version. Changes when either document changes.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn format(&self) -> DocumentFormat {
        self.primary.format()
    }

    pub fn administrative(&self) -> AdministrativeRecord {
        self.primary.administrative()
    }
}
