//! Parsed document handle and the summary handed to renderers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::admin::AdministrativeRecord;
use crate::entry::ClinicalSectionEntry;
use crate::model::{DocumentFormat, Recorded, SectionType};
use crate::values::AttachmentValue;

/// Section heading and flattened narrative as the author wrote it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SectionNarrative {
    pub title: Recorded<String>,
    pub text: Option<String>,
}

/// One parsed source document. Built once at parse time and not mutated after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalDocument {
    pub format: DocumentFormat,
    pub patient_id: Recorded<String>,
    pub country_code: Option<String>,
    /// Content fingerprint, changes whenever the source bytes change.
    pub version: String,
    pub administrative: AdministrativeRecord,
    pub sections: BTreeMap<SectionType, Vec<ClinicalSectionEntry>>,
    pub narratives: BTreeMap<SectionType, SectionNarrative>,
    pub attachments: Vec<AttachmentValue>,
}

impl ClinicalDocument {
    pub fn entries(&self, section: SectionType) -> &[ClinicalSectionEntry] {
        self.sections
            .get(&section)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn entry_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }
}

/// Output contract for the presentation layer. Plain data only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalSummary {
    pub format: DocumentFormat,
    pub document_version: String,
    pub administrative: AdministrativeRecord,
    pub sections: BTreeMap<SectionType, Vec<ClinicalSectionEntry>>,
}
