//! Shared clinical model for normalized patient summaries.
//!
//! Both the CDA and the FHIR extractors produce the types defined here, so the
//! presentation layer only ever sees one shape of data regardless of the wire
//! format the document arrived in.

pub mod admin;
pub mod codesystems;
pub mod config;
pub mod dates;
pub mod document;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod values;

pub use admin::{
    Address, AdministrativeRecord, ContactInfo, Identifier, OrganizationRecord,
    PatientDemographics, PersonKind, PersonRecord, Telecom,
};
pub use config::PipelineConfig;
pub use document::{ClinicalDocument, ClinicalSummary, SectionNarrative};
pub use entry::{
    AllergyDetails, ClinicalSectionEntry, CodeResolution, CodedValue, EffectiveTime,
    EntryDetails, EntryRelationship, Ingredient, MedicationDetails, ProblemDetails,
    Reaction,
};
pub use error::{SummaryError, SummaryResult};
pub use model::{DocumentFormat, NullFlavor, Recorded, SectionType, SourceKind};
pub use values::{
    AnnotationValue, AttachmentValue, ConceptValue, PeriodValue, QuantityValue, RangeValue,
    RatioValue, RepeatPattern, TimingValue, ValueData,
};

