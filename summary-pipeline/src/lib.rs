//! Session-scoped clinical section pipeline.
//!
//! Sections are extracted from the parsed documents by per-section services,
//! enhanced (dates and terminology displays), and cached per session keyed by
//! `(session, document version, section)`.

pub mod enhance;
pub mod manager;
pub mod services;
pub mod session;
pub mod source;
pub mod terminology;

pub use enhance::{enhance_entries, format_entry_dates};
pub use manager::{ClinicalPipelineManager, EntryOrigin, SectionOutcome, SectionState};
pub use services::{
    default_services, dedup_entries, entry_identity, EntryOrdering, SectionService,
    StandardSectionService,
};
pub use session::{MemorySessionStore, SessionStore};
pub use source::{DocumentInput, SourceDocument};
pub use summary_fhir::CompositionSelector;
pub use terminology::{StaticTerminology, TerminologyError, TerminologyGateway, TerminologyResolver};
