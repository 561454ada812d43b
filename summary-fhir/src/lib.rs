//! FHIR R4 document bundles: a reference index over the bundle entries,
//! Composition-driven section assembly with the author-scoped practitioner
//! filter, and processors for the clinical data types.

pub mod admin;
pub mod bundle;
pub mod composition;
pub mod datatypes;
pub mod index;
pub mod resources;

pub use admin::extract_administrative;
pub use bundle::{
    parse_bundle_str, parse_bundle_str_with, parse_bundle_value, parse_bundle_value_with,
    CompositionSelector, FhirDocument,
};
pub use composition::{
    assemble_sections, practitioner_filter, strip_markup, AssembledComposition, AssembledSection,
    CompositionFilterResult,
};
pub use index::{resource_key, resource_type, ResourceIndex};
pub use resources::{map_resource, section_for_resource};
