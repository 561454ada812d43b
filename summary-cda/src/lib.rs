//! CDA R2 extraction: namespace-tolerant element lookup, nullFlavor-aware
//! value resolution, header and clinical section extraction.
//!
//! National CDA generators disagree on how namespaces are declared, so nothing
//! in this crate uses fixed-prefix paths. Every lookup goes through
//! [`ElementLocator`].

pub mod admin;
pub mod document;
pub mod locator;
pub mod null_flavor;
pub mod sections;
pub mod xml;

pub use admin::{extract_administrative, extract_organization, extract_person};
pub use document::{parse_cda, CdaDocument};
pub use locator::{ElementLocator, CDA_NAMESPACES};
pub use null_flavor::{recorded_attribute, recorded_text, resolve_value, ResolvedValue, ValueSource};
pub use sections::extract_section;
pub use xml::{parse_xml, XmlElement, XmlNode};
