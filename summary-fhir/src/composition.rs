//! Composition-driven section assembly and the practitioner filter.
//!
//! A bundle may carry Practitioner resources that belong to other patients'
//! documents. Only practitioners the Composition's authors actually point at
//! are ever shown; everything else in the bundle is ignored.

use std::collections::BTreeSet;

use serde_json::Value;
use summary_core::{SectionType, SummaryError, SummaryResult};
use tracing::{debug, warn};

use crate::datatypes::{codeable_concept, text};
use crate::index::{resource_key, resource_type, ResourceIndex};

/// One Composition section with its entries resolved to index positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledSection {
    pub section_type: Option<SectionType>,
    pub code: Option<String>,
    pub title: Option<String>,
    /// Narrative with markup stripped.
    pub text: Option<String>,
    pub resources: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledComposition {
    pub composition_key: String,
    pub sections: Vec<AssembledSection>,
    /// Practitioners legitimately referenced by the Composition authors.
    pub care_team: CompositionFilterResult,
    pub unresolved_references: Vec<String>,
}

/// Index positions of the Practitioner resources that survived the filter.
///
/// Positions, not ids: two bundle entries may share an `id` while belonging to
/// different documents, and only the entry the author reference resolves to
/// may be shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionFilterResult {
    pub practitioners: BTreeSet<usize>,
}

impl CompositionFilterResult {
    pub fn len(&self) -> usize {
        self.practitioners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.practitioners.is_empty()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.practitioners.contains(&position)
    }

    /// The surviving Practitioner resources in bundle order.
    pub fn resources<'a>(
        &'a self,
        index: &'a ResourceIndex,
    ) -> impl Iterator<Item = &'a Value> + 'a {
        self.practitioners
            .iter()
            .filter_map(move |position| index.get(*position))
    }
}

/// Walk the sections of the Composition `composition_id`, resolving every
/// entry reference through `index`. Unresolvable references are logged and
/// left out.
pub fn assemble_sections(
    composition_id: &str,
    index: &ResourceIndex,
) -> SummaryResult<AssembledComposition> {
    let composition = index
        .resolve(&format!("Composition/{composition_id}"))
        .or_else(|| index.resolve(composition_id))
        .filter(|resource| resource_type(resource) == Some("Composition"))
        .ok_or_else(|| {
            SummaryError::UnsupportedDocument(format!(
                "Composition {composition_id} is not in the bundle"
            ))
        })?;

    let mut assembled = AssembledComposition {
        composition_key: resource_key(composition).unwrap_or_else(|| composition_id.to_string()),
        care_team: practitioner_filter(composition, index),
        ..AssembledComposition::default()
    };

    let mut pending: Vec<&Value> = sections_of(composition);
    while !pending.is_empty() {
        let mut nested = Vec::new();
        for section in pending {
            assembled
                .sections
                .push(assemble_section(section, index, &mut assembled.unresolved_references));
            nested.extend(sections_of(section));
        }
        pending = nested;
    }

    debug!(
        composition = %assembled.composition_key,
        sections = assembled.sections.len(),
        care_team = assembled.care_team.len(),
        unresolved = assembled.unresolved_references.len(),
        "assembled Composition"
    );
    Ok(assembled)
}

fn sections_of(holder: &Value) -> Vec<&Value> {
    holder
        .get("section")
        .and_then(Value::as_array)
        .map(|sections| sections.iter().collect())
        .unwrap_or_default()
}

fn assemble_section(
    section: &Value,
    index: &ResourceIndex,
    unresolved: &mut Vec<String>,
) -> AssembledSection {
    let code = section
        .get("code")
        .and_then(codeable_concept)
        .and_then(|concept| {
            concept
                .codings
                .into_iter()
                .find_map(|coding| coding.code.into_value())
        });
    let section_type = code.as_deref().and_then(SectionType::from_loinc);
    let title = text(section, "title");

    let mut resources = Vec::new();
    for entry in section
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let Some(reference) = entry.get("reference").and_then(Value::as_str) else {
            continue;
        };
        match index.position(reference) {
            Some(position) => resources.push(position),
            None => {
                warn!(
                    reference,
                    section = title.as_deref().unwrap_or("untitled"),
                    "unresolved Composition section reference omitted"
                );
                unresolved.push(reference.to_string());
            }
        }
    }

    AssembledSection {
        section_type,
        code,
        text: section
            .get("text")
            .and_then(|narrative| narrative.get("div"))
            .and_then(Value::as_str)
            .map(strip_markup)
            .filter(|text| !text.is_empty()),
        title,
        resources,
    }
}

/// Practitioners named by `Composition.author`, directly or through a
/// `PractitionerRole`, intersected with the Practitioner resources actually in
/// the bundle. An empty author list gives an empty result; there is no fallback
/// to the other Practitioners in the bundle.
pub fn practitioner_filter(composition: &Value, index: &ResourceIndex) -> CompositionFilterResult {
    let in_bundle = index.positions_of_type("Practitioner");
    let mut referenced = BTreeSet::new();

    for author in composition
        .get("author")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let Some(position) = reference_position(author, index) else {
            continue;
        };
        let practitioner = match index.get(position).and_then(resource_type) {
            Some("Practitioner") => Some(position),
            Some("PractitionerRole") => index
                .get(position)
                .and_then(|role| role.get("practitioner"))
                .and_then(|reference| reference_position(reference, index)),
            _ => None,
        };
        referenced.extend(practitioner);
    }

    let practitioners: BTreeSet<usize> = referenced.intersection(&in_bundle).copied().collect();
    let excluded = in_bundle.len() - practitioners.len();
    if excluded > 0 {
        debug!(excluded, "bundle practitioners not referenced by the authors were dropped");
    }
    CompositionFilterResult { practitioners }
}

fn reference_position(reference: &Value, index: &ResourceIndex) -> Option<usize> {
    reference
        .get("reference")
        .and_then(Value::as_str)
        .and_then(|reference| index.position(reference))
}

/// Flatten XHTML narrative to plain text.
pub fn strip_markup(xhtml: &str) -> String {
    let mut out = String::with_capacity(xhtml.len());
    let mut in_tag = false;
    for c in xhtml.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_is_flattened() {
        let div = r#"<div xmlns="http://www.w3.org/1999/xhtml"><p>No known <b>allergies</b> &amp; intolerances</p></div>"#;
        assert_eq!(strip_markup(div), "No known allergies & intolerances");
    }
}
