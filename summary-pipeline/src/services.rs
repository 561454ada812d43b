//! Per-section services sharing one contract.
//!
//! A service knows which section it serves, how to pull its entries out of a
//! source document, which entries are the same fact, and how the finished list
//! is ordered for display.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use summary_core::{ClinicalSectionEntry, EntryDetails, SectionType};

use crate::source::SourceDocument;

pub trait SectionService: Send + Sync {
    fn section_type(&self) -> SectionType;

    fn extract(&self, document: &SourceDocument) -> Vec<ClinicalSectionEntry> {
        document.extract_section(self.section_type())
    }

    /// Identity used to drop repeated entries within one source.
    fn identity(&self, entry: &ClinicalSectionEntry) -> Option<String> {
        entry_identity(entry)
    }

    /// Order the enhanced entries for display. Source order by default.
    fn arrange(&self, _entries: &mut Vec<ClinicalSectionEntry>) {}
}

/// Drop later entries whose identity was already seen. Entries without an
/// identity are always kept.
pub fn dedup_entries(
    service: &dyn SectionService,
    entries: Vec<ClinicalSectionEntry>,
) -> Vec<ClinicalSectionEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| match service.identity(entry) {
            Some(identity) => seen.insert(identity),
            None => true,
        })
        .collect()
}

/// Source id when there is one, otherwise the primary code, the display and
/// the first timestamp together.
pub fn entry_identity(entry: &ClinicalSectionEntry) -> Option<String> {
    if let Some(id) = &entry.source_id {
        return Some(format!("id:{id}"));
    }
    let code = entry.primary_code().and_then(|code| {
        Some(format!("{}|{}", code.system.as_deref().unwrap_or_default(), code.code.value()?))
    });
    let display = entry.display_name.value();
    if code.is_none() && display.is_none() {
        return None;
    }
    Some(format!(
        "entry:{}:{}:{}",
        code.unwrap_or_default(),
        display.map(String::as_str).unwrap_or_default(),
        entry.effective_time.sort_key().unwrap_or_default()
    ))
}

/// Display order a standard service applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrdering {
    Source,
    /// Most recent first; undated entries last.
    NewestFirst,
    /// Active entries first, then the rest, each group newest first.
    ActiveFirst,
    /// High criticality allergies first.
    CriticalFirst,
}

#[derive(Debug, Clone, Copy)]
pub struct StandardSectionService {
    section_type: SectionType,
    ordering: EntryOrdering,
}

impl StandardSectionService {
    pub fn new(section_type: SectionType, ordering: EntryOrdering) -> Self {
        Self {
            section_type,
            ordering,
        }
    }

    /// Service for any section without dedicated ordering rules.
    pub fn generic(section_type: SectionType) -> Self {
        Self::new(section_type, EntryOrdering::Source)
    }
}

impl SectionService for StandardSectionService {
    fn section_type(&self) -> SectionType {
        self.section_type
    }

    fn arrange(&self, entries: &mut Vec<ClinicalSectionEntry>) {
        match self.ordering {
            EntryOrdering::Source => {}
            EntryOrdering::NewestFirst => entries.sort_by(newest_first),
            EntryOrdering::ActiveFirst => {
                entries.sort_by(|a, b| {
                    is_inactive(a)
                        .cmp(&is_inactive(b))
                        .then_with(|| newest_first(a, b))
                })
            }
            EntryOrdering::CriticalFirst => {
                entries.sort_by_key(|entry| !is_high_criticality(entry));
            }
        }
    }
}

/// One service per section type, with the orderings the summary views use.
pub fn default_services() -> Vec<Arc<dyn SectionService>> {
    SectionType::ALL
        .iter()
        .map(|section| {
            let ordering = match section {
                SectionType::Allergies => EntryOrdering::CriticalFirst,
                SectionType::Medications | SectionType::Problems => EntryOrdering::ActiveFirst,
                SectionType::VitalSigns | SectionType::Results | SectionType::Immunizations => {
                    EntryOrdering::NewestFirst
                }
                _ => EntryOrdering::Source,
            };
            Arc::new(StandardSectionService::new(*section, ordering)) as Arc<dyn SectionService>
        })
        .collect()
}

fn newest_first(a: &ClinicalSectionEntry, b: &ClinicalSectionEntry) -> Ordering {
    match (date_key(a), date_key(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Digits of the first timestamp, so `2024-03-01` and `20240301` compare alike.
fn date_key(entry: &ClinicalSectionEntry) -> Option<String> {
    let digits: String = entry
        .effective_time
        .sort_key()?
        .chars()
        .filter(char::is_ascii_digit)
        .take(8)
        .collect();
    (!digits.is_empty()).then_some(digits)
}

fn is_inactive(entry: &ClinicalSectionEntry) -> bool {
    const INACTIVE: &[&str] = &[
        "completed",
        "resolved",
        "inactive",
        "stopped",
        "aborted",
        "cancelled",
        "entered-in-error",
        "remission",
    ];
    let status = match &entry.details {
        EntryDetails::Problem(problem) => problem.clinical_status.as_deref(),
        EntryDetails::Allergy(allergy) => allergy.clinical_status.as_deref(),
        _ => None,
    }
    .or(entry.status_code.as_deref());
    status.is_some_and(|status| INACTIVE.contains(&status.to_ascii_lowercase().as_str()))
}

fn is_high_criticality(entry: &ClinicalSectionEntry) -> bool {
    match &entry.details {
        EntryDetails::Allergy(allergy) => allergy
            .criticality
            .as_deref()
            .is_some_and(|criticality| criticality.eq_ignore_ascii_case("high")),
        _ => false,
    }
}
