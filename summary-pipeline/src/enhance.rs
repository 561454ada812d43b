//! Enhancement: canonical date display and terminology displays.

use std::collections::{HashMap, HashSet};

use summary_core::dates::{format_display_date, format_interval, format_recorded_date};
use summary_core::{ClinicalSectionEntry, CodeResolution, EffectiveTime, ValueData};
use tracing::debug;

use crate::terminology::TerminologyGateway;

/// Enhance entries in place. Without a gateway every pending code is marked
/// unresolved and keeps its raw display.
pub async fn enhance_entries(
    entries: &mut [ClinicalSectionEntry],
    gateway: Option<&TerminologyGateway>,
) {
    for entry in entries.iter_mut() {
        format_entry_dates(entry);
    }

    let mut pending: HashSet<(String, String)> = HashSet::new();
    for entry in entries.iter_mut() {
        entry.for_each_code_mut(&mut |code| {
            if code.resolution != CodeResolution::Pending {
                return;
            }
            if let (Some(system), Some(value)) = (code.system.as_ref(), code.code.value()) {
                pending.insert((system.clone(), value.clone()));
            }
        });
    }

    let mut displays: HashMap<(String, String), Option<String>> = HashMap::new();
    if let Some(gateway) = gateway {
        for (system, code) in pending {
            let display = gateway.display_for(&system, &code).await;
            displays.insert((system, code), display);
        }
    }

    let mut resolved = 0usize;
    for entry in entries.iter_mut() {
        entry.for_each_code_mut(&mut |code| {
            if code.resolution != CodeResolution::Pending {
                return;
            }
            let answer = match (code.system.clone(), code.code.value().cloned()) {
                (Some(system), Some(value)) => displays.get(&(system, value)).cloned().flatten(),
                _ => None,
            };
            if answer.is_some() {
                resolved += 1;
            }
            code.apply_resolution(answer);
        });
        refresh_concepts(entry);
    }
    debug!(entries = entries.len(), resolved, "enhanced section entries");
}

/// Fill `formatted` on the effective time and date-valued results, recursively.
pub fn format_entry_dates(entry: &mut ClinicalSectionEntry) {
    entry.effective_time.formatted = format_effective_time(&entry.effective_time);
    if let Some(ValueData::Date { raw, formatted }) = entry.value.as_mut() {
        *formatted = Some(format_display_date(raw));
    }
    for relationship in &mut entry.relationships {
        format_entry_dates(&mut relationship.entry);
    }
}

fn format_effective_time(time: &EffectiveTime) -> Option<String> {
    format_recorded_date(&time.point).or_else(|| format_interval(&time.low, &time.high))
}

fn refresh_concepts(entry: &mut ClinicalSectionEntry) {
    if let Some(ValueData::Concept(concept)) = entry.value.as_mut() {
        concept.refresh_preferred();
    }
    for relationship in &mut entry.relationships {
        refresh_concepts(&mut relationship.entry);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use summary_core::{CodedValue, Recorded, SectionType, SourceKind};

    use super::*;
    use crate::terminology::StaticTerminology;

    fn entry_with_code(code: &str, display: Option<&str>) -> ClinicalSectionEntry {
        let mut entry = ClinicalSectionEntry::new(SectionType::Medications, SourceKind::Cda);
        entry.codes.push(CodedValue::new(
            Some("2.16.840.1.113883.6.73".to_string()),
            Recorded::Value(code.to_string()),
            Recorded::from_option(display.map(str::to_string)),
        ));
        entry.effective_time = EffectiveTime::interval(
            Recorded::Value("20230415".to_string()),
            Recorded::Absent,
        );
        entry
    }

    #[tokio::test]
    async fn resolved_and_unresolved_codes() {
        let table = StaticTerminology::new().with(
            "http://www.whocc.no/atc",
            "H03AA01",
            "Levothyroxine sodium",
        );
        let gateway = TerminologyGateway::new(Arc::new(table), Duration::from_secs(1));
        let mut entries = vec![
            entry_with_code("H03AA01", Some("levothyroxine")),
            entry_with_code("R03AC02", Some("salbutamol")),
        ];

        enhance_entries(&mut entries, Some(&gateway)).await;

        assert_eq!(entries[0].codes[0].resolution, CodeResolution::Resolved);
        assert_eq!(entries[0].codes[0].best_display(), Some("Levothyroxine sodium"));
        assert_eq!(entries[1].codes[0].resolution, CodeResolution::Unresolved);
        assert_eq!(entries[1].codes[0].best_display(), Some("salbutamol"));
        assert_eq!(entries[0].effective_time.formatted.as_deref(), Some("from 15/04/2023"));
    }

    #[tokio::test]
    async fn without_gateway_raw_displays_stay() {
        let mut entries = vec![entry_with_code("H03AA01", Some("levothyroxine"))];
        enhance_entries(&mut entries, None).await;
        assert_eq!(entries[0].codes[0].resolution, CodeResolution::Unresolved);
        assert_eq!(
            entries[0].codes[0].resolved_display,
            Recorded::Value("levothyroxine".to_string())
        );
    }
}
