//! Canonical date display.
//!
//! CDA carries HL7 `TS` values (`YYYYMMDD[HHMM[SS]][+ZZZZ]`), FHIR carries ISO
//! dates and date-times. Everything is shown as `dd/mm/yyyy`. Partial dates keep
//! their precision: a bare year stays a year, a year-month becomes `mm/yyyy`.

use chrono::NaiveDate;

use crate::model::Recorded;

/// Calendar precision of a parsed clinical date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClinicalDate {
    Year(i32),
    YearMonth(i32, u32),
    Day(NaiveDate),
}

/// Parse any accepted clinical date form, ignoring time and zone parts.
pub fn parse_clinical_date(raw: &str) -> Option<ClinicalDate> {
    let value = raw.trim();
    if value.len() < 4 || !value.is_char_boundary(4) {
        return None;
    }
    let year_part = &value[..4];
    if !year_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = year_part.parse().ok()?;

    if value.len() == 4 {
        return Some(ClinicalDate::Year(year));
    }

    if value.as_bytes()[4] == b'-' {
        // ISO forms: YYYY-MM, YYYY-MM-DD, YYYY-MM-DDThh:mm:ss...
        if value.len() == 7 {
            let month: u32 = value.get(5..7)?.parse().ok()?;
            return (1..=12).contains(&month).then_some(ClinicalDate::YearMonth(year, month));
        }
        let day_part = value.get(..10)?;
        return NaiveDate::parse_from_str(day_part, "%Y-%m-%d")
            .ok()
            .map(ClinicalDate::Day);
    }

    // HL7 TS forms: YYYYMM, YYYYMMDD, YYYYMMDDhhmm[ss][.fff][+zzzz]
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        6 => {
            let month: u32 = digits[4..6].parse().ok()?;
            (1..=12).contains(&month).then_some(ClinicalDate::YearMonth(year, month))
        }
        len if len >= 8 => NaiveDate::parse_from_str(&digits[..8], "%Y%m%d")
            .ok()
            .map(ClinicalDate::Day),
        _ => None,
    }
}

/// Canonical display for a raw date. Unparseable input is returned unchanged.
pub fn format_display_date(raw: &str) -> String {
    match parse_clinical_date(raw) {
        Some(ClinicalDate::Day(date)) => date.format("%d/%m/%Y").to_string(),
        Some(ClinicalDate::YearMonth(year, month)) => format!("{month:02}/{year}"),
        Some(ClinicalDate::Year(year)) => format!("{year:04}"),
        None => raw.trim().to_string(),
    }
}

/// Display for a recorded date, including the nullFlavor phrase when null.
pub fn format_recorded_date(value: &Recorded<String>) -> Option<String> {
    match value {
        Recorded::Value(raw) => Some(format_display_date(raw)),
        Recorded::Null(flavor) => Some(flavor.phrase().to_string()),
        Recorded::Absent => None,
    }
}

/// Display for an interval. Open-ended intervals read "from ..." / "until ...".
pub fn format_interval(low: &Recorded<String>, high: &Recorded<String>) -> Option<String> {
    match (format_recorded_date(low), format_recorded_date(high)) {
        (Some(low), Some(high)) => Some(format!("{low} - {high}")),
        (Some(low), None) => Some(format!("from {low}")),
        (None, Some(high)) => Some(format!("until {high}")),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_forms_share_one_display() {
        assert_eq!(format_display_date("20230415"), "15/04/2023");
        assert_eq!(format_display_date("2023-04-15"), "15/04/2023");
        assert_eq!(format_display_date("2023-04-15T10:20:30Z"), "15/04/2023");
        assert_eq!(format_display_date("20230415102030+0200"), "15/04/2023");
    }

    #[test]
    fn partial_dates_keep_precision() {
        assert_eq!(format_display_date("2023"), "2023");
        assert_eq!(format_display_date("2023-04"), "04/2023");
        assert_eq!(format_display_date("202304"), "04/2023");
    }

    #[test]
    fn garbage_is_passed_through() {
        assert_eq!(format_display_date("last spring"), "last spring");
        assert_eq!(format_display_date("20231345"), "20231345");
    }
}
