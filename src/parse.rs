//! Extraction of consumption values from message text.
//!
//! Everything here is pure: no I/O, no shared state. Each category has its
//! own extractor ([`cold_water`], [`hot_water`], [`heating`]) so a change in
//! one section of the portal template cannot break the others.
//!
//! Two layouts are understood:
//!
//! ```text
//! MonthlyReport                          InlineSummary
//! ─────────────                          ─────────────
//! Kaltwasser                             Kaltwasser: 12,5 m³
//! Dezember 2025: 3,210 m³                Warmwasser: 4,1 m³
//! Dezember 2024: 2,987 m³
//! Durchschnitt der Liegenschaft …: 3,456 m³
//! ```
//!
//! A value that cannot be found is `None`; only an empty body or one that
//! matches neither layout is a [`ParseError`].

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::ParseError;
use crate::models::{Category, ParsedConsumption, Reading, TemplateKind, Unit};

/// German month names in calendar order, as the portal spells them.
pub const MONTHS: [&str; 12] = [
    "Januar",
    "Februar",
    "März",
    "April",
    "Mai",
    "Juni",
    "Juli",
    "August",
    "September",
    "Oktober",
    "November",
    "Dezember",
];

/// A line starting with this ends the last category section.
const SECTION_END_MARKER: &str = "falls sie fragen";

const NUMBER: &str = r"\d+(?:[.,]\d+)*";
const UNIT: &str = r"m³|m3|kWh";

static MONTH_YEAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(Januar|Februar|März|Maerz|April|Mai|Juni|Juli|August|September|Oktober|November|Dezember)\s+(\d{4})\b",
    )
    .expect("Invalid MONTH_YEAR_PATTERN regex")
});

static YEAR_VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(\d{{4}}):\s*({})\s*({})", NUMBER, UNIT))
        .expect("Invalid YEAR_VALUE_PATTERN regex")
});

static AVERAGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:Durchschnitt.*?|Heizung auf Basis.*?):\s*({})\s*({})",
        NUMBER, UNIT
    ))
    .expect("Invalid AVERAGE_PATTERN regex")
});

static INLINE_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    Category::ALL.map(|category| {
        Regex::new(&format!(
            r"(?i)\b{}\s*:\s*({})\s*({})?",
            category.label(),
            NUMBER,
            UNIT
        ))
        .expect("Invalid inline category regex")
    })
});

/// Layouts a message body can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTemplate {
    MonthlyReport,
    InlineSummary,
    Unrecognized,
}

impl MessageTemplate {
    pub fn kind(self) -> Option<TemplateKind> {
        match self {
            MessageTemplate::MonthlyReport => Some(TemplateKind::MonthlyReport),
            MessageTemplate::InlineSummary => Some(TemplateKind::InlineSummary),
            MessageTemplate::Unrecognized => None,
        }
    }
}

/// Decide which layout `text` follows.
pub fn classify(text: &str) -> MessageTemplate {
    let lines = split_lines(text);
    if Category::ALL
        .iter()
        .any(|c| find_section_start(&lines, *c).is_some())
    {
        return MessageTemplate::MonthlyReport;
    }
    if INLINE_PATTERNS.iter().any(|re| re.is_match(text)) {
        return MessageTemplate::InlineSummary;
    }
    MessageTemplate::Unrecognized
}

/// Parse one message body.
pub fn parse(raw_text: &str) -> Result<ParsedConsumption, ParseError> {
    if raw_text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let template = classify(raw_text)
        .kind()
        .ok_or(ParseError::UnrecognizedTemplate)?;

    let (month, year) = match month_year(raw_text) {
        Some((m, y)) => (Some(m), Some(y)),
        None => (None, None),
    };
    let period = match (&month, year) {
        (Some(m), Some(y)) => month_number(m).and_then(|n| NaiveDate::from_ymd_opt(y, n, 1)),
        _ => None,
    };

    let parsed = ParsedConsumption {
        template,
        title: title(raw_text),
        month: month.map(str::to_string),
        year,
        period,
        cold_water: cold_water(raw_text),
        hot_water: hot_water(raw_text),
        heating: heating(raw_text),
    };
    tracing::debug!(
        template = ?parsed.template,
        period = ?parsed.period,
        cold_water = parsed.cold_water.is_some(),
        hot_water = parsed.hot_water.is_some(),
        heating = parsed.heating.is_some(),
        "Parsed message"
    );
    Ok(parsed)
}

pub fn cold_water(text: &str) -> Option<Reading> {
    extract_category(text, Category::ColdWater)
}

pub fn hot_water(text: &str) -> Option<Reading> {
    extract_category(text, Category::HotWater)
}

pub fn heating(text: &str) -> Option<Reading> {
    extract_category(text, Category::Heating)
}

/// Find the first `<Month> <Year>` in `text`. Month names come back in
/// canonical spelling; years outside 2000..=2100 are ignored.
pub fn month_year(text: &str) -> Option<(&'static str, i32)> {
    MONTH_YEAR_PATTERN.captures_iter(text).find_map(|caps| {
        let month = canonical_month(&caps[1])?;
        let year: i32 = caps[2].parse().ok()?;
        (2000..=2100).contains(&year).then_some((month, year))
    })
}

/// Convert a number written with German conventions into a [`Decimal`].
///
/// A comma is the decimal separator; dots before a comma, or several dots,
/// are thousands separators. A single dot without a comma is read as a
/// decimal point.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    let normalized = if s.contains(',') {
        s.replace('.', "").replace(',', ".")
    } else if s.matches('.').count() > 1 {
        s.replace('.', "")
    } else {
        s.to_string()
    };
    Decimal::from_str(&normalized).ok()
}

fn canonical_month(name: &str) -> Option<&'static str> {
    if name.eq_ignore_ascii_case("maerz") {
        return Some("März");
    }
    let lower = name.to_lowercase();
    MONTHS.iter().copied().find(|m| m.to_lowercase() == lower)
}

fn month_number(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == name)
        .map(|idx| idx as u32 + 1)
}

fn title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').map(|l| l.trim_end_matches('\r')).collect()
}

fn is_section_header(line: &str) -> Option<Category> {
    let normalized = line.trim();
    Category::ALL
        .into_iter()
        .find(|c| normalized.eq_ignore_ascii_case(c.label()))
}

fn find_section_start(lines: &[&str], category: Category) -> Option<usize> {
    lines
        .iter()
        .position(|line| is_section_header(line) == Some(category))
        .map(|idx| idx + 1)
}

/// Lines belonging to `category`'s section, up to the next header or the
/// closing marker.
fn section_lines<'a>(lines: &[&'a str], category: Category) -> Option<Vec<&'a str>> {
    let start = find_section_start(lines, category)?;
    let collected: Vec<&str> = lines[start..]
        .iter()
        .take_while(|line| {
            let normalized = line.trim().to_lowercase();
            let other_header = matches!(is_section_header(line), Some(c) if c != category);
            !other_header && !normalized.starts_with(SECTION_END_MARKER)
        })
        .copied()
        .filter(|line| !line.trim().is_empty())
        .collect();
    (!collected.is_empty()).then_some(collected)
}

fn extract_category(text: &str, category: Category) -> Option<Reading> {
    let lines = split_lines(text);
    if let Some(section) = section_lines(&lines, category) {
        if let Some(reading) = reading_from_section(&section) {
            return Some(reading);
        }
    }
    reading_from_inline(text, category)
}

/// In a section, the first `YYYY: value` line is the current month and the
/// second the same month a year earlier. The average line is recognised
/// separately because it also carries a `YYYY:` prefix.
fn reading_from_section(section: &[&str]) -> Option<Reading> {
    let mut yearly = Vec::new();
    let mut average = None;
    let mut unit = None;

    for line in section {
        if let Some(caps) = AVERAGE_PATTERN.captures(line) {
            if average.is_none() {
                average = parse_decimal(&caps[1]);
                unit = unit.or_else(|| Unit::parse(&caps[2]));
            }
            continue;
        }
        if let Some(caps) = YEAR_VALUE_PATTERN.captures(line) {
            if let Some(value) = parse_decimal(&caps[2]) {
                yearly.push(value);
                unit = unit.or_else(|| Unit::parse(&caps[3]));
            }
        }
    }

    let current = *yearly.first()?;
    Some(Reading {
        current,
        previous_year: yearly.get(1).copied(),
        property_average: average,
        unit,
    })
}

fn reading_from_inline(text: &str, category: Category) -> Option<Reading> {
    let idx = Category::ALL.iter().position(|c| *c == category)?;
    let caps = INLINE_PATTERNS[idx].captures(text)?;
    let current = parse_decimal(&caps[1])?;
    let unit = caps.get(2).and_then(|m| Unit::parse(m.as_str()));
    Some(Reading::current_only(current, unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MONTHLY: &str = "Verbrauchswerte Dezember 2025

Kaltwasser
Dezember 2025: 3,210 m³
Dezember 2024: 2,987 m³
Durchschnitt der Liegenschaft Dezember 2025: 3,456 m³ (Gesamtverbrauch Liegenschaft / Anzahl Einheiten)

Warmwasser
Dezember 2025: 1,234 m³
Dezember 2024: 1,100 m³
Durchschnitt der Liegenschaft Dezember 2025: 1,500 m³ (Gesamtverbrauch Liegenschaft / Anzahl Einheiten)

Heizung
Dezember 2025: 456,789 kWh
Dezember 2024: 401,5 kWh
Heizung auf Basis des Durchschnitts der Liegenschaft Dezember 2025: 500,25 kWh (Gesamtverbrauch Heizung / Gesamt Wohnfläche x Wohnfläche Einheit)

Falls Sie Fragen haben, melden Sie sich gerne.";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_inline_cold_water_only() {
        let parsed = parse("Kaltwasser: 12,5 m³").unwrap();
        assert_eq!(parsed.template, TemplateKind::InlineSummary);
        assert_eq!(
            parsed.cold_water,
            Some(Reading::current_only(dec("12.5"), Some(Unit::CubicMetres)))
        );
        assert_eq!(parsed.hot_water, None);
        assert_eq!(parsed.heating, None);
        assert_eq!(parsed.month, None);
        assert_eq!(parsed.period, None);
    }

    #[test]
    fn test_monthly_report_all_values() {
        let parsed = parse(MONTHLY).unwrap();
        assert_eq!(parsed.template, TemplateKind::MonthlyReport);
        assert_eq!(parsed.month.as_deref(), Some("Dezember"));
        assert_eq!(parsed.year, Some(2025));
        assert_eq!(parsed.period, NaiveDate::from_ymd_opt(2025, 12, 1));
        assert_eq!(parsed.title.as_deref(), Some("Verbrauchswerte Dezember 2025"));

        assert_eq!(
            parsed.cold_water,
            Some(Reading {
                current: dec("3.210"),
                previous_year: Some(dec("2.987")),
                property_average: Some(dec("3.456")),
                unit: Some(Unit::CubicMetres),
            })
        );
        assert_eq!(
            parsed.hot_water,
            Some(Reading {
                current: dec("1.234"),
                previous_year: Some(dec("1.100")),
                property_average: Some(dec("1.5")),
                unit: Some(Unit::CubicMetres),
            })
        );
        assert_eq!(
            parsed.heating,
            Some(Reading {
                current: dec("456.789"),
                previous_year: Some(dec("401.5")),
                property_average: Some(dec("500.25")),
                unit: Some(Unit::KilowattHours),
            })
        );
    }

    #[test]
    fn test_partial_report_keeps_date() {
        let text = "Verbrauchswerte März 2026\n\nKaltwasser\nMärz 2026: 2,5 m³\n\nHeizung\nkeine Ablesung möglich\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.period, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(parsed.cold_water.as_ref().map(|r| r.current), Some(dec("2.5")));
        assert_eq!(parsed.cold_water.as_ref().and_then(|r| r.previous_year), None);
        assert_eq!(parsed.hot_water, None);
        assert_eq!(parsed.heating, None);
    }

    #[test]
    fn test_average_line_not_taken_as_previous_year() {
        let text = "Warmwasser\nJuni 2025: 0,8 m³\nDurchschnitt der Liegenschaft Juni 2025: 1,1 m³";
        let reading = hot_water(text).unwrap();
        assert_eq!(reading.current, dec("0.8"));
        assert_eq!(reading.previous_year, None);
        assert_eq!(reading.property_average, Some(dec("1.1")));
    }

    #[test]
    fn test_heating_section_keeps_basis_line() {
        // "Heizung auf Basis ..." must not be mistaken for a new section header.
        let reading = heating(MONTHLY).unwrap();
        assert_eq!(reading.property_average, Some(dec("500.25")));
    }

    #[test]
    fn test_empty_and_unrecognized() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("   \n\t"), Err(ParseError::Empty));
        assert_eq!(
            parse("Sehr geehrte Mieter, die Hausreinigung entfällt morgen."),
            Err(ParseError::UnrecognizedTemplate)
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(MONTHLY), MessageTemplate::MonthlyReport);
        assert_eq!(classify("Heizung: 40 kWh"), MessageTemplate::InlineSummary);
        assert_eq!(classify("Hallo"), MessageTemplate::Unrecognized);
    }

    #[test]
    fn test_parse_decimal_locale() {
        assert_eq!(parse_decimal("12,5"), Some(dec("12.5")));
        assert_eq!(parse_decimal("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_decimal("1.234.567"), Some(dec("1234567")));
        assert_eq!(parse_decimal("7.25"), Some(dec("7.25")));
        assert_eq!(parse_decimal("42"), Some(dec("42")));
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_decimal_precision_preserved() {
        let reading = cold_water("Kaltwasser: 0,123456789 m³").unwrap();
        assert_eq!(reading.current.to_string(), "0.123456789");
    }

    #[test]
    fn test_month_year_variants() {
        assert_eq!(month_year("Verbrauch maerz 2024"), Some(("März", 2024)));
        assert_eq!(month_year("DEZEMBER 2025"), Some(("Dezember", 2025)));
        assert_eq!(month_year("Mai 1850 und Juli 2023"), Some(("Juli", 2023)));
        assert_eq!(month_year("kein Datum"), None);
    }

    #[test]
    fn test_whitespace_and_crlf_tolerated() {
        let text = "Kaltwasser  \r\n  Januar 2026:   4,0  m3\r\n";
        let reading = cold_water(text).unwrap();
        assert_eq!(reading.current, dec("4.0"));
        assert_eq!(reading.unit, Some(Unit::CubicMetres));
    }
}
