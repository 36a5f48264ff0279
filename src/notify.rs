//! Email composition for newly stored consumption messages.
//!
//! Formatting is pure and lives here; delivery goes through the
//! [`Mailer`] seam so tests can record outgoing mail instead of sending it.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::EmailConfig;
use crate::error::NotifyError;
use crate::models::{Category, ParsedConsumption, Reading, Unit};
use crate::traits::Mailer;

/// Placeholder for a category the message did not report.
pub const NO_VALUES: &str = "keine Werte verfügbar";

/// A fully composed plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct FormattingOptions {
    /// First line of the body, e.g. `Liebe Mieterin`.
    pub greeting: String,
    /// Appended after a blank line. Literal `\n` sequences become line breaks.
    pub signature: Option<String>,
}

impl FormattingOptions {
    pub fn from_config(email: &EmailConfig) -> Self {
        Self {
            greeting: email.greeting.clone(),
            signature: email.signature.clone(),
        }
    }
}

/// Three decimals, comma as decimal separator: `3.21` → `3,210`.
pub fn format_number_german(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.3}", rounded).replace('.', ",")
}

pub fn subject(parsed: &ParsedConsumption) -> String {
    match parsed.period_label() {
        Some(period) => format!("Verbrauchswerte für {}", period),
        None => "Verbrauchswerte".to_string(),
    }
}

pub fn format_body(parsed: &ParsedConsumption, opts: &FormattingOptions) -> String {
    let period = parsed
        .period_label()
        .unwrap_or_else(|| "den aktuellen Abrechnungszeitraum".to_string());

    let sections: Vec<String> = Category::ALL
        .iter()
        .map(|&category| format_section(category, parsed.reading(category), parsed))
        .collect();

    let mut body = format!(
        "{}\n\nhier deine Verbrauchswerte für den Monat {}:\n\n{}",
        opts.greeting,
        period,
        sections.join("\n\n")
    );

    if let Some(signature) = opts.signature.as_deref().map(format_signature) {
        if !signature.is_empty() {
            body.push_str("\n\n");
            body.push_str(&signature);
        }
    }
    body
}

fn format_signature(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

fn format_section(
    category: Category,
    reading: Option<&Reading>,
    parsed: &ParsedConsumption,
) -> String {
    let Some(reading) = reading else {
        return format!("{}\n{}", category.label(), NO_VALUES);
    };

    let unit = reading
        .unit
        .unwrap_or_else(|| default_unit(category))
        .symbol();
    let current_label = parsed
        .period_label()
        .unwrap_or_else(|| "Aktueller Monat".to_string());
    let previous_label = match (&parsed.month, parsed.year) {
        (Some(month), Some(year)) => format!("{} {}", month, year - 1),
        _ => "Vorjahr".to_string(),
    };

    let mut lines = vec![
        category.label().to_string(),
        format!(
            "{}: {} {}",
            current_label,
            format_number_german(reading.current),
            unit
        ),
    ];
    if let Some(previous) = reading.previous_year {
        lines.push(format!(
            "{}: {} {}",
            previous_label,
            format_number_german(previous),
            unit
        ));
    }
    if let Some(average) = reading.property_average {
        let (label, note) = average_label(category, parsed.period_label());
        lines.push(format!(
            "{}: {} {} {}",
            label,
            format_number_german(average),
            unit,
            note
        ));
    }
    lines.join("\n")
}

fn average_label(category: Category, period: Option<String>) -> (String, &'static str) {
    let suffix = period.map(|p| format!(" {}", p)).unwrap_or_default();
    match category {
        Category::Heating => (
            format!(
                "Heizung auf Basis des Durchschnitts der Liegenschaft{}",
                suffix
            ),
            "(Gesamtverbrauch Heizung / Gesamt Wohnfläche x Wohnfläche Einheit)",
        ),
        _ => (
            format!("Durchschnitt der Liegenschaft{}", suffix),
            "(Gesamtverbrauch Liegenschaft / Anzahl Einheiten)",
        ),
    }
}

fn default_unit(category: Category) -> Unit {
    match category {
        Category::Heating => Unit::KilowattHours,
        _ => Unit::CubicMetres,
    }
}

/// Composes and delivers one email per parsed message.
pub struct Notifier<M: Mailer> {
    mailer: M,
    from: String,
}

impl<M: Mailer> Notifier<M> {
    pub fn new(mailer: M, from: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
        }
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    pub fn compose(
        &self,
        recipients: &[String],
        cc: &[String],
        parsed: &ParsedConsumption,
        opts: &FormattingOptions,
    ) -> Result<OutgoingEmail, NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::Build("no recipients configured".to_string()));
        }
        Ok(OutgoingEmail {
            from: self.from.clone(),
            to: recipients.to_vec(),
            cc: cc.to_vec(),
            subject: subject(parsed),
            body: format_body(parsed, opts),
        })
    }

    pub async fn send(
        &self,
        recipients: &[String],
        cc: &[String],
        parsed: &ParsedConsumption,
        opts: &FormattingOptions,
    ) -> Result<(), NotifyError> {
        let email = self.compose(recipients, cc, parsed, opts)?;
        tracing::info!(
            "Sending email to {} recipient(s){}",
            email.to.len(),
            if email.cc.is_empty() {
                String::new()
            } else {
                format!(" with {} CC recipient(s)", email.cc.len())
            }
        );
        self.mailer.deliver(&email).await
    }
}
