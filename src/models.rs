//! Core data models flowing through the pipeline.
//!
//! Data moves strictly downstream: the fetcher produces [`RawMessage`]s,
//! the parser derives a [`ParsedConsumption`] from each, and the store
//! records a [`PersistedMessage`] once per [`ContentHash`].

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A message as retrieved from the portal, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Portal-assigned identifier (opaque). Synthetic for HTML-scraped blocks.
    pub id: String,
    /// Portal timestamp, when the retrieval path exposes one.
    pub date: Option<DateTime<Utc>>,
    pub body_text: String,
}

impl RawMessage {
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of(&self.body_text)
    }
}

/// Lowercase hex SHA-256 of a message body; the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit a consumption value is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "m³")]
    CubicMetres,
    #[serde(rename = "kWh")]
    KilowattHours,
}

impl Unit {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "m³" | "m3" => Some(Unit::CubicMetres),
            s if s.eq_ignore_ascii_case("kwh") => Some(Unit::KilowattHours),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::CubicMetres => "m³",
            Unit::KilowattHours => "kWh",
        }
    }
}

/// The three consumption categories reported by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ColdWater,
    HotWater,
    Heating,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::ColdWater, Category::HotWater, Category::Heating];

    /// German label as it appears in portal messages.
    pub fn label(&self) -> &'static str {
        match self {
            Category::ColdWater => "Kaltwasser",
            Category::HotWater => "Warmwasser",
            Category::Heating => "Heizung",
        }
    }
}

/// Which known message layout a body matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// One section per category, headed by the category name on its own line.
    MonthlyReport,
    /// `Kaltwasser: 12,5 m³` style one-liners.
    InlineSummary,
}

/// Values reported for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub current: Decimal,
    #[serde(default)]
    pub previous_year: Option<Decimal>,
    #[serde(default)]
    pub property_average: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<Unit>,
}

impl Reading {
    pub fn current_only(current: Decimal, unit: Option<Unit>) -> Self {
        Self {
            current,
            previous_year: None,
            property_average: None,
            unit,
        }
    }
}

/// Structured result of parsing one message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedConsumption {
    pub template: TemplateKind,
    pub title: Option<String>,
    /// German month name as written in the message (e.g. `Dezember`).
    pub month: Option<String>,
    pub year: Option<i32>,
    /// First day of the reported month.
    pub period: Option<NaiveDate>,
    pub cold_water: Option<Reading>,
    pub hot_water: Option<Reading>,
    pub heating: Option<Reading>,
}

impl ParsedConsumption {
    pub fn reading(&self, category: Category) -> Option<&Reading> {
        match category {
            Category::ColdWater => self.cold_water.as_ref(),
            Category::HotWater => self.hot_water.as_ref(),
            Category::Heating => self.heating.as_ref(),
        }
    }

    /// `Dezember 2025`, or whatever part of it is known.
    pub fn period_label(&self) -> Option<String> {
        match (&self.month, self.year) {
            (Some(m), Some(y)) => Some(format!("{} {}", m, y)),
            (Some(m), None) => Some(m.clone()),
            (None, Some(y)) => Some(y.to_string()),
            (None, None) => None,
        }
    }
}

/// One stored row. Created once per content hash and never updated.
#[derive(Debug, Clone)]
pub struct PersistedMessage {
    pub content_hash: ContentHash,
    pub message_date: NaiveDate,
    pub raw_body: String,
    pub parsed_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PersistedMessage {
    /// Build the row for a freshly parsed message.
    ///
    /// `message_date` is the reported period; when the message names none,
    /// the portal timestamp is used, then the current date.
    pub fn new(
        raw: &RawMessage,
        parsed: &ParsedConsumption,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let message_date = parsed
            .period
            .or_else(|| raw.date.map(|d| d.date_naive()))
            .unwrap_or_else(|| now.date_naive());
        Ok(Self {
            content_hash: raw.content_hash(),
            message_date,
            raw_body: raw.body_text.clone(),
            parsed_data: serde_json::to_value(parsed)?,
            created_at: now,
        })
    }
}

/// Lightweight view of a stored row, used by the `history` command.
#[derive(Debug, Clone)]
pub struct StoredSummary {
    pub content_hash: String,
    pub message_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}
