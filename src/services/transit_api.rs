//! Trait and types for querying a transit operator's stop schedules.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::Result;
use crate::schedule;

/// A line served at a halte, as offered by the setup flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineInfo {
    pub lijnnummer: String,
    pub public_line: String,
    pub description: String,
    pub destination: String,
    pub entity_number: String,
    pub halte_name: String,
}

impl LineInfo {
    pub fn option_label(&self) -> String {
        format!("Line {} - {}", self.lijnnummer, self.description)
    }
}

/// One scheduled passage of a line at a halte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledDeparture {
    /// `HH:MM` in Brussels local time.
    pub time: String,
    pub scheduled_at: DateTime<Tz>,
    pub destination: String,
    pub ritnummer: String,
    pub date: NaiveDate,
    pub entity_number: String,
}

impl ScheduledDeparture {
    /// Key the setup flow uses to identify this departure: `HH:MM_ritnummer`.
    pub fn option_key(&self) -> String {
        format!("{}_{}", self.time, self.ritnummer)
    }

    pub fn option_label(&self) -> String {
        format!("{} - {}", self.time, self.destination)
    }
}

/// Real-time prediction for a scheduled passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeDeparture {
    pub scheduled_at: DateTime<Tz>,
    pub realtime_at: Option<DateTime<Tz>>,
    pub prediction_status: Option<String>,
    pub vehicle_number: Option<String>,
    pub direction: Option<String>,
}

impl RealtimeDeparture {
    /// Minutes between the real-time and scheduled instant, if predicted.
    pub fn delay_minutes(&self) -> Option<i64> {
        self.realtime_at
            .as_ref()
            .map(|rt| schedule::delay_minutes(&self.scheduled_at, rt))
    }
}

/// Parameters for a schedule lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleQuery {
    pub halte: String,
    pub line: String,
    /// Service day; `None` means the operator's current day.
    pub date: Option<NaiveDate>,
    /// Only keep departures at this `HH:MM`.
    pub target_time: Option<String>,
    /// Skips the entity lookup when already known.
    pub entity_number: Option<String>,
}

impl ScheduleQuery {
    pub fn new(halte: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            halte: halte.into(),
            line: line.into(),
            ..Default::default()
        }
    }

    pub fn on(mut self, date: Option<NaiveDate>) -> Self {
        self.date = date;
        self
    }

    pub fn at(mut self, target_time: impl Into<String>) -> Self {
        self.target_time = Some(target_time.into());
        self
    }

    pub fn in_entity(mut self, entity_number: Option<String>) -> Self {
        self.entity_number = entity_number;
        self
    }
}

/// Abstraction over a transit operator's open-data API (e.g., De Lijn).
#[async_trait::async_trait]
pub trait TransitApi: Send + Sync {
    /// Succeeds when the configured credentials are accepted.
    async fn validate_api_key(&self) -> Result<()>;

    /// Lines served at `halte`, sorted by line number.
    async fn available_lines(&self, halte: &str) -> Result<Vec<LineInfo>>;

    /// Scheduled departures matching `query`, sorted by instant.
    async fn schedule_times(&self, query: &ScheduleQuery) -> Result<Vec<ScheduledDeparture>>;

    /// Real-time data for the passage of `line` scheduled at `scheduled_at`.
    async fn realtime_departure(
        &self,
        halte: &str,
        line: &str,
        scheduled_at: &DateTime<Tz>,
        entity_number: Option<&str>,
    ) -> Result<Option<RealtimeDeparture>>;
}
