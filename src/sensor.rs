//! Waiting-time and delay sensors derived from coordinator snapshots.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::TrackedDevice;
use crate::coordinator::{DeviceData, Snapshot};
use crate::schedule::{format_hhmm, format_waiting_time, waiting_minutes};

// Delay thresholds (minutes)
pub const DELAY_HIGH: i64 = 10;
pub const DELAY_MEDIUM: i64 = 5;
pub const DELAY_LOW: i64 = 1;
pub const EARLY_HIGH: i64 = 6;
pub const EARLY_MEDIUM: i64 = 3;
pub const EARLY_LOW: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    WaitingTime,
    Delay,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::WaitingTime, SensorKind::Delay];

    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::WaitingTime => "waiting_time",
            SensorKind::Delay => "delay",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::WaitingTime => "Waiting Time",
            SensorKind::Delay => "Delay",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            SensorKind::WaitingTime => "mdi:clock",
            SensorKind::Delay => "mdi:clock-alert",
        }
    }

    pub fn unit(&self) -> &'static str {
        "min"
    }
}

/// Coarse punctuality reported alongside the real-time delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayStatus {
    Early,
    OnTime,
    SlightlyDelayed,
    Delayed,
}

impl DelayStatus {
    pub fn from_delay(delay: i64) -> Self {
        match delay {
            d if d <= -1 => DelayStatus::Early,
            d if d <= 1 => DelayStatus::OnTime,
            d if d <= 5 => DelayStatus::SlightlyDelayed,
            _ => DelayStatus::Delayed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayStatus::Early => "early",
            DelayStatus::OnTime => "on_time",
            DelayStatus::SlightlyDelayed => "slightly_delayed",
            DelayStatus::Delayed => "delayed",
        }
    }

    pub fn detail(&self, delay: i64) -> String {
        match self {
            DelayStatus::Early => format!("{} minutes early", delay.abs()),
            DelayStatus::OnTime => "On time".to_string(),
            DelayStatus::SlightlyDelayed | DelayStatus::Delayed => {
                format!("{delay} minutes delayed")
            }
        }
    }
}

/// Threshold band of a delay, with human-readable labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayLevel {
    HighDelay,
    MediumDelay,
    LowDelay,
    OnTime,
    LowEarly,
    MediumEarly,
    HighEarly,
}

impl DelayLevel {
    pub fn from_delay(delay: i64) -> Self {
        match delay {
            d if d > DELAY_HIGH => DelayLevel::HighDelay,
            d if d > DELAY_MEDIUM => DelayLevel::MediumDelay,
            d if d > DELAY_LOW => DelayLevel::LowDelay,
            d if -d > EARLY_HIGH => DelayLevel::HighEarly,
            d if -d > EARLY_MEDIUM => DelayLevel::MediumEarly,
            d if -d > EARLY_LOW => DelayLevel::LowEarly,
            _ => DelayLevel::OnTime,
        }
    }

    pub fn label(&self) -> String {
        match self {
            DelayLevel::HighDelay => format!("High Delay (> {DELAY_HIGH} minutes)"),
            DelayLevel::MediumDelay => {
                format!("Medium Delay (> {DELAY_MEDIUM} minutes < {DELAY_HIGH} minutes)")
            }
            DelayLevel::LowDelay => {
                format!("Low Delay (> {DELAY_LOW} minute < {DELAY_MEDIUM} minutes)")
            }
            DelayLevel::OnTime => "On Time".to_string(),
            DelayLevel::LowEarly => {
                format!("Low Early (> {EARLY_LOW} minute < {EARLY_MEDIUM} minutes)")
            }
            DelayLevel::MediumEarly => {
                format!("Medium Early (> {EARLY_MEDIUM} minutes < {EARLY_HIGH} minutes)")
            }
            DelayLevel::HighEarly => format!("High Early (> {EARLY_HIGH} minutes)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SensorAttributes {
    pub scheduled_time: String,
    pub scheduled_date: String,
    pub destination: String,
    pub rit_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_description: Option<String>,
    pub vehicle_type: String,
    pub public_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DelayStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_level: Option<DelayLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_level_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delay_update: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

/// Published state of one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorState {
    pub unique_id: String,
    pub device_id: String,
    pub name: String,
    pub kind: SensorKind,
    pub icon: &'static str,
    pub unit: &'static str,
    pub value: Option<i64>,
    pub attributes: Option<SensorAttributes>,
}

/// A sensor bound to one tracked device.
#[derive(Debug, Clone)]
pub struct Sensor {
    device: TrackedDevice,
    kind: SensorKind,
}

impl Sensor {
    pub fn new(device: TrackedDevice, kind: SensorKind) -> Self {
        Self { device, kind }
    }

    /// Every sensor kind for every device.
    pub fn for_devices(devices: &[TrackedDevice]) -> Vec<Sensor> {
        devices
            .iter()
            .flat_map(|d| SensorKind::ALL.iter().map(|k| Sensor::new(d.clone(), *k)))
            .collect()
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.device.device_id(), self.kind.key())
    }

    /// `Halte {h} - Bus {public line} - {destination} - {HH:MM}`.
    pub fn device_name(&self) -> String {
        let time = self
            .device
            .target_time()
            .unwrap_or_else(|_| self.device.scheduled_time.clone());
        format!(
            "Halte {} - Bus {} - {} - {}",
            self.device.halte_number,
            self.device.public_line(),
            self.device.destination,
            time
        )
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.device_name(), self.kind.name())
    }

    fn data<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a DeviceData> {
        snapshot.get(&self.device.device_id())
    }

    pub fn native_value(&self, snapshot: &Snapshot, now: &DateTime<Tz>) -> Option<i64> {
        let data = self.data(snapshot)?;
        let departure = data.departure.as_ref()?;

        match self.kind {
            SensorKind::WaitingTime => {
                let expected = data
                    .realtime
                    .as_ref()
                    .and_then(|rt| rt.realtime_at)
                    .unwrap_or(departure.scheduled_at);
                Some(waiting_minutes(now, &expected))
            }
            SensorKind::Delay => Some(
                data.realtime
                    .as_ref()
                    .and_then(|rt| rt.delay_minutes())
                    .unwrap_or(data.latest_delay),
            ),
        }
    }

    pub fn attributes(&self, snapshot: &Snapshot, now: &DateTime<Tz>) -> Option<SensorAttributes> {
        let data = self.data(snapshot)?;
        let departure = data.departure.as_ref()?;

        let mut attrs = SensorAttributes {
            scheduled_time: departure.time.clone(),
            scheduled_date: departure.date.format("%Y-%m-%d").to_string(),
            destination: departure.destination.clone(),
            rit_number: departure.ritnummer.clone(),
            line_description: self.device.line_description.clone(),
            vehicle_type: self.device.vehicle_type.clone(),
            public_line: self.device.public_line().to_string(),
            last_delay_update: data.last_delay_update.map(|t| t.to_rfc3339()),
            ..Default::default()
        };

        if self.kind == SensorKind::WaitingTime {
            attrs.time_formatted = self
                .native_value(snapshot, now)
                .map(format_waiting_time);
        }

        if let Some(rt) = &data.realtime {
            if let (Some(at), Some(delay)) = (rt.realtime_at, rt.delay_minutes()) {
                let status = DelayStatus::from_delay(delay);
                let level = DelayLevel::from_delay(delay);
                attrs.realtime_time = Some(format_hhmm(&at));
                attrs.delay_minutes = Some(delay);
                attrs.status = Some(status);
                attrs.status_detail = Some(status.detail(delay));
                attrs.delay_level = Some(level);
                attrs.delay_level_label = Some(level.label());
            }
            attrs.prediction_status = rt.prediction_status.clone();
            attrs.vehicle_number = rt.vehicle_number.clone();
            attrs.direction = rt.direction.clone();
        }

        Some(attrs)
    }

    pub fn state(&self, snapshot: &Snapshot, now: &DateTime<Tz>) -> SensorState {
        SensorState {
            unique_id: self.unique_id(),
            device_id: self.device.device_id(),
            name: self.name(),
            kind: self.kind,
            icon: self.kind.icon(),
            unit: self.kind.unit(),
            value: self.native_value(snapshot, now),
            attributes: self.attributes(snapshot, now),
        }
    }
}
