//! Periodic refresh of every tracked device.

use chrono::{DateTime, Days};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{TrackedDevice, TrackerConfig};
use crate::error::{Result, TrackerError};
use crate::schedule::{format_hhmm, is_upcoming, now_brussels};
use crate::services::transit_api::{
    RealtimeDeparture, ScheduleQuery, ScheduledDeparture, TransitApi,
};

/// Latest known state of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceData {
    pub device: TrackedDevice,
    /// Next occurrence of the tracked departure, possibly on a later day.
    pub departure: Option<ScheduledDeparture>,
    pub realtime: Option<RealtimeDeparture>,
    /// Most recent delay (minutes) observed for this departure's day, 0 if none.
    pub latest_delay: i64,
    pub last_delay_update: Option<DateTime<Tz>>,
}

/// Device id → data, as produced by one refresh.
pub type Snapshot = HashMap<String, DeviceData>;

pub struct Coordinator<A> {
    api: A,
    devices: Vec<TrackedDevice>,
    scan_interval: Duration,
    update_timeout: Duration,
    lookahead_days: u32,
    latest_delays: HashMap<String, i64>,
    last_update_time: HashMap<String, DateTime<Tz>>,
}

impl<A: TransitApi> Coordinator<A> {
    pub fn new(api: A, config: &TrackerConfig) -> Self {
        Self {
            api,
            devices: config.devices.clone(),
            scan_interval: Duration::from_secs(config.scan_interval_secs.max(1)),
            update_timeout: Duration::from_secs(config.update_timeout_secs.max(1)),
            lookahead_days: config.lookahead_days,
            latest_delays: HashMap::new(),
            last_update_time: HashMap::new(),
        }
    }

    pub fn devices(&self) -> &[TrackedDevice] {
        &self.devices
    }

    pub fn latest_delay(&self, device_id: &str) -> Option<i64> {
        self.latest_delays.get(device_id).copied()
    }

    /// Refreshes all devices. A failing device falls back to its cached delay;
    /// only exceeding the update timeout fails the whole refresh.
    #[tracing::instrument(skip(self), fields(devices = self.devices.len()))]
    pub async fn refresh(&mut self, now: DateTime<Tz>) -> Result<Snapshot> {
        let timeout = self.update_timeout;
        match tokio::time::timeout(timeout, self.refresh_all(&now)).await {
            Ok(snapshot) => Ok(snapshot),
            Err(_) => Err(TrackerError::UpdateFailed {
                message: format!("update timed out after {}s", timeout.as_secs()),
            }),
        }
    }

    async fn refresh_all(&mut self, now: &DateTime<Tz>) -> Snapshot {
        let mut data = Snapshot::new();

        for device in self.devices.clone() {
            let device_id = device.device_id();
            let entry = match self.refresh_device(&device_id, &device, now).await {
                Ok(entry) => entry,
                Err(e) => {
                    error!(device = %device_id, error = %e, "Error updating device");
                    self.fallback(&device_id, device)
                }
            };
            data.insert(device_id, entry);
        }

        data
    }

    fn fallback(&self, device_id: &str, device: TrackedDevice) -> DeviceData {
        DeviceData {
            device,
            departure: None,
            realtime: None,
            latest_delay: self.latest_delays.get(device_id).copied().unwrap_or(0),
            last_delay_update: self.last_update_time.get(device_id).copied(),
        }
    }

    async fn refresh_device(
        &mut self,
        device_id: &str,
        device: &TrackedDevice,
        now: &DateTime<Tz>,
    ) -> Result<DeviceData> {
        let target_time = device.target_time()?;
        let departure = self.next_departure(device, &target_time, now).await?;

        let Some(departure) = departure else {
            debug!(device = %device_id, "No upcoming departure within look-ahead window");
            return Ok(self.fallback(device_id, device.clone()));
        };

        let today = now.date_naive();
        let mut realtime = None;

        if departure.date == today {
            realtime = match self
                .api
                .realtime_departure(
                    &device.halte_number,
                    &device.line_number,
                    &departure.scheduled_at,
                    device.entity_number.as_deref(),
                )
                .await
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(device = %device_id, error = %e, "Real-time lookup failed");
                    None
                }
            };
        }

        if let Some((realtime_at, delay)) = realtime
            .as_ref()
            .and_then(|rt| Some((rt.realtime_at?, rt.delay_minutes()?)))
            .filter(|(at, _)| at.date_naive() == today)
        {
            info!(
                device = %device_id,
                delay,
                at = %realtime_at.format("%H:%M:%S"),
                "New delay data"
            );
            self.latest_delays.insert(device_id.to_string(), delay);
            self.last_update_time
                .insert(device_id.to_string(), realtime_at);
        }

        Ok(DeviceData {
            device: device.clone(),
            latest_delay: self.cached_delay_for(device_id, &departure),
            departure: Some(departure),
            realtime,
            last_delay_update: self.last_update_time.get(device_id).copied(),
        })
    }

    /// Cached delay, or 0 when it was measured for another day's departure.
    fn cached_delay_for(&self, device_id: &str, departure: &ScheduledDeparture) -> i64 {
        match (
            self.latest_delays.get(device_id),
            self.last_update_time.get(device_id),
        ) {
            (Some(delay), Some(at)) if at.date_naive() == departure.date => *delay,
            _ => 0,
        }
    }

    /// First departure at `target_time` that has not yet left, searching
    /// today and then up to `lookahead_days` ahead.
    async fn next_departure(
        &self,
        device: &TrackedDevice,
        target_time: &str,
        now: &DateTime<Tz>,
    ) -> Result<Option<ScheduledDeparture>> {
        let today = now.date_naive();

        for offset in 0..=self.lookahead_days {
            let Some(date) = today.checked_add_days(Days::new(offset.into())) else {
                break;
            };

            let query = ScheduleQuery::new(&device.halte_number, &device.line_number)
                .on(Some(date))
                .at(target_time)
                .in_entity(device.entity_number.clone());

            let found = self
                .api
                .schedule_times(&query)
                .await?
                .into_iter()
                .find(|d| is_upcoming(&d.scheduled_at, now));

            if let Some(departure) = found {
                debug!(
                    date = %departure.date,
                    time = %format_hhmm(&departure.scheduled_at),
                    "Resolved next departure"
                );
                return Ok(Some(departure));
            }
        }

        Ok(None)
    }

    /// Refreshes every scan interval until `shutdown` resolves, passing each
    /// snapshot to `on_update`.
    pub async fn run<S, F>(&mut self, shutdown: S, mut on_update: F)
    where
        S: Future<Output = ()>,
        F: FnMut(&Snapshot, &DateTime<Tz>),
    {
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(self.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.scan_interval.as_secs(),
            devices = self.devices.len(),
            "Starting coordinator"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping coordinator");
                    break;
                }
                _ = interval.tick() => {
                    let now = now_brussels();
                    match self.refresh(now).await {
                        Ok(snapshot) => on_update(&snapshot, &now),
                        Err(e) => error!(error = %e, "Error fetching data"),
                    }
                }
            }
        }
    }
}
