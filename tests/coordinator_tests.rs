use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone};
use chrono_tz::{Europe::Brussels, Tz};
use delijn_tracker::config::{TrackedDevice, TrackerConfig};
use delijn_tracker::coordinator::Coordinator;
use delijn_tracker::sensor::{DelayStatus, Sensor, SensorKind};
use delijn_tracker::services::transit_api::{
    LineInfo, RealtimeDeparture, ScheduleQuery, ScheduledDeparture, TransitApi,
};
use delijn_tracker::{Result, TrackerError};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Daily 08:15 departure on line 5, with a configurable real-time answer.
/// Clones share state so a test can steer the api after handing it over.
#[derive(Clone, Default)]
struct FakeApi {
    realtime_at: Arc<Mutex<Option<DateTime<Tz>>>>,
    fail_schedule: Arc<AtomicBool>,
    fail_realtime: Arc<AtomicBool>,
    /// No departures on any day.
    no_service: Arc<AtomicBool>,
    /// The next schedule lookup stalls past the update timeout.
    slow_once: Arc<AtomicBool>,
    schedule_calls: Arc<AtomicUsize>,
    realtime_calls: Arc<AtomicUsize>,
}

impl FakeApi {
    fn set_realtime(&self, at: Option<DateTime<Tz>>) {
        *self.realtime_at.lock().unwrap() = at;
    }
}

#[async_trait]
impl TransitApi for FakeApi {
    async fn validate_api_key(&self) -> Result<()> {
        Ok(())
    }

    async fn available_lines(&self, _halte: &str) -> Result<Vec<LineInfo>> {
        Ok(Vec::new())
    }

    async fn schedule_times(&self, query: &ScheduleQuery) -> Result<Vec<ScheduledDeparture>> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if self.slow_once.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        }
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(TrackerError::HalteNotFound {
                halte: query.halte.clone(),
            });
        }
        if self.no_service.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let date = query.date.expect("coordinator always asks for a date");
        let scheduled_at = date
            .and_hms_opt(8, 15, 0)
            .unwrap()
            .and_local_timezone(Brussels)
            .unwrap();

        let departure = ScheduledDeparture {
            time: "08:15".into(),
            scheduled_at,
            destination: "Gent Zuid".into(),
            ritnummer: "11".into(),
            date,
            entity_number: "2".into(),
        };

        Ok(std::iter::once(departure)
            .filter(|d| query.target_time.as_deref().is_none_or(|t| t == d.time))
            .collect())
    }

    async fn realtime_departure(
        &self,
        _halte: &str,
        _line: &str,
        scheduled_at: &DateTime<Tz>,
        _entity_number: Option<&str>,
    ) -> Result<Option<RealtimeDeparture>> {
        self.realtime_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_realtime.load(Ordering::SeqCst) {
            return Err(TrackerError::InvalidAuth);
        }

        Ok(Some(RealtimeDeparture {
            scheduled_at: *scheduled_at,
            realtime_at: *self.realtime_at.lock().unwrap(),
            prediction_status: Some("REALTIME".into()),
            vehicle_number: None,
            direction: Some("HEEN".into()),
        }))
    }
}

fn device() -> TrackedDevice {
    TrackedDevice {
        halte_number: "101000".into(),
        line_number: "5".into(),
        scheduled_time: "2024-03-11T08:15:00+01:00".into(),
        destination: "Gent Zuid".into(),
        public_line: Some("5".into()),
        vehicle_type: "Bus".into(),
        line_description: Some("Gent Zuid - Sint-Pieters".into()),
        entity_number: Some("2".into()),
        halte_name: "Gent Sint-Pieters".into(),
        ritnummer: Some("11".into()),
        unique_id: None,
    }
}

fn config() -> TrackerConfig {
    TrackerConfig {
        devices: vec![device()],
        update_timeout_secs: 1,
        ..Default::default()
    }
}

fn at(day: u32, h: u32, m: u32) -> DateTime<Tz> {
    Brussels.with_ymd_and_hms(2024, 3, day, h, m, 0).unwrap()
}

const DEVICE_ID: &str = "101000_5_08:15";

#[tokio::test]
async fn test_departure_today_with_delay() {
    let api = FakeApi::default();
    api.set_realtime(Some(at(11, 8, 20)));
    let mut coordinator = Coordinator::new(api, &config());

    let now = at(11, 8, 0);
    let snapshot = coordinator.refresh(now).await.unwrap();

    let data = &snapshot[DEVICE_ID];
    assert_eq!(data.departure.as_ref().unwrap().scheduled_at, at(11, 8, 15));
    assert_eq!(data.latest_delay, 5);
    assert_eq!(data.last_delay_update, Some(at(11, 8, 20)));
    assert_eq!(coordinator.latest_delay(DEVICE_ID), Some(5));

    let waiting = Sensor::new(device(), SensorKind::WaitingTime);
    assert_eq!(waiting.native_value(&snapshot, &now), Some(20));

    let delay = Sensor::new(device(), SensorKind::Delay).state(&snapshot, &now);
    assert_eq!(delay.value, Some(5));
    let attrs = delay.attributes.unwrap();
    assert_eq!(attrs.status, Some(DelayStatus::SlightlyDelayed));
    assert_eq!(attrs.realtime_time.as_deref(), Some("08:20"));
}

#[tokio::test]
async fn test_departed_rolls_over_to_next_day() {
    let api = FakeApi::default();
    let mut coordinator = Coordinator::new(api.clone(), &config());

    let now = at(11, 8, 31);
    let snapshot = coordinator.refresh(now).await.unwrap();
    assert_eq!(api.realtime_calls.load(Ordering::SeqCst), 0);

    let departure = snapshot[DEVICE_ID].departure.clone().unwrap();
    assert_eq!(departure.scheduled_at, at(12, 8, 15));
    assert!(snapshot[DEVICE_ID].realtime.is_none());

    let waiting = Sensor::new(device(), SensorKind::WaitingTime);
    assert_eq!(
        waiting.native_value(&snapshot, &now),
        Some((at(12, 8, 15) - now).num_minutes())
    );
    let attrs = waiting.attributes(&snapshot, &now).unwrap();
    assert_eq!(attrs.scheduled_date, "2024-03-12");
    assert_eq!(attrs.time_formatted.as_deref(), Some("0.23:44"));
}

#[tokio::test]
async fn test_grace_period_keeps_departure_today() {
    let api = FakeApi::default();
    api.set_realtime(Some(at(11, 8, 18)));
    let mut coordinator = Coordinator::new(api, &config());

    let now = at(11, 8, 15) + Duration::minutes(10);
    let snapshot = coordinator.refresh(now).await.unwrap();

    assert_eq!(
        snapshot[DEVICE_ID].departure.as_ref().unwrap().date,
        now.date_naive()
    );
    let waiting = Sensor::new(device(), SensorKind::WaitingTime);
    assert_eq!(waiting.native_value(&snapshot, &now), Some(0));
}

#[tokio::test]
async fn test_failed_device_keeps_cached_delay() {
    let api = FakeApi::default();
    api.set_realtime(Some(at(11, 8, 22)));

    let mut config = config();
    config.devices.push(TrackedDevice {
        line_number: "12".into(),
        ..device()
    });
    let mut coordinator = Coordinator::new(api.clone(), &config);

    coordinator.refresh(at(11, 8, 0)).await.unwrap();
    assert_eq!(coordinator.latest_delay(DEVICE_ID), Some(7));

    api.fail_schedule.store(true, Ordering::SeqCst);
    let snapshot = coordinator.refresh(at(11, 8, 1)).await.unwrap();

    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.values().all(|d| d.departure.is_none()));
    assert_eq!(snapshot[DEVICE_ID].latest_delay, 7);
    assert_eq!(snapshot[DEVICE_ID].last_delay_update, Some(at(11, 8, 22)));

    // Sensors without a departure report no value.
    let delay = Sensor::new(device(), SensorKind::Delay);
    assert_eq!(delay.native_value(&snapshot, &at(11, 8, 1)), None);
}

#[tokio::test]
async fn test_delay_falls_back_when_prediction_disappears() {
    let api = FakeApi::default();
    api.set_realtime(Some(at(11, 8, 18)));
    let mut coordinator = Coordinator::new(api.clone(), &config());

    coordinator.refresh(at(11, 8, 0)).await.unwrap();
    assert_eq!(coordinator.latest_delay(DEVICE_ID), Some(3));

    api.set_realtime(None);
    let now = at(11, 8, 5);
    let snapshot = coordinator.refresh(now).await.unwrap();

    assert!(snapshot[DEVICE_ID].realtime.is_some());
    assert_eq!(snapshot[DEVICE_ID].latest_delay, 3);
    assert_eq!(
        Sensor::new(device(), SensorKind::Delay).native_value(&snapshot, &now),
        Some(3)
    );
    assert_eq!(api.realtime_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_realtime_failure_is_not_fatal() {
    let api = FakeApi::default();
    api.fail_realtime.store(true, Ordering::SeqCst);
    let mut coordinator = Coordinator::new(api, &config());

    let now = at(11, 8, 0);
    let snapshot = coordinator.refresh(now).await.unwrap();

    let data = &snapshot[DEVICE_ID];
    assert!(data.departure.is_some());
    assert!(data.realtime.is_none());
    assert_eq!(
        Sensor::new(device(), SensorKind::Delay).native_value(&snapshot, &now),
        Some(0)
    );
}

#[tokio::test]
async fn test_refresh_times_out() {
    let api = FakeApi::default();
    api.slow_once.store(true, Ordering::SeqCst);
    let mut coordinator = Coordinator::new(api, &config());

    let err = coordinator.refresh(at(11, 8, 0)).await.unwrap_err();
    assert!(matches!(err, TrackerError::UpdateFailed { .. }));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let api = FakeApi::default();
    let mut coordinator = Coordinator::new(api, &config());

    let mut updates = 0;
    coordinator
        .run(
            tokio::time::sleep(std::time::Duration::from_millis(200)),
            |snapshot, _now| {
                assert!(snapshot.contains_key(DEVICE_ID));
                updates += 1;
            },
        )
        .await;

    // The first interval tick fires immediately.
    assert_eq!(updates, 1);
}

#[tokio::test]
async fn test_run_keeps_polling_after_failed_refresh() {
    let api = FakeApi::default();
    api.slow_once.store(true, Ordering::SeqCst);
    let config = TrackerConfig {
        scan_interval_secs: 1,
        ..config()
    };
    let mut coordinator = Coordinator::new(api.clone(), &config);

    let mut updates = 0;
    coordinator
        .run(
            tokio::time::sleep(std::time::Duration::from_millis(1800)),
            |snapshot, _now| {
                assert!(snapshot[DEVICE_ID].departure.is_some());
                updates += 1;
            },
        )
        .await;

    // The first refresh timed out; a later tick still delivered a snapshot.
    assert!(updates >= 1);
    assert!(api.schedule_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_stale_delay_not_carried_to_next_day() {
    let api = FakeApi::default();
    api.set_realtime(Some(at(11, 8, 22)));
    let mut coordinator = Coordinator::new(api.clone(), &config());

    coordinator.refresh(at(11, 8, 0)).await.unwrap();
    assert_eq!(coordinator.latest_delay(DEVICE_ID), Some(7));

    let now = at(11, 8, 31);
    let snapshot = coordinator.refresh(now).await.unwrap();
    let data = &snapshot[DEVICE_ID];
    assert_eq!(data.departure.as_ref().unwrap().date, at(12, 0, 0).date_naive());
    assert_eq!(data.latest_delay, 0);
    assert_eq!(
        Sensor::new(device(), SensorKind::Delay).native_value(&snapshot, &now),
        Some(0)
    );

    // The next morning's own prediction takes over.
    api.set_realtime(Some(at(12, 8, 17)));
    let now = at(12, 8, 0);
    let snapshot = coordinator.refresh(now).await.unwrap();
    assert_eq!(snapshot[DEVICE_ID].latest_delay, 2);
    api.set_realtime(None);
    let snapshot = coordinator.refresh(at(12, 8, 5)).await.unwrap();
    assert_eq!(
        Sensor::new(device(), SensorKind::Delay).native_value(&snapshot, &at(12, 8, 5)),
        Some(2)
    );
}

#[tokio::test]
async fn test_realtime_on_other_day_not_cached() {
    let api = FakeApi::default();
    api.set_realtime(Some(at(12, 8, 20)));
    let mut coordinator = Coordinator::new(api, &config());

    let snapshot = coordinator.refresh(at(11, 8, 0)).await.unwrap();

    let data = &snapshot[DEVICE_ID];
    assert!(data.realtime.is_some());
    assert_eq!(data.latest_delay, 0);
    assert_eq!(data.last_delay_update, None);
    assert_eq!(coordinator.latest_delay(DEVICE_ID), None);
}

#[tokio::test]
async fn test_no_departure_within_lookahead() {
    let api = FakeApi::default();
    api.no_service.store(true, Ordering::SeqCst);
    let config = TrackerConfig {
        lookahead_days: 2,
        ..config()
    };
    let mut coordinator = Coordinator::new(api.clone(), &config);

    let now = at(11, 8, 0);
    let snapshot = coordinator.refresh(now).await.unwrap();

    // Today plus two days ahead.
    assert_eq!(api.schedule_calls.load(Ordering::SeqCst), 3);
    assert_eq!(api.realtime_calls.load(Ordering::SeqCst), 0);
    assert!(snapshot[DEVICE_ID].departure.is_none());
    for kind in SensorKind::ALL {
        let state = Sensor::new(device(), kind).state(&snapshot, &now);
        assert_eq!(state.value, None);
        assert!(state.attributes.is_none());
    }
}
