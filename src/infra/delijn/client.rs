use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::models::{
    DoorkomstenResponse, Doorkomst, Entiteit, EntiteitenResponse, Halte, Lijn, LijnResponse,
    LijnrichtingenResponse,
};
use crate::error::{Result, TrackerError};
use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient, fetch_json, parse_url};
use crate::schedule::{format_hhmm, parse_api_timestamp};
use crate::services::transit_api::{
    LineInfo, RealtimeDeparture, ScheduleQuery, ScheduledDeparture, TransitApi,
};

pub const DEFAULT_BASE_URL: &str = "https://api.delijn.be/DLKernOpenData/api/v1";

const REL_DIENSTREGELINGEN: &str = "dienstregelingen";
const REL_REAL_TIME: &str = "real-time";
const REL_LIJNRICHTINGEN: &str = "lijnrichtingen";

/// Client for the De Lijn Kern Open Data API.
///
/// Haltes are addressed per entity (province), so the client probes the
/// entities to find where a halte lives and remembers the answer.
pub struct DeLijnClient<C> {
    client: C,
    base_url: String,
    halte_entities: Mutex<HashMap<String, String>>,
}

impl DeLijnClient<ApiKey<BasicClient>> {
    /// Production client sending `api_key` as the subscription key.
    pub fn with_api_key(api_key: &str, base_url: Option<&str>) -> Result<Self> {
        let client = ApiKey::subscription_key(BasicClient::new()?, api_key)?;
        Ok(Self::new(client, base_url.unwrap_or(DEFAULT_BASE_URL)))
    }
}

impl<C: HttpClient> DeLijnClient<C> {
    pub fn new(client: C, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            halte_entities: Mutex::new(HashMap::new()),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn cached_entity(&self, halte: &str) -> Option<String> {
        self.halte_entities.lock().ok()?.get(halte).cloned()
    }

    fn remember_entity(&self, halte: &str, entity: &str) {
        if let Ok(mut map) = self.halte_entities.lock() {
            map.insert(halte.to_string(), entity.to_string());
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn entities(&self) -> Result<Vec<Entiteit>> {
        let resp: EntiteitenResponse = fetch_json(&self.client, &self.endpoint("entiteiten")).await?;
        debug!(count = resp.entiteiten.len(), "Entities fetched");
        Ok(resp.entiteiten)
    }

    async fn halte_in_entity(&self, entity: &str, halte: &str) -> Result<Option<Halte>> {
        let url = self.endpoint(&format!("haltes/{entity}/{halte}"));
        match fetch_json::<_, Halte>(&self.client, &url).await {
            Ok(h) => Ok(Some(h)),
            Err(TrackerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolves `halte` to its entity number and details.
    ///
    /// An entity hint (or a cached entity) is tried first; otherwise every
    /// entity is probed in order. 404s mean "not here"; other errors abort.
    #[tracing::instrument(skip(self))]
    pub async fn find_halte(&self, halte: &str, entity_hint: Option<&str>) -> Result<(String, Halte)> {
        let known = entity_hint
            .map(str::to_string)
            .or_else(|| self.cached_entity(halte));

        if let Some(entity) = known {
            if let Some(h) = self.halte_in_entity(&entity, halte).await? {
                self.remember_entity(halte, &entity);
                return Ok((entity, h));
            }
            debug!(entity = %entity, "Known entity no longer serves halte, probing all");
        }

        for entity in self.entities().await? {
            if let Some(h) = self.halte_in_entity(&entity.entiteitnummer, halte).await? {
                debug!(entity = %entity.entiteitnummer, "Found halte");
                self.remember_entity(halte, &entity.entiteitnummer);
                return Ok((entity.entiteitnummer, h));
            }
        }

        Err(TrackerError::HalteNotFound {
            halte: halte.to_string(),
        })
    }

    /// Detailed line info; `None` when the entity does not know the line.
    #[tracing::instrument(skip(self))]
    pub async fn line_details(&self, entity: &str, line: &str) -> Result<Option<Lijn>> {
        let url = self.endpoint(&format!("lijnen/{entity}/{line}"));
        match fetch_json::<_, LijnResponse>(&self.client, &url).await {
            Ok(resp) => Ok(resp.into_public()),
            Err(TrackerError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True when `line` serves `halte`.
    #[tracing::instrument(skip(self))]
    pub async fn validate_config(&self, halte: &str, line: &str) -> Result<bool> {
        let (_, h) = match self.find_halte(halte, None).await {
            Ok(found) => found,
            Err(TrackerError::HalteNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let Some(url) = h.link(REL_LIJNRICHTINGEN) else {
            return Ok(false);
        };

        let resp: LijnrichtingenResponse = fetch_json(&self.client, url).await?;
        Ok(resp.lijnrichtingen.iter().any(|lr| lr.lijnnummer == line))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_available_lines(&self, halte: &str) -> Result<Vec<LineInfo>> {
        let (entity, h) = self.find_halte(halte, None).await?;
        let halte_name = h.omschrijving_lang.clone().unwrap_or_default();

        let Some(url) = h.link(REL_LIJNRICHTINGEN) else {
            warn!("Halte has no lijnrichtingen link");
            return Ok(Vec::new());
        };
        let resp: LijnrichtingenResponse = fetch_json(&self.client, url).await?;

        let mut all_entities: Option<Vec<Entiteit>> = None;
        let mut seen = HashSet::new();
        let mut lines = Vec::new();

        for lr in resp.lijnrichtingen {
            if !seen.insert(lr.lijnnummer.clone()) {
                continue;
            }

            let home = lr.entiteitnummer.clone().unwrap_or_else(|| entity.clone());
            let mut details = self.lookup_line(&home, &lr.lijnnummer).await?;

            if details.is_none() {
                if all_entities.is_none() {
                    all_entities = Some(self.entities().await?);
                }
                for other in all_entities.iter().flatten() {
                    if other.entiteitnummer == home {
                        continue;
                    }
                    details = self.lookup_line(&other.entiteitnummer, &lr.lijnnummer).await?;
                    if details.is_some() {
                        break;
                    }
                }
            }

            let Some(lijn) = details else {
                info!(line = %lr.lijnnummer, "No line details found, skipping");
                continue;
            };

            lines.push(LineInfo {
                public_line: lijn
                    .lijnnummer_publiek
                    .unwrap_or_else(|| lr.lijnnummer.clone()),
                lijnnummer: lr.lijnnummer,
                description: lijn.omschrijving.unwrap_or_default(),
                destination: lijn.bestemming.unwrap_or_else(|| "Unknown".to_string()),
                entity_number: entity.clone(),
                halte_name: halte_name.clone(),
            });
        }

        lines.sort_by(|a, b| line_sort_key(&a.lijnnummer).cmp(&line_sort_key(&b.lijnnummer)));
        debug!(count = lines.len(), "Available lines resolved");
        Ok(lines)
    }

    /// Line details where only a rejected key is fatal.
    async fn lookup_line(&self, entity: &str, line: &str) -> Result<Option<Lijn>> {
        match self.line_details(entity, line).await {
            Ok(details) => Ok(details),
            Err(TrackerError::InvalidAuth) => Err(TrackerError::InvalidAuth),
            Err(e) => {
                info!(line, entity, error = %e, "Error getting line details");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_schedule_times(&self, query: &ScheduleQuery) -> Result<Vec<ScheduledDeparture>> {
        let (entity, h) = self
            .find_halte(&query.halte, query.entity_number.as_deref())
            .await?;

        let link = h
            .link(REL_DIENSTREGELINGEN)
            .ok_or_else(|| TrackerError::MissingLink {
                halte: query.halte.clone(),
                rel: REL_DIENSTREGELINGEN.to_string(),
            })?;
        let url = dienstregelingen_url(link, query.date)?;

        let resp: DoorkomstenResponse = fetch_json(&self.client, &url).await?;

        let mut times: Vec<ScheduledDeparture> = resp
            .doorkomsten()
            .iter()
            .filter(|d| d.serves(&query.line))
            .filter_map(|d| to_departure(d, &entity))
            .filter(|d| {
                query
                    .target_time
                    .as_deref()
                    .is_none_or(|target| d.time == target)
            })
            .collect();

        times.sort_by_key(|d| d.scheduled_at);
        debug!(count = times.len(), "Schedule times found");
        Ok(times)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_realtime_data(
        &self,
        halte: &str,
        line: &str,
        scheduled_at: &DateTime<Tz>,
        entity_number: Option<&str>,
    ) -> Result<Option<RealtimeDeparture>> {
        let (_, h) = self.find_halte(halte, entity_number).await?;

        let Some(url) = h.link(REL_REAL_TIME) else {
            debug!("No real-time link for halte");
            return Ok(None);
        };

        let resp: DoorkomstenResponse = fetch_json(&self.client, url).await?;

        let found = resp.doorkomsten().iter().find(|d| {
            d.serves(line)
                && d
                    .dienstregeling_tijdstip
                    .as_deref()
                    .and_then(|ts| parse_api_timestamp(ts).ok())
                    .is_some_and(|ts| ts == *scheduled_at)
        });

        let Some(d) = found else {
            debug!("No matching real-time passage");
            return Ok(None);
        };

        let realtime_at = d.real_time_tijdstip.as_deref().and_then(|ts| {
            parse_api_timestamp(ts)
                .inspect_err(|e| warn!(error = %e, "Unparsable real-time timestamp"))
                .ok()
        });

        Ok(Some(RealtimeDeparture {
            scheduled_at: *scheduled_at,
            realtime_at,
            prediction_status: d
                .prediction_statussen
                .as_ref()
                .and_then(|s| s.first().cloned()),
            vehicle_number: d.vrtnum.clone(),
            direction: d.richting.clone(),
        }))
    }
}

fn line_sort_key(lijnnummer: &str) -> (u64, String) {
    (lijnnummer.parse().unwrap_or(u64::MAX), lijnnummer.to_string())
}

fn dienstregelingen_url(link: &str, date: Option<NaiveDate>) -> Result<String> {
    let mut url = parse_url(link)?;
    if let Some(date) = date {
        url.query_pairs_mut()
            .append_pair("datum", &date.format("%Y-%m-%d").to_string());
    }
    Ok(url.to_string())
}

fn to_departure(d: &Doorkomst, entity: &str) -> Option<ScheduledDeparture> {
    let raw = d.dienstregeling_tijdstip.as_deref()?;
    let scheduled_at = match parse_api_timestamp(raw) {
        Ok(ts) => ts,
        Err(e) => {
            error!(error = %e, "Skipping passage with invalid timestamp");
            return None;
        }
    };

    Some(ScheduledDeparture {
        time: format_hhmm(&scheduled_at),
        scheduled_at,
        destination: d
            .bestemming
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        ritnummer: d.ritnummer.clone().unwrap_or_default(),
        date: scheduled_at.date_naive(),
        entity_number: d
            .entiteitnummer
            .clone()
            .unwrap_or_else(|| entity.to_string()),
    })
}

#[async_trait]
impl<C: HttpClient> TransitApi for DeLijnClient<C> {
    async fn validate_api_key(&self) -> Result<()> {
        self.entities().await.map(|_| ())
    }

    async fn available_lines(&self, halte: &str) -> Result<Vec<LineInfo>> {
        self.get_available_lines(halte).await
    }

    async fn schedule_times(&self, query: &ScheduleQuery) -> Result<Vec<ScheduledDeparture>> {
        self.get_schedule_times(query).await
    }

    async fn realtime_departure(
        &self,
        halte: &str,
        line: &str,
        scheduled_at: &DateTime<Tz>,
        entity_number: Option<&str>,
    ) -> Result<Option<RealtimeDeparture>> {
        self.get_realtime_data(halte, line, scheduled_at, entity_number)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Brussels;
    use chrono::TimeZone;

    #[test]
    fn test_line_sort_key_numeric_then_lexical() {
        let mut ids = vec!["12", "5", "N1", "100"];
        ids.sort_by_key(|id| line_sort_key(id));
        assert_eq!(ids, vec!["5", "12", "100", "N1"]);
    }

    #[test]
    fn test_dienstregelingen_url_appends_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 12);
        let url = dienstregelingen_url("https://api.example/haltes/1/101000/dienstregelingen", date)
            .unwrap();
        assert_eq!(
            url,
            "https://api.example/haltes/1/101000/dienstregelingen?datum=2024-03-12"
        );

        let url = dienstregelingen_url("https://api.example/haltes/1/101000/dienstregelingen", None)
            .unwrap();
        assert!(!url.contains("datum"));
    }

    #[test]
    fn test_to_departure_defaults() {
        let d: Doorkomst = serde_json::from_str(
            r#"{"lijnnummer": "5", "dienstregelingTijdstip": "2024-03-11T08:15:00"}"#,
        )
        .unwrap();
        let dep = to_departure(&d, "1").unwrap();
        assert_eq!(dep.time, "08:15");
        assert_eq!(dep.destination, "Unknown");
        assert_eq!(dep.entity_number, "1");
        assert_eq!(
            dep.scheduled_at,
            Brussels.with_ymd_and_hms(2024, 3, 11, 8, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_to_departure_skips_missing_timestamp() {
        let d: Doorkomst = serde_json::from_str(r#"{"lijnnummer": "5"}"#).unwrap();
        assert!(to_departure(&d, "1").is_none());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = DeLijnClient::new(BasicClient::new().unwrap(), "http://localhost/api/");
        assert_eq!(client.endpoint("entiteiten"), "http://localhost/api/entiteiten");
    }
}
