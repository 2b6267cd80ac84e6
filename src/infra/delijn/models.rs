//! Wire models for the De Lijn Kern Open Data API (v1).
//!
//! Identifier fields come back as strings or numbers depending on the
//! endpoint, so they are normalized to `String` on the way in.

use serde::{Deserialize, Deserializer};

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntiteitenResponse {
    #[serde(default)]
    pub entiteiten: Vec<Entiteit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entiteit {
    #[serde(deserialize_with = "string_or_number")]
    pub entiteitnummer: String,
    #[serde(default)]
    pub omschrijving: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub rel: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Halte {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub entiteitnummer: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub haltenummer: Option<String>,
    #[serde(default)]
    pub omschrijving_lang: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Halte {
    /// URL of the link with relation `rel`.
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == rel)
            .map(|l| l.url.as_str())
    }
}

/// Body of both the `dienstregelingen` and `real-time` links.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorkomstenResponse {
    #[serde(default)]
    pub halte_doorkomsten: Vec<HalteDoorkomst>,
}

impl DoorkomstenResponse {
    /// Passages of the first (and in practice only) halte in the response.
    pub fn doorkomsten(&self) -> &[Doorkomst] {
        self.halte_doorkomsten
            .first()
            .map(|h| h.doorkomsten.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HalteDoorkomst {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub haltenummer: Option<String>,
    #[serde(default)]
    pub doorkomsten: Vec<Doorkomst>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doorkomst {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub entiteitnummer: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub lijnnummer: Option<String>,
    #[serde(default)]
    pub richting: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub ritnummer: Option<String>,
    #[serde(default)]
    pub bestemming: Option<String>,
    #[serde(default)]
    pub dienstregeling_tijdstip: Option<String>,
    #[serde(rename = "real-timeTijdstip", default)]
    pub real_time_tijdstip: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub vrtnum: Option<String>,
    #[serde(default)]
    pub prediction_statussen: Option<Vec<String>>,
}

impl Doorkomst {
    /// Passages without a line number never match.
    pub fn serves(&self, line: &str) -> bool {
        self.lijnnummer.as_deref() == Some(line)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LijnrichtingenResponse {
    #[serde(default)]
    pub lijnrichtingen: Vec<Lijnrichting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lijnrichting {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub entiteitnummer: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub lijnnummer: String,
    #[serde(default)]
    pub richting: Option<String>,
    #[serde(default)]
    pub omschrijving: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lijn {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub entiteitnummer: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub lijnnummer: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub lijnnummer_publiek: Option<String>,
    #[serde(default)]
    pub omschrijving: Option<String>,
    #[serde(default)]
    pub bestemming: Option<String>,
    #[serde(default)]
    pub publiek: Option<bool>,
}

/// `lijnen/{entity}/{line}` answers with a single line or a list of variants.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LijnResponse {
    Many(Vec<Lijn>),
    One(Lijn),
}

impl LijnResponse {
    /// The line itself, or the first public variant of a list.
    pub fn into_public(self) -> Option<Lijn> {
        match self {
            LijnResponse::One(lijn) => Some(lijn),
            LijnResponse::Many(lijnen) => lijnen.into_iter().find(|l| l.publiek == Some(true)),
        }
    }
}
