use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};

/// One container as reported by the monitoring backend.
///
/// Every snapshot or stream frame produces fresh values; a container has no identity
/// outside the list it arrived in.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Container {
    pub id: String,
    pub name: String,
    /// Epoch seconds, as podman reports `StartedAt`. Treated as an opaque value here.
    pub started_at: u64,
    #[serde(deserialize_with = "deserialize_gauge")]
    pub cpu_percent: f64,
    #[serde(deserialize_with = "deserialize_gauge")]
    pub memory_percent: f64,
    /// Human formatted, e.g. "512MiB". Not parsed.
    pub memory_usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Backend-ordered list of containers. Duplicate ids are passed through untouched.
pub type ContainerList = Vec<Container>;

impl Container {
    /// `started_at` read as epoch seconds. `None` if it does not fit a timestamp.
    pub fn started_at_utc(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.started_at).ok()?;
        DateTime::<Utc>::from_timestamp(secs, 0)
    }
}

/// Parses one full-list payload, as carried by a stream frame or a snapshot body.
pub fn parse_container_list(payload: &str) -> Result<ContainerList, serde_json::Error> {
    serde_json::from_str(payload)
}

/// Parses a podman-style percentage such as `"12.50%"` or `" 3.1 "`.
pub fn parse_gauge(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_end_matches('%')
        .trim_end()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn deserialize_gauge<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Gauge {
        Number(f64),
        Text(String),
    }

    match Gauge::deserialize(deserializer)? {
        Gauge::Number(value) => Ok(value),
        Gauge::Text(raw) => parse_gauge(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid percentage value: {raw:?}"))),
    }
}
