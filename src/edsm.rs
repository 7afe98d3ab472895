use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const SERVICE: &str = "edsm";

/// Galactic coordinates as EDSM reports them.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemRecord {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    pub coords: Coordinates,
}

#[async_trait]
pub trait SystemLookup: Send + Sync {
    /// Resolves many system names in a single request.
    async fn lookup_systems(&self, names: &[String]) -> AppResult<Vec<SystemRecord>>;
}

#[derive(Clone)]
pub struct EdsmClient {
    http: Client,
    api_base: String,
}

impl EdsmClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent("dw-stellar-density-analyzer")
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: config.edsm_api_base.trim_end_matches('/').to_string(),
        })
    }

    fn systems_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| AppError::Config(format!("invalid EDSM base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid EDSM base URL".into()))?
            .pop_if_empty()
            .push("api-v1")
            .push("systems");
        Ok(url)
    }
}

#[async_trait]
impl SystemLookup for EdsmClient {
    async fn lookup_systems(&self, names: &[String]) -> AppResult<Vec<SystemRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.systems_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("showId", "1").append_pair("showCoordinates", "1");
            for name in names {
                query.append_pair("systemName[]", name);
            }
        }

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited { service: SERVICE });
        }
        if !status.is_success() {
            return Err(AppError::Remote {
                service: SERVICE,
                status: status.as_u16(),
                message: format!("unable to query {} systems", names.len()),
            });
        }

        let body: Value = response.json().await?;
        let records = decode_systems(body)?;
        debug!(
            requested = names.len(),
            resolved = records.len(),
            "edsm system lookup"
        );
        Ok(records)
    }
}

/// EDSM answers `{}` instead of `[]` when nothing matched, and omits
/// `coords` for systems it has no position for.
fn decode_systems(body: Value) -> AppResult<Vec<SystemRecord>> {
    match body {
        Value::Array(entries) => Ok(entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<SystemRecord>(entry).ok())
            .collect()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        other => Err(AppError::Lookup(format!(
            "unexpected EDSM response: {}",
            other.to_string().chars().take(120).collect::<String>()
        ))),
    }
}
