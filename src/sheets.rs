use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::grid::CellGrid;
use crate::identifier::SpreadsheetId;

const SERVICE: &str = "google sheets";

/// Remote spreadsheet access the ingest pipeline depends on.
#[async_trait]
pub trait SheetFetcher: Send + Sync {
    /// Worksheet titles in tab order.
    async fn worksheet_titles(&self, spreadsheet: &SpreadsheetId) -> AppResult<Vec<String>>;

    async fn fetch_range(
        &self,
        spreadsheet: &SpreadsheetId,
        worksheet: &str,
        start: &str,
        end: &str,
    ) -> AppResult<CellGrid>;
}

/// `'Sheet'!A1:B2`, quoting the worksheet name.
pub fn a1_range(worksheet: &str, start: &str, end: &str) -> String {
    format!("'{}'!{start}:{end}", worksheet.replace('\'', "''"))
}

#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    api_base: String,
    api_key: Option<SecretString>,
    access_token: Option<SecretString>,
}

impl SheetsClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("density-survey-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: config.sheets_api_base.trim_end_matches('/').to_string(),
            api_key: config.sheets_api_key.clone(),
            access_token: config.sheets_access_token.clone(),
        })
    }

    fn spreadsheet_url(&self, spreadsheet: &SpreadsheetId) -> AppResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| AppError::Config(format!("invalid Sheets API base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Sheets API base".into()))?
            .pop_if_empty()
            .push("v4")
            .push("spreadsheets")
            .push(spreadsheet.as_str());
        Ok(url)
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.expose_secret())]);
        }
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token.expose_secret());
        }
        request
    }
}

#[async_trait]
impl SheetFetcher for SheetsClient {
    async fn worksheet_titles(&self, spreadsheet: &SpreadsheetId) -> AppResult<Vec<String>> {
        let url = self.spreadsheet_url(spreadsheet)?;
        let request = self
            .http
            .get(url)
            .query(&[("fields", "sheets.properties.title")]);
        let response = check_status(self.authorize(request).send().await?).await?;

        let metadata: SpreadsheetResponse = response.json().await?;
        Ok(metadata
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    async fn fetch_range(
        &self,
        spreadsheet: &SpreadsheetId,
        worksheet: &str,
        start: &str,
        end: &str,
    ) -> AppResult<CellGrid> {
        let range = a1_range(worksheet, start, end);
        let mut url = self.spreadsheet_url(spreadsheet)?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Sheets API base".into()))?
            .push("values")
            .push(&range);

        debug!(spreadsheet = %spreadsheet, range = %range, "reading sheet range");
        let request = self
            .http
            .get(url)
            .query(&[("majorDimension", "ROWS")]);
        let response = check_status(self.authorize(request).send().await?).await?;

        let values: ValueRangeResponse = response.json().await?;
        Ok(CellGrid::new(
            values
                .values
                .into_iter()
                .map(|row| row.into_iter().map(cell_text).collect())
                .collect(),
        ))
    }
}

async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AppError::RateLimited { service: SERVICE });
    }
    let message = response.text().await.unwrap_or_default();
    Err(AppError::Remote {
        service: SERVICE,
        status: status.as_u16(),
        message: message.chars().take(200).collect(),
    })
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}
