use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 30;
const DEFAULT_REMOTE_DEADLINE_SECS: u64 = 600;
const DEFAULT_MAX_SAMPLE_ROWS: usize = 256;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub sheets_api_base: String,
    pub sheets_api_key: Option<SecretString>,
    pub sheets_access_token: Option<SecretString>,
    pub edsm_api_base: String,
    pub rate_limit_wait_secs: u64,
    pub remote_deadline_secs: u64,
    pub http_timeout_secs: u64,
    pub max_sample_rows: usize,
    pub max_concurrent_spreadsheets: usize,
    pub data_dir: PathBuf,
    pub database_file_name: String,
    pub variants_file: Option<PathBuf>,
    pub telemetry_enabled: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub sheets_api_base: String,
    pub edsm_api_base: String,
    pub rate_limit_wait_secs: u64,
    pub remote_deadline_secs: u64,
    pub http_timeout_secs: u64,
    pub max_sample_rows: usize,
    pub max_concurrent_spreadsheets: usize,
    pub data_dir: String,
    pub database_file_name: String,
    pub variants_file: Option<String>,
    pub telemetry_enabled: bool,
    pub has_sheets_api_key: bool,
    pub has_sheets_access_token: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            sheets_api_base: env::var("SHEETS_API_BASE")
                .unwrap_or_else(|_| "https://sheets.googleapis.com".to_string()),
            sheets_api_key: parse_secret("GOOGLE_SHEETS_API_KEY"),
            sheets_access_token: parse_secret("GOOGLE_SHEETS_ACCESS_TOKEN"),
            edsm_api_base: env::var("EDSM_API_BASE")
                .unwrap_or_else(|_| "https://www.edsm.net".to_string()),
            rate_limit_wait_secs: parse_u64("RATE_LIMIT_WAIT_SECS", DEFAULT_RATE_LIMIT_WAIT_SECS),
            remote_deadline_secs: parse_u64("REMOTE_DEADLINE_SECS", DEFAULT_REMOTE_DEADLINE_SECS),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", 30).max(1),
            max_sample_rows: parse_usize("MAX_SAMPLE_ROWS", DEFAULT_MAX_SAMPLE_ROWS).max(1),
            max_concurrent_spreadsheets: parse_usize("MAX_CONCURRENT_SPREADSHEETS", 1).max(1),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "density-surveys.db".to_string()),
            variants_file: env::var("SURVEY_VARIANTS_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
        }
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_wait_secs)
    }

    /// `None` when the deadline is disabled with `REMOTE_DEADLINE_SECS=0`.
    pub fn remote_deadline(&self) -> Option<Duration> {
        (self.remote_deadline_secs > 0).then(|| Duration::from_secs(self.remote_deadline_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            sheets_api_base: self.sheets_api_base.clone(),
            edsm_api_base: self.edsm_api_base.clone(),
            rate_limit_wait_secs: self.rate_limit_wait_secs,
            remote_deadline_secs: self.remote_deadline_secs,
            http_timeout_secs: self.http_timeout_secs,
            max_sample_rows: self.max_sample_rows,
            max_concurrent_spreadsheets: self.max_concurrent_spreadsheets,
            data_dir: self.data_dir.to_string_lossy().to_string(),
            database_file_name: self.database_file_name.clone(),
            variants_file: self
                .variants_file
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
            telemetry_enabled: self.telemetry_enabled,
            has_sheets_api_key: self.sheets_api_key.is_some(),
            has_sheets_access_token: self.sheets_access_token.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::new(v.into()))
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
