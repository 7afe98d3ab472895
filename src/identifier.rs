use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::Serialize;

use crate::errors::IdentifierError;

const SPREADSHEET_HOSTS: &[&str] = &["docs.google.com", "drive.google.com"];

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{25,}$").expect("spreadsheet id pattern compiles"));

/// Canonical spreadsheet identifier. Only [`extract_spreadsheet_id`] builds one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SpreadsheetId(String);

impl SpreadsheetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpreadsheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SpreadsheetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_spreadsheet_id(candidate: &str) -> bool {
    ID_PATTERN.is_match(candidate)
}

/// Accepts a bare identifier or a docs/drive URL and returns the identifier.
/// The bare form must be the whole input; surrounding whitespace is rejected.
pub fn extract_spreadsheet_id(input: &str) -> Result<SpreadsheetId, IdentifierError> {
    if is_spreadsheet_id(input) {
        return Ok(SpreadsheetId(input.to_string()));
    }

    let url = Url::parse(input).map_err(|err| IdentifierError::InvalidInput {
        input: input.to_string(),
        reason: err.to_string(),
    })?;

    let host = url.host_str().unwrap_or_default();
    if !SPREADSHEET_HOSTS.contains(&host) {
        return Err(IdentifierError::NotASpreadsheetUrl(input.to_string()));
    }

    if let Some(segment) = url.path().split('/').find(|part| is_spreadsheet_id(part)) {
        return Ok(SpreadsheetId(segment.to_string()));
    }

    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|value| is_spreadsheet_id(value))
        .map(SpreadsheetId)
        .ok_or_else(|| IdentifierError::IdentifierNotFound(input.to_string()))
}
