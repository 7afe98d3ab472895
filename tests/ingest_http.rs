use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use httptest::matchers::{all_of, matches, request};
use httptest::responders::{cycle, json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::{json, Value};
use tempfile::tempdir;

use density_survey_ingest::db::{bootstrap, SqliteSurveyStore};
use density_survey_ingest::edsm::EdsmClient;
use density_survey_ingest::retry::RemotePolicy;
use density_survey_ingest::sheets::{SheetFetcher, SheetsClient};
use density_survey_ingest::telemetry::TelemetryClient;
use density_survey_ingest::variants::VariantRegistry;
use density_survey_ingest::{extract_spreadsheet_id, AppConfig, AppError, SurveyIngestor};

const INDEX: &str = "IIIIIIIIIIIIIIIIIIIIIIIIIIII";
const SURVEY: &str = "SSSSSSSSSSSSSSSSSSSSSSSSSSSS";

fn config(server: &Server, data_dir: PathBuf) -> AppConfig {
    let base = server.url("/").to_string();
    AppConfig {
        sheets_api_base: base.clone(),
        sheets_api_key: None,
        sheets_access_token: None,
        edsm_api_base: base,
        rate_limit_wait_secs: 0,
        remote_deadline_secs: 30,
        http_timeout_secs: 5,
        max_sample_rows: 128,
        max_concurrent_spreadsheets: 2,
        data_dir,
        database_file_name: "surveys.db".into(),
        variants_file: None,
        telemetry_enabled: true,
        telemetry_batch_size: 50,
        telemetry_buffer_max_bytes: 1024 * 1024,
    }
}

fn sheet_titles(titles: &[&str]) -> Value {
    json!({
        "sheets": titles
            .iter()
            .map(|title| json!({ "properties": { "title": title } }))
            .collect::<Vec<_>>()
    })
}

fn dw3_values() -> Value {
    json!({
        "range": "'Run 1'!A1:Z128",
        "majorDimension": "ROWS",
        "values": [
            ["CMDR Nova - DW3"],
            [],
            [],
            [],
            ["System", "Z Sample", "System Count", "", "Max Distance", "", "X", "Z", "Y"],
            ["Sol", 0, 12, "", 19.5],
            ["Achenar", 50, 7],
            ["Unknown Rock", 100, 3, "", ""],
            ["", "", ""],
            ["Trailing", 150, 1]
        ]
    })
}

#[tokio::test]
async fn entry_index_to_sqlite_roundtrip() {
    let server = Server::run();

    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(format!("^/v4/spreadsheets/{INDEX}$")))
        ])
        .respond_with(json_encoded(sheet_titles(&["Entries"]))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(format!("^/v4/spreadsheets/{INDEX}/values/")))
        ])
        .respond_with(json_encoded(json!({
            "majorDimension": "ROWS",
            "values": [
                [format!("https://docs.google.com/spreadsheets/d/{SURVEY}/edit#gid=0")],
                ["https://example.com/x"],
                [SURVEY]
            ]
        }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(format!("^/v4/spreadsheets/{SURVEY}$")))
        ])
        .respond_with(json_encoded(sheet_titles(&["Run 1", "Notes"]))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(format!("^/v4/spreadsheets/{SURVEY}/values/.*Run")))
        ])
        .respond_with(json_encoded(dw3_values())),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(format!("^/v4/spreadsheets/{SURVEY}/values/.*Notes")))
        ])
        .respond_with(json_encoded(json!({ "values": [["scratch pad"]] }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/api-v1/systems")
        ])
        .times(2)
        .respond_with(cycle![
            status_code(429),
            json_encoded(json!([
                { "name": "Sol", "id": 27, "coords": { "x": 0.0, "y": 0.0, "z": 0.0 } },
                { "name": "Achenar", "id": 81, "coords": { "x": 67.5, "y": -119.47, "z": 24.84 } }
            ]))
        ]),
    );

    let dir = tempdir().unwrap();
    let config = config(&server, dir.path().to_path_buf());
    let mut store =
        SqliteSurveyStore::from(bootstrap(&config.data_dir, &config.database_file_name).unwrap());
    let telemetry = TelemetryClient::new(&config.data_dir, &config).unwrap();

    let ingestor = SurveyIngestor::from_config(
        &config,
        Arc::new(SheetsClient::new(&config).unwrap()),
        Arc::new(EdsmClient::new(&config).unwrap()),
        Arc::new(VariantRegistry::builtin()),
    )
    .with_telemetry(telemetry.clone());

    let entry = extract_spreadsheet_id(INDEX).unwrap();
    let summary = ingestor.run(&mut store, &entry).await.unwrap();

    assert_eq!(summary.spreadsheets, 1);
    assert_eq!(summary.duplicate_identifiers, 1);
    assert_eq!(summary.rejected_identifiers, 1);
    assert_eq!(summary.worksheets, 2);
    assert_eq!(summary.unidentified_layouts, 1);
    assert_eq!(summary.surveys_persisted, 1);
    assert_eq!(summary.surveys_failed, 0);
    assert_eq!(summary.points_persisted, 3);
    assert_eq!(summary.points_uncorrelated, 1);

    let connection = store.connection();
    let (cmdr, project, variant): (String, String, String) = connection
        .query_row("SELECT cmdr, project, variant FROM surveys", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert_eq!(cmdr, "CMDR Nova");
    assert_eq!(project, "DW3");
    assert_eq!(variant, "DW3");

    let (x, y, z, maxdistance): (f64, f64, f64, f64) = connection
        .query_row(
            "SELECT x, y, z, maxdistance FROM survey_points WHERE sysname = 'Achenar'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!((x, y, z), (67.5, 24.84, -119.47));
    assert_eq!(maxdistance, 20.0);

    let trailing: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM survey_points WHERE sysname = 'Trailing'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(trailing, 0);

    let events = std::fs::read_to_string(telemetry.buffer_path()).unwrap();
    assert!(events.contains("survey_persisted"));
    assert!(events.contains("layout_unidentified"));
}

#[tokio::test]
async fn sheets_backoff_is_rate_limited_and_retried() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(format!("^/v4/spreadsheets/{SURVEY}/values/")))
        ])
        .times(3)
        .respond_with(cycle![
            status_code(429),
            status_code(429),
            json_encoded(dw3_values())
        ]),
    );

    let dir = tempdir().unwrap();
    let config = config(&server, dir.path().to_path_buf());
    let client = SheetsClient::new(&config).unwrap();
    let survey = extract_spreadsheet_id(SURVEY).unwrap();

    let err = client
        .fetch_range(&survey, "Run 1", "A1", "Z128")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::RateLimited {
            service: "google sheets"
        }
    ));
    assert!(err.is_rate_limited());

    let policy = RemotePolicy::new(Duration::ZERO, Some(Duration::from_secs(5)));
    let grid = policy
        .call("fetch worksheet", || {
            client.fetch_range(&survey, "Run 1", "A1", "Z128")
        })
        .await
        .unwrap();
    assert_eq!(grid.cell(0, 0), Some("CMDR Nova - DW3"));
}
