use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::persistence::{SurveyStore, SurveyTransaction};
use crate::survey::{Survey, SurveyPoint};

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseContext> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(&db_path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    run_migrations(&connection)?;

    info!(
        target: "database_bootstrap",
        path = %db_path.display(),
        "survey database ready"
    );
    Ok(DatabaseContext {
        connection,
        path: db_path,
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS surveys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            spreadsheet_id TEXT NOT NULL,
            worksheet TEXT NOT NULL,
            cmdr TEXT NOT NULL,
            project TEXT NOT NULL,
            source_hash TEXT NOT NULL UNIQUE,
            imported_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );

        CREATE TABLE IF NOT EXISTS survey_points (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            survey_id INTEGER NOT NULL,
            sysname TEXT NOT NULL,
            zsample INTEGER NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL,
            syscount INTEGER NOT NULL,
            maxdistance REAL NOT NULL,
            FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_survey_points_survey ON survey_points(survey_id);
        CREATE INDEX IF NOT EXISTS idx_surveys_sheet ON surveys(spreadsheet_id, worksheet);
        "#,
    )?;

    ensure_column(connection, "surveys", "variant TEXT NOT NULL DEFAULT ''")?;
    Ok(())
}

fn ensure_column(connection: &Connection, table: &str, definition: &str) -> AppResult<()> {
    let column_name = definition
        .split_whitespace()
        .next()
        .ok_or_else(|| AppError::Config(format!("invalid column definition: {definition}")))?;
    if column_exists(connection, table, column_name)? {
        return Ok(());
    }
    let sql = format!("ALTER TABLE {table} ADD COLUMN {definition}");
    connection.execute(&sql, [])?;
    Ok(())
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({table})");
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// [`SurveyStore`] backed by a SQLite connection.
pub struct SqliteSurveyStore {
    connection: Connection,
}

impl SqliteSurveyStore {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl From<DatabaseContext> for SqliteSurveyStore {
    fn from(context: DatabaseContext) -> Self {
        Self::new(context.connection)
    }
}

pub struct SqliteSurveyTransaction<'a> {
    tx: Transaction<'a>,
}

impl SurveyStore for SqliteSurveyStore {
    type Transaction<'a> = SqliteSurveyTransaction<'a> where Self: 'a;

    fn begin_survey_transaction(&mut self) -> AppResult<SqliteSurveyTransaction<'_>> {
        Ok(SqliteSurveyTransaction {
            tx: self.connection.transaction()?,
        })
    }
}

impl SurveyTransaction for SqliteSurveyTransaction<'_> {
    fn find_survey(&mut self, source_hash: &str) -> AppResult<Option<i64>> {
        self.tx
            .query_row(
                "SELECT id FROM surveys WHERE source_hash = ?1",
                [source_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::from)
    }

    fn create_survey_header(&mut self, survey: &Survey, source_hash: &str) -> AppResult<i64> {
        self.tx.execute(
            "INSERT INTO surveys (spreadsheet_id, worksheet, cmdr, project, variant, source_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                survey.spreadsheet_id.as_str(),
                survey.worksheet,
                survey.cmdr,
                survey.project,
                survey.variant,
                source_hash
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn insert_point(&mut self, survey_id: i64, point: &SurveyPoint) -> AppResult<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO survey_points (survey_id, sysname, zsample, x, y, z, syscount, maxdistance)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            survey_id,
            point.system_name,
            point.z_sample,
            point.x,
            point.y,
            point.z,
            point.system_count,
            point.max_distance
        ])?;
        Ok(())
    }

    fn commit(self) -> AppResult<()> {
        // A failed COMMIT leaves the transaction open; dropping it rolls back.
        self.tx.commit().map_err(AppError::from)
    }

    fn rollback(self) {
        if let Err(err) = self.tx.rollback() {
            warn!(target: "database", error = %err, "survey rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::extract_spreadsheet_id;
    use crate::persistence::{write_survey, PersistOutcome};
    use tempfile::tempdir;

    fn survey(worksheet: &str) -> Survey {
        let mut point = SurveyPoint::new("Sol".into(), 0, 12, 19.5);
        point.y = 3.0;
        Survey {
            spreadsheet_id: extract_spreadsheet_id("SSSSSSSSSSSSSSSSSSSSSSSSSSSS").unwrap(),
            worksheet: worksheet.into(),
            variant: "DW3".into(),
            cmdr: "CMDR Nova".into(),
            project: "DW3".into(),
            points: vec![point, SurveyPoint::new("Lave".into(), 50, 7, 20.0)],
        }
    }

    fn count(connection: &Connection, table: &str) -> i64 {
        connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn runs_migrations_and_creates_tables() {
        let dir = tempdir().unwrap();
        let ctx = bootstrap(dir.path(), "test.db").unwrap();

        let mut stmt = ctx
            .connection
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('surveys','survey_points')",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .count();
        assert_eq!(rows, 2);
        assert!(ctx.path.ends_with("test.db"));
        assert!(column_exists(&ctx.connection, "surveys", "variant").unwrap());
    }

    #[test]
    fn migrations_are_repeatable() {
        let dir = tempdir().unwrap();
        drop(bootstrap(dir.path(), "again.db").unwrap());
        let ctx = bootstrap(dir.path(), "again.db").unwrap();
        assert_eq!(count(&ctx.connection, "surveys"), 0);
    }

    #[test]
    fn persists_survey_with_points() {
        let dir = tempdir().unwrap();
        let mut store = SqliteSurveyStore::from(bootstrap(dir.path(), "surveys.db").unwrap());

        let outcome = write_survey(&mut store, &survey("Run 1")).unwrap();
        let PersistOutcome::Inserted { survey_id, points } = outcome else {
            panic!("expected insert, got {outcome:?}");
        };
        assert_eq!(points, 2);

        let (cmdr, variant): (String, String) = store
            .connection()
            .query_row(
                "SELECT cmdr, variant FROM surveys WHERE id = ?1",
                [survey_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(cmdr, "CMDR Nova");
        assert_eq!(variant, "DW3");

        let y: f64 = store
            .connection()
            .query_row(
                "SELECT y FROM survey_points WHERE survey_id = ?1 AND sysname = 'Sol'",
                [survey_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(y, 3.0);
        assert_eq!(count(store.connection(), "survey_points"), 2);
    }

    #[test]
    fn duplicate_survey_is_skipped() {
        let dir = tempdir().unwrap();
        let mut store = SqliteSurveyStore::from(bootstrap(dir.path(), "dupes.db").unwrap());

        write_survey(&mut store, &survey("Run 1")).unwrap();
        let second = write_survey(&mut store, &survey("Run 1")).unwrap();

        assert!(matches!(second, PersistOutcome::Duplicate { .. }));
        assert_eq!(count(store.connection(), "surveys"), 1);
        assert_eq!(count(store.connection(), "survey_points"), 2);
    }

    #[test]
    fn rollback_discards_partial_survey() {
        let dir = tempdir().unwrap();
        let mut store = SqliteSurveyStore::from(bootstrap(dir.path(), "rollback.db").unwrap());

        let mut tx = store.begin_survey_transaction().unwrap();
        let id = tx.create_survey_header(&survey("Run 1"), "hash").unwrap();
        tx.insert_point(id, &SurveyPoint::new("Sol".into(), 0, 1, 20.0))
            .unwrap();
        tx.rollback();

        assert_eq!(count(store.connection(), "surveys"), 0);
        assert_eq!(count(store.connection(), "survey_points"), 0);
    }
}
