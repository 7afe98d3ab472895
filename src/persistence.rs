use serde::Serialize;
use tracing::{info, warn};

use crate::errors::AppResult;
use crate::survey::{Survey, SurveyPoint};

/// Storage able to hold surveys, one transaction per survey.
pub trait SurveyStore {
    type Transaction<'a>: SurveyTransaction
    where
        Self: 'a;

    fn begin_survey_transaction(&mut self) -> AppResult<Self::Transaction<'_>>;
}

pub trait SurveyTransaction {
    /// Id of an already stored survey with the same content hash.
    fn find_survey(&mut self, source_hash: &str) -> AppResult<Option<i64>>;

    fn create_survey_header(&mut self, survey: &Survey, source_hash: &str) -> AppResult<i64>;

    fn insert_point(&mut self, survey_id: i64, point: &SurveyPoint) -> AppResult<()>;

    /// Implementations must leave nothing behind when the commit fails.
    fn commit(self) -> AppResult<()>;

    fn rollback(self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PersistOutcome {
    Inserted { survey_id: i64, points: usize },
    Duplicate { survey_id: i64 },
}

/// Writes the survey header and all its points atomically. A survey whose
/// content hash is already stored is left alone.
pub fn write_survey<S: SurveyStore>(store: &mut S, survey: &Survey) -> AppResult<PersistOutcome> {
    let source_hash = survey.source_hash();
    let mut tx = store.begin_survey_transaction()?;

    match stage_survey(&mut tx, survey, &source_hash) {
        Ok(PersistOutcome::Duplicate { survey_id }) => {
            tx.rollback();
            info!(
                spreadsheet = %survey.spreadsheet_id,
                worksheet = %survey.worksheet,
                survey_id,
                "survey already stored"
            );
            Ok(PersistOutcome::Duplicate { survey_id })
        }
        Ok(inserted) => {
            tx.commit()?;
            info!(
                spreadsheet = %survey.spreadsheet_id,
                worksheet = %survey.worksheet,
                cmdr = %survey.cmdr,
                points = survey.points.len(),
                "survey persisted"
            );
            Ok(inserted)
        }
        Err(err) => {
            warn!(
                spreadsheet = %survey.spreadsheet_id,
                worksheet = %survey.worksheet,
                %err,
                "rolling back survey"
            );
            tx.rollback();
            Err(err)
        }
    }
}

fn stage_survey<T: SurveyTransaction>(
    tx: &mut T,
    survey: &Survey,
    source_hash: &str,
) -> AppResult<PersistOutcome> {
    if let Some(survey_id) = tx.find_survey(source_hash)? {
        return Ok(PersistOutcome::Duplicate { survey_id });
    }
    let survey_id = tx.create_survey_header(survey, source_hash)?;
    for point in &survey.points {
        tx.insert_point(survey_id, point)?;
    }
    Ok(PersistOutcome::Inserted {
        survey_id,
        points: survey.points.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::identifier::extract_spreadsheet_id;

    #[derive(Default)]
    struct RecordingStore {
        committed: Vec<(String, Vec<String>)>,
        rollbacks: usize,
        fail_on_point: Option<String>,
        fail_commit: bool,
    }

    struct RecordingTx<'a> {
        store: &'a mut RecordingStore,
        header: Option<String>,
        points: Vec<String>,
    }

    impl SurveyStore for RecordingStore {
        type Transaction<'a> = RecordingTx<'a> where Self: 'a;

        fn begin_survey_transaction(&mut self) -> AppResult<RecordingTx<'_>> {
            Ok(RecordingTx {
                store: self,
                header: None,
                points: Vec::new(),
            })
        }
    }

    impl SurveyTransaction for RecordingTx<'_> {
        fn find_survey(&mut self, source_hash: &str) -> AppResult<Option<i64>> {
            Ok(self
                .store
                .committed
                .iter()
                .position(|(hash, _)| hash == source_hash)
                .map(|idx| idx as i64 + 1))
        }

        fn create_survey_header(&mut self, _: &Survey, source_hash: &str) -> AppResult<i64> {
            self.header = Some(source_hash.to_string());
            Ok(self.store.committed.len() as i64 + 1)
        }

        fn insert_point(&mut self, _: i64, point: &SurveyPoint) -> AppResult<()> {
            if self.store.fail_on_point.as_deref() == Some(point.system_name.as_str()) {
                return Err(AppError::Config("insert failed".into()));
            }
            self.points.push(point.system_name.clone());
            Ok(())
        }

        fn commit(self) -> AppResult<()> {
            if self.store.fail_commit {
                self.store.rollbacks += 1;
                return Err(AppError::Config("commit failed".into()));
            }
            let header = self.header.unwrap_or_default();
            self.store.committed.push((header, self.points));
            Ok(())
        }

        fn rollback(self) {
            self.store.rollbacks += 1;
        }
    }

    fn survey(worksheet: &str, names: &[&str]) -> Survey {
        Survey {
            spreadsheet_id: extract_spreadsheet_id("SSSSSSSSSSSSSSSSSSSSSSSSSSSS").unwrap(),
            worksheet: worksheet.into(),
            variant: "DW3".into(),
            cmdr: "CMDR Nova".into(),
            project: "DW3".into(),
            points: names
                .iter()
                .map(|name| SurveyPoint::new(name.to_string(), 0, 1, 20.0))
                .collect(),
        }
    }

    #[test]
    fn commits_header_and_points_together() {
        let mut store = RecordingStore::default();
        let outcome = write_survey(&mut store, &survey("Run 1", &["Sol", "Lave"])).unwrap();

        assert_eq!(
            outcome,
            PersistOutcome::Inserted {
                survey_id: 1,
                points: 2
            }
        );
        assert_eq!(store.committed.len(), 1);
        assert_eq!(store.committed[0].1, vec!["Sol".to_string(), "Lave".to_string()]);
        assert_eq!(store.rollbacks, 0);
    }

    #[test]
    fn failed_point_rolls_back_only_that_survey() {
        let mut store = RecordingStore::default();
        write_survey(&mut store, &survey("Run 1", &["Sol"])).unwrap();

        store.fail_on_point = Some("Lave".into());
        let result = write_survey(&mut store, &survey("Run 2", &["Diso", "Lave"]));

        assert!(result.is_err());
        assert_eq!(store.committed.len(), 1);
        assert_eq!(store.rollbacks, 1);
    }

    #[test]
    fn failed_commit_is_an_error() {
        let mut store = RecordingStore {
            fail_commit: true,
            ..RecordingStore::default()
        };
        let result = write_survey(&mut store, &survey("Run 1", &["Sol"]));
        assert!(result.is_err());
        assert!(store.committed.is_empty());
    }

    #[test]
    fn identical_survey_is_not_stored_twice() {
        let mut store = RecordingStore::default();
        write_survey(&mut store, &survey("Run 1", &["Sol"])).unwrap();
        let outcome = write_survey(&mut store, &survey("Run 1", &["Sol"])).unwrap();

        assert_eq!(outcome, PersistOutcome::Duplicate { survey_id: 1 });
        assert_eq!(store.committed.len(), 1);
        assert_eq!(store.rollbacks, 1);
    }
}
