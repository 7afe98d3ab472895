use serde::Serialize;
use tracing::{debug, warn};

use crate::edsm::{SystemLookup, SystemRecord};
use crate::errors::AppResult;
use crate::retry::RemotePolicy;
use crate::survey::Survey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationReport {
    pub matched: usize,
    pub unmatched: usize,
}

/// Copies looked-up coordinates onto every point with the same name.
/// EDSM's y and z axes are swapped relative to the survey convention.
pub fn apply_coordinates(survey: &mut Survey, records: &[SystemRecord]) -> CorrelationReport {
    let mut report = CorrelationReport::default();
    for point in &mut survey.points {
        match records
            .iter()
            .find(|record| record.name == point.system_name)
        {
            Some(record) => {
                point.x = record.coords.x;
                point.y = record.coords.z;
                point.z = record.coords.y;
                report.matched += 1;
            }
            None => report.unmatched += 1,
        }
    }
    report
}

/// Enriches every point of `survey` with one bulk lookup. Points the lookup
/// does not know keep zero coordinates and are counted as unmatched.
pub async fn correlate_survey(
    lookup: &dyn SystemLookup,
    policy: &RemotePolicy,
    survey: &mut Survey,
) -> AppResult<CorrelationReport> {
    let names: Vec<String> = survey
        .points
        .iter()
        .map(|point| point.system_name.clone())
        .collect();
    let records = policy
        .call("system lookup", || lookup.lookup_systems(&names))
        .await?;

    let report = apply_coordinates(survey, &records);
    if report.unmatched > 0 {
        warn!(
            worksheet = %survey.worksheet,
            unmatched = report.unmatched,
            "some systems are unknown to EDSM; coordinates left at zero"
        );
    } else {
        debug!(worksheet = %survey.worksheet, matched = report.matched, "survey correlated");
    }
    Ok(report)
}
