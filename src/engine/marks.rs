//! Marks Normalizer (C5): grade assignment, SGPA, and reconciliation against
//! the domain store (§4.5).

use anyhow::Result;
use tracing::{debug, warn};

use crate::domain::{DomainStore, Grade, MarkResult, StudentRecord};
use crate::error::EngineError;

/// Deterministic grade assignment from `(result, total)`. `W` (withheld) is
/// not produced by the portal itself; it only appears as a stored sentinel
/// for incomplete rows, so it grades the same as a fail.
pub fn grade_for(result: MarkResult, total: i32) -> Grade {
    match result {
        MarkResult::F | MarkResult::W => Grade::FAIL,
        MarkResult::A => Grade::ABSENT,
        MarkResult::P => {
            if total >= 75 {
                Grade::FCD
            } else if total >= 60 {
                Grade::FC
            } else {
                Grade::SC
            }
        }
    }
}

fn grade_point(total: i32) -> i32 {
    if total >= 90 {
        10
    } else if total >= 80 {
        9
    } else if total >= 70 {
        8
    } else if total >= 60 {
        7
    } else if total >= 50 {
        6
    } else if total >= 40 {
        5
    } else {
        0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot compute SGPA: total credits is zero")]
pub struct NoCredits;

/// SGPA = sum(gp * credits) / sum(credits), per-subject `gp` from the §4.5
/// step function. Not used by the engine itself; downstream reporting only.
pub fn sgpa(totals_and_credits: &[(i32, i32)]) -> Result<f64, NoCredits> {
    let total_credits: i32 = totals_and_credits.iter().map(|(_, c)| c).sum();
    if total_credits == 0 {
        return Err(NoCredits);
    }
    let numerator: i32 = totals_and_credits
        .iter()
        .map(|(total, credits)| grade_point(*total) * credits)
        .sum();
    Ok(numerator as f64 / total_credits as f64)
}

/// Reconcile one scraped [`StudentRecord`] against the stored student and
/// subject rows for this job's semester, writing marks as it goes.
///
/// Student mutations (name overwrite, reactivation) are applied before any
/// mark write, per §4.5's ordering.
pub async fn reconcile(
    store: &DomainStore,
    sem_id: i32,
    section_id: i32,
    stud_id: i32,
    stored_name: &str,
    stored_active: bool,
    record: &StudentRecord,
) -> Result<(), EngineError> {
    let trimmed = record.name.trim();
    if trimmed != stored_name.trim() || !stored_active {
        store
            .reactivate_and_rename(stud_id, trimmed)
            .await
            .map_err(EngineError::Database)?;
    }

    for mark in &record.marks {
        let subject_id = match store
            .subject_id_by_code(sem_id, &mark.sub_code)
            .await
            .map_err(EngineError::Database)?
        {
            Some(id) => id,
            None => {
                warn!(
                    sub_code = %mark.sub_code,
                    usn = %record.usn,
                    "no subject row for scraped code in this semester, skipping mark"
                );
                continue;
            }
        };

        let grade = grade_for(mark.result, mark.total);
        store
            .upsert_mark(
                stud_id,
                subject_id,
                section_id,
                mark.internal,
                mark.external,
                mark.total,
                mark.result,
                grade,
            )
            .await
            .map_err(EngineError::Database)?;
    }

    debug!(usn = %record.usn, marks = record.marks.len(), "reconciled student record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_boundaries_match_spec() {
        assert_eq!(grade_for(MarkResult::P, 75), Grade::FCD);
        assert_eq!(grade_for(MarkResult::P, 74), Grade::FC);
        assert_eq!(grade_for(MarkResult::P, 60), Grade::FC);
        assert_eq!(grade_for(MarkResult::P, 59), Grade::SC);
        assert_eq!(grade_for(MarkResult::F, 90), Grade::FAIL);
        assert_eq!(grade_for(MarkResult::A, 0), Grade::ABSENT);
    }

    #[test]
    fn sgpa_matches_worked_example() {
        let rows = [(95, 4), (82, 4), (71, 3), (65, 3), (55, 2), (42, 2)];
        let value = sgpa(&rows).unwrap();
        assert!((value - 7.944444).abs() < 1e-4);
    }

    #[test]
    fn sgpa_errors_on_zero_credits() {
        assert!(sgpa(&[(80, 0)]).is_err());
    }
}
