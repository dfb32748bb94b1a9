//! Progress Store (C7): idempotent counter flushes for one extraction job
//! (§4.7). Writes are update-by-id; reads are by `extraction_id`.

use anyhow::Result;
use sqlx::PgPool;

/// Counters accumulated by the Coordinator since its last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlushDelta {
    pub completed: i32,
    pub invalid: i32,
    pub captcha: i32,
    pub timeout: i32,
    pub reattempts: i32,
    pub elapsed_secs: i32,
}

/// Apply a flush within one transaction: add the batch deltas to the job
/// row's counters, recompute `progress`, and set `completed` (§3's
/// invariant: `completed` iff `progress == 100.00`).
pub async fn flush(pool: &PgPool, extraction_id: i32, delta: FlushDelta) -> Result<()> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (i32, i32)>(
        "SELECT num_completed, total_usns FROM extraction_jobs WHERE id = $1 FOR UPDATE",
    )
    .bind(extraction_id)
    .fetch_one(&mut *tx)
    .await?;

    let (num_completed, total_usns) = row;
    let new_completed = num_completed + delta.completed;
    let progress = if total_usns > 0 {
        ((new_completed as f64 / total_usns as f64) * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    };
    let completed = progress >= 100.0;

    sqlx::query(
        "UPDATE extraction_jobs SET \
            num_completed = num_completed + $2, \
            num_invalid = num_invalid + $3, \
            num_captcha = num_captcha + $4, \
            num_timeout = num_timeout + $5, \
            reattempts = reattempts + $6, \
            time_taken = time_taken + $7, \
            progress = $8, \
            completed = $9 \
         WHERE id = $1",
    )
    .bind(extraction_id)
    .bind(delta.completed)
    .bind(delta.invalid)
    .bind(delta.captcha)
    .bind(delta.timeout)
    .bind(delta.reattempts)
    .bind(delta.elapsed_secs)
    .bind(progress)
    .bind(completed)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Mark a job as terminated by cancellation or unrecoverable failure.
pub async fn mark_failed(pool: &PgPool, extraction_id: i32) -> Result<()> {
    sqlx::query("UPDATE extraction_jobs SET failed = TRUE WHERE id = $1")
        .bind(extraction_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Append the accumulated USN lists to the job's `InvalidRecord` child row
/// (§4.6 step 6). Lists are comma-delimited; empty lists write an empty string.
pub async fn append_invalid_record(
    pool: &PgPool,
    extraction_id: i32,
    invalid_usns: &[String],
    captcha_usns: &[String],
    timeout_usns: &[String],
) -> Result<()> {
    sqlx::query(
        "UPDATE invalid_records SET \
            invalid_usns = invalid_usns || CASE WHEN invalid_usns = '' OR $2 = '' THEN '' ELSE ',' END || $2, \
            captcha_usns = captcha_usns || CASE WHEN captcha_usns = '' OR $3 = '' THEN '' ELSE ',' END || $3, \
            timeout_usns = timeout_usns || CASE WHEN timeout_usns = '' OR $4 = '' THEN '' ELSE ',' END || $4 \
         WHERE extraction_id = $1",
    )
    .bind(extraction_id)
    .bind(invalid_usns.join(","))
    .bind(captcha_usns.join(","))
    .bind(timeout_usns.join(","))
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_to_two_decimal_places() {
        let num_completed = 1;
        let total = 3;
        let progress = ((num_completed as f64 / total as f64) * 100.0 * 100.0).round() / 100.0;
        assert_eq!(progress, 33.33);
    }

    #[test]
    fn flush_delta_defaults_to_zero() {
        let d = FlushDelta::default();
        assert_eq!(d.completed, 0);
        assert_eq!(d.reattempts, 0);
    }
}
