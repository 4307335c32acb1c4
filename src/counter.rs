//! Per-key monotonic counters assigned inside the caller's transaction.
//!
//! Concurrent callers sharing a key serialize on the counter row: the
//! increment takes a row-level lock, so two transactions observe strictly
//! different, consecutive numbers, committed in lock order. Counters for
//! different keys proceed independently.

use futures_util::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};

use crate::errors::TriggerError;

/// Counter key for run numbers of a `(environment, task)` pair.
pub fn run_counter_key(environment_id: &str, task_identifier: &str) -> String {
    format!("v3-run:{environment_id}:{task_identifier}")
}

/// Increment the counter under `counter_key` and run `work` with the new
/// number, committing both atomically.
///
/// When the counter row does not exist yet, `derive_initial` is called
/// inside the same transaction to produce the seed value the first number
/// is built on; a concurrent first use is resolved by the upsert, which
/// falls back to incrementing whichever row won.
///
/// An error from `work` rolls the whole transaction back, counter bump
/// included.
pub async fn increment_in_transaction<T, D, F>(
    pool: &PgPool,
    counter_key: &str,
    derive_initial: D,
    work: F,
) -> Result<T, TriggerError>
where
    D: for<'t> FnOnce(
        &'t mut Transaction<'static, Postgres>,
    ) -> BoxFuture<'t, Result<i32, TriggerError>>,
    F: for<'t> FnOnce(
        i32,
        &'t mut Transaction<'static, Postgres>,
    ) -> BoxFuture<'t, Result<T, TriggerError>>,
{
    let mut tx = pool.begin().await?;

    let incremented = sqlx::query_scalar::<_, i32>(
        r"
        UPDATE task_run_number_counters
        SET last_number = last_number + 1
        WHERE counter_key = $1
        RETURNING last_number
        ",
    )
    .bind(counter_key)
    .fetch_optional(&mut *tx)
    .await?;

    let number = match incremented {
        Some(number) => number,
        None => {
            let seed = derive_initial(&mut tx).await?;
            sqlx::query_scalar::<_, i32>(
                r"
                INSERT INTO task_run_number_counters (counter_key, last_number)
                VALUES ($1, $2 + 1)
                ON CONFLICT (counter_key)
                DO UPDATE SET last_number = task_run_number_counters.last_number + 1
                RETURNING last_number
                ",
            )
            .bind(counter_key)
            .bind(seed)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    let value = work(number, &mut tx).await?;
    tx.commit().await?;
    Ok(value)
}
