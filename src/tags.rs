use sqlx::{Postgres, Transaction};

use crate::friendly_id;
use crate::models::TagRecord;

/// Maximum number of tags a single run may carry.
pub const MAX_TAGS_PER_RUN: usize = 8;

/// Get-or-create a project-scoped tag by name.
///
/// The no-op `DO UPDATE` makes `RETURNING` yield the existing row on
/// conflict, so callers always get the tag id back.
pub(crate) async fn upsert_tag(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    project_id: &str,
) -> Result<TagRecord, sqlx::Error> {
    sqlx::query_as::<_, TagRecord>(
        r"
        INSERT INTO task_run_tags (id, name, project_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (project_id, name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id, name, project_id
        ",
    )
    .bind(friendly_id::generate_id())
    .bind(name)
    .bind(project_id)
    .fetch_one(&mut **tx)
    .await
}
