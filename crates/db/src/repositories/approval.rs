use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::approval::{
    ApprovalId, InterruptionResolution, PendingInterruption, RunSnapshot, SuspendedRun,
    SuspendedRunStatus,
};
use parley_core::domain::conversation::ConversationId;

use super::{
    decode_json, encode_json, format_timestamp, parse_timestamp, ApprovalRepository,
    RepositoryError,
};
use crate::DbPool;

const RUN_COLUMNS: &str = "id,
                conversation_id,
                snapshot,
                interruptions_json,
                status,
                last_input,
                model_draft,
                prior_resolutions_json,
                final_output,
                created_at,
                updated_at";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn save(&self, run: SuspendedRun) -> Result<Vec<ApprovalId>, RepositoryError> {
        let interruptions_json = encode_json("interruptions_json", &run.interruptions)?;
        let prior_resolutions_json = encode_json("prior_resolutions_json", &run.prior_resolutions)?;

        let mut tx = self.pool.begin().await?;

        let mut superseded = Vec::new();
        if run.is_pending() {
            superseded = sqlx::query(
                "SELECT id
                 FROM suspended_run
                 WHERE conversation_id = ? AND status = 'pending' AND id != ?",
            )
            .bind(run.conversation_id.0)
            .bind(&run.id.0)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|row| row.try_get::<String, _>("id").map(ApprovalId))
            .collect::<Result<Vec<_>, _>>()?;

            sqlx::query(
                "UPDATE suspended_run
                 SET status = 'superseded', updated_at = ?
                 WHERE conversation_id = ? AND status = 'pending' AND id != ?",
            )
            .bind(format_timestamp(run.updated_at))
            .bind(run.conversation_id.0)
            .bind(&run.id.0)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO suspended_run (
                id,
                conversation_id,
                snapshot,
                interruptions_json,
                status,
                last_input,
                model_draft,
                prior_resolutions_json,
                final_output,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                snapshot = excluded.snapshot,
                interruptions_json = excluded.interruptions_json,
                status = excluded.status,
                last_input = excluded.last_input,
                model_draft = excluded.model_draft,
                prior_resolutions_json = excluded.prior_resolutions_json,
                final_output = excluded.final_output,
                updated_at = excluded.updated_at",
        )
        .bind(&run.id.0)
        .bind(run.conversation_id.0)
        .bind(&run.snapshot.0)
        .bind(interruptions_json)
        .bind(run.status.as_str())
        .bind(&run.last_input)
        .bind(run.model_draft.as_deref())
        .bind(prior_resolutions_json)
        .bind(run.final_output.as_deref())
        .bind(format_timestamp(run.created_at))
        .bind(format_timestamp(run.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(superseded)
    }

    async fn load(&self, id: &ApprovalId) -> Result<Option<SuspendedRun>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT
                {RUN_COLUMNS}
             FROM suspended_run
             WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(run_from_row).transpose()
    }

    async fn find_pending_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<SuspendedRun>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT
                {RUN_COLUMNS}
             FROM suspended_run
             WHERE conversation_id = ? AND status = 'pending'"
        ))
        .bind(conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(run_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<SuspendedRun>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {RUN_COLUMNS}
             FROM suspended_run
             WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }

    async fn list_undelivered(&self) -> Result<Vec<SuspendedRun>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {RUN_COLUMNS}
             FROM suspended_run
             WHERE status = 'undelivered'
             ORDER BY updated_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }
}

fn run_from_row(row: SqliteRow) -> Result<SuspendedRun, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = SuspendedRunStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown suspended run status `{status_raw}`"))
    })?;
    let interruptions: Vec<PendingInterruption> =
        decode_json("interruptions_json", &row.try_get::<String, _>("interruptions_json")?)?;
    let prior_resolutions: Vec<InterruptionResolution> = decode_json(
        "prior_resolutions_json",
        &row.try_get::<String, _>("prior_resolutions_json")?,
    )?;

    Ok(SuspendedRun {
        id: ApprovalId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        snapshot: RunSnapshot(row.try_get("snapshot")?),
        interruptions,
        status,
        last_input: row.try_get("last_input")?,
        model_draft: row.try_get("model_draft")?,
        prior_resolutions,
        final_output: row.try_get("final_output")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
