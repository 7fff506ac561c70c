use std::collections::BTreeSet;

use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::approval::ApprovalId;
use parley_core::domain::conversation::ConversationId;
use parley_core::domain::feedback::{EditDiff, EditType, FeedbackId, FeedbackLabel, FeedbackRecord};

use super::{
    decode_json, encode_json, format_timestamp, parse_timestamp, FeedbackRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn append(&self, record: FeedbackRecord) -> Result<(), RepositoryError> {
        let labels: Vec<&str> = record.labels.iter().map(FeedbackLabel::as_str).collect();
        let labels_json = encode_json("labels_json", &labels)?;

        sqlx::query(
            "INSERT INTO feedback_record (
                id,
                conversation_id,
                approval_id,
                input_text,
                model_draft,
                final_text,
                labels_json,
                edit_distance,
                edit_ratio,
                edit_type,
                recorded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(record.conversation_id.0)
        .bind(record.approval_id.as_ref().map(|id| id.0.as_str()))
        .bind(&record.input_text)
        .bind(record.model_draft.as_deref())
        .bind(record.final_text.as_deref())
        .bind(labels_json)
        .bind(record.edit_diff.as_ref().map(|diff| i64::try_from(diff.distance).unwrap_or(i64::MAX)))
        .bind(record.edit_diff.as_ref().map(|diff| diff.ratio))
        .bind(record.edit_diff.as_ref().map(|diff| diff.edit_type.as_str()))
        .bind(format_timestamp(record.recorded_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<FeedbackRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                conversation_id,
                approval_id,
                input_text,
                model_draft,
                final_text,
                labels_json,
                edit_distance,
                edit_ratio,
                edit_type,
                recorded_at
             FROM feedback_record
             WHERE conversation_id = ?
             ORDER BY recorded_at ASC, id ASC",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn parse_edit_type(value: &str) -> Option<EditType> {
    [EditType::Minor, EditType::Moderate, EditType::Major, EditType::CompleteRewrite]
        .into_iter()
        .find(|edit_type| edit_type.as_str() == value)
}

fn record_from_row(row: SqliteRow) -> Result<FeedbackRecord, RepositoryError> {
    let raw_labels: Vec<String> =
        decode_json("labels_json", &row.try_get::<String, _>("labels_json")?)?;
    let labels = raw_labels
        .iter()
        .map(|label| {
            FeedbackLabel::parse(label)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown feedback label `{label}`")))
        })
        .collect::<Result<BTreeSet<_>, _>>()?;

    let edit_diff = match (
        row.try_get::<Option<i64>, _>("edit_distance")?,
        row.try_get::<Option<f64>, _>("edit_ratio")?,
        row.try_get::<Option<String>, _>("edit_type")?,
    ) {
        (Some(distance), Some(ratio), Some(edit_type)) => Some(EditDiff {
            distance: usize::try_from(distance).map_err(|_| {
                RepositoryError::Decode(format!("invalid edit distance {distance}"))
            })?,
            ratio,
            edit_type: parse_edit_type(&edit_type).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown edit type `{edit_type}`"))
            })?,
        }),
        _ => None,
    };

    Ok(FeedbackRecord {
        id: FeedbackId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        approval_id: row.try_get::<Option<String>, _>("approval_id")?.map(ApprovalId),
        input_text: row.try_get("input_text")?,
        model_draft: row.try_get("model_draft")?,
        final_text: row.try_get("final_text")?,
        labels,
        edit_diff,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}
