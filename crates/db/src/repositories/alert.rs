use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::conversation::ConversationId;
use parley_core::domain::escalation::{
    Assignee, EscalationStats, EscalationTrigger, HumanAlert, HumanAlertId, Priority, Severity,
};
use parley_core::domain::webhook::EventId;

use super::{
    decode_json, encode_json, format_timestamp, parse_timestamp, HumanAlertRepository,
    RepositoryError,
};
use crate::DbPool;

const ALERT_COLUMNS: &str = "id,
                conversation_id,
                event_id,
                priority,
                severity,
                triggers_json,
                reason,
                assignee,
                recommended_action,
                confidence,
                created_at";

pub struct SqlHumanAlertRepository {
    pool: DbPool,
}

impl SqlHumanAlertRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HumanAlertRepository for SqlHumanAlertRepository {
    async fn record(&self, alert: HumanAlert) -> Result<bool, RepositoryError> {
        let triggers: Vec<&str> = alert.triggers.iter().map(EscalationTrigger::as_str).collect();
        let triggers_json = encode_json("triggers_json", &triggers)?;

        let inserted = sqlx::query(
            "INSERT INTO human_alert (
                id,
                conversation_id,
                event_id,
                priority,
                severity,
                triggers_json,
                reason,
                assignee,
                recommended_action,
                confidence,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(&alert.id.0)
        .bind(alert.conversation_id.0)
        .bind(&alert.event_id.0)
        .bind(alert.priority.as_str())
        .bind(alert.severity.as_str())
        .bind(triggers_json)
        .bind(&alert.reason)
        .bind(alert.assignee.as_str())
        .bind(&alert.recommended_action)
        .bind(alert.confidence)
        .bind(format_timestamp(alert.created_at))
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<HumanAlert>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {ALERT_COLUMNS}
             FROM human_alert
             WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(alert_from_row).collect()
    }

    async fn stats(&self) -> Result<EscalationStats, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT
                {ALERT_COLUMNS}
             FROM human_alert"
        ))
        .fetch_all(&self.pool)
        .await?;

        let alerts = rows.into_iter().map(alert_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(EscalationStats::from_alerts(&alerts))
    }
}

fn alert_from_row(row: SqliteRow) -> Result<HumanAlert, RepositoryError> {
    let priority_raw = row.try_get::<String, _>("priority")?;
    let severity_raw = row.try_get::<String, _>("severity")?;
    let assignee_raw = row.try_get::<String, _>("assignee")?;
    let raw_triggers: Vec<String> =
        decode_json("triggers_json", &row.try_get::<String, _>("triggers_json")?)?;
    let triggers = raw_triggers
        .iter()
        .map(|trigger| {
            EscalationTrigger::parse(trigger)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown trigger `{trigger}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HumanAlert {
        id: HumanAlertId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        event_id: EventId(row.try_get("event_id")?),
        priority: Priority::parse(&priority_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?,
        severity: Severity::parse(&severity_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown severity `{severity_raw}`")))?,
        triggers,
        reason: row.try_get("reason")?,
        assignee: Assignee::parse(&assignee_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown assignee `{assignee_raw}`")))?,
        recommended_action: row.try_get("recommended_action")?,
        confidence: row.try_get("confidence")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
