use parley_db::{ApprovalRepository, SqlApprovalRepository};
use serde_json::{json, Value};

use crate::commands::{with_store, CommandResult};

pub fn run() -> CommandResult {
    let result = with_store("approvals", |pool| async move {
        SqlApprovalRepository::new(pool)
            .list_pending()
            .await
            .map_err(|error| ("store", error.to_string(), 6u8))
    });

    let runs = match result {
        Ok(runs) => runs,
        Err(failure) => return failure,
    };

    let rows: Vec<Value> = runs
        .iter()
        .map(|run| {
            let pending: Vec<Value> = run
                .unresolved()
                .map(|(index, interruption)| {
                    json!({
                        "index": index,
                        "toolName": interruption.tool_name,
                        "arguments": interruption.arguments,
                    })
                })
                .collect();
            json!({
                "approvalId": run.id.0,
                "conversationId": run.conversation_id.0,
                "createdAt": run.created_at.to_rfc3339(),
                "lastInput": run.last_input,
                "pending": pending,
            })
        })
        .collect();

    CommandResult::success_with(
        "approvals",
        format!("{} run(s) awaiting approval", rows.len()),
        Some(Value::Array(rows)),
    )
}

/// Completed approval chains whose reply could not be sent.
pub fn undelivered() -> CommandResult {
    let result = with_store("undelivered", |pool| async move {
        SqlApprovalRepository::new(pool)
            .list_undelivered()
            .await
            .map_err(|error| ("store", error.to_string(), 6u8))
    });

    let runs = match result {
        Ok(runs) => runs,
        Err(failure) => return failure,
    };

    let rows: Vec<Value> = runs
        .iter()
        .map(|run| {
            json!({
                "approvalId": run.id.0,
                "conversationId": run.conversation_id.0,
                "finalOutput": run.final_output,
                "updatedAt": run.updated_at.to_rfc3339(),
            })
        })
        .collect();

    CommandResult::success_with(
        "undelivered",
        format!("{} repl(ies) kept for re-send", rows.len()),
        Some(Value::Array(rows)),
    )
}
