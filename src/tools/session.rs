use serde_json::{json, Value};
use tracing::debug;

use super::{api_error, data_of, is_ok};
use crate::client::AstrBotClient;
use crate::logparse;

pub const DEFAULT_MAX_LOG_MESSAGES: usize = 100;

/// Chat history of a platform session.
///
/// `/api/chat/get_session` only knows WebChat sessions; for anything else the
/// conversation is rebuilt from the log history when `log_fallback` is set.
pub async fn get_platform_session_messages(
    client: &AstrBotClient,
    session_id: &str,
    log_fallback: bool,
    max_log_messages: usize,
) -> Value {
    let failure = match client.get_platform_session(session_id).await {
        Ok(result) if is_ok(&result) => {
            let data = data_of(&result);
            let history = data.get("history").cloned().unwrap_or_else(|| json!([]));
            let empty = history.as_array().map_or(true, Vec::is_empty);
            if !empty || !log_fallback {
                return json!({
                    "status": "ok",
                    "session_id": session_id,
                    "history": history,
                    "is_running": data.get("is_running").cloned().unwrap_or(Value::Bool(false)),
                });
            }
            json!({
                "status": "ok",
                "session_id": session_id,
                "history": history,
                "is_running": data.get("is_running").cloned().unwrap_or(Value::Bool(false)),
                "message": "WebChat history is empty",
            })
        }
        Ok(result) => json!({
            "status": result.get("status").cloned().unwrap_or_else(|| "error".into()),
            "message": result.get("message").cloned().unwrap_or(Value::Null),
            "raw": result,
        }),
        Err(e) => {
            let mut err = api_error(client, &e);
            err.insert("session_id".into(), session_id.into());
            Value::Object(err)
        }
    };

    if !log_fallback {
        return failure;
    }
    debug!("Falling back to log history for session {}", session_id);
    match from_logs(client, session_id, max_log_messages).await {
        Some(rebuilt) => rebuilt,
        None => failure,
    }
}

async fn from_logs(client: &AstrBotClient, session_id: &str, limit: usize) -> Option<Value> {
    let history = client.get_log_history().await.ok()?;
    if !is_ok(&history) {
        return None;
    }
    let logs = data_of(&history).get("logs")?.as_array()?;
    let messages = logparse::reconstruct(logs, session_id, limit.max(1));
    Some(json!({
        "status": "ok",
        "source": "log_history",
        "session_id": session_id,
        "history": messages,
        "is_running": false,
        "note": "Reconstructed from AstrBot log lines; message ids and media are not available.",
    }))
}
