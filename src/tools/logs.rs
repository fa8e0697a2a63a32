use serde_json::{json, Value};

use super::{api_error, data_of, merge, upstream_error};
use crate::client::AstrBotClient;

pub const DEFAULT_MAX_EVENTS: usize = 200;

/// Log history, or a live window of `wait_seconds` over `/api/live-log`.
pub async fn get_astrbot_logs(
    client: &AstrBotClient,
    wait_seconds: u64,
    max_events: usize,
) -> Value {
    if wait_seconds > 0 {
        return match client.get_live_logs(wait_seconds, Some(max_events.max(1))).await {
            Ok(events) => json!({
                "mode": "live",
                "wait_seconds": wait_seconds,
                "events": events,
            }),
            Err(e) => json!({
                "mode": "live",
                "wait_seconds": wait_seconds,
                "status": "error",
                "message": e.to_string(),
            }),
        };
    }

    let history = match client.get_log_history().await {
        Ok(history) => history,
        Err(e) => return merge(json!({ "mode": "history" }), Value::Object(api_error(client, &e))),
    };
    if let Some(err) = upstream_error(&history) {
        return merge(json!({ "mode": "history" }), err);
    }
    json!({
        "mode": "history",
        "logs": data_of(&history).get("logs").cloned().unwrap_or_else(|| json!([])),
    })
}
