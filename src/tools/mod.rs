//! One async function per MCP tool
//!
//! Every tool returns a JSON object, never a Rust error: failures come back
//! as `{"status": "error", "message": ..}` with whatever context helps the
//! caller recover.

pub mod attachment;
pub mod config;
pub mod control;
pub mod conversation;
pub mod direct;
pub mod logs;
pub mod mcp_panel;
pub mod plugin;
pub mod plugin_market;
pub mod session;
pub mod webchat;

use serde_json::{json, Map, Value};

use crate::client::AstrBotClient;
use crate::error::ApiError;

pub const DEFAULT_LOG_TAIL: usize = 120;

pub const TOOL_NAMES: [&str; 16] = [
    "get_astrbot_logs",
    "get_message_platforms",
    "send_platform_message",
    "send_platform_message_direct",
    "restart_astrbot",
    "get_platform_session_messages",
    "browse_plugin_market",
    "list_astrbot_config_files",
    "inspect_astrbot_config",
    "apply_astrbot_config_ops",
    "search_astrbot_config_paths",
    "install_astrbot_plugin",
    "configure_astrbot_plugin_json",
    "manage_mcp_config_panel",
    "list_astrbot_conversations",
    "get_astrbot_conversation",
];

/// Body of the `astrbot://info` resource.
pub fn server_info() -> Value {
    json!({
        "name": "astrbot-mcp",
        "type": "tool-provider",
        "tools": TOOL_NAMES,
    })
}

/// `{status: error, message, base_url, detail}` for a failed AstrBot call.
pub fn api_error(client: &AstrBotClient, err: &ApiError) -> Map<String, Value> {
    let message = match err.status_code() {
        Some(code) => format!("AstrBot API error: HTTP {}", code),
        None if err.is_connect() => client.connect_hint(),
        None => format!("AstrBot API error: {}", err),
    };
    let mut out = Map::new();
    out.insert("status".into(), "error".into());
    out.insert("message".into(), message.into());
    out.insert("base_url".into(), client.base_url().into());
    out.insert("detail".into(), err.detail());
    out
}

/// Same as [`api_error`] but always leads with the connection hint; used by
/// the config and admin tools where a failure almost always means AstrBot is
/// unreachable or the login is wrong.
pub fn connect_error(client: &AstrBotClient, err: &ApiError) -> Map<String, Value> {
    let mut out = api_error(client, err);
    out.insert("message".into(), client.connect_hint().into());
    out
}

pub fn status_of(result: &Value) -> Option<&str> {
    result.get("status").and_then(Value::as_str)
}

pub fn is_ok(result: &Value) -> bool {
    status_of(result) == Some("ok")
}

/// `{status, message, raw}` when AstrBot answered with a non-ok envelope.
pub fn upstream_error(result: &Value) -> Option<Value> {
    if is_ok(result) {
        return None;
    }
    Some(json!({
        "status": result.get("status").cloned().unwrap_or_else(|| "error".into()),
        "message": result.get("message").cloned().unwrap_or(Value::Null),
        "raw": result,
    }))
}

/// The `data` member of an envelope, or null.
pub fn data_of(result: &Value) -> &Value {
    result.get("data").unwrap_or(&Value::Null)
}

pub fn error(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

/// Insert every member of `extra` into `base` (both must be objects).
pub fn merge(base: impl Into<Value>, extra: Value) -> Value {
    let mut base = match base.into() {
        Value::Object(map) => map,
        other => return other,
    };
    if let Value::Object(extra) = extra {
        base.extend(extra);
    }
    Value::Object(base)
}

/// Last `limit` entries of `/api/log-history`, attached to results so callers
/// can see what AstrBot logged around a failure.
pub async fn log_tail(client: &AstrBotClient, limit: usize) -> Value {
    let history = match client.get_log_history().await {
        Ok(history) => history,
        Err(e) => {
            let mut out = api_error(client, &e);
            out.remove("base_url");
            return Value::Object(out);
        }
    };
    if let Some(err) = upstream_error(&history) {
        return err;
    }
    let Some(logs) = data_of(&history).get("logs").and_then(Value::as_array) else {
        return json!({
            "status": "error",
            "message": "Unexpected /api/log-history response shape (logs is not a list).",
            "raw": history,
        });
    };
    let keep = limit.max(1);
    let start = logs.len().saturating_sub(keep);
    json!({ "status": "ok", "logs": &logs[start..] })
}

/// Configured message platforms (`data.platforms` of the platform list).
pub async fn platform_list(client: &AstrBotClient) -> Value {
    let result = match client.get_platform_list().await {
        Ok(result) => result,
        Err(e) => return Value::Object(api_error(client, &e)),
    };
    if let Some(err) = upstream_error(&result) {
        return err;
    }
    let platforms = data_of(&result)
        .get("platforms")
        .cloned()
        .unwrap_or_else(|| json!([]));
    json!({ "platforms": platforms })
}

/// Attach `astrbot_logs_tail` when requested.
pub async fn with_logs(
    client: &AstrBotClient,
    payload: Value,
    include_logs: bool,
    limit: usize,
) -> Value {
    if !include_logs {
        return payload;
    }
    let tail = log_tail(client, limit).await;
    merge(payload, json!({ "astrbot_logs_tail": tail }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_passthrough() {
        assert!(upstream_error(&json!({"status": "ok", "data": {}})).is_none());
        let err = upstream_error(&json!({"status": "error", "message": "nope"})).unwrap();
        assert_eq!(err["status"], json!("error"));
        assert_eq!(err["message"], json!("nope"));
        assert_eq!(err["raw"]["message"], json!("nope"));

        let err = upstream_error(&json!({"weird": true})).unwrap();
        assert_eq!(err["status"], json!("error"));
    }

    #[test]
    fn test_server_info_lists_every_tool() {
        let info = server_info();
        assert_eq!(info["name"], json!("astrbot-mcp"));
        assert_eq!(info["tools"].as_array().unwrap().len(), TOOL_NAMES.len());
    }

    #[test]
    fn test_merge() {
        let merged = merge(json!({"a": 1}), json!({"b": 2, "a": 3}));
        assert_eq!(merged, json!({"a": 3, "b": 2}));
    }

    #[test]
    fn test_api_error_uses_http_status() {
        let client = AstrBotClient::new(crate::config::Settings::new("http://127.0.0.1:1")).unwrap();
        let err = ApiError::Status {
            status: 404,
            detail: json!({"message": "missing"}),
        };
        let payload = api_error(&client, &err);
        assert_eq!(payload["message"], json!("AstrBot API error: HTTP 404"));
        assert_eq!(payload["detail"]["message"], json!("missing"));
        assert_eq!(payload["base_url"], json!("http://127.0.0.1:1"));

        let payload = connect_error(&client, &err);
        assert!(payload["message"].as_str().unwrap().starts_with("Cannot connect"));
    }
}
