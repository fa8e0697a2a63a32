use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{connect_error, error, is_ok, merge, with_logs};
use crate::client::AstrBotClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
#[serde(rename_all = "lowercase")]
pub enum PanelAction {
    #[default]
    List,
    Add,
    Update,
    Delete,
    Test,
}

impl PanelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Test => "test",
        }
    }
}

pub struct PanelRequest<'a> {
    pub action: PanelAction,
    pub name: Option<&'a str>,
    pub server_config: Option<&'a Map<String, Value>>,
    pub active: Option<bool>,
    pub include_logs: bool,
    pub log_tail_limit: usize,
}

/// Drive AstrBot's own MCP server panel (`/api/tools/mcp/*`).
pub async fn manage_mcp_config_panel(client: &AstrBotClient, req: &PanelRequest<'_>) -> Value {
    let action = req.action.as_str();
    let name = req.name.map(str::trim).filter(|n| !n.is_empty());
    let server_config = req.server_config.filter(|c| !c.is_empty());
    let require_name = || name.ok_or_else(|| error(format!("name is required for action='{}'.", action)));
    let require_config =
        || server_config.ok_or_else(|| error(format!("server_config is required for action='{}'.", action)));

    let result = match req.action {
        PanelAction::List => client.get_mcp_servers().await,
        PanelAction::Add => {
            let name = match require_name() {
                Ok(name) => name,
                Err(err) => return err,
            };
            let config = match require_config() {
                Ok(config) => config,
                Err(err) => return err,
            };
            let mut payload = Map::new();
            payload.insert("name".into(), name.into());
            payload.extend(config.clone());
            if let Some(active) = req.active {
                payload.insert("active".into(), active.into());
            }
            client.add_mcp_server(&Value::Object(payload)).await
        }
        PanelAction::Update => {
            let name = match require_name() {
                Ok(name) => name,
                Err(err) => return err,
            };
            let mut payload = Map::new();
            payload.insert("name".into(), name.into());
            if let Some(config) = req.server_config {
                payload.extend(config.clone());
            }
            if let Some(active) = req.active {
                payload.insert("active".into(), active.into());
            }
            client.update_mcp_server(&Value::Object(payload)).await
        }
        PanelAction::Delete => match require_name() {
            Ok(name) => client.delete_mcp_server(name).await,
            Err(err) => return err,
        },
        PanelAction::Test => match require_config() {
            Ok(config) => {
                client
                    .test_mcp_server_connection(&Value::Object(config.clone()))
                    .await
            }
            Err(err) => return err,
        },
    };

    let payload = match result {
        Ok(raw) => {
            let mut payload = json!({
                "status": raw.get("status").cloned().unwrap_or_else(|| "ok".into()),
                "message": raw.get("message").cloned().unwrap_or(Value::Null),
                "action": action,
                "name": req.name,
                "raw": raw,
            });
            if req.action == PanelAction::List && is_ok(&raw) {
                let servers = raw
                    .get("data")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let errlogs: Vec<Value> = servers
                    .iter()
                    .filter(|s| s.get("errlogs").is_some_and(is_truthy))
                    .map(|s| json!({ "name": s.get("name"), "errlogs": s.get("errlogs") }))
                    .collect();
                payload = merge(
                    payload,
                    json!({ "servers": servers, "mcp_server_errlogs": errlogs }),
                );
            }
            payload
        }
        Err(e) => merge(
            Value::Object(connect_error(client, &e)),
            json!({ "action": action, "name": req.name }),
        ),
    };
    with_logs(client, payload, req.include_logs, req.log_tail_limit).await
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    }
}
