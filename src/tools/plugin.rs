use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{connect_error, data_of, error, is_ok, merge, with_logs};
use crate::client::AstrBotClient;
use crate::jsonpath::{self, PathSegment, SummaryOptions};
use crate::message::{resolve_local_path, LocalPathError};

fn looks_like_plugin_url(source: &str) -> bool {
    let s = source.trim().to_lowercase();
    ["http://", "https://", "git@", "ssh://"]
        .iter()
        .any(|prefix| s.starts_with(prefix))
}

pub struct InstallOptions<'a> {
    pub proxy: Option<&'a str>,
    pub prefer_proxy: bool,
    pub include_logs: bool,
    pub log_tail_limit: usize,
}

/// Install a plugin from a repository URL or a local `.zip` archive.
pub async fn install_astrbot_plugin(
    client: &AstrBotClient,
    source: &str,
    opts: &InstallOptions<'_>,
) -> Value {
    let source = source.trim();
    if source.is_empty() {
        return error("source must be a non-empty string.");
    }

    let (mode, proxy, result) = if looks_like_plugin_url(source) {
        let proxy = opts
            .prefer_proxy
            .then(|| {
                opts.proxy
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .unwrap_or(client.settings().plugin_proxy.as_str())
                    .to_string()
            });
        info!("Installing plugin from {} (proxy: {:?})", source, proxy);
        let result = client.install_plugin_from_url(source, proxy.as_deref()).await;
        ("url", proxy, result)
    } else {
        let resolved = match resolve_local_path(source, client.settings().file_root.as_deref()) {
            Ok(resolved) => resolved,
            Err(LocalPathError::NotFound(_)) => {
                return json!({
                    "status": "error",
                    "message": format!("Local zip file_path does not exist: {:?}", source),
                    "hint": "If you passed a relative path, set ASTRBOTMCP_FILE_ROOT or run MCP in the expected working directory.",
                })
            }
            Err(e) => return error(e.to_string()),
        };
        let is_zip = resolved
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return json!({
                "status": "error",
                "message": "Local plugin source must be a .zip file path.",
                "source": source,
                "resolved_path": resolved,
            });
        }
        info!("Installing plugin from archive {}", resolved.display());
        ("zip_upload", None, client.install_plugin_from_file(&resolved).await)
    };

    let payload = match result {
        Ok(result) => json!({
            "status": result.get("status").cloned().unwrap_or_else(|| "ok".into()),
            "message": result.get("message").cloned().unwrap_or(Value::Null),
            "install_mode": mode,
            "source": source,
            "proxy": proxy,
            "raw": result,
        }),
        Err(e) => merge(
            Value::Object(connect_error(client, &e)),
            json!({ "source": source, "install_mode": mode }),
        ),
    };
    with_logs(client, payload, opts.include_logs, opts.log_tail_limit).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
#[serde(rename_all = "lowercase")]
pub enum PluginConfigAction {
    /// Summarize a node of the plugin config
    #[default]
    Inspect,
    /// Apply ops and save the plugin config
    Apply,
}

impl PluginConfigAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Apply => "apply",
        }
    }
}

pub struct PluginConfigRequest<'a> {
    pub conf_id: &'a str,
    pub plugin_path: &'a Value,
    pub action: PluginConfigAction,
    pub path: Option<&'a Value>,
    pub summary: SummaryOptions,
    pub ops: &'a [Value],
    pub create_missing: bool,
    pub include_logs: bool,
    pub log_tail_limit: usize,
}

impl PluginConfigRequest<'_> {
    pub const DEFAULT_SUMMARY: SummaryOptions = SummaryOptions {
        max_children: 80,
        include_value: true,
        redact_secrets: true,
        max_string_length: 400,
    };
}

fn plugin_name(plugin_path: &[PathSegment]) -> Result<String, String> {
    match plugin_path.first() {
        None => Err("plugin_path must not be empty.".to_string()),
        Some(PathSegment::Key(name)) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        Some(_) => Err("plugin_path must start with plugin name string.".to_string()),
    }
}

/// Inspect or edit a plugin's JSON config through `/api/config/get` and
/// `/api/config/plugin/update`. `conf_id` is echoed back but not used by
/// these endpoints.
pub async fn configure_astrbot_plugin_json(
    client: &AstrBotClient,
    req: &PluginConfigRequest<'_>,
) -> Value {
    let action = req.action.as_str();
    let segments = jsonpath::parse_path(Some(req.plugin_path))
        .map_err(|e| e.to_string())
        .and_then(|segments| plugin_name(&segments).map(|name| (segments, name)));
    let (plugin_path, name) = match segments {
        Ok(found) => found,
        Err(message) => {
            return json!({
                "status": "error",
                "message": message,
                "action": action,
                "conf_id": req.conf_id,
                "plugin_path": req.plugin_path,
            })
        }
    };

    let mut context = Map::new();
    context.insert("action".into(), action.into());
    context.insert("conf_id".into(), req.conf_id.into());
    context.insert("plugin_name".into(), name.clone().into());
    let context = Value::Object(context);

    let payload = match client.get_plugin_config(&name).await {
        Err(e) => merge(Value::Object(connect_error(client, &e)), context),
        Ok(resp) if !is_ok(&resp) => merge(
            context,
            json!({
                "status": resp.get("status").filter(|s| !s.is_null()).cloned().unwrap_or_else(|| "error".into()),
                "message": resp
                    .get("message")
                    .filter(|m| m.as_str().is_some_and(|s| !s.is_empty()))
                    .cloned()
                    .unwrap_or_else(|| "Failed to load plugin config.".into()),
                "raw": resp,
            }),
        ),
        Ok(resp) => match data_of(&resp).get("config") {
            Some(config) if config.is_object() => {
                let metadata = data_of(&resp).get("metadata").cloned().unwrap_or(Value::Null);
                let outcome = match req.action {
                    PluginConfigAction::Inspect => inspect(req, config, metadata, &plugin_path),
                    PluginConfigAction::Apply => {
                        if req.ops.is_empty() {
                            return error("ops must be a non-empty list when action='apply'.");
                        }
                        apply(client, req, config.clone(), &name, &plugin_path).await
                    }
                };
                match outcome {
                    Ok(body) => merge(context, body),
                    Err(message) => merge(
                        context,
                        json!({
                            "status": "error",
                            "message": message,
                            "plugin_path": plugin_path,
                            "path": req.path,
                        }),
                    ),
                }
            }
            _ => merge(
                context,
                json!({
                    "status": "error",
                    "message": format!(
                        "Plugin {:?} has no configurable JSON payload in /api/config/get.",
                        name
                    ),
                    "raw": resp,
                }),
            ),
        },
    };
    with_logs(client, payload, req.include_logs, req.log_tail_limit).await
}

fn inspect(
    req: &PluginConfigRequest<'_>,
    config: &Value,
    metadata: Value,
    plugin_path: &[PathSegment],
) -> Result<Value, String> {
    let segments = jsonpath::parse_path(req.path).map_err(|e| e.to_string())?;
    let node = jsonpath::get_node(config, &segments).map_err(|e| e.to_string())?;
    let leaf = match segments.last() {
        Some(PathSegment::Key(k)) => Some(k.as_str()),
        _ => None,
    };
    Ok(json!({
        "status": "ok",
        "conf_id_ignored_for_plugin_api": true,
        "plugin_path": plugin_path,
        "effective_path": segments,
        "node": jsonpath::summarize_node(node, &req.summary, leaf),
        "metadata": metadata,
    }))
}

async fn apply(
    client: &AstrBotClient,
    req: &PluginConfigRequest<'_>,
    mut config: Value,
    name: &str,
    plugin_path: &[PathSegment],
) -> Result<Value, String> {
    let report = jsonpath::apply_ops(&mut config, req.ops, req.create_missing)
        .map_err(|e| e.source.to_string())?;
    let update = client
        .update_plugin_config(name, &config)
        .await
        .map_err(|e| e.to_string())?;
    info!("Updated plugin config for {}", name);
    Ok(json!({
        "status": update.get("status").cloned().unwrap_or_else(|| "ok".into()),
        "message": update.get("message").cloned().unwrap_or(Value::Null),
        "conf_id_ignored_for_plugin_api": true,
        "plugin_path": plugin_path,
        "applied": report.applied,
        "changed_paths": report.changed_paths,
        "raw": update,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_url_detection() {
        assert!(looks_like_plugin_url("https://github.com/a/b"));
        assert!(looks_like_plugin_url(" GIT@github.com:a/b.git"));
        assert!(looks_like_plugin_url("ssh://git@host/repo"));
        assert!(!looks_like_plugin_url("plugins/b.zip"));
    }

    #[test]
    fn test_plugin_name_from_path() {
        let path = jsonpath::parse_path_str("astrbot_plugin_x.settings.enabled").unwrap();
        assert_eq!(plugin_name(&path).unwrap(), "astrbot_plugin_x");
        assert_eq!(plugin_name(&[]).unwrap_err(), "plugin_path must not be empty.");
        assert_eq!(
            plugin_name(&[PathSegment::Index(0)]).unwrap_err(),
            "plugin_path must start with plugin name string."
        );
    }
}
