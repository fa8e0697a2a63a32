use serde_json::{json, Value};
use tracing::info;

use super::{api_error, connect_error, data_of, error, upstream_error};
use crate::client::AstrBotClient;
use crate::jsonpath::{self, SummaryOptions};

pub const DEFAULT_SEARCH_RESULTS: usize = 50;

fn check_target(conf_id: Option<&str>, system_config: bool) -> Result<(), Value> {
    let has_id = conf_id.is_some_and(|c| !c.trim().is_empty());
    match (system_config, has_id) {
        (true, true) => Err(error("Do not pass conf_id when system_config=true")),
        (false, false) => Err(error("conf_id is required unless system_config=true")),
        _ => Ok(()),
    }
}

/// Fetch an abconf and return its `config` object, or a finished error payload.
async fn load_config(
    client: &AstrBotClient,
    conf_id: Option<&str>,
    system_config: bool,
) -> Result<Value, Value> {
    let result = client
        .get_abconf(conf_id, system_config)
        .await
        .map_err(|e| Value::Object(connect_error(client, &e)))?;
    if let Some(err) = upstream_error(&result) {
        return Err(err);
    }
    match data_of(&result).get("config") {
        Some(config) if config.is_object() => Ok(config.clone()),
        _ => Err(json!({
            "status": "error",
            "message": "AstrBot returned invalid config payload",
            "raw": result,
        })),
    }
}

pub async fn list_astrbot_config_files(client: &AstrBotClient) -> Value {
    let result = match client.get_abconf_list().await {
        Ok(result) => result,
        Err(e) => return Value::Object(api_error(client, &e)),
    };
    if let Some(err) = upstream_error(&result) {
        return err;
    }
    json!({
        "info_list": data_of(&result).get("info_list").cloned().unwrap_or_else(|| json!([])),
    })
}

/// Summarize one node of a config. Start at the root and drill down.
pub async fn inspect_astrbot_config(
    client: &AstrBotClient,
    conf_id: Option<&str>,
    system_config: bool,
    path: Option<&Value>,
    opts: &SummaryOptions,
) -> Value {
    if let Err(err) = check_target(conf_id, system_config) {
        return err;
    }
    let config = match load_config(client, conf_id, system_config).await {
        Ok(config) => config,
        Err(err) => return err,
    };

    let summary = jsonpath::parse_path(path).and_then(|segments| {
        let node = jsonpath::get_node(&config, &segments)?;
        let leaf = match segments.last() {
            Some(jsonpath::PathSegment::Key(k)) => Some(k.as_str()),
            _ => None,
        };
        Ok((jsonpath::summarize_node(node, opts, leaf), segments))
    });

    match summary {
        Ok((node, segments)) => json!({
            "conf_id": conf_id,
            "system_config": system_config,
            "path": segments,
            "node": node,
        }),
        Err(e) => json!({
            "status": "error",
            "message": e.to_string(),
            "conf_id": conf_id,
            "system_config": system_config,
            "path": path,
        }),
    }
}

/// Apply a batch of edits, then save and hot reload the config.
pub async fn apply_astrbot_config_ops(
    client: &AstrBotClient,
    conf_id: &str,
    ops: &[Value],
    create_missing: bool,
) -> Value {
    if conf_id.trim().is_empty() {
        return error("conf_id is required");
    }
    if ops.is_empty() {
        return error("ops must be a non-empty list");
    }
    let mut config = match load_config(client, Some(conf_id), false).await {
        Ok(config) => config,
        Err(err) => return err,
    };

    let report = match jsonpath::apply_ops(&mut config, ops, create_missing) {
        Ok(report) => report,
        Err(e) => {
            return json!({
                "status": "error",
                "message": e.source.to_string(),
                "op_index": e.index,
                "op": ops.get(e.index),
            })
        }
    };

    let update = match client.update_astrbot_config(conf_id, &config).await {
        Ok(update) => update,
        Err(e) => return Value::Object(api_error(client, &e)),
    };
    if let Some(err) = upstream_error(&update) {
        return err;
    }
    info!(
        "Applied {} config ops to {}",
        report.changed_paths.len(),
        conf_id
    );
    json!({
        "message": update
            .get("message")
            .filter(|m| m.as_str().is_some_and(|s| !s.is_empty()))
            .cloned()
            .unwrap_or_else(|| "ok".into()),
        "conf_id": conf_id,
        "applied": report.applied,
        "changed_paths": report.changed_paths,
    })
}

pub struct ConfigSearch<'a> {
    pub key_query: &'a str,
    pub value_query: Option<&'a str>,
    pub case_sensitive: bool,
    pub max_results: usize,
}

/// Paths whose key (and optionally primitive value) match, without the values.
pub async fn search_astrbot_config_paths(
    client: &AstrBotClient,
    conf_id: Option<&str>,
    system_config: bool,
    search: &ConfigSearch<'_>,
) -> Value {
    if let Err(err) = check_target(conf_id, system_config) {
        return err;
    }
    if search.key_query.trim().is_empty() {
        return error("key_query must be a non-empty string");
    }
    if search.value_query.is_some_and(|v| v.trim().is_empty()) {
        return error("value_query must be a non-empty string or null");
    }
    if search.max_results == 0 {
        return error("max_results must be > 0");
    }
    let config = match load_config(client, conf_id, system_config).await {
        Ok(config) => config,
        Err(err) => return err,
    };

    let results = jsonpath::search_paths(
        &config,
        search.key_query.trim(),
        search.value_query.map(str::trim),
        search.case_sensitive,
        search.max_results,
    );
    json!({
        "conf_id": conf_id,
        "system_config": system_config,
        "key_query": search.key_query,
        "value_query": search.value_query,
        "case_sensitive": search.case_sensitive,
        "max_results": search.max_results,
        "count": results.len(),
        "results": results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_target() {
        let err = check_target(Some("default"), true).unwrap_err();
        assert_eq!(err["message"], json!("Do not pass conf_id when system_config=true"));
        let err = check_target(Some("  "), false).unwrap_err();
        assert_eq!(err["message"], json!("conf_id is required unless system_config=true"));
        assert!(check_target(None, true).is_ok());
        assert!(check_target(Some("default"), false).is_ok());
    }
}
