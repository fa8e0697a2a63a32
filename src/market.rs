//! Plugin market listing: normalization, search and ranking

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Reverse;
use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str = "https://api.soulter.top/astrbot/plugins";
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    /// Newest first
    #[default]
    Latest,
    /// Filter by query, then newest first
    Search,
}

impl MarketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Search => "search",
        }
    }
}

pub type PluginItem = Map<String, Value>;

/// Registry JSON is either `{plugin_id: info}` or a list of infos.
pub fn normalize_items(raw: &Value) -> Vec<PluginItem> {
    match raw {
        Value::Object(map) => map
            .iter()
            .filter_map(|(plugin_id, info)| {
                let info = info.as_object()?;
                let mut item = PluginItem::new();
                item.insert("id".into(), Value::String(plugin_id.clone()));
                item.extend(info.iter().map(|(k, v)| (k.clone(), v.clone())));
                Some(item)
            })
            .collect(),
        Value::Array(list) => list
            .iter()
            .enumerate()
            .filter_map(|(idx, info)| {
                let info = info.as_object()?;
                let plugin_id = first_truthy(info, &["id", "name"])
                    .map(value_text)
                    .unwrap_or_else(|| idx.to_string());
                let mut item = PluginItem::new();
                item.insert("id".into(), Value::String(plugin_id));
                item.extend(info.iter().map(|(k, v)| (k.clone(), v.clone())));
                Some(item)
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn first_truthy<'a>(item: &'a PluginItem, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find(|v| is_truthy(v))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// ISO-8601 timestamp; `Z` and offsets accepted, naive times read as UTC.
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let text = value_text(value?);
    let text = text.trim();
    if text.is_empty() || text == "null" {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn haystack(item: &PluginItem) -> String {
    let mut parts: Vec<String> = Vec::new();
    for key in ["id", "display_name", "name", "desc", "description", "author", "repo"] {
        let Some(value) = item.get(key).filter(|v| !v.is_null()) else {
            continue;
        };
        let mut text = value_text(value).trim().to_string();
        if text.is_empty() {
            continue;
        }
        if key == "repo" {
            // Otherwise every plugin matches "http".
            text = text
                .strip_prefix("https://")
                .or_else(|| text.strip_prefix("http://"))
                .unwrap_or(&text)
                .to_string();
        }
        parts.push(text);
    }
    if let Some(Value::Array(tags)) = item.get("tags") {
        parts.extend(
            tags.iter()
                .map(|t| value_text(t).trim().to_string())
                .filter(|t| !t.is_empty()),
        );
    }
    parts.join(" ").to_lowercase()
}

/// Every whitespace-separated token of `query` must appear in the plugin text.
pub fn matches_query(item: &PluginItem, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let hay = haystack(item);
    query
        .to_lowercase()
        .split_whitespace()
        .all(|token| hay.contains(token))
}

fn stars(item: &PluginItem) -> i64 {
    as_int(first_truthy(item, &["stars", "star"]))
}

fn sort_key(item: &PluginItem) -> (Option<DateTime<Utc>>, i64, String) {
    let updated = parse_timestamp(first_truthy(item, &["updated_at", "update_time", "updated"]));
    let id = item.get("id").filter(|v| is_truthy(v)).map(value_text).unwrap_or_default();
    (updated, stars(item), id)
}

/// Newest first, then most stars, then id (all descending).
pub fn rank(items: &mut [PluginItem]) {
    items.sort_by_cached_key(|item| Reverse(sort_key(item)));
}

#[derive(Debug, Clone)]
pub struct MarketQuery {
    pub mode: MarketMode,
    pub query: Option<String>,
    pub start: usize,
    pub count: usize,
}

impl MarketQuery {
    pub fn validate(&self) -> Result<(), String> {
        if self.start < 1 {
            return Err("start must be >= 1".into());
        }
        if self.count < 1 || self.count > MAX_PAGE_SIZE {
            return Err(format!("count must be in [1, {}]", MAX_PAGE_SIZE));
        }
        if self.mode == MarketMode::Search
            && self.query.as_deref().map_or(true, |q| q.trim().is_empty())
        {
            return Err("query is required when mode='search'".into());
        }
        Ok(())
    }
}

/// Filter, rank and page the registry, producing the tool's result object.
pub fn build_listing(raw: &Value, request: &MarketQuery, source: &str) -> Value {
    let mut items = normalize_items(raw);
    let total = items.len();

    if request.mode == MarketMode::Search {
        let query = request.query.as_deref().unwrap_or("");
        items.retain(|item| matches_query(item, query));
    }
    rank(&mut items);
    let matched = items.len();

    let plugins: Vec<Value> = items
        .iter()
        .skip(request.start.saturating_sub(1))
        .take(request.count)
        .enumerate()
        .map(|(i, item)| {
            let id = item.get("id").filter(|v| is_truthy(v)).map(value_text).unwrap_or_default();
            let name = first_truthy(item, &["display_name", "name"])
                .map(value_text)
                .unwrap_or_else(|| id.clone());
            let desc = first_truthy(item, &["desc", "description"])
                .map(value_text)
                .unwrap_or_default();
            let tags: Vec<String> = match item.get("tags") {
                Some(Value::Array(tags)) => tags.iter().map(value_text).collect(),
                _ => Vec::new(),
            };
            json!({
                "rank": request.start + i,
                "id": id,
                "name": name,
                "desc": desc,
                "tags": tags,
                "stars": stars(item),
                "updated_at": item.get("updated_at").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    json!({
        "status": "ok",
        "source": source,
        "mode": request.mode.as_str(),
        "query": request.query,
        "start": request.start,
        "count": request.count,
        "total_plugins": total,
        "matched_plugins": if request.mode == MarketMode::Search { matched } else { total },
        "returned_plugins": plugins.len(),
        "plugins": plugins,
    })
}

/// Fetch the public registry directly, bypassing AstrBot.
pub async fn fetch_default_registry(url: &str, timeout: Duration) -> anyhow::Result<Value> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let data: Value = client.get(url).send().await?.error_for_status()?.json().await?;
    if !data.is_object() {
        anyhow::bail!("Unexpected registry response format (expected JSON object).");
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Value {
        json!({
            "astrbot_plugin_weather": {
                "display_name": "Weather",
                "desc": "Weather forecast",
                "author": "alice",
                "repo": "https://github.com/alice/weather",
                "tags": ["tools", "weather"],
                "stars": 12,
                "updated_at": "2025-03-01T10:00:00Z"
            },
            "astrbot_plugin_music": {
                "name": "music",
                "desc": "Play music",
                "stars": "40",
                "updated_at": "2025-05-01T08:00:00"
            },
            "astrbot_plugin_old": {
                "desc": "Very old",
                "star": 100,
                "updated_at": "not a date"
            },
            "broken": "not an object"
        })
    }

    #[test]
    fn test_normalize_object_and_list() {
        let items = normalize_items(&registry());
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["id"], json!("astrbot_plugin_weather"));

        let items = normalize_items(&json!([{"name": "a"}, {"id": "b"}, {}, 3]));
        let ids: Vec<&Value> = items.iter().map(|i| &i["id"]).collect();
        assert_eq!(ids, vec![&json!("a"), &json!("b"), &json!("2")]);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let z = parse_timestamp(Some(&json!("2025-03-01T10:00:00Z"))).unwrap();
        let naive = parse_timestamp(Some(&json!("2025-03-01T10:00:00"))).unwrap();
        let offset = parse_timestamp(Some(&json!("2025-03-01T18:00:00+08:00"))).unwrap();
        assert_eq!(z, naive);
        assert_eq!(z, offset);
        assert!(parse_timestamp(Some(&json!("2025-03-01"))).is_some());
        assert!(parse_timestamp(Some(&json!("garbage"))).is_none());
        assert!(parse_timestamp(None).is_none());
    }

    #[test]
    fn test_latest_ranking() {
        let request = MarketQuery {
            mode: MarketMode::Latest,
            query: None,
            start: 1,
            count: 20,
        };
        let listing = build_listing(&registry(), &request, "astrbot");
        let ids: Vec<&str> = listing["plugins"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec!["astrbot_plugin_music", "astrbot_plugin_weather", "astrbot_plugin_old"]
        );
        assert_eq!(listing["total_plugins"], json!(3));
        assert_eq!(listing["matched_plugins"], json!(3));
        assert_eq!(listing["plugins"][0]["stars"], json!(40));
        assert_eq!(listing["plugins"][0]["name"], json!("music"));
        assert_eq!(listing["plugins"][2]["stars"], json!(100));
        assert_eq!(listing["plugins"][2]["name"], json!("astrbot_plugin_old"));
    }

    #[test]
    fn test_search_and_paging() {
        let request = MarketQuery {
            mode: MarketMode::Search,
            query: Some("WEATHER tools".into()),
            start: 1,
            count: 5,
        };
        let listing = build_listing(&registry(), &request, "remote");
        assert_eq!(listing["matched_plugins"], json!(1));
        assert_eq!(listing["plugins"][0]["tags"], json!(["tools", "weather"]));
        assert_eq!(listing["source"], json!("remote"));

        let request = MarketQuery {
            mode: MarketMode::Latest,
            query: None,
            start: 2,
            count: 1,
        };
        let listing = build_listing(&registry(), &request, "astrbot");
        assert_eq!(listing["returned_plugins"], json!(1));
        assert_eq!(listing["plugins"][0]["rank"], json!(2));
        assert_eq!(listing["plugins"][0]["id"], json!("astrbot_plugin_weather"));
    }

    #[test]
    fn test_repo_scheme_does_not_match() {
        let items = normalize_items(&registry());
        assert!(!matches_query(&items[0], "https"));
        assert!(matches_query(&items[0], "github.com/alice"));
    }

    #[test]
    fn test_validate() {
        let mut request = MarketQuery {
            mode: MarketMode::Search,
            query: Some("  ".into()),
            start: 1,
            count: 20,
        };
        assert!(request.validate().is_err());
        request.query = Some("x".into());
        assert!(request.validate().is_ok());
        request.count = 201;
        assert!(request.validate().is_err());
        request.count = 10;
        request.start = 0;
        assert!(request.validate().is_err());
    }
}
