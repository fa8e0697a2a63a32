//! Message chains and WebChat session bookkeeping

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::config::Settings;

const ONEBOT_LIKE: [&str; 5] = ["napcat", "onebot", "cqhttp", "gocqhttp", "llonebot"];
const QUOTE_WIDTH: usize = 800;
/// How much of the sent text must show up in a history record to claim it.
const MATCH_HINT_CHARS: usize = 32;
const CLOCK_SKEW_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    Plain,
    #[serde(alias = "quote", alias = "reference")]
    Reply,
    Image,
    File,
    Record,
    Video,
}

impl PartType {
    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::File | Self::Record | Self::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Reply => "reply",
            Self::Image => "image",
            Self::File => "file",
            Self::Record => "record",
            Self::Video => "video",
        }
    }
}

/// One element of a message chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct MessagePart {
    /// plain, reply (alias quote/reference), image, file, record or video
    #[serde(rename = "type")]
    pub kind: PartType,
    /// Text for plain parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Message being replied to (reply parts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    /// Alternative spelling of message_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Local path or http(s) URL of a media part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// http(s) URL of a media part; takes precedence over file_path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// File name to report when uploading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// MIME type to report when uploading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Filled in for OneBot-style adapters (URL or file:// URI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl MessagePart {
    fn bare(kind: PartType) -> Self {
        Self {
            kind,
            text: None,
            message_id: None,
            id: None,
            file_path: None,
            url: None,
            file_name: None,
            mime_type: None,
            file: None,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(PartType::Plain)
        }
    }

    pub fn media(kind: PartType, source: impl Into<String>) -> Self {
        Self {
            file_path: Some(source.into()),
            ..Self::bare(kind)
        }
    }

    pub fn reply(message_id: impl Into<Value>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..Self::bare(PartType::Reply)
        }
    }

    /// Referenced message id of a reply part, if non-blank.
    pub fn reply_id(&self) -> Option<String> {
        [&self.message_id, &self.id]
            .into_iter()
            .flatten()
            .filter(|v| !v.is_null())
            .map(id_text)
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    }

    /// Media source; `url` wins over `file_path`.
    pub fn source(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.file_path.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Assemble a chain from the convenience arguments: text, then images, files,
/// records and videos.
pub fn build_chain(
    message: Option<&str>,
    images: &[String],
    files: &[String],
    records: &[String],
    videos: &[String],
) -> Vec<MessagePart> {
    let mut chain = Vec::new();
    if let Some(text) = message.filter(|t| !t.is_empty()) {
        chain.push(MessagePart::plain(text));
    }
    for (kind, sources) in [
        (PartType::Image, images),
        (PartType::File, files),
        (PartType::Record, records),
        (PartType::Video, videos),
    ] {
        chain.extend(sources.iter().map(|src| MessagePart::media(kind, src.clone())));
    }
    chain
}

pub fn is_onebot_like(platform_id: &str) -> bool {
    let platform = platform_id.trim().to_lowercase();
    ONEBOT_LIKE.contains(&platform.as_str())
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Text form of an id value: strings as-is, numbers without quotes.
pub fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// WebChat replies expect the numeric history primary key; keep anything
/// that does not look like one unchanged.
pub fn normalize_history_message_id(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(n) = trimmed.parse::<u64>() {
                    return Value::from(n);
                }
            }
            value.clone()
        }
        other => other.clone(),
    }
}

// ==================== LOCAL FILES ====================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocalPathError {
    #[error("Local file_path does not exist: {0:?}")]
    NotFound(String),

    #[error("file_path escapes base directory: {0:?}")]
    Escapes(String),
}

impl LocalPathError {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::NotFound(_) => {
                "If you passed a relative path, set ASTRBOTMCP_FILE_ROOT \
                 (or run the server in the correct working directory)."
            }
            Self::Escapes(_) => "Set ASTRBOTMCP_FILE_ROOT to control how relative paths are resolved.",
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
            if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
                return PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']));
            }
        }
    }
    PathBuf::from(path)
}

/// Resolve a user-supplied path to an existing absolute file.
///
/// Relative paths are joined to `file_root` (or the working directory) and
/// must not escape it once symlinks and `..` are resolved.
pub fn resolve_local_path(source: &str, file_root: Option<&Path>) -> Result<PathBuf, LocalPathError> {
    let candidate = expand_home(source);
    if candidate.is_absolute() {
        return candidate
            .canonicalize()
            .map_err(|_| LocalPathError::NotFound(source.to_string()));
    }

    let base = match file_root {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir().map_err(|_| LocalPathError::NotFound(source.to_string()))?,
    };
    let resolved = base
        .join(&candidate)
        .canonicalize()
        .map_err(|_| LocalPathError::NotFound(source.to_string()))?;
    let base = base.canonicalize().unwrap_or(base);
    if !resolved.starts_with(&base) {
        return Err(LocalPathError::Escapes(source.to_string()));
    }
    Ok(resolved)
}

pub fn file_uri(path: &Path) -> Option<String> {
    url::Url::from_file_path(path).ok().map(|u| u.to_string())
}

// ==================== HISTORY ====================

/// Flatten a `/api/chat/get_session` history record to text; media parts
/// become `[type:name]`.
pub fn history_plain_text(item: &Value) -> String {
    let content = match item.get("content") {
        None | Some(Value::Null) => return String::new(),
        Some(content) => content,
    };
    let Some(content) = content.as_object() else {
        return id_text(content);
    };
    let message = match content.get("message") {
        None | Some(Value::Null) => return String::new(),
        Some(message) => message,
    };
    let Some(parts) = message.as_array() else {
        return id_text(message);
    };

    let mut out = String::new();
    for part in parts.iter().filter_map(Value::as_object) {
        let Some(kind) = part.get("type").and_then(Value::as_str) else {
            continue;
        };
        match kind {
            "plain" => {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
            "image" | "file" | "record" | "video" => {
                let name = ["filename", "attachment_id"]
                    .iter()
                    .filter_map(|k| part.get(*k))
                    .filter(|v| !v.is_null())
                    .map(id_text)
                    .find(|s| !s.is_empty());
                match name {
                    Some(name) => out.push_str(&format!("[{}:{}]", kind, name)),
                    None => out.push_str(&format!("[{}]", kind)),
                }
            }
            "" => {}
            other => out.push_str(&format!("[{}]", other)),
        }
    }
    out.trim().to_string()
}

/// Collapse whitespace and cut at a word boundary so the result, including
/// the trailing `…`, fits in `width` characters.
pub fn shorten(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let budget = width.saturating_sub(1);
    let mut out = String::new();
    for word in collapsed.split(' ') {
        let extra = if out.is_empty() { 0 } else { 1 } + word.chars().count();
        if out.chars().count() + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        out = collapsed.chars().take(budget).collect();
    }
    out.push('…');
    out
}

pub fn format_quote_block(message_id: &str, sender: &str, text: &str) -> String {
    let sender = match sender.trim() {
        "" => "unknown",
        s => s,
    };
    let text = match text.trim() {
        "" => "<empty>",
        t => t,
    };
    format!("[引用消息 {} | {}] {}\n", message_id, sender, shorten(text, QUOTE_WIDTH))
}

/// Quote blocks for `reply_ids` looked up in a session history.
pub fn quote_blocks(history: &[Value], reply_ids: &[String]) -> (String, Value) {
    let index: HashMap<String, &Value> = history
        .iter()
        .filter_map(|item| {
            let id = item.get("id").filter(|v| !v.is_null())?;
            Some((id_text(id), item))
        })
        .collect();

    let mut resolved = serde_json::Map::new();
    let mut missing = Vec::new();
    let mut blocks = String::new();
    for rid in reply_ids {
        match index.get(rid) {
            Some(item) => {
                let sender = ["sender_name", "sender_id"]
                    .iter()
                    .filter_map(|k| item.get(*k))
                    .filter(|v| !v.is_null())
                    .map(id_text)
                    .find(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                let block = format_quote_block(rid, &sender, &history_plain_text(item));
                resolved.insert(rid.clone(), Value::String(block.clone()));
                blocks.push_str(&block);
            }
            None => {
                missing.push(rid.clone());
                blocks.push_str(&format_quote_block(
                    rid,
                    "missing",
                    "<not found in /api/chat/get_session history>",
                ));
            }
        }
    }
    (
        blocks,
        serde_json::json!({ "resolved": resolved, "missing": missing }),
    )
}

fn parse_created_at(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether a history record is plausibly the user message just sent.
pub fn is_recent_user_record(
    item: &Value,
    expected_sender: Option<&str>,
    match_hint: Option<&str>,
    sent_at: DateTime<Utc>,
) -> bool {
    let is_user = item
        .get("content")
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)
        == Some("user");
    if !is_user {
        return false;
    }
    if let Some(sender) = expected_sender {
        if item.get("sender_name").and_then(Value::as_str) != Some(sender) {
            return false;
        }
    }
    if let Some(hint) = match_hint {
        let prefix: String = hint.chars().take(MATCH_HINT_CHARS).collect();
        if !history_plain_text(item).contains(&prefix) {
            return false;
        }
    }
    if let Some(created) = item
        .get("created_at")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .and_then(parse_created_at)
    {
        let floor = sent_at.with_nanosecond(0).unwrap_or(sent_at)
            - ChronoDuration::seconds(CLOCK_SKEW_SECS);
        return created >= floor;
    }
    true
}

// ==================== REPLIES ====================

const RESPONSE_TYPES: [&str; 9] = [
    "plain",
    "complete",
    "image",
    "record",
    "file",
    "message_saved",
    "end",
    "break",
    "raw",
];

/// What a `/api/chat/send` SSE stream amounted to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplySummary {
    pub has_response: bool,
    pub reply_text: String,
    pub user_message_ids: Vec<String>,
    pub saved_message_ids: Vec<String>,
}

pub fn summarize_reply_events(events: &[Value]) -> ReplySummary {
    let mut summary = ReplySummary::default();
    for event in events {
        let kind = event.get("type").and_then(Value::as_str).unwrap_or("");
        if RESPONSE_TYPES.contains(&kind) {
            summary.has_response = true;
        }
        let saved_id = || {
            event
                .get("data")
                .and_then(|d| d.get("id"))
                .filter(|v| !v.is_null())
                .map(id_text)
        };
        match kind {
            "user_message_saved" => summary.user_message_ids.extend(saved_id()),
            "message_saved" => summary.saved_message_ids.extend(saved_id()),
            "plain" | "complete" => {
                if let Some(text) = event.get("data").and_then(Value::as_str) {
                    summary.reply_text.push_str(text);
                }
            }
            _ => {}
        }
    }
    summary
}

// ==================== SESSION CACHE ====================

type CacheKey = (String, String, String);

/// Process-wide memory of WebChat sessions and message ids, scoped by
/// AstrBot instance and dashboard user.
#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<CacheKey, String>>,
    last_saved: Mutex<HashMap<CacheKey, String>>,
    last_user: Mutex<HashMap<CacheKey, String>>,
}

fn cache_key(settings: &Settings, scope: &str) -> CacheKey {
    (
        settings.base_url.clone(),
        settings.username.clone().unwrap_or_default(),
        scope.to_string(),
    )
}

fn read(map: &Mutex<HashMap<CacheKey, String>>, key: &CacheKey) -> Option<String> {
    map.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
}

fn write(map: &Mutex<HashMap<CacheKey, String>>, key: CacheKey, value: String) {
    map.lock().unwrap_or_else(|e| e.into_inner()).insert(key, value);
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_session(&self, settings: &Settings, platform_id: &str) -> Option<String> {
        read(&self.sessions, &cache_key(settings, platform_id))
    }

    pub fn remember_session(&self, settings: &Settings, platform_id: &str, session_id: &str) {
        write(&self.sessions, cache_key(settings, platform_id), session_id.to_string());
    }

    pub fn last_saved_message(&self, settings: &Settings, session_id: &str) -> Option<String> {
        read(&self.last_saved, &cache_key(settings, session_id))
    }

    pub fn remember_saved_message(&self, settings: &Settings, session_id: &str, message_id: &str) {
        write(&self.last_saved, cache_key(settings, session_id), message_id.to_string());
    }

    pub fn last_user_message(&self, settings: &Settings, session_id: &str) -> Option<String> {
        read(&self.last_user, &cache_key(settings, session_id))
    }

    pub fn remember_user_message(&self, settings: &Settings, session_id: &str, message_id: &str) {
        write(&self.last_user, cache_key(settings, session_id), message_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_part_aliases_deserialize_as_reply() {
        let part: MessagePart =
            serde_json::from_value(json!({"type": "quote", "id": 42})).unwrap();
        assert_eq!(part.kind, PartType::Reply);
        assert_eq!(part.reply_id().as_deref(), Some("42"));

        let part: MessagePart =
            serde_json::from_value(json!({"type": "reference", "message_id": "  "})).unwrap();
        assert_eq!(part.reply_id(), None);
    }

    #[test]
    fn test_build_chain_order() {
        let chain = build_chain(
            Some("hi"),
            &["a.png".into()],
            &["b.txt".into()],
            &["c.wav".into()],
            &["d.mp4".into()],
        );
        let kinds: Vec<PartType> = chain.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PartType::Plain,
                PartType::Image,
                PartType::File,
                PartType::Record,
                PartType::Video
            ]
        );
        assert!(build_chain(Some(""), &[], &[], &[], &[]).is_empty());
    }

    #[test]
    fn test_part_serializes_without_empty_fields() {
        let value = serde_json::to_value(MessagePart::plain("x")).unwrap();
        assert_eq!(value, json!({"type": "plain", "text": "x"}));
    }

    #[test]
    fn test_source_prefers_url() {
        let mut part = MessagePart::media(PartType::Image, "local.png");
        assert_eq!(part.source(), Some("local.png"));
        part.url = Some("https://x/y.png".into());
        assert_eq!(part.source(), Some("https://x/y.png"));
    }

    #[test]
    fn test_onebot_like() {
        assert!(is_onebot_like(" NapCat "));
        assert!(!is_onebot_like("telegram"));
    }

    #[test]
    fn test_normalize_history_message_id() {
        assert_eq!(normalize_history_message_id(&json!("17")), json!(17));
        assert_eq!(normalize_history_message_id(&json!(" 17 ")), json!(17));
        assert_eq!(normalize_history_message_id(&json!("abc")), json!("abc"));
        assert_eq!(normalize_history_message_id(&json!(5)), json!(5));
    }

    #[test]
    fn test_resolve_local_path_inside_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/cat.png"), b"png").unwrap();

        let resolved = resolve_local_path("media/cat.png", Some(dir.path())).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("media/cat.png"));

        let err = resolve_local_path("media/dog.png", Some(dir.path())).unwrap_err();
        assert!(matches!(err, LocalPathError::NotFound(_)));
    }

    #[test]
    fn test_resolve_local_path_rejects_escape() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"x").unwrap();

        let err = resolve_local_path("../secret.txt", Some(&root)).unwrap_err();
        assert!(matches!(err, LocalPathError::Escapes(_)));

        let absolute = outer.path().join("secret.txt");
        assert!(resolve_local_path(absolute.to_str().unwrap(), Some(&root)).is_ok());
    }

    #[test]
    fn test_history_plain_text() {
        let item = json!({
            "content": {
                "type": "user",
                "message": [
                    {"type": "plain", "text": "look "},
                    {"type": "image", "filename": "cat.png"},
                    {"type": "file"},
                    {"type": "at"}
                ]
            }
        });
        assert_eq!(history_plain_text(&item), "look [image:cat.png][file][at]");
        assert_eq!(history_plain_text(&json!({"content": "raw"})), "raw");
        assert_eq!(history_plain_text(&json!({})), "");
    }

    #[test]
    fn test_format_quote_block() {
        assert_eq!(
            format_quote_block("7", " ", "  "),
            "[引用消息 7 | unknown] <empty>\n"
        );
        let long = "word ".repeat(300);
        let block = format_quote_block("1", "bob", &long);
        assert!(block.ends_with("…\n"));
        let body = block.trim_end().split("] ").nth(1).unwrap();
        assert!(body.chars().count() <= 800);
    }

    #[test]
    fn test_quote_blocks_resolve_and_missing() {
        let history = vec![
            json!({"id": 3, "sender_name": "alice", "content": {"message": [{"type": "plain", "text": "hello"}]}}),
        ];
        let (blocks, debug) = quote_blocks(&history, &["3".into(), "9".into()]);
        assert!(blocks.starts_with("[引用消息 3 | alice] hello\n"));
        assert!(blocks.contains("[引用消息 9 | missing]"));
        assert_eq!(debug["missing"], json!(["9"]));
    }

    #[test]
    fn test_is_recent_user_record() {
        let sent_at = "2025-12-18T13:47:07Z".parse::<DateTime<Utc>>().unwrap();
        let item = json!({
            "id": 10,
            "sender_name": "astrbot",
            "created_at": "2025-12-18T21:47:05.684801+08:00",
            "content": {"type": "user", "message": [{"type": "plain", "text": "ping there"}]}
        });
        assert!(is_recent_user_record(&item, Some("astrbot"), Some("ping"), sent_at));
        assert!(!is_recent_user_record(&item, Some("other"), None, sent_at));
        assert!(!is_recent_user_record(&item, None, Some("pong"), sent_at));

        let later = sent_at + ChronoDuration::seconds(60);
        assert!(!is_recent_user_record(&item, None, None, later));

        let bot = json!({"content": {"type": "bot"}});
        assert!(!is_recent_user_record(&bot, None, None, sent_at));
    }

    #[test]
    fn test_summarize_reply_events() {
        let events = vec![
            json!({"type": "user_message_saved", "data": {"id": 11}}),
            json!({"type": "plain", "data": "Hel"}),
            json!({"type": "plain", "data": "lo"}),
            json!({"type": "message_saved", "data": {"id": "12"}}),
            json!({"type": "end"}),
        ];
        let summary = summarize_reply_events(&events);
        assert!(summary.has_response);
        assert_eq!(summary.reply_text, "Hello");
        assert_eq!(summary.user_message_ids, vec!["11"]);
        assert_eq!(summary.saved_message_ids, vec!["12"]);

        let bookkeeping = summarize_reply_events(&[json!({"type": "user_message_saved", "data": {"id": 1}})]);
        assert!(!bookkeeping.has_response);
    }

    #[test]
    fn test_session_cache_scopes() {
        let cache = SessionCache::new();
        let mut settings = Settings::new("http://a");
        settings.username = Some("u1".into());
        cache.remember_session(&settings, "webchat", "s1");
        cache.remember_user_message(&settings, "s1", "5");
        assert_eq!(cache.last_session(&settings, "webchat").as_deref(), Some("s1"));
        assert_eq!(cache.last_user_message(&settings, "s1").as_deref(), Some("5"));
        assert_eq!(cache.last_saved_message(&settings, "s1"), None);

        let other = Settings::new("http://b");
        assert_eq!(cache.last_session(&other, "webchat"), None);
    }
}
