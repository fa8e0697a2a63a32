//! Rebuild a rough message history from AstrBot log lines
//!
//! Used when `/api/chat/get_session` has nothing for a session, which is the
//! normal case for non-WebChat platforms.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

const DEDUP_WINDOW_SECS: f64 = 2.0;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ansi regex"));

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[(\d{1,2}:\d{2}:\d{2})\]").expect("valid time regex"));

static LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(DEBUG|INFO|WARN|WARNING|ERROR|CRITICAL|FATAL)\]").expect("valid level regex")
});

// [aiocqhttp(default)] Alice/123456: hello
static INBOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[(?P<platform>[^\[\]()]+)\((?P<platform_id>[^\[\]()]+)\)\]\s+(?P<name>[^/\r\n]*?)/(?P<id>[^:\s/]+):\s?(?P<content>(?s:.*))$",
    )
    .expect("valid inbound regex")
});

// Prepare to send - Alice/123456: hi there
static OUTBOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Prepare to send -\s*(?P<name>[^/\r\n]*?)/(?P<id>[^:\s/]+):\s?(?P<content>(?s:.*))$",
    )
    .expect("valid outbound regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogMessage {
    pub role: Role,
    pub time: Option<String>,
    pub epoch: Option<f64>,
    pub level: Option<String>,
    pub platform: Option<String>,
    pub platform_id: Option<String>,
    pub sender_name: String,
    pub sender_id: String,
    pub content: String,
}

pub fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").into_owned()
}

/// Pull the text, level and epoch out of a log-history entry.
fn entry_parts(entry: &Value) -> Option<(&str, Option<String>, Option<f64>)> {
    match entry {
        Value::String(line) => Some((line.as_str(), None, None)),
        Value::Object(map) => {
            let line = map.get("data").and_then(Value::as_str)?;
            let level = map
                .get("level")
                .and_then(Value::as_str)
                .map(str::to_string);
            let epoch = map.get("time").and_then(|t| match t {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            });
            Some((line, level, epoch))
        }
        _ => None,
    }
}

/// Parse one log line. Returns `None` for lines that are not chat traffic.
pub fn parse_line(line: &str, level: Option<String>, epoch: Option<f64>) -> Option<LogMessage> {
    let clean = strip_ansi(line);
    let clean = clean.trim_end();

    let time = TIME_RE
        .captures(clean)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let level = level.or_else(|| {
        LEVEL_RE
            .captures(clean)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    });

    // Outbound lines also carry a platform tag, so test them first.
    let (role, caps) = if let Some(caps) = OUTBOUND_RE.captures(clean) {
        (Role::Bot, caps)
    } else {
        (Role::User, INBOUND_RE.captures(clean)?)
    };

    let content = caps.name("content")?.as_str().trim().to_string();
    if content.is_empty() {
        return None;
    }
    let field = |name: &str| caps.name(name).map(|m| m.as_str().trim().to_string());

    Some(LogMessage {
        role,
        time,
        epoch,
        level,
        platform: field("platform"),
        platform_id: field("platform_id"),
        sender_name: field("name").unwrap_or_default(),
        sender_id: field("id").unwrap_or_default(),
        content,
    })
}

/// Parse every entry, dropping repeats of the same message logged twice in a row.
pub fn parse_entries(entries: &[Value]) -> Vec<LogMessage> {
    let mut seen: HashMap<(Role, String, String), (Option<f64>, Option<String>)> = HashMap::new();
    let mut out = Vec::new();

    for entry in entries {
        let Some((line, level, epoch)) = entry_parts(entry) else {
            continue;
        };
        let Some(message) = parse_line(line, level, epoch) else {
            continue;
        };

        let key = (
            message.role,
            message.sender_id.clone(),
            message.content.clone(),
        );
        if let Some((prev_epoch, prev_time)) = seen.get(&key) {
            let duplicate = match (prev_epoch, message.epoch) {
                (Some(prev), Some(now)) => (now - prev).abs() <= DEDUP_WINDOW_SECS,
                (None, None) => prev_time.is_some() && *prev_time == message.time,
                _ => false,
            };
            if duplicate {
                continue;
            }
        }
        seen.insert(key, (message.epoch, message.time.clone()));
        out.push(message);
    }
    out
}

/// Candidate identifiers a log line may use for `session_id`.
///
/// UMO-style ids (`aiocqhttp:FriendMessage:123`) and WebChat ids
/// (`webchat!user!uuid`) are also tried by their last component.
fn session_needles(session_id: &str) -> Vec<String> {
    let session_id = session_id.trim();
    let mut needles = vec![session_id.to_string()];
    for sep in [':', '!'] {
        if let Some(tail) = session_id.rsplit(sep).next() {
            if !tail.is_empty() && !needles.iter().any(|n| n == tail) {
                needles.push(tail.to_string());
            }
        }
    }
    needles
}

/// Messages belonging to `session_id` (all messages when empty), newest `limit`.
pub fn reconstruct(entries: &[Value], session_id: &str, limit: usize) -> Vec<LogMessage> {
    let needles = session_needles(session_id);
    let filter_all = session_id.trim().is_empty();

    let mut matched: Vec<LogMessage> = parse_entries(entries)
        .into_iter()
        .filter(|m| {
            filter_all
                || needles.iter().any(|n| {
                    m.sender_id.contains(n.as_str())
                        || (!m.sender_name.is_empty() && m.sender_name.contains(n.as_str()))
                })
        })
        .collect();

    if matched.len() > limit {
        matched.drain(..matched.len() - limit);
    }
    matched
}
