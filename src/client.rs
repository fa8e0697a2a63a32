use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{ApiError, Result};

const LOGIN_PATH: &str = "/api/auth/login";

static EXTENDED_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)filename\*=([^']*)''([^;]+)").expect("valid filename* regex")
});
static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)filename="?([^";]+)"?"#).expect("valid filename regex"));

/// Query string pairs for [`AstrBotClient::get_json`] and friends.
pub type Query<'a> = &'a [(&'a str, String)];

/// Thin wrapper around AstrBot's dashboard HTTP API.
///
/// Cloning is cheap; clones share the HTTP pool and the cached login token.
#[derive(Clone)]
pub struct AstrBotClient {
    settings: Arc<Settings>,
    http: reqwest::Client,
    token: Arc<Mutex<Option<String>>>,
}

impl AstrBotClient {
    pub fn new(settings: Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .build()?;
        Ok(Self {
            settings: Arc::new(settings),
            http,
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    pub fn attachment_download_url(&self, attachment_id: &str) -> String {
        format!(
            "{}/api/chat/get_attachment?attachment_id={}",
            self.settings.base_url,
            urlencoding::encode(attachment_id)
        )
    }

    pub fn connect_hint(&self) -> String {
        format!(
            "Cannot connect to AstrBot at {:?}. Check ASTRBOT_BASE_URL, ensure AstrBot is running, \
             and that the host/port is reachable.",
            self.settings.base_url
        )
    }

    // ==================== AUTH ====================

    /// Return the cached JWT, logging in first when credentials are configured.
    pub async fn ensure_token(&self) -> Result<Option<String>> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(Some(existing.clone()));
        }

        let (Some(username), Some(password)) = (
            self.settings.username.as_deref(),
            self.settings.password.as_deref(),
        ) else {
            return Ok(None);
        };

        let fresh = self.login(username, password).await?;
        *token = Some(fresh.clone());
        Ok(Some(fresh))
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        info!("Logging in to AstrBot at {} as {}", self.base_url(), username);

        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .timeout(self.timeout())
            .json(&json!({
                "username": username,
                "password": dashboard_password(password),
            }))
            .send()
            .await?;
        let data: Value = check_status(response).await?.json().await?;

        if data.get("status").and_then(Value::as_str) != Some("ok") {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("unknown error");
            return Err(ApiError::Login(message.to_string()));
        }

        data.pointer("/data/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::Login("Login succeeded but token is missing in response.".to_string())
            })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send a request built by `build`, attaching auth. A 401 on a cached token
    /// drops the token and retries once with a fresh login.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> Result<RequestBuilder>,
    {
        let mut retried = false;
        loop {
            let token = self.ensure_token().await?;
            let mut request = build()?;
            if let Some(token) = &token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }

            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && token.is_some() && !retried {
                warn!("AstrBot rejected the cached token, logging in again");
                self.invalidate_token().await;
                retried = true;
                continue;
            }
            return check_status(response).await;
        }
    }

    /// Generic JSON request against the dashboard API.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: Query<'_>,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.url(path);
        debug!("{} {}", method, url);
        let response = self
            .send(|| {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .timeout(self.timeout());
                if !query.is_empty() {
                    request = request.query(query);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                Ok(request)
            })
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_json(&self, path: &str, query: Query<'_>) -> Result<Value> {
        self.request_json(Method::GET, path, query, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.request_json(Method::POST, path, &[], Some(body)).await
    }

    // ==================== SSE ====================

    /// Consume an SSE endpoint and collect the JSON object payloads.
    ///
    /// With `max_seconds > 0` the events gathered when the window closes are
    /// returned, even if none arrived. Without a window, a gap longer than the
    /// client timeout is an error.
    pub async fn stream_sse(
        &self,
        method: Method,
        path: &str,
        query: Query<'_>,
        body: Option<&Value>,
        max_seconds: Option<u64>,
        max_events: Option<usize>,
    ) -> Result<Vec<Value>> {
        let url = self.url(path);
        debug!("{} {} (sse)", method, url);
        let response = self
            .send(|| {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .header(ACCEPT, "text/event-stream");
                if !query.is_empty() {
                    request = request.query(query);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                Ok(request)
            })
            .await?;

        let content_type = header_str(&response, CONTENT_TYPE).to_lowercase();
        if !content_type.contains("text/event-stream") {
            let raw = response.text().await.unwrap_or_default();
            return Err(not_event_stream(&content_type, raw.trim()));
        }

        let deadline = max_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let idle = self.timeout();

        let stream = response.bytes_stream().eventsource();
        tokio::pin!(stream);

        let mut events = Vec::new();
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => tokio::time::timeout(idle, stream.next())
                    .await
                    .map_err(|_| ApiError::StreamIdle(idle.as_secs()))?,
            };

            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(EventStreamError::Transport(e))) => return Err(e.into()),
                Some(Err(e)) => {
                    warn!("Skipping malformed SSE chunk from {}: {}", path, e);
                    continue;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            let Ok(payload) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            if payload.is_object() {
                events.push(payload);
            }
            if max_events.is_some_and(|max| events.len() >= max) {
                break;
            }
        }

        debug!("Collected {} SSE events from {}", events.len(), path);
        Ok(events)
    }

    // ==================== ATTACHMENTS ====================

    async fn upload_file(
        &self,
        path: &str,
        bytes: Vec<u8>,
        file_name: &str,
        content_type: &str,
    ) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .send(|| {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.to_string())
                    .mime_str(content_type)?;
                Ok(self
                    .http
                    .post(&url)
                    .timeout(self.timeout())
                    .multipart(Form::new().part("file", part)))
            })
            .await?;
        Ok(response.json().await?)
    }

    /// Upload a local file via `/api/chat/post_file`.
    pub async fn post_attachment_file(
        &self,
        file_path: &Path,
        file_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<Value> {
        let bytes = tokio::fs::read(file_path).await?;
        let content_type = clean_mime(mime_type)
            .unwrap_or_else(|| mime_guess::from_path(file_path).first_or_octet_stream().to_string());
        let send_name = file_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| {
                file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "upload".to_string());

        info!("Uploading attachment {} ({})", send_name, content_type);
        self.upload_file("/api/chat/post_file", bytes, &send_name, &content_type)
            .await
    }

    /// Download `url` and re-upload it as an AstrBot attachment.
    pub async fn post_attachment_url(
        &self,
        url: &str,
        file_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<Value> {
        let response = self.http.get(url).timeout(self.timeout()).send().await?;
        let response = check_status(response).await?;

        let mime = clean_mime(mime_type).or_else(|| clean_mime(Some(header_str(&response, CONTENT_TYPE))));
        let send_name = file_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| filename_from_content_disposition(header_str(&response, CONTENT_DISPOSITION)))
            .or_else(|| file_name_from_url(response.url()))
            .unwrap_or_else(|| "download".to_string());
        let content_type = mime.unwrap_or_else(|| {
            mime_guess::from_path(&send_name)
                .first_or_octet_stream()
                .to_string()
        });

        let bytes = response.bytes().await?.to_vec();
        info!("Re-uploading {} as attachment {} ({} bytes)", url, send_name, bytes.len());
        self.upload_file("/api/chat/post_file", bytes, &send_name, &content_type)
            .await
    }

    // ==================== LOGS ====================

    pub async fn get_log_history(&self) -> Result<Value> {
        self.get_json("/api/log-history", &[]).await
    }

    pub async fn get_live_logs(
        &self,
        wait_seconds: u64,
        max_events: Option<usize>,
    ) -> Result<Vec<Value>> {
        if wait_seconds == 0 {
            return Ok(Vec::new());
        }
        self.stream_sse(
            Method::GET,
            "/api/live-log",
            &[],
            None,
            Some(wait_seconds),
            max_events,
        )
        .await
    }

    // ==================== PLATFORMS / CHAT ====================

    pub async fn get_platform_list(&self) -> Result<Value> {
        self.get_json("/api/config/platform/list", &[]).await
    }

    pub async fn create_platform_session(&self, platform_id: Option<&str>) -> Result<Value> {
        let query: Vec<(&str, String)> = platform_id
            .filter(|p| !p.is_empty())
            .map(|p| vec![("platform_id", p.to_string())])
            .unwrap_or_default();
        self.get_json("/api/chat/new_session", &query).await
    }

    pub async fn get_platform_session(&self, session_id: &str) -> Result<Value> {
        self.get_json(
            "/api/chat/get_session",
            &[("session_id", session_id.to_string())],
        )
        .await
    }

    pub async fn send_chat_message_sse(
        &self,
        session_id: &str,
        message_parts: &[Value],
        selected_provider: Option<&str>,
        selected_model: Option<&str>,
        enable_streaming: bool,
    ) -> Result<Vec<Value>> {
        let payload = json!({
            "message": message_parts,
            "session_id": session_id,
            "selected_provider": selected_provider,
            "selected_model": selected_model,
            "enable_streaming": enable_streaming,
        });
        self.stream_sse(Method::POST, "/api/chat/send", &[], Some(&payload), None, None)
            .await
    }

    pub async fn send_platform_message_direct(
        &self,
        platform_id: &str,
        message_type: &str,
        session_id: &str,
        message_chain: &[Value],
    ) -> Result<Value> {
        self.post_json(
            "/api/platform/send_message",
            &json!({
                "platform_id": platform_id,
                "message_type": message_type,
                "session_id": session_id,
                "message_chain": message_chain,
            }),
        )
        .await
    }

    // ==================== CONVERSATIONS ====================

    pub async fn list_conversations(
        &self,
        page: u32,
        page_size: u32,
        platforms: Option<&str>,
        message_types: Option<&str>,
        search: Option<&str>,
    ) -> Result<Value> {
        let mut query = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        for (key, value) in [
            ("platforms", platforms),
            ("message_types", message_types),
            ("search", search),
        ] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                query.push((key, value.to_string()));
            }
        }
        self.get_json("/api/conversation/list", &query).await
    }

    pub async fn get_conversation_detail(&self, user_id: &str, cid: &str) -> Result<Value> {
        self.post_json(
            "/api/conversation/detail",
            &json!({ "user_id": user_id, "cid": cid }),
        )
        .await
    }

    // ==================== SESSION ROUTING ====================

    pub async fn get_umo_abconf_routes(&self) -> Result<Value> {
        self.get_json("/api/config/umo_abconf_routes", &[]).await
    }

    pub async fn update_umo_abconf_route(&self, umo: &str, conf_id: &str) -> Result<Value> {
        self.post_json(
            "/api/config/umo_abconf_route/update",
            &json!({ "umo": umo, "conf_id": conf_id }),
        )
        .await
    }

    pub async fn list_session_rules(
        &self,
        page: u32,
        page_size: u32,
        search: Option<&str>,
    ) -> Result<Value> {
        let mut query = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        if let Some(search) = search.filter(|s| !s.is_empty()) {
            query.push(("search", search.to_string()));
        }
        self.get_json("/api/session/list-rule", &query).await
    }

    pub async fn update_session_rule(
        &self,
        umo: &str,
        rule_key: &str,
        rule_value: &Value,
    ) -> Result<Value> {
        self.post_json(
            "/api/session/update-rule",
            &json!({ "umo": umo, "rule_key": rule_key, "rule_value": rule_value }),
        )
        .await
    }

    // ==================== CONFIG ====================

    pub async fn get_abconf_list(&self) -> Result<Value> {
        self.get_json("/api/config/abconfs", &[]).await
    }

    pub async fn get_abconf(&self, conf_id: Option<&str>, system_config: bool) -> Result<Value> {
        let query = if system_config {
            vec![("system_config", "1".to_string())]
        } else {
            vec![("id", conf_id.unwrap_or_default().to_string())]
        };
        self.get_json("/api/config/abconf", &query).await
    }

    pub async fn update_astrbot_config(&self, conf_id: &str, config: &Value) -> Result<Value> {
        self.post_json(
            "/api/config/astrbot/update",
            &json!({ "conf_id": conf_id, "config": config }),
        )
        .await
    }

    pub async fn get_plugin_config(&self, plugin_name: &str) -> Result<Value> {
        self.get_json(
            "/api/config/get",
            &[("plugin_name", plugin_name.to_string())],
        )
        .await
    }

    pub async fn update_plugin_config(&self, plugin_name: &str, config: &Value) -> Result<Value> {
        self.request_json(
            Method::POST,
            "/api/config/plugin/update",
            &[("plugin_name", plugin_name.to_string())],
            Some(config),
        )
        .await
    }

    // ==================== PLUGINS ====================

    pub async fn get_plugin_market_list(
        &self,
        custom_registry: Option<&str>,
        force_refresh: bool,
    ) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(registry) = custom_registry.filter(|r| !r.is_empty()) {
            query.push(("custom_registry", registry.to_string()));
        }
        if force_refresh {
            query.push(("force_refresh", "true".to_string()));
        }
        self.get_json("/api/plugin/market_list", &query).await
    }

    pub async fn install_plugin_from_url(&self, url: &str, proxy: Option<&str>) -> Result<Value> {
        self.post_json("/api/plugin/install", &json!({ "url": url, "proxy": proxy }))
            .await
    }

    pub async fn install_plugin_from_file(&self, zip_path: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(zip_path).await?;
        let name = zip_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin.zip".to_string());
        info!("Uploading plugin archive {}", name);
        self.upload_file("/api/plugin/install-upload", bytes, &name, "application/zip")
            .await
    }

    // ==================== MCP PANEL ====================

    pub async fn get_mcp_servers(&self) -> Result<Value> {
        self.get_json("/api/tools/mcp/servers", &[]).await
    }

    pub async fn add_mcp_server(&self, payload: &Value) -> Result<Value> {
        self.post_json("/api/tools/mcp/add", payload).await
    }

    pub async fn update_mcp_server(&self, payload: &Value) -> Result<Value> {
        self.post_json("/api/tools/mcp/update", payload).await
    }

    pub async fn delete_mcp_server(&self, name: &str) -> Result<Value> {
        self.post_json("/api/tools/mcp/delete", &json!({ "name": name }))
            .await
    }

    pub async fn test_mcp_server_connection(&self, server_config: &Value) -> Result<Value> {
        self.post_json(
            "/api/tools/mcp/test",
            &json!({ "mcp_server_config": server_config }),
        )
        .await
    }

    // ==================== STAT ====================

    pub async fn restart_core(&self) -> Result<Value> {
        self.request_json(Method::POST, "/api/stat/restart-core", &[], None)
            .await
    }

    pub async fn get_version(&self) -> Result<Value> {
        self.get_json("/api/stat/version", &[]).await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Err(ApiError::Status {
        status: status.as_u16(),
        detail,
    })
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> &str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn not_event_stream(content_type: &str, raw: &str) -> ApiError {
    if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(raw) {
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let message = ["message", "error"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .unwrap_or(raw);
        return ApiError::NotEventStream(format!(
            "Expected SSE but got JSON ({}): {}",
            status, message
        ));
    }
    let content_type = if content_type.is_empty() {
        "unknown content-type"
    } else {
        content_type
    };
    ApiError::NotEventStream(format!("Expected SSE but got {}: {}", content_type, raw))
}

/// The dashboard compares MD5 hex digests; pass through values that already look hashed.
pub fn dashboard_password(password: &str) -> String {
    let pwd = password.trim();
    if looks_like_md5(pwd) {
        pwd.to_string()
    } else {
        format!("{:x}", md5::compute(pwd.as_bytes()))
    }
}

fn looks_like_md5(value: &str) -> bool {
    value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Drop MIME parameters (`; charset=...`) and reject unparsable types.
fn clean_mime(value: Option<&str>) -> Option<String> {
    let essence = value?.split(';').next()?.trim();
    if essence.is_empty() {
        return None;
    }
    essence
        .parse::<mime_guess::Mime>()
        .ok()
        .map(|m| m.essence_str().to_string())
}

fn base_name(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_matches('"');
    let name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed).trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Filename from `Content-Disposition`, preferring the RFC 5987 `filename*=` form.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    if let Some(caps) = EXTENDED_FILENAME_RE.captures(value) {
        let raw = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let decoded = urlencoding::decode(raw)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        return base_name(&decoded);
    }
    FILENAME_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| base_name(m.as_str()))
}

pub fn file_name_from_url(url: &url::Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    let decoded = urlencoding::decode(last)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| last.to_string());
    base_name(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_password_hashes_plain_text() {
        assert_eq!(
            dashboard_password("astrbot"),
            format!("{:x}", md5::compute(b"astrbot"))
        );
    }

    #[test]
    fn test_dashboard_password_keeps_existing_digest() {
        let digest = "77B0A7E2E5A9C1F8F0D4E13B7A6C2D11";
        assert_eq!(dashboard_password(digest), digest);
        assert_eq!(dashboard_password(&format!(" {} ", digest)), digest);
    }

    #[test]
    fn test_content_disposition_extended_form() {
        let name = filename_from_content_disposition(
            "attachment; filename*=UTF-8''%E4%B8%AD%E6%96%87.txt",
        );
        assert_eq!(name.as_deref(), Some("中文.txt"));
    }

    #[test]
    fn test_content_disposition_plain_form() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="../../cat.png""#).as_deref(),
            Some("cat.png")
        );
        assert_eq!(
            filename_from_content_disposition("inline; filename=report.pdf").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    #[test]
    fn test_file_name_from_url() {
        let url = url::Url::parse("https://example.com/img/a%20b.jpg?x=1").unwrap();
        assert_eq!(file_name_from_url(&url).as_deref(), Some("a b.jpg"));
        let root = url::Url::parse("https://example.com/").unwrap();
        assert_eq!(file_name_from_url(&root), None);
    }

    #[test]
    fn test_clean_mime() {
        assert_eq!(
            clean_mime(Some("image/png; charset=binary")).as_deref(),
            Some("image/png")
        );
        assert_eq!(clean_mime(Some("  ")), None);
        assert_eq!(clean_mime(Some("not a mime")), None);
        assert_eq!(clean_mime(None), None);
    }

    #[test]
    fn test_not_event_stream_uses_json_message() {
        let err = not_event_stream("application/json", r#"{"status":"error","message":"no provider"}"#);
        assert_eq!(
            err.to_string(),
            "Expected SSE but got JSON (error): no provider"
        );
        let err = not_event_stream("", "oops");
        assert_eq!(err.to_string(), "Expected SSE but got unknown content-type: oops");
    }

    #[test]
    fn test_attachment_download_url() {
        let client = AstrBotClient::new(Settings::new("http://127.0.0.1:6185/")).unwrap();
        assert_eq!(
            client.attachment_download_url("abc 1"),
            "http://127.0.0.1:6185/api/chat/get_attachment?attachment_id=abc%201"
        );
    }
}
