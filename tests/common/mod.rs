//! In-process fake AstrBot dashboard for integration tests

#![allow(dead_code)]

use astrbot_mcp::{AstrBotClient, Settings};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "astrbot";
pub const PASSWORD: &str = "secret";

pub const INBOUND_LINE: &str = "[14:23:11] [Core] [INFO] [core.event_bus:59]: [default] \
                                [aiocqhttp(napcat)] Alice/123456: hello there";
pub const OUTBOUND_LINE: &str =
    "[14:23:13] [Core] [INFO] [respond.stage:168]: Prepare to send - Alice/123456: hi Alice";

/// Mutable state behind the fake; tests read it to check what was sent.
#[derive(Debug)]
pub struct FakeState {
    pub require_auth: bool,
    pub logins: usize,
    pub token_generation: usize,
    pub config: Value,
    pub config_updates: Vec<Value>,
    pub chat_payloads: Vec<Value>,
    pub direct_payloads: Vec<Value>,
    pub rule_updates: Vec<Value>,
    pub route_updates: Vec<Value>,
    pub version_failures_left: usize,
    pub restarts: usize,
    pub logs_down: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            require_auth: false,
            logins: 0,
            token_generation: 1,
            config: json!({
                "provider_settings": {
                    "enable": false,
                    "wake_prefix": "",
                    "api_key": "sk-secret"
                },
                "platform": [
                    {"id": "napcat", "type": "aiocqhttp", "enable": true}
                ],
                "plugins": []
            }),
            config_updates: Vec::new(),
            chat_payloads: Vec::new(),
            direct_payloads: Vec::new(),
            rule_updates: Vec::new(),
            route_updates: Vec::new(),
            version_failures_left: 0,
            restarts: 0,
            logs_down: false,
        }
    }
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeAstrBot {
    pub base_url: String,
    pub state: Shared,
}

impl FakeAstrBot {
    pub async fn start() -> Self {
        Self::start_with(FakeState::default()).await
    }

    pub async fn start_with(state: FakeState) -> Self {
        let state: Shared = Arc::new(Mutex::new(state));
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake AstrBot");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings::new(&self.base_url)
    }

    pub fn settings_with_login(&self) -> Settings {
        let mut settings = self.settings();
        settings.username = Some(USERNAME.to_string());
        settings.password = Some(PASSWORD.to_string());
        settings
    }

    pub fn client(&self) -> AstrBotClient {
        AstrBotClient::new(self.settings()).expect("client")
    }

    pub fn registry_url(&self) -> String {
        format!("{}/registry", self.base_url)
    }

    /// Invalidate every issued token, as a dashboard restart would.
    pub fn revoke_tokens(&self) {
        self.state.lock().unwrap().token_generation += 1;
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

/// A client pointed at a port nothing listens on.
pub fn unreachable_client() -> AstrBotClient {
    let mut settings = Settings::new("http://127.0.0.1:9");
    settings.timeout = std::time::Duration::from_secs(2);
    AstrBotClient::new(settings).expect("client")
}

pub fn registry() -> Value {
    json!({
        "astrbot_plugin_weather": {
            "display_name": "Weather",
            "desc": "Weather forecast",
            "author": "alice",
            "tags": ["tools"],
            "stars": 12,
            "updated_at": "2025-03-01T10:00:00Z"
        },
        "astrbot_plugin_music": {
            "name": "music",
            "desc": "Play music",
            "stars": 40,
            "updated_at": "2025-05-01T08:00:00Z"
        },
        "astrbot_plugin_dice": {
            "name": "dice",
            "desc": "Roll dice for tabletop games",
            "stars": 3,
            "updated_at": "2024-12-24T00:00:00Z"
        }
    })
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/log-history", get(log_history))
        .route("/api/live-log", get(live_log))
        .route("/api/config/platform/list", get(platform_list))
        .route("/api/chat/new_session", get(new_session))
        .route("/api/chat/get_session", get(get_session))
        .route("/api/chat/send", post(chat_send))
        .route("/api/chat/post_file", post(post_file))
        .route("/api/config/abconfs", get(abconfs))
        .route("/api/config/abconf", get(abconf))
        .route("/api/config/astrbot/update", post(update_config))
        .route("/api/config/umo_abconf_routes", get(umo_routes))
        .route("/api/config/umo_abconf_route/update", post(update_route))
        .route("/api/session/list-rule", get(list_rules))
        .route("/api/session/update-rule", post(update_rule))
        .route("/api/plugin/market_list", get(market_list))
        .route("/api/stat/restart-core", post(restart_core))
        .route("/api/stat/version", get(version))
        .route("/api/platform/send_message", post(direct_send))
        .route("/registry", get(|| async { Json(registry()) }))
        .with_state(state)
}

fn ok(data: Value) -> Response {
    Json(json!({ "status": "ok", "message": null, "data": data })).into_response()
}

fn guard(state: &Shared, headers: &HeaderMap) -> Result<(), Response> {
    let state = state.lock().unwrap();
    if !state.require_auth {
        return Ok(());
    }
    let expected = format!("Bearer token-{}", state.token_generation);
    let given = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if given == expected {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, Json(json!({"status": "error", "message": "Unauthorized"})))
            .into_response())
    }
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let digest = format!("{:x}", md5::compute(PASSWORD.as_bytes()));
    let mut state = state.lock().unwrap();
    if body["username"] == json!(USERNAME) && body["password"] == json!(digest) {
        state.logins += 1;
        ok(json!({ "token": format!("token-{}", state.token_generation), "username": USERNAME }))
    } else {
        Json(json!({"status": "error", "message": "用户名或密码错误"})).into_response()
    }
}

async fn log_history(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    if state.lock().unwrap().logs_down {
        return (StatusCode::INTERNAL_SERVER_ERROR, "log broker unavailable").into_response();
    }
    ok(json!({
        "logs": [
            {"type": "log", "level": "INFO", "time": 1700000000.0, "data": "[14:23:10] [Core] [INFO] started"},
            {"type": "log", "level": "INFO", "time": 1700000001.0, "data": INBOUND_LINE},
            {"type": "log", "level": "INFO", "time": 1700000003.0, "data": OUTBOUND_LINE},
        ]
    }))
}

async fn live_log(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let events: Vec<Result<Event, Infallible>> = (1..=3)
        .map(|i| Ok(Event::default().data(json!({"type": "log", "data": format!("line {}", i)}).to_string())))
        .chain(std::iter::once(Ok(Event::default().data("not json"))))
        .collect();
    Sse::new(futures::stream::iter(events)).into_response()
}

async fn platform_list(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(json!({ "platforms": [{"id": "webchat", "type": "webchat"}, {"id": "napcat", "type": "aiocqhttp"}] }))
}

async fn new_session(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(json!({ "session_id": "sess-1", "platform_id": "webchat" }))
}

async fn get_session(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    match query.get("session_id").map(String::as_str) {
        Some("sess-1") => ok(json!({
            "history": [
                {"id": 7, "sender_name": "AstrBot", "content": {"type": "bot", "message": [{"type": "plain", "text": "earlier answer"}]}},
            ],
            "is_running": false,
        })),
        Some("missing") => Json(json!({"status": "error", "message": "session not found"})).into_response(),
        _ => ok(json!({ "history": [], "is_running": false })),
    }
}

async fn chat_send(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let text = body["message"]
        .as_array()
        .and_then(|parts| parts.iter().find_map(|p| p["text"].as_str()))
        .unwrap_or("")
        .to_string();
    state.lock().unwrap().chat_payloads.push(body);

    if text == "no provider" {
        return Json(json!({"status": "error", "message": "no provider configured"})).into_response();
    }
    let events = if text == "bookkeeping only" {
        vec![json!({"type": "session_id", "data": null})]
    } else {
        vec![
            json!({"type": "user_message_saved", "data": {"id": 11}}),
            json!({"type": "plain", "data": "Hello", "streaming": true}),
            json!({"type": "plain", "data": " there", "streaming": true}),
            json!({"type": "message_saved", "data": {"id": 12}}),
            json!({"type": "end", "data": ""}),
        ]
    };
    let events: Vec<Result<Event, Infallible>> = events
        .into_iter()
        .map(|e| Ok(Event::default().data(e.to_string())))
        .collect();
    Sse::new(futures::stream::iter(events)).into_response()
}

async fn post_file(State(state): State<Shared>, headers: HeaderMap, _body: Bytes) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(json!({ "attachment_id": "att-1", "type": "image", "filename": "upload.png" }))
}

async fn abconfs(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(json!({ "info_list": [{"id": "default", "name": "default", "path": "cmd_config.json"}] }))
}

async fn abconf(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let system = query.get("system_config").is_some_and(|v| v == "1");
    if !system && query.get("id").map(String::as_str) != Some("default") {
        return Json(json!({"status": "error", "message": "config not found"})).into_response();
    }
    let config = state.lock().unwrap().config.clone();
    ok(json!({ "config": config, "metadata": {} }))
}

async fn update_config(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let mut state = state.lock().unwrap();
    state.config = body["config"].clone();
    state.config_updates.push(body);
    Json(json!({"status": "ok", "message": "保存成功~", "data": null})).into_response()
}

async fn umo_routes(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(json!({ "routing": {} }))
}

async fn update_route(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    state.lock().unwrap().route_updates.push(body);
    ok(Value::Null)
}

async fn list_rules(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(json!({
        "rules": [
            {"umo": "webchat:FriendMessage:webchat!astrbot!old", "rules": {"provider_perf_chat_completion": "openai_1"}}
        ],
        "total": 1
    }))
}

async fn update_rule(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    state.lock().unwrap().rule_updates.push(body);
    ok(Value::Null)
}

async fn market_list(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    ok(registry())
}

async fn restart_core(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let mut state = state.lock().unwrap();
    state.restarts += 1;
    state.version_failures_left = 2;
    Json(json!({"status": "ok", "message": "重启中", "data": null})).into_response()
}

async fn version(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let mut state = state.lock().unwrap();
    if state.version_failures_left > 0 {
        state.version_failures_left -= 1;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ok(json!({ "version": "v4.5.0" }))
}

async fn direct_send(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = guard(&state, &headers) {
        return denied;
    }
    let echo = json!({
        "platform_id": body["platform_id"],
        "session_id": body["session_id"],
        "message_type": body["message_type"],
    });
    state.lock().unwrap().direct_payloads.push(body);
    ok(echo)
}
