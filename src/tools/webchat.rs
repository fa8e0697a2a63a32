//! `send_platform_message`: talk to AstrBot the way the dashboard's WebChat does

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::attachment::{self, AttachError};
use super::direct::{self, MessageType};
use super::{api_error, data_of, is_ok, log_tail, merge, DEFAULT_LOG_TAIL};
use crate::client::AstrBotClient;
use crate::error::Result;
use crate::jsonpath::type_name;
use crate::message::{
    id_text, is_recent_user_record, is_remote, normalize_history_message_id, quote_blocks,
    resolve_local_path, summarize_reply_events, MessagePart, PartType, SessionCache,
};

const WEBCHAT: &str = "webchat";

/// Everything `send_platform_message` accepts once the chain is assembled.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub platform_id: String,
    pub chain: Vec<MessagePart>,
    /// Group/user id on a real platform; switches to a direct send
    pub target_id: Option<String>,
    pub message_type: MessageType,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub use_last_session: bool,
    pub new_session: bool,
    pub reply_to_message_id: Option<String>,
    pub reply_to_last_saved_message: bool,
    pub reply_to_last_user_message: bool,
    pub selected_provider: Option<String>,
    pub selected_model: Option<String>,
    pub enable_streaming: bool,
}

impl SendRequest {
    pub fn new(platform_id: impl Into<String>, chain: Vec<MessagePart>) -> Self {
        Self {
            platform_id: platform_id.into(),
            chain,
            target_id: None,
            message_type: MessageType::default(),
            session_id: None,
            conversation_id: None,
            use_last_session: true,
            new_session: false,
            reply_to_message_id: None,
            reply_to_last_saved_message: false,
            reply_to_last_user_message: false,
            selected_provider: None,
            selected_model: None,
            enable_streaming: true,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Send through WebChat (`/api/chat/send`), or directly to a platform target
/// when `target_id` is set.
pub async fn send_platform_message(
    client: &AstrBotClient,
    cache: &SessionCache,
    req: &SendRequest,
) -> Value {
    if let Some(target) = non_blank(&req.target_id) {
        let result = direct::send_platform_message_direct(
            client,
            &req.platform_id,
            target,
            &req.chain,
            req.message_type,
        )
        .await;
        return merge(json!({ "mode": "direct" }), result);
    }

    let settings = client.settings();
    let sent_at = Utc::now();
    let context = json!({
        "mode": "webchat",
        "platform_id": WEBCHAT,
        "requested_platform_id": req.platform_id,
    });

    let (session_id, session_reused) = match ensure_session(client, cache, req, &context).await {
        Ok(session) => session,
        Err(err) => return err,
    };

    let mut routing = Map::new();
    match settings.username.as_deref() {
        Some(username) => mirror_routing(client, username, &session_id, &mut routing).await,
        None => {
            routing.insert(
                "skipped".into(),
                "No ASTRBOT_USERNAME configured; cannot mirror dashboard session routing.".into(),
            );
        }
    }

    let mut reply_to = non_blank(&req.reply_to_message_id).map(str::to_string);
    if req.reply_to_last_user_message && reply_to.is_none() {
        reply_to = cache.last_user_message(settings, &session_id);
    }
    if req.reply_to_last_saved_message && reply_to.is_none() {
        reply_to = cache.last_saved_message(settings, &session_id);
    }
    let explicit_reply = req
        .chain
        .iter()
        .any(|p| p.kind == PartType::Reply && p.reply_id().is_some());

    let mut parts = Vec::new();
    let mut reply_ids = Vec::new();
    if let Some(rid) = reply_to.filter(|_| !explicit_reply) {
        parts.push(json!({
            "type": "reply",
            "message_id": normalize_history_message_id(&Value::String(rid.clone())),
        }));
        reply_ids.push(rid);
    }

    let mut uploaded = Vec::new();
    for part in &req.chain {
        match part.kind {
            PartType::Plain => parts.push(json!({
                "type": "plain",
                "text": part.text.clone().unwrap_or_default(),
            })),
            PartType::Reply => {
                if let Some(rid) = part.reply_id() {
                    parts.push(json!({
                        "type": "reply",
                        "message_id": normalize_history_message_id(&Value::String(rid.clone())),
                    }));
                    reply_ids.push(rid);
                }
            }
            kind => {
                let Some(src) = part.source() else {
                    continue;
                };
                match upload_part(client, part, src).await {
                    Ok(stored) => {
                        parts.push(json!({
                            "type": stored.kind().unwrap_or(kind.as_str()),
                            "attachment_id": stored.id,
                        }));
                        uploaded.push(stored.data);
                    }
                    Err(e) => return upload_error(client, e, &req.platform_id, &session_id, part),
                }
            }
        }
    }

    let quote_debug = if reply_ids.is_empty() {
        Value::Null
    } else {
        resolve_quotes(client, &session_id, &reply_ids).await
    };
    let debug_fields = |routing: &Map<String, Value>| {
        json!({
            "quote_debug": quote_debug,
            "routing_debug": routing,
        })
    };

    if parts.is_empty() {
        return merge(
            merge(
                json!({
                    "status": "error",
                    "message": "message_chain did not produce any valid message parts",
                }),
                context,
            ),
            debug_fields(&routing),
        );
    }

    // Explicit choice wins; otherwise a copied session rule picks the provider,
    // and only without one do the configured defaults apply.
    let (provider, model) = if req.selected_provider.is_none()
        && req.selected_model.is_none()
        && !routing.contains_key("provider_rule_key")
    {
        (
            settings.default_provider.clone(),
            settings.default_model.clone(),
        )
    } else {
        (req.selected_provider.clone(), req.selected_model.clone())
    };
    let sent = merge(
        context.clone(),
        json!({
            "session_id": session_id,
            "selected_provider": provider,
            "selected_model": model,
            "request_message_parts": parts,
        }),
    );

    info!(
        "Sending {} parts to WebChat session {} (provider: {:?})",
        parts.len(),
        session_id,
        provider
    );
    let events = match client
        .send_chat_message_sse(
            &session_id,
            &parts,
            provider.as_deref(),
            model.as_deref(),
            req.enable_streaming,
        )
        .await
    {
        Ok(events) => events,
        Err(e) => {
            let message = match e.status_code() {
                Some(code) => format!("AstrBot API error: HTTP {}", code),
                None => format!("AstrBot API error: {}", e),
            };
            let tail = log_tail(client, DEFAULT_LOG_TAIL).await;
            return merge(
                merge(json!({ "status": "error", "message": message }), sent),
                merge(
                    json!({
                        "detail": e.detail(),
                        "astrbot_logs_tail": tail,
                        "hint": "If you see 'has no provider supported' in AstrBot logs, \
                                 set selected_provider/selected_model (or env ASTRBOT_DEFAULT_PROVIDER/ASTRBOT_DEFAULT_MODEL).",
                    }),
                    debug_fields(&routing),
                ),
            );
        }
    };

    if events.is_empty() {
        let tail = log_tail(client, DEFAULT_LOG_TAIL).await;
        return merge(
            merge(
                json!({
                    "status": "error",
                    "message": "AstrBot returned no SSE events for /api/chat/send",
                }),
                sent,
            ),
            merge(
                json!({
                    "astrbot_logs_tail": tail,
                    "hint": "Check AstrBot logs for the root cause (often provider/model config).",
                }),
                debug_fields(&routing),
            ),
        );
    }

    let mut summary = summarize_reply_events(&events);
    if !summary.has_response {
        // Plugins that answer through side effects only emit bookkeeping events.
        warn!("No reply events on /api/chat/send for session {}", session_id);
        let tail = log_tail(client, DEFAULT_LOG_TAIL).await;
        return merge(
            merge(
                json!({
                    "status": "ok",
                    "warning": "No reply events were observed on the /api/chat/send SSE stream; \
                                check AstrBot logs if you expected an LLM reply.",
                }),
                sent,
            ),
            merge(
                json!({
                    "user_message_ids": summary.user_message_ids,
                    "last_user_message_id": summary.user_message_ids.last(),
                }),
                merge(
                    debug_fields(&routing),
                    json!({ "reply_events": events, "astrbot_logs_tail": tail }),
                ),
            ),
        );
    }

    if let Some(last) = summary.user_message_ids.last() {
        cache.remember_user_message(settings, &session_id, last);
    } else {
        // Older AstrBot versions never emit `user_message_saved`.
        let hint = parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("plain"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .map(str::trim)
            .find(|t| !t.is_empty());
        match find_user_message_id(client, &session_id, hint, sent_at).await {
            Ok(Some(id)) => {
                cache.remember_user_message(settings, &session_id, &id);
                summary.user_message_ids.push(id);
            }
            Ok(None) => debug!("No matching user record in session {}", session_id),
            Err(e) => {
                routing.insert("user_id_fallback_exception".into(), e.to_string().into());
            }
        }
    }

    let last_saved = summary.saved_message_ids.last().cloned();
    if let Some(last) = &last_saved {
        cache.remember_saved_message(settings, &session_id, last);
    }

    json!({
        "status": "ok",
        "mode": "webchat",
        "platform_id": WEBCHAT,
        "requested_platform_id": req.platform_id,
        "session_id": session_id,
        "conversation_id": session_id,
        "session_reused": session_reused,
        "selected_provider": provider,
        "selected_model": model,
        "request_message_parts": parts,
        "uploaded_attachments": uploaded,
        "reply_events": events,
        "reply_text": summary.reply_text,
        "user_message_ids": summary.user_message_ids,
        "last_user_message_id": summary.user_message_ids.last(),
        "saved_message_ids": summary.saved_message_ids,
        "last_saved_message_id": last_saved,
        "quote_debug": quote_debug,
        "routing_debug": routing,
    })
}

/// Pick the session to post into: explicit id, then the cached one, then a
/// freshly created WebChat session.
async fn ensure_session(
    client: &AstrBotClient,
    cache: &SessionCache,
    req: &SendRequest,
    context: &Value,
) -> std::result::Result<(String, bool), Value> {
    let settings = client.settings();
    let explicit = non_blank(&req.session_id).or_else(|| non_blank(&req.conversation_id));

    if let Some(session_id) = explicit {
        cache.remember_session(settings, WEBCHAT, session_id);
        if !req.new_session {
            return Ok((session_id.to_string(), false));
        }
    } else if req.use_last_session && !req.new_session {
        if let Some(cached) = cache.last_session(settings, WEBCHAT) {
            return Ok((cached, true));
        }
    }

    let resp = match client.create_platform_session(Some(WEBCHAT)).await {
        Ok(resp) => resp,
        Err(e) => {
            let mut err = api_error(client, &e);
            let detail = err.remove("detail").unwrap_or(Value::Null);
            let base_url = err.remove("base_url").unwrap_or(Value::Null);
            return Err(merge(
                merge(Value::Object(err), context.clone()),
                json!({ "base_url": base_url, "detail": detail }),
            ));
        }
    };
    if let Some(err) = super::upstream_error(&resp) {
        return Err(err);
    }
    let session_id = data_of(&resp)
        .get("session_id")
        .filter(|v| !v.is_null())
        .map(id_text)
        .filter(|s| !s.is_empty());
    let Some(session_id) = session_id else {
        return Err(json!({
            "status": "error",
            "message": "Failed to create platform session: missing session_id",
            "raw": resp,
        }));
    };
    info!("Created WebChat session {}", session_id);
    cache.remember_session(settings, WEBCHAT, &session_id);
    Ok((session_id, false))
}

async fn upload_part(
    client: &AstrBotClient,
    part: &MessagePart,
    src: &str,
) -> std::result::Result<attachment::Attachment, AttachError> {
    let file_name = part.file_name.as_deref();
    let mime_type = part.mime_type.as_deref();
    if is_remote(src) {
        return attachment::upload_remote(client, src, file_name, mime_type).await;
    }
    let local = resolve_local_path(src, client.settings().file_root.as_deref())?;
    attachment::upload_local(client, &local, file_name, mime_type).await
}

fn upload_error(
    client: &AstrBotClient,
    err: AttachError,
    platform_id: &str,
    session_id: &str,
    part: &MessagePart,
) -> Value {
    match err {
        AttachError::Path(e) => json!({
            "status": "error",
            "message": e.to_string(),
            "platform_id": platform_id,
            "session_id": session_id,
            "part": part,
            "hint": e.hint(),
        }),
        AttachError::Api(e) => {
            let err = api_error(client, &e);
            json!({
                "status": "error",
                "message": err.get("message"),
                "platform_id": platform_id,
                "session_id": session_id,
                "base_url": client.base_url(),
                "detail": err.get("detail"),
            })
        }
        AttachError::Rejected { message, raw } => json!({
            "status": raw.get("status").cloned().unwrap_or_else(|| "error".into()),
            "message": message,
            "raw": raw,
        }),
        AttachError::MissingId { raw } => json!({
            "status": "error",
            "message": "Attachment upload succeeded but attachment_id is missing",
            "raw": raw,
        }),
    }
}

async fn resolve_quotes(client: &AstrBotClient, session_id: &str, reply_ids: &[String]) -> Value {
    let resp = match client.get_platform_session(session_id).await {
        Ok(resp) => resp,
        Err(e) => {
            return json!({ "error": e.to_string(), "resolved": {}, "missing": reply_ids });
        }
    };
    if !is_ok(&resp) {
        return json!({
            "status": resp.get("status"),
            "message": resp.get("message"),
            "raw": resp,
        });
    }
    let items: &[Value] = match data_of(&resp).get("history") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(other) => {
            return json!({
                "resolved": {},
                "missing": reply_ids,
                "raw_history_type": type_name(other),
            })
        }
    };
    let (text, debug) = quote_blocks(items, reply_ids);
    merge(debug, json!({ "quote_text": text }))
}

/// Newest user record in the session history that looks like what we just sent.
async fn find_user_message_id(
    client: &AstrBotClient,
    session_id: &str,
    match_hint: Option<&str>,
    sent_at: DateTime<Utc>,
) -> Result<Option<String>> {
    let resp = client.get_platform_session(session_id).await?;
    if !is_ok(&resp) {
        return Ok(None);
    }
    let Some(history) = data_of(&resp).get("history").and_then(Value::as_array) else {
        return Ok(None);
    };
    let expected_sender = client
        .settings()
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    Ok(history
        .iter()
        .rev()
        .filter(|item| is_recent_user_record(item, expected_sender, match_hint, sent_at))
        .find_map(|item| item.get("id").filter(|v| !v.is_null()).map(id_text)))
}

// ==================== ROUTING MIRROR ====================

/// Reproduce what the dashboard does for a new WebChat session: route its UMO
/// to a config and copy a chat provider rule from an existing session.
async fn mirror_routing(
    client: &AstrBotClient,
    username: &str,
    session_id: &str,
    debug: &mut Map<String, Value>,
) {
    let username = match username.trim() {
        "" => "astrbot",
        name => name,
    };
    let prefix = format!("webchat:FriendMessage:webchat!{}!", username);
    let umo = format!("{}{}", prefix, session_id);
    debug.insert("umo".into(), umo.clone().into());

    if let Err(e) = ensure_route(client, &umo, &prefix, debug).await {
        warn!("Could not mirror UMO route for {}: {}", umo, e);
        debug.insert("ucr_exception".into(), e.to_string().into());
    }
    if let Err(e) = copy_provider_rule(client, &umo, username, debug).await {
        warn!("Could not copy provider rule for {}: {}", umo, e);
        debug.insert("session_rules_exception".into(), e.to_string().into());
    }
}

async fn ensure_route(
    client: &AstrBotClient,
    umo: &str,
    prefix: &str,
    debug: &mut Map<String, Value>,
) -> Result<()> {
    let resp = client.get_umo_abconf_routes().await?;
    let ok = is_ok(&resp);
    debug.insert("ucr_get".into(), if ok { Value::Null } else { resp.clone() });
    if !ok {
        return Ok(());
    }
    let Some(routing) = data_of(&resp).get("routing").and_then(Value::as_object) else {
        return Ok(());
    };
    if routing.contains_key(umo) {
        debug.insert("ucr_has_route".into(), true.into());
        return Ok(());
    }
    debug.insert("ucr_has_route".into(), false.into());

    let mut conf_id = routing
        .iter()
        .find(|(key, _)| key.starts_with(prefix))
        .map(|(_, conf)| id_text(conf));
    if conf_id.is_none() {
        let abconfs = client.get_abconf_list().await?;
        conf_id = pick_abconf(data_of(&abconfs).get("info_list"));
        debug.insert("abconf_pick".into(), conf_id.clone().into());
    }
    if let Some(conf_id) = conf_id {
        let update = client.update_umo_abconf_route(umo, &conf_id).await?;
        debug.insert("ucr_update".into(), update);
    }
    Ok(())
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

/// The active config if one is flagged, else the first with an id.
fn pick_abconf(info_list: Option<&Value>) -> Option<String> {
    let items: Vec<&Map<String, Value>> = info_list?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .collect();
    let conf_id = |item: &&Map<String, Value>| {
        ["id", "conf_id"]
            .iter()
            .map(|k| item.get(*k))
            .find(|v| truthy(*v))
            .flatten()
            .map(id_text)
    };
    items
        .iter()
        .filter(|item| ["active", "current", "is_current"].iter().any(|k| truthy(item.get(*k))))
        .find_map(conf_id)
        .or_else(|| items.iter().find_map(conf_id))
}

async fn copy_provider_rule(
    client: &AstrBotClient,
    umo: &str,
    username: &str,
    debug: &mut Map<String, Value>,
) -> Result<()> {
    let search = format!("webchat!{}!", username);
    let resp = client.list_session_rules(1, 100, Some(&search)).await?;
    let ok = is_ok(&resp);
    debug.insert("session_rules_get".into(), if ok { Value::Null } else { resp.clone() });
    if !ok {
        return Ok(());
    }
    let Some((source_umo, key, value)) = find_provider_rule(data_of(&resp).get("rules")) else {
        return Ok(());
    };
    let update = client.update_session_rule(umo, &key, &value).await?;
    debug.insert("provider_rule_copied_from".into(), source_umo);
    debug.insert("provider_rule_key".into(), key.into());
    debug.insert("provider_rule_update".into(), update);
    Ok(())
}

/// First `provider_perf_*chat*` rule of any listed session: `(umo, key, value)`.
fn find_provider_rule(rules: Option<&Value>) -> Option<(Value, String, Value)> {
    rules?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find_map(|item| {
            let rules = item.get("rules")?.as_object()?;
            let (key, value) = rules
                .iter()
                .find(|(k, _)| k.starts_with("provider_perf_") && k.contains("chat"))?;
            if value.is_null() {
                return None;
            }
            Some((
                item.get("umo").cloned().unwrap_or(Value::Null),
                key.clone(),
                value.clone(),
            ))
        })
}
