use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::attachment::{self, AttachError};
use super::merge;
use crate::client::AstrBotClient;
use crate::config::DirectMediaMode;
use crate::error::ApiError;
use crate::message::{file_uri, is_onebot_like, is_remote, resolve_local_path, MessagePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub enum MessageType {
    #[default]
    GroupMessage,
    FriendMessage,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupMessage => "GroupMessage",
            Self::FriendMessage => "FriendMessage",
        }
    }
}

/// Chain as sent to `/api/platform/send_message` plus the attachments
/// uploaded on the way.
type Normalized = (Vec<Value>, Vec<Value>);

/// Rewrite media parts for one attempt: remote URLs pass through, local files
/// become absolute paths (`Local`) or AstrBot-hosted URLs (`Upload`).
async fn normalize_chain(
    client: &AstrBotClient,
    chain: &[MessagePart],
    onebot: bool,
    mode: DirectMediaMode,
) -> Result<Normalized, AttachError> {
    let mut parts = Vec::with_capacity(chain.len());
    let mut uploaded = Vec::new();

    for part in chain {
        if !part.kind.is_media() {
            parts.push(serde_json::to_value(part).map_err(ApiError::from)?);
            continue;
        }
        let Some(src) = part.source() else {
            continue;
        };

        let mut normalized = part.clone();
        normalized.url = None;
        if is_remote(src) {
            normalized.file_path = Some(src.to_string());
            if onebot && normalized.file.is_none() {
                normalized.file = Some(src.to_string());
            }
        } else {
            let local = resolve_local_path(src, client.settings().file_root.as_deref())?;
            if mode == DirectMediaMode::Local {
                let local_text = local.to_string_lossy().into_owned();
                if onebot && normalized.file.is_none() {
                    normalized.file = Some(file_uri(&local).unwrap_or_else(|| local_text.clone()));
                }
                normalized.file_path = Some(local_text);
            } else {
                let file_name = part
                    .file_name
                    .clone()
                    .or_else(|| local.file_name().map(|n| n.to_string_lossy().into_owned()));
                let stored = attachment::upload_local(
                    client,
                    &local,
                    file_name.as_deref(),
                    part.mime_type.as_deref(),
                )
                .await?;
                let download_url = client.attachment_download_url(&stored.id);
                if onebot && normalized.file.is_none() {
                    normalized.file = Some(download_url.clone());
                }
                normalized.file_path = Some(download_url);
                normalized.file_name = None;
                normalized.mime_type = None;
                uploaded.push(stored.data);
            }
        }
        parts.push(serde_json::to_value(&normalized).map_err(ApiError::from)?);
    }
    Ok((parts, uploaded))
}

fn send_hint(status: Option<u16>) -> &'static str {
    match status {
        Some(404) | Some(405) => {
            "Your AstrBot may not expose /api/platform/send_message (some versions only provide \
             /api/platform/stats and /api/platform/webhook). Upgrade AstrBot or add an HTTP route for sending."
        }
        _ => "Ensure AstrBot includes /api/platform/send_message and you are authenticated.",
    }
}

/// Send a chain straight to a platform group or user, bypassing the LLM.
pub async fn send_platform_message_direct(
    client: &AstrBotClient,
    platform_id: &str,
    target_id: &str,
    chain: &[MessagePart],
    message_type: MessageType,
) -> Value {
    let onebot = is_onebot_like(platform_id);
    let mut base = Map::new();
    base.insert("platform_id".into(), platform_id.into());
    base.insert("session_id".into(), target_id.into());
    base.insert("message_type".into(), message_type.as_str().into());
    let base = Value::Object(base);

    let modes: &[DirectMediaMode] = match client.settings().direct_media_mode {
        DirectMediaMode::Auto => &[DirectMediaMode::Local, DirectMediaMode::Upload],
        DirectMediaMode::Local => &[DirectMediaMode::Local],
        DirectMediaMode::Upload => &[DirectMediaMode::Upload],
    };

    let mut last_error = None;
    for &mode in modes {
        let (parts, uploaded) = match normalize_chain(client, chain, onebot, mode).await {
            Ok(normalized) => normalized,
            Err(AttachError::Path(e)) => {
                return merge(
                    json!({ "status": "error", "message": e.to_string() }),
                    merge(base, json!({ "hint": e.hint() })),
                )
            }
            Err(e) => {
                return merge(
                    json!({ "status": "error", "message": e.to_string() }),
                    merge(base, json!({ "attempt_mode": mode.as_str() })),
                )
            }
        };
        if parts.is_empty() {
            return merge(
                json!({
                    "status": "error",
                    "message": "message_chain did not produce any valid message parts",
                }),
                base,
            );
        }

        info!(
            "Direct send to {}/{} ({} parts, {} media mode)",
            platform_id,
            target_id,
            parts.len(),
            mode.as_str()
        );
        let resp = match client
            .send_platform_message_direct(platform_id, message_type.as_str(), target_id, &parts)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let message = match e.status_code() {
                    Some(code) => format!("AstrBot API error: HTTP {}", code),
                    None => format!("AstrBot API error: {}", e),
                };
                return merge(
                    json!({ "status": "error", "message": message }),
                    merge(
                        base,
                        json!({
                            "attempt_mode": mode.as_str(),
                            "detail": e.detail(),
                            "hint": send_hint(e.status_code()),
                        }),
                    ),
                );
            }
        };

        if super::is_ok(&resp) {
            let data = super::data_of(&resp);
            let echo = |key: &str, fallback: &str| {
                data.get(key)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| fallback.into())
            };
            return json!({
                "status": "ok",
                "platform_id": echo("platform_id", platform_id),
                "session_id": echo("session_id", target_id),
                "message_type": echo("message_type", message_type.as_str()),
                "attempt_mode": mode.as_str(),
                "uploaded_attachments": uploaded,
            });
        }

        warn!(
            "Direct send with {} media mode was rejected: {:?}",
            mode.as_str(),
            resp.get("message")
        );
        last_error = Some(merge(
            json!({ "status": resp.get("status").cloned().unwrap_or(Value::Null) }),
            merge(
                base.clone(),
                json!({
                    "attempt_mode": mode.as_str(),
                    "message": resp.get("message").cloned().unwrap_or(Value::Null),
                    "raw": resp,
                }),
            ),
        ));
    }

    last_error.unwrap_or_else(|| {
        merge(
            json!({ "status": "error", "message": "Failed to send message" }),
            base,
        )
    })
}
