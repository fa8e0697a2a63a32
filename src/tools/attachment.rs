//! Uploads through `/api/chat/post_file`, shared by both send paths

use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::client::AstrBotClient;
use crate::error::ApiError;
use crate::message::{id_text, LocalPathError};

#[derive(Error, Debug)]
pub enum AttachError {
    #[error(transparent)]
    Path(#[from] LocalPathError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// AstrBot answered with a non-ok envelope
    #[error("{message}")]
    Rejected { message: String, raw: Value },

    #[error("Attachment upload succeeded but attachment_id is missing")]
    MissingId { raw: Value },
}

/// A stored attachment: its id and the `data` object AstrBot returned.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: String,
    pub data: Value,
}

impl Attachment {
    /// The attachment's own `type`, if AstrBot reported one.
    pub fn kind(&self) -> Option<&str> {
        self.data
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }
}

pub fn accept(resp: Value) -> Result<Attachment, AttachError> {
    if resp.get("status").and_then(Value::as_str) != Some("ok") {
        let message = resp
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("Attachment upload failed")
            .to_string();
        return Err(AttachError::Rejected { message, raw: resp });
    }
    let data = resp.get("data").cloned().unwrap_or(Value::Null);
    let id = data
        .get("attachment_id")
        .filter(|v| !v.is_null())
        .map(id_text)
        .filter(|id| !id.is_empty());
    match id {
        Some(id) => Ok(Attachment { id, data }),
        None => Err(AttachError::MissingId { raw: resp }),
    }
}

pub async fn upload_local(
    client: &AstrBotClient,
    path: &Path,
    file_name: Option<&str>,
    mime_type: Option<&str>,
) -> Result<Attachment, AttachError> {
    let resp = client.post_attachment_file(path, file_name, mime_type).await?;
    accept(resp)
}

pub async fn upload_remote(
    client: &AstrBotClient,
    url: &str,
    file_name: Option<&str>,
    mime_type: Option<&str>,
) -> Result<Attachment, AttachError> {
    let resp = client.post_attachment_url(url, file_name, mime_type).await?;
    accept(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accept_reads_attachment_id() {
        let att = accept(json!({"status": "ok", "data": {"attachment_id": 7, "type": "image"}})).unwrap();
        assert_eq!(att.id, "7");
        assert_eq!(att.kind(), Some("image"));
    }

    #[test]
    fn test_accept_rejections() {
        let err = accept(json!({"status": "error", "message": "too big"})).unwrap_err();
        assert_eq!(err.to_string(), "too big");
        let err = accept(json!({"status": "error"})).unwrap_err();
        assert_eq!(err.to_string(), "Attachment upload failed");
        let err = accept(json!({"status": "ok", "data": {}})).unwrap_err();
        assert!(matches!(err, AttachError::MissingId { .. }));
    }
}
