use serde_json::{json, Value};

use super::{api_error, data_of, upstream_error};
use crate::client::AstrBotClient;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

pub struct ConversationFilter<'a> {
    pub page: u32,
    pub page_size: u32,
    pub platforms: Option<&'a str>,
    pub message_types: Option<&'a str>,
    pub search: Option<&'a str>,
}

pub async fn list_astrbot_conversations(
    client: &AstrBotClient,
    filter: ConversationFilter<'_>,
) -> Value {
    let page = filter.page.max(1);
    let page_size = filter.page_size.clamp(1, 100);
    let result = match client
        .list_conversations(
            page,
            page_size,
            filter.platforms,
            filter.message_types,
            filter.search,
        )
        .await
    {
        Ok(result) => result,
        Err(e) => return Value::Object(api_error(client, &e)),
    };
    if let Some(err) = upstream_error(&result) {
        return err;
    }
    let data = data_of(&result);
    json!({
        "status": "ok",
        "page": page,
        "page_size": page_size,
        "conversations": data.get("conversations").cloned().unwrap_or_else(|| json!([])),
        "pagination": data.get("pagination").cloned().unwrap_or(Value::Null),
    })
}

pub async fn get_astrbot_conversation(client: &AstrBotClient, user_id: &str, cid: &str) -> Value {
    if user_id.trim().is_empty() || cid.trim().is_empty() {
        return super::error("user_id and cid are required.");
    }
    let result = match client.get_conversation_detail(user_id, cid).await {
        Ok(result) => result,
        Err(e) => return Value::Object(api_error(client, &e)),
    };
    if let Some(err) = upstream_error(&result) {
        return err;
    }
    json!({
        "status": "ok",
        "user_id": user_id,
        "cid": cid,
        "conversation": data_of(&result),
    })
}
