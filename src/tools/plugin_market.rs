use serde_json::{json, Value};
use tracing::warn;

use super::{api_error, data_of, error, is_ok, merge};
use crate::client::AstrBotClient;
use crate::market::{self, MarketQuery};

/// Browse the plugin market through AstrBot, or straight from `registry_url`
/// when AstrBot cannot be reached.
pub async fn browse_plugin_market(
    client: &AstrBotClient,
    request: &MarketQuery,
    custom_registry: Option<&str>,
    force_refresh: bool,
    registry_url: &str,
) -> Value {
    if let Err(message) = request.validate() {
        return error(message);
    }

    match client
        .get_plugin_market_list(custom_registry, force_refresh)
        .await
    {
        Ok(result) if is_ok(&result) => market::build_listing(data_of(&result), request, "astrbot"),
        Ok(result) => json!({
            "status": result.get("status").cloned().unwrap_or_else(|| "error".into()),
            "message": result
                .get("message")
                .filter(|m| !m.is_null())
                .cloned()
                .unwrap_or_else(|| "AstrBot returned non-ok status.".into()),
            "raw": result,
        }),
        Err(e) => {
            warn!("Plugin market via AstrBot failed ({}), using {}", e, registry_url);
            match market::fetch_default_registry(registry_url, client.timeout()).await {
                Ok(raw) => market::build_listing(&raw, request, "remote"),
                Err(fallback) => merge(
                    Value::Object(api_error(client, &e)),
                    json!({
                        "hint": client.connect_hint(),
                        "fallback_error": fallback.to_string(),
                    }),
                ),
            }
        }
    }
}
