use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{api_error, is_ok};
use crate::client::AstrBotClient;

/// How long to wait for AstrBot to come back after a restart.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolling {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for RestartPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
        }
    }
}

/// Restart AstrBot core and wait until `/api/stat/version` answers again.
pub async fn restart_astrbot(client: &AstrBotClient, polling: RestartPolling) -> Value {
    let restart = match client.restart_core().await {
        Ok(resp) => resp,
        Err(e) => return Value::Object(api_error(client, &e)),
    };
    if !is_ok(&restart) {
        return restart;
    }
    info!("AstrBot restart requested, waiting for it to come back");

    let mut elapsed = Duration::ZERO;
    while elapsed < polling.max_wait {
        match client.get_version().await {
            Ok(version) if is_ok(&version) => {
                info!("AstrBot is back after {}s", elapsed.as_secs());
                return json!({
                    "status": "ok",
                    "message": "AstrBot 重启成功",
                    "restart_response": restart,
                    "wait_time": elapsed.as_secs(),
                });
            }
            Ok(_) => debug!("AstrBot version check not ok yet"),
            Err(e) => debug!("AstrBot still restarting: {}", e),
        }
        tokio::time::sleep(polling.interval).await;
        elapsed += polling.interval;
    }

    json!({
        "status": "error",
        "message": format!(
            "AstrBot 重启超时（等待 {} 秒后仍未响应）",
            polling.max_wait.as_secs()
        ),
        "restart_response": restart,
        "wait_time": elapsed.as_secs(),
    })
}
