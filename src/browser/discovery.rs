//! Finds the DevTools websocket of an already running Chrome.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::AutopilotError;

#[derive(Debug, Deserialize)]
struct JsonVersion {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Asks `<debug_url>/json/version` for the browser websocket URL.
///
/// A `ws://` URL is returned as is.
pub async fn discover_ws_url(debug_url: &str) -> Result<String, AutopilotError> {
    if debug_url.starts_with("ws://") || debug_url.starts_with("wss://") {
        return Ok(debug_url.to_string());
    }

    let url = format!("{}/json/version", debug_url.trim_end_matches('/'));
    debug!(%url, "requesting Chrome version info");

    let client = Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(5))
        .build()?;
    let response = client.get(&url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AutopilotError::Browser(format!(
            "{url} returned {}",
            status.as_u16()
        )));
    }

    let body = response.json::<JsonVersion>().await?;
    Ok(body.web_socket_debugger_url)
}
