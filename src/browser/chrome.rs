use anyhow::{Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Page;
use crate::config::ChromeConfig;
use crate::notify::Severity;

/// Window property holding the per-document token. A full navigation
/// replaces `window`, which drops the token with it.
const TOKEN_PROP: &str = "__torrentAutopilotDoc";

/// A Chrome tab driven over the DevTools protocol.
pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    /// Attaches to a running Chrome, or launches one with a persistent
    /// profile so the operator's portal login survives between runs.
    ///
    /// `ws_url` is the websocket found by [`super::discover_ws_url`], if any.
    /// Blocking; call it from `spawn_blocking`.
    pub fn connect(config: &ChromeConfig, ws_url: Option<String>) -> Result<Self> {
        let attached = ws_url.and_then(|ws| {
            info!(%ws, "attaching to existing Chrome");
            Browser::connect(ws)
                .map_err(|e| warn!(error = %e, "attach failed"))
                .ok()
        });
        if let Some(browser) = attached {
            let tab = {
                let tabs = browser.get_tabs();
                let tabs = tabs
                    .lock()
                    .map_err(|_| anyhow!("Chrome tab list lock poisoned"))?;
                tabs.first().cloned()
            };
            let tab = match tab {
                Some(tab) => tab,
                None => browser.new_tab()?,
            };
            info!("attached to existing Chrome");
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        info!(profile = %config.profile_dir.display(), "launching Chrome");
        std::fs::create_dir_all(&config.profile_dir)?;
        let options = LaunchOptions {
            headless: config.headless,
            path: config.path.clone(),
            user_data_dir: Some(config.profile_dir.clone()),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(60 * 60),
            ..Default::default()
        };
        let browser =
            Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    fn eval(&self, expression: &str) -> Result<Option<Value>> {
        let tab = self.tab.clone();
        let result = tokio::task::block_in_place(|| tab.evaluate(expression, false))?;
        Ok(result.value)
    }

    fn eval_bool(&self, expression: &str) -> Result<bool> {
        Ok(self
            .eval(expression)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

// Encodes a Rust string as a JavaScript string literal.
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn set_value_js(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.focus();
  el.value = {val};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  el.dispatchEvent(new Event('blur', {{ bubbles: true }}));
  return true;
}})()"#,
        sel = js_str(selector),
        val = js_str(value),
    )
}

fn toast_js(severity: Severity, message: &str) -> String {
    let color = match severity {
        Severity::Info => "#2563eb",
        Severity::Success => "#16a34a",
        Severity::Warning => "#d97706",
        Severity::Error => "#dc2626",
    };
    format!(
        r#"(() => {{
  const n = document.createElement('div');
  n.textContent = {msg};
  n.style.cssText = 'position:fixed;top:20px;right:20px;z-index:2147483647;padding:12px 18px;border-radius:6px;color:#fff;font:14px sans-serif;box-shadow:0 2px 8px rgba(0,0,0,.3);background:{color}';
  (document.body || document.documentElement).appendChild(n);
  setTimeout(() => n.remove(), 5000);
  return true;
}})()"#,
        msg = js_str(message),
    )
}

impl Page for ChromePage {
    async fn current_url(&mut self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool> {
        self.eval_bool(&format!(
            "document.querySelector({}) !== null",
            js_str(selector)
        ))
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        // Hidden matches (always-present validation slots) are not counted.
        let n = self.eval(&format!(
            "Array.from(document.querySelectorAll({})).filter(el => el.getClientRects().length > 0).length",
            js_str(selector)
        ))?;
        Ok(n.and_then(|v| v.as_u64()).unwrap_or(0) as usize)
    }

    async fn set_value(&mut self, selector: &str, value: &str) -> Result<bool> {
        self.eval_bool(&set_value_js(selector, value))
    }

    async fn read_value(&mut self, selector: &str) -> Result<Option<String>> {
        let value = self.eval(&format!(
            "(() => {{ const el = document.querySelector({}); return el ? String(el.value ?? '') : null; }})()",
            js_str(selector)
        ))?;
        Ok(value.and_then(|v| v.as_str().map(String::from)))
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        let tab = self.tab.clone();
        tokio::task::block_in_place(|| match tab.find_element(selector) {
            Ok(el) => {
                el.click()?;
                Ok(true)
            }
            Err(e) => {
                debug!(selector, error = %e, "click target missing");
                Ok(false)
            }
        })
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        tokio::task::block_in_place(|| tab.navigate_to(url).map(|_| ()))
    }

    async fn document_token(&mut self) -> Result<String> {
        let fresh = Uuid::new_v4().to_string();
        let token = self.eval(&format!(
            "(() => {{ if (!window.{TOKEN_PROP}) {{ window.{TOKEN_PROP} = {}; }} return window.{TOKEN_PROP}; }})()",
            js_str(&fresh)
        ))?;
        token
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| anyhow!("document token unavailable"))
    }

    async fn is_live(&mut self, token: &str) -> bool {
        // Evaluation fails while a navigation is tearing the document down.
        self.eval_bool(&format!("window.{TOKEN_PROP} === {}", js_str(token)))
            .unwrap_or(false)
    }

    async fn show_toast(&mut self, severity: Severity, message: &str) -> Result<()> {
        self.eval(&toast_js(severity, message)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_strings_are_escaped() {
        assert_eq!(js_str("input[name='a']"), r#""input[name='a']""#);
        assert_eq!(js_str("say \"hi\"\n"), r#""say \"hi\"\n""#);
    }

    #[test]
    fn set_value_script_fires_input_events() {
        let js = set_value_js("#newName", "Ravi O'Neil");
        assert!(js.contains(r##"document.querySelector("#newName")"##));
        assert!(js.contains(r#"el.value = "Ravi O'Neil";"#));
        assert!(js.contains("new Event('input'"));
        assert!(js.contains("new Event('change'"));
    }

    #[test]
    fn toast_color_follows_severity() {
        assert!(toast_js(Severity::Error, "x").contains("#dc2626"));
        assert!(toast_js(Severity::Success, "x").contains("#16a34a"));
        assert!(toast_js(Severity::Info, "</div>").contains(r#""</div>""#));
    }
}
