//! The browser surface the flow drives.
//!
//! Handlers only see the [`Page`] trait: location, element queries and
//! mutations, navigation, and a per-document token used to tell one page
//! load from the next.

mod chrome;
mod discovery;
#[cfg(test)]
pub mod fake;

pub use chrome::ChromePage;
pub use discovery::discover_ws_url;

use anyhow::Result;

use crate::notify::Severity;

/// One browser tab as seen from the automation.
///
/// Every full navigation replaces the document; [`Page::document_token`]
/// returns a fresh value afterwards and [`Page::is_live`] turns `false` for
/// tokens handed out before it.
#[allow(async_fn_in_trait)]
pub trait Page {
    async fn current_url(&mut self) -> Result<String>;

    async fn exists(&mut self, selector: &str) -> Result<bool>;

    /// Number of rendered (visible) matches.
    async fn count(&mut self, selector: &str) -> Result<usize>;

    /// Writes a form value. Returns `false` when no element matches.
    async fn set_value(&mut self, selector: &str, value: &str) -> Result<bool>;

    /// Reads a form value back. `None` when no element matches.
    async fn read_value(&mut self, selector: &str) -> Result<Option<String>>;

    /// Clicks the first match. Returns `false` when no element matches.
    async fn click(&mut self, selector: &str) -> Result<bool>;

    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Token identifying the current document, stamped on first use.
    async fn document_token(&mut self) -> Result<String>;

    /// Whether `token` still names the current document.
    async fn is_live(&mut self, token: &str) -> bool;

    /// Renders a transient status toast inside the page.
    async fn show_toast(&mut self, severity: Severity, message: &str) -> Result<()>;
}
