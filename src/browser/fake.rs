//! Scripted in-memory page for router and handler tests.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use super::Page;
use crate::notify::Severity;

/// A change applied to the fake document.
#[derive(Debug, Clone)]
pub enum Scripted {
    Insert(String),
    Remove(String),
    /// In-document route change (no new document).
    SetUrl(String),
    /// Full page load.
    Navigate(String),
}

/// What a URL renders when the fake navigates to it.
#[derive(Debug, Clone, Default)]
pub struct FakeDocument {
    pub selectors: Vec<String>,
    /// Changes applied after the given number of liveness checks.
    pub timeline: Vec<(u32, Scripted)>,
}

impl FakeDocument {
    pub fn with(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            timeline: Vec::new(),
        }
    }

    pub fn then(mut self, tick: u32, change: Scripted) -> Self {
        self.timeline.push((tick, change));
        self
    }
}

#[derive(Default)]
pub struct FakePage {
    pub url: String,
    elements: HashMap<String, String>,
    /// Extra copies of an inserted selector beyond the first.
    copies: HashMap<String, usize>,
    site: HashMap<String, FakeDocument>,
    timeline: Vec<(u32, Scripted)>,
    ticks: u32,
    generation: u64,
    token: Option<String>,
    /// Selectors whose inputs silently drop written values.
    pub rejecting: HashSet<String>,
    /// Effects of clicking a selector.
    pub on_click: HashMap<String, Vec<Scripted>>,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub writes: Vec<(String, String)>,
    pub toasts: Vec<(Severity, String)>,
}

impl FakePage {
    pub fn at(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Registers the document a URL loads.
    pub fn route(mut self, url: &str, document: FakeDocument) -> Self {
        if url == self.url {
            self.load(document.clone());
        }
        self.site.insert(url.to_string(), document);
        self
    }

    pub fn with_element(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string(), String::new());
        self
    }

    pub fn rejecting(mut self, selector: &str) -> Self {
        self.rejecting.insert(selector.to_string());
        self
    }

    pub fn clicking(mut self, selector: &str, effect: Scripted) -> Self {
        self.on_click
            .entry(selector.to_string())
            .or_default()
            .push(effect);
        self
    }

    pub fn writes_to(&self, selector: &str) -> usize {
        self.writes.iter().filter(|(s, _)| s == selector).count()
    }

    fn load(&mut self, document: FakeDocument) {
        self.elements = document
            .selectors
            .into_iter()
            .map(|s| (s, String::new()))
            .collect();
        self.copies.clear();
        self.timeline = document.timeline;
        self.ticks = 0;
    }

    fn full_load(&mut self, url: &str) {
        self.url = url.to_string();
        self.generation += 1;
        self.token = None;
        let document = self.site.get(url).cloned().unwrap_or_default();
        self.load(document);
    }

    fn apply(&mut self, change: Scripted) {
        match change {
            Scripted::Insert(sel) => {
                if self.elements.contains_key(&sel) {
                    *self.copies.entry(sel).or_default() += 1;
                } else {
                    self.elements.insert(sel, String::new());
                }
            }
            Scripted::Remove(sel) => {
                self.elements.remove(&sel);
                self.copies.remove(&sel);
            }
            Scripted::SetUrl(url) => self.url = url,
            Scripted::Navigate(url) => self.full_load(&url),
        }
    }
}

impl Page for FakePage {
    async fn current_url(&mut self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool> {
        Ok(self.elements.contains_key(selector))
    }

    async fn count(&mut self, selector: &str) -> Result<usize> {
        if !self.elements.contains_key(selector) {
            return Ok(0);
        }
        Ok(1 + self.copies.get(selector).copied().unwrap_or(0))
    }

    async fn set_value(&mut self, selector: &str, value: &str) -> Result<bool> {
        if !self.elements.contains_key(selector) {
            return Ok(false);
        }
        self.writes.push((selector.to_string(), value.to_string()));
        let stored = if self.rejecting.contains(selector) {
            String::new()
        } else {
            value.to_string()
        };
        self.elements.insert(selector.to_string(), stored);
        Ok(true)
    }

    async fn read_value(&mut self, selector: &str) -> Result<Option<String>> {
        Ok(self.elements.get(selector).cloned())
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        if !self.elements.contains_key(selector) {
            return Ok(false);
        }
        self.clicks.push(selector.to_string());
        let effects = self.on_click.get(selector).cloned().unwrap_or_default();
        for effect in effects {
            self.apply(effect);
        }
        Ok(true)
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.navigations.push(url.to_string());
        self.full_load(url);
        Ok(())
    }

    async fn document_token(&mut self) -> Result<String> {
        let generation = self.generation;
        Ok(self
            .token
            .get_or_insert_with(|| format!("doc-{generation}"))
            .clone())
    }

    async fn is_live(&mut self, token: &str) -> bool {
        self.ticks += 1;
        let due: Vec<Scripted> = self
            .timeline
            .iter()
            .filter(|(tick, _)| *tick == self.ticks)
            .map(|(_, change)| change.clone())
            .collect();
        for change in due {
            self.apply(change);
        }
        self.token.as_deref() == Some(token)
    }

    async fn show_toast(&mut self, severity: Severity, message: &str) -> Result<()> {
        self.toasts.push((severity, message.to_string()));
        Ok(())
    }
}
