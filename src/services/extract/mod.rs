//! Extraction strategies over a captured page.
//!
//! Every strategy reads the same [`PageCapture`] and returns a partial
//! [`NormalizedCard`]. A strategy never fails: a selector or key that does
//! not match leaves the field empty.

pub mod api;
pub mod dom;
pub mod meta;
pub mod price;

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};

use crate::models::card::{ExtractionSource, NormalizedCard, Presence};

/// One intercepted JSON network response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    pub body: serde_json::Value,
}

/// Everything the driver collected from one page visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageCapture {
    pub requested_url: String,
    pub final_url: String,
    pub org_id: Option<String>,
    pub title: String,
    pub html: String,
    pub responses: Vec<CapturedResponse>,
}

/// A single extraction strategy.
pub trait Extractor: Send + Sync {
    fn source(&self) -> ExtractionSource;

    fn extract(&self, page: &PageCapture) -> NormalizedCard;
}

/// Output of one strategy run.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub source: ExtractionSource,
    pub card: NormalizedCard,
}

impl Extraction {
    pub fn quality(&self) -> u8 {
        self.source.quality()
    }

    /// A named organization, or an explicit (possibly empty) services list.
    pub fn is_usable(&self) -> bool {
        self.card.title.is_present() || self.card.products.is_some()
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::debug!(selector = css, error = ?e, "Invalid selector");
            None
        }
    }
}

/// Collapse whitespace in an element's text.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element matching `css` with non-empty text.
pub(crate) fn try_text(scope: ElementRef<'_>, css: &str) -> Option<String> {
    let sel = selector(css)?;
    scope
        .select(&sel)
        .map(element_text)
        .find(|text| !text.is_empty())
}

/// Attribute of the first element matching `css` that carries it.
pub(crate) fn try_attr(scope: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    scope
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// All elements matching `css`; empty on a miss or a bad selector.
pub(crate) fn try_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match selector(css) {
        Some(sel) => scope.select(&sel).collect(),
        None => Vec::new(),
    }
}
