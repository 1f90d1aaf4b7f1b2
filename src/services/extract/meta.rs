//! Meta-tag strategy: Open Graph tags, the last resort before an empty card.

use scraper::Html;

use super::{try_attr, Extractor, PageCapture};
use crate::models::card::{ExtractionSource, NormalizedCard};

/// Suffixes the map site appends to page titles.
const TITLE_SUFFIXES: [&str; 3] = [" — Яндекс Карты", " - Яндекс Карты", " — Yandex Maps"];

pub struct MetaExtractor;

impl Extractor for MetaExtractor {
    fn source(&self) -> ExtractionSource {
        ExtractionSource::MetaTags
    }

    fn extract(&self, page: &PageCapture) -> NormalizedCard {
        if page.html.trim().is_empty() {
            return NormalizedCard::default();
        }
        let doc = Html::parse_document(&page.html);
        let root = doc.root_element();

        let title = try_attr(root, r#"meta[property="og:title"]"#, "content").map(|t| clean_title(&t));
        let photos = try_attr(root, r#"meta[property="og:image"]"#, "content")
            .into_iter()
            .collect();

        NormalizedCard {
            title: title.filter(|t| !t.is_empty()),
            description: try_attr(root, r#"meta[property="og:description"]"#, "content")
                .or_else(|| try_attr(root, r#"meta[name="description"]"#, "content")),
            photos,
            ..Default::default()
        }
    }
}

/// "Oliver, салон красоты, Москва — Яндекс Карты" -> "Oliver".
fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    for suffix in TITLE_SUFFIXES {
        if let Some(stripped) = title.strip_suffix(suffix) {
            title = stripped;
        }
    }
    title.split(',').next().unwrap_or(title).trim().to_string()
}
