//! Source-priority reconciliation of extraction strategies.
//!
//! Strategies run in descending quality and stop at the first usable
//! result. The best usable result becomes the base card; fields the base
//! left empty are backfilled from the other results that ran, best first.
//! Services are never merged across sources: the first source that said
//! anything about them (even an empty list) wins outright.

use std::collections::HashSet;

use crate::models::card::{ExtractionSource, NormalizedCard, Presence, ProductCategory};
use crate::services::extract::api::ApiExtractor;
use crate::services::extract::dom::DomExtractor;
use crate::services::extract::meta::MetaExtractor;
use crate::services::extract::{Extraction, Extractor, PageCapture};

/// Copy each listed field from `$other` into `$base` when the base is silent,
/// recording which source filled it.
macro_rules! backfill {
    ($base:expr, $other:expr, $source:expr, $meta:expr, [$($field:ident),+ $(,)?]) => {{
        let mut contributed = false;
        $(
            if !$base.$field.is_present() && $other.$field.is_present() {
                $base.$field = $other.$field.clone();
                $meta.insert(stringify!($field).to_string(), $source);
                contributed = true;
            }
        )+
        contributed
    }};
}

/// Record the base source for each listed field it populated.
macro_rules! attribute {
    ($card:expr, $source:expr, $meta:expr, [$($field:ident),+ $(,)?]) => {
        $(
            if $card.$field.is_present() {
                $meta.insert(stringify!($field).to_string(), $source);
            }
        )+
    };
}

pub struct Reconciler {
    extractors: Vec<Box<dyn Extractor>>,
}

fn strategy(source: ExtractionSource) -> Box<dyn Extractor> {
    match source {
        ExtractionSource::ApiInterception => Box::new(ApiExtractor),
        ExtractionSource::HtmlDom => Box::new(DomExtractor),
        ExtractionSource::MetaTags => Box::new(MetaExtractor),
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ExtractionSource::PRIORITY.into_iter().map(strategy).collect())
    }
}

impl Reconciler {
    pub fn new(mut extractors: Vec<Box<dyn Extractor>>) -> Self {
        extractors.sort_by_key(|e| std::cmp::Reverse(e.source().quality()));
        Self { extractors }
    }

    /// Run strategies in priority order and merge what ran into one card.
    pub fn reconcile(&self, page: &PageCapture) -> NormalizedCard {
        let mut ran = Vec::with_capacity(self.extractors.len());
        for extractor in &self.extractors {
            let extraction = Extraction {
                source: extractor.source(),
                card: extractor.extract(page),
            };
            let usable = extraction.is_usable();
            tracing::debug!(source = %extraction.source, usable, "Extraction strategy finished");
            ran.push(extraction);
            if usable {
                break;
            }
        }
        merge(ran)
    }
}

/// Merge strategy outputs. Returns an empty card when nothing was found.
pub fn merge(mut results: Vec<Extraction>) -> NormalizedCard {
    results.sort_by_key(|r| std::cmp::Reverse(r.quality()));

    let Some(base_idx) = results
        .iter()
        .position(Extraction::is_usable)
        .or_else(|| results.iter().position(|r| !r.card.is_empty()))
    else {
        let mut empty = NormalizedCard::default();
        empty.upstream_error = results.iter().find_map(|r| r.card.upstream_error.clone());
        return empty;
    };

    let base_source = results[base_idx].source;
    let mut card = results[base_idx].card.clone();
    card.products = None;
    card.meta = Default::default();

    let mut field_sources = std::collections::BTreeMap::new();
    attribute!(card, base_source, field_sources, [
        title, address, phone, website, description, rating, reviews_count, categories,
        hours, photos, photos_count, reviews, news, competitors, upstream_error,
    ]);
    let mut sources_used = vec![base_source];

    for (idx, other) in results.iter().enumerate() {
        if idx == base_idx {
            continue;
        }
        // upstream_error is taken from the base only.
        let contributed = backfill!(card, other.card, other.source, field_sources, [
            title, address, phone, website, description, rating, reviews_count, categories,
            hours, photos, photos_count, reviews, news, competitors,
        ]);
        if contributed && !sources_used.contains(&other.source) {
            sources_used.push(other.source);
        }
    }

    if let Some(winner) = results.iter().find(|r| r.card.products.is_some()) {
        card.products = winner
            .card
            .products
            .clone()
            .map(|cats| dedupe_products(winner.source, cats));
        field_sources.insert("products".to_string(), winner.source);
        if !sources_used.contains(&winner.source) {
            sources_used.push(winner.source);
        }
    }

    if card.photos_count.is_none() && !card.photos.is_empty() {
        card.photos_count = u32::try_from(card.photos.len()).ok();
    }

    card.meta.sources_used = sources_used;
    card.meta.field_sources = field_sources;
    card.meta.quality_score = base_source.quality();
    card
}

/// Drop repeated service lines, keyed by (source, name, category, price range).
pub fn dedupe_products(source: ExtractionSource, categories: Vec<ProductCategory>) -> Vec<ProductCategory> {
    let mut seen = HashSet::new();
    let mut merged: Vec<ProductCategory> = Vec::with_capacity(categories.len());

    for category in categories {
        let items: Vec<_> = category
            .items
            .into_iter()
            .filter(|item| {
                seen.insert((
                    source,
                    item.name.trim().to_lowercase(),
                    category.category.trim().to_lowercase(),
                    item.price_from.map(f64::to_bits),
                    item.price_to.map(f64::to_bits),
                ))
            })
            .collect();

        match merged.iter_mut().find(|c| c.category == category.category) {
            Some(existing) => existing.items.extend(items),
            None => merged.push(ProductCategory {
                category: category.category,
                items,
            }),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::card::ProductItem;

    /// Strategy returning a fixed card, counting how often it ran.
    struct Fixed {
        source: ExtractionSource,
        card: NormalizedCard,
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Extractor for Fixed {
        fn source(&self) -> ExtractionSource {
            self.source
        }

        fn extract(&self, _page: &PageCapture) -> NormalizedCard {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.card.clone()
        }
    }

    fn fixed(
        source: ExtractionSource,
        card: NormalizedCard,
    ) -> (Box<dyn Extractor>, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        (
            Box::new(Fixed {
                source,
                card,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn item(name: &str, from: f64) -> ProductItem {
        ProductItem {
            name: name.to_string(),
            price_from: Some(from),
            price_to: Some(from),
            description: None,
        }
    }

    fn dom_with_products() -> NormalizedCard {
        NormalizedCard {
            title: Some("Oliver (DOM)".into()),
            phone: Some("+7 495 000-00-00".into()),
            products: Some(vec![ProductCategory {
                category: "Стрижки".into(),
                items: vec![item("Мужская стрижка", 1500.0)],
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_confirmed_empty_products_never_backfilled() {
        let api = NormalizedCard {
            title: Some("Salon X".into()),
            products: Some(Vec::new()),
            ..Default::default()
        };
        let merged = merge(vec![
            Extraction { source: ExtractionSource::HtmlDom, card: dom_with_products() },
            Extraction { source: ExtractionSource::ApiInterception, card: api },
        ]);
        assert_eq!(merged.products, Some(Vec::new()));
        assert_eq!(merged.title.as_deref(), Some("Salon X"));
        assert_eq!(merged.meta.field_sources["products"], ExtractionSource::ApiInterception);
    }

    #[test]
    fn test_absent_products_fall_through() {
        let api = NormalizedCard {
            title: Some("Salon X".into()),
            ..Default::default()
        };
        let merged = merge(vec![
            Extraction { source: ExtractionSource::ApiInterception, card: api },
            Extraction { source: ExtractionSource::HtmlDom, card: dom_with_products() },
        ]);
        assert_eq!(merged.product_count(), 1);
        assert_eq!(merged.meta.field_sources["products"], ExtractionSource::HtmlDom);
    }

    #[test]
    fn test_backfill_only_where_base_silent() {
        let api = NormalizedCard {
            title: Some("Salon X".into()),
            rating: Some(4.9),
            ..Default::default()
        };
        let merged = merge(vec![
            Extraction { source: ExtractionSource::ApiInterception, card: api },
            Extraction { source: ExtractionSource::HtmlDom, card: dom_with_products() },
        ]);
        assert_eq!(merged.title.as_deref(), Some("Salon X"));
        assert_eq!(merged.phone.as_deref(), Some("+7 495 000-00-00"));
        assert_eq!(merged.meta.field_sources["title"], ExtractionSource::ApiInterception);
        assert_eq!(merged.meta.field_sources["phone"], ExtractionSource::HtmlDom);
        assert_eq!(
            merged.meta.sources_used,
            vec![ExtractionSource::ApiInterception, ExtractionSource::HtmlDom]
        );
        assert_eq!(merged.meta.quality_score, 100);
    }

    #[test]
    fn test_unusable_api_partial_feeds_dom_base() {
        let api = NormalizedCard {
            rating: Some(4.7),
            ..Default::default()
        };
        let merged = merge(vec![
            Extraction { source: ExtractionSource::ApiInterception, card: api },
            Extraction { source: ExtractionSource::HtmlDom, card: dom_with_products() },
        ]);
        assert_eq!(merged.title.as_deref(), Some("Oliver (DOM)"));
        assert_eq!(merged.rating, Some(4.7));
        assert_eq!(merged.meta.quality_score, 70);
        assert_eq!(merged.meta.field_sources["rating"], ExtractionSource::ApiInterception);
    }

    #[test]
    fn test_error_from_unusable_source_not_copied_to_base() {
        let api = NormalizedCard {
            rating: Some(4.7),
            upstream_error: Some("captcha_detected".into()),
            ..Default::default()
        };
        let merged = merge(vec![
            Extraction { source: ExtractionSource::ApiInterception, card: api },
            Extraction { source: ExtractionSource::HtmlDom, card: dom_with_products() },
        ]);
        assert_eq!(merged.title.as_deref(), Some("Oliver (DOM)"));
        assert_eq!(merged.rating, Some(4.7));
        assert!(merged.upstream_error.is_none());
        assert!(!merged.meta.field_sources.contains_key("upstream_error"));
    }

    #[test]
    fn test_short_circuits_after_usable_source() {
        let (api, api_calls) = fixed(
            ExtractionSource::ApiInterception,
            NormalizedCard {
                title: Some("Salon X".into()),
                products: Some(Vec::new()),
                ..Default::default()
            },
        );
        let (dom, dom_calls) = fixed(ExtractionSource::HtmlDom, dom_with_products());
        let (meta, meta_calls) = fixed(ExtractionSource::MetaTags, NormalizedCard::default());

        let reconciler = Reconciler::new(vec![meta, dom, api]);
        let card = reconciler.reconcile(&PageCapture::default());

        assert_eq!(card.products, Some(Vec::new()));
        assert_eq!(api_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(dom_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(meta_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_meta_is_last_resort() {
        let (api, _) = fixed(ExtractionSource::ApiInterception, NormalizedCard::default());
        let (dom, _) = fixed(ExtractionSource::HtmlDom, NormalizedCard::default());
        let (meta, meta_calls) = fixed(
            ExtractionSource::MetaTags,
            NormalizedCard {
                title: Some("Oliver".into()),
                ..Default::default()
            },
        );
        let card = Reconciler::new(vec![api, dom, meta]).reconcile(&PageCapture::default());
        assert_eq!(card.title.as_deref(), Some("Oliver"));
        assert_eq!(card.meta.sources_used, vec![ExtractionSource::MetaTags]);
        assert_eq!(card.meta.quality_score, 40);
        assert_eq!(meta_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nothing_found_is_empty() {
        let card = merge(vec![Extraction {
            source: ExtractionSource::ApiInterception,
            card: NormalizedCard::default(),
        }]);
        assert!(card.is_empty());
        assert!(card.meta.sources_used.is_empty());
    }

    #[test]
    fn test_dedupe_products() {
        let cats = vec![
            ProductCategory {
                category: "Стрижки".into(),
                items: vec![item("Стрижка", 1000.0), item("стрижка ", 1000.0), item("Стрижка", 1200.0)],
            },
            ProductCategory {
                category: "Стрижки".into(),
                items: vec![item("Стрижка", 1000.0), item("Укладка", 800.0)],
            },
        ];
        let deduped = dedupe_products(ExtractionSource::ApiInterception, cats);
        assert_eq!(deduped.len(), 1);
        let names: Vec<_> = deduped[0].items.iter().map(|i| (i.name.as_str(), i.price_from)).collect();
        assert_eq!(
            names,
            vec![("Стрижка", Some(1000.0)), ("Стрижка", Some(1200.0)), ("Укладка", Some(800.0))]
        );
    }
}
