use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Extraction strategy that produced (part of) a card.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionSource {
    ApiInterception,
    HtmlDom,
    MetaTags,
}

impl ExtractionSource {
    /// Fixed quality score of the strategy.
    pub fn quality(self) -> u8 {
        match self {
            ExtractionSource::ApiInterception => 100,
            ExtractionSource::HtmlDom => 70,
            ExtractionSource::MetaTags => 40,
        }
    }

    /// Strategies in descending priority.
    pub const PRIORITY: [ExtractionSource; 3] = [
        ExtractionSource::ApiInterception,
        ExtractionSource::HtmlDom,
        ExtractionSource::MetaTags,
    ];
}

/// One priced service line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductItem {
    pub name: String,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductCategory {
    pub category: String,
    pub items: Vec<ProductItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub author: String,
    pub rating: Option<f64>,
    pub text: String,
    pub published_at: Option<String>,
    pub response_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub title: Option<String>,
    pub text: String,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Competitor {
    pub name: String,
    pub rating: Option<f64>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkingHours {
    /// Raw text as shown on the card, e.g. "ежедневно, 10:00–22:00".
    pub raw: Option<String>,
    /// Source-specific structured schedule, kept as received.
    pub structured: Option<serde_json::Value>,
}

/// Provenance of a reconciled card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CardMeta {
    pub sources_used: Vec<ExtractionSource>,
    /// Field name -> strategy that filled it.
    pub field_sources: BTreeMap<String, ExtractionSource>,
    /// Quality of the base (winning) strategy.
    pub quality_score: u8,
}

/// Reconciled scrape output for one business snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedCard {
    pub title: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub reviews_count: Option<u32>,
    pub categories: Vec<String>,
    pub hours: WorkingHours,
    pub photos: Vec<String>,
    pub photos_count: Option<u32>,
    /// `None`: the source said nothing. `Some(vec![])`: confirmed no services.
    pub products: Option<Vec<ProductCategory>>,
    pub reviews: Vec<Review>,
    pub news: Vec<Post>,
    pub competitors: Vec<Competitor>,
    /// Set when an intercepted payload was itself an error/captcha object.
    pub upstream_error: Option<String>,
    #[serde(rename = "_meta")]
    pub meta: CardMeta,
}

/// "Has a usable value" for card fields.
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for Option<String> {
    fn is_present(&self) -> bool {
        self.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

impl Presence for Option<f64> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl Presence for Option<u32> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for WorkingHours {
    fn is_present(&self) -> bool {
        self.raw.is_present() || self.structured.as_ref().is_some_and(|v| !v.is_null())
    }
}

impl NormalizedCard {
    /// True when no strategy contributed anything worth persisting.
    pub fn is_empty(&self) -> bool {
        !self.title.is_present()
            && !self.address.is_present()
            && !self.rating.is_present()
            && !self.categories.is_present()
            && self.products.is_none()
            && !self.reviews.is_present()
    }

    /// Whether the named card field carries a value. Unknown names are absent.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "title" => self.title.is_present(),
            "address" => self.address.is_present(),
            "phone" => self.phone.is_present(),
            "website" => self.website.is_present(),
            "description" => self.description.is_present(),
            "rating" => self.rating.is_present(),
            "reviews_count" => self.reviews_count.is_present(),
            "categories" => self.categories.is_present(),
            "hours" => self.hours.is_present(),
            "photos" => self.photos.is_present() || self.photos_count.is_some_and(|n| n > 0),
            "products" => self.products.is_some(),
            "reviews" => self.reviews.is_present(),
            "news" => self.news.is_present(),
            "competitors" => self.competitors.is_present(),
            _ => false,
        }
    }

    /// Total number of service lines across categories.
    pub fn product_count(&self) -> usize {
        self.products
            .as_ref()
            .map_or(0, |cats| cats.iter().map(|c| c.items.len()).sum())
    }
}
