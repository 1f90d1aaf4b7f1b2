use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::card::{Competitor, NormalizedCard, Post, ProductCategory, WorkingHours};

/// `source` value for everything scraped from public map cards.
pub const SOURCE_YANDEX_MAPS: &str = "yandex_maps";

/// One immutable version of a business's scraped state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CardSnapshot {
    pub url: String,
    pub title: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub reviews_count: Option<u32>,
    pub categories: Vec<String>,
    pub hours: Option<WorkingHours>,
    pub photos: Vec<String>,
    pub photos_count: Option<u32>,
    pub products: Option<Vec<ProductCategory>>,
    pub news: Vec<Post>,
    pub competitors: Vec<Competitor>,
    pub quality_score: f64,
    pub meta: serde_json::Value,
}

impl CardSnapshot {
    pub fn from_card(url: &str, card: &NormalizedCard, quality_score: f64) -> Self {
        Self {
            url: url.to_string(),
            title: card.title.clone(),
            address: card.address.clone(),
            phone: card.phone.clone(),
            website: card.website.clone(),
            rating: card.rating,
            reviews_count: card.reviews_count,
            categories: card.categories.clone(),
            hours: Some(card.hours.clone()).filter(|h| h.raw.is_some() || h.structured.is_some()),
            photos: card.photos.clone(),
            photos_count: card.photos_count,
            products: card.products.clone(),
            news: card.news.clone(),
            competitors: card.competitors.clone(),
            quality_score,
            meta: serde_json::to_value(&card.meta).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Carry rich sections over from the previous version when this one
    /// only brought metrics, so a full card never regresses to a stub.
    pub fn inherit_rich_fields(&mut self, prior: &CardSnapshot) {
        if self.products.is_none() {
            self.products = prior.products.clone();
        }
        if self.news.is_empty() {
            self.news = prior.news.clone();
        }
        if self.photos.is_empty() {
            self.photos = prior.photos.clone();
            if self.photos_count.is_none() {
                self.photos_count = prior.photos_count;
            }
        }
        if self.competitors.is_empty() {
            self.competitors = prior.competitors.clone();
        }
        if self.hours.is_none() {
            self.hours = prior.hours.clone();
        }
        if self.categories.is_empty() {
            self.categories = prior.categories.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRow {
    /// Content key: business + author + text prefix.
    pub id: String,
    pub business_id: String,
    pub source: String,
    pub author: String,
    pub rating: Option<f64>,
    pub text: String,
    pub response_text: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostRow {
    pub id: String,
    pub business_id: String,
    pub source: String,
    pub title: Option<String>,
    pub text: String,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsRow {
    /// Content key: business + source + date.
    pub id: String,
    pub business_id: String,
    pub source: String,
    pub date: NaiveDate,
    pub rating: Option<f64>,
    pub reviews_count: Option<u32>,
    pub photos_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRow {
    pub category: String,
    pub name: String,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub description: Option<String>,
    pub source: String,
}

/// Flat mirror kept for the old dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyMetrics {
    pub rating: Option<f64>,
    pub reviews_count: Option<u32>,
    pub photos_count: Option<u32>,
    pub news_count: u32,
    pub products_count: u32,
}
