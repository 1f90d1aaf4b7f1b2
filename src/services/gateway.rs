//! Persistence gateway: where validated cards are written.
//!
//! The trait is the seam the worker calls; `db::cards::PgGateway` is the
//! Postgres implementation. Row builders and content keys live here so every
//! implementation dedupes the same way.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::card::NormalizedCard;
use crate::models::snapshot::{
    CardSnapshot, LegacyMetrics, PostRow, ReviewRow, ServiceRow, StatsRow, SOURCE_YANDEX_MAPS,
};

/// Characters of normalized review text that identify a review.
const REVIEW_PREFIX_CHARS: usize = 64;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Everything one validated card writes. Applied all or nothing.
#[derive(Debug, Clone)]
pub struct CardWrite {
    pub business_id: String,
    pub owner_id: Option<String>,
    pub snapshot: CardSnapshot,
    /// `None` leaves the stored parsed services untouched.
    pub services: Option<Vec<ServiceRow>>,
    pub reviews: Vec<ReviewRow>,
    pub posts: Vec<PostRow>,
    pub stats: Vec<StatsRow>,
    pub legacy: LegacyMetrics,
}

impl CardWrite {
    pub fn from_card(
        business_id: &str,
        owner_id: Option<&str>,
        url: &str,
        card: &NormalizedCard,
        quality_score: f64,
        date: NaiveDate,
    ) -> Self {
        Self {
            business_id: business_id.to_string(),
            owner_id: owner_id.map(str::to_string),
            snapshot: CardSnapshot::from_card(url, card, quality_score),
            // An absent list means the page said nothing about services.
            services: card.products.as_ref().map(|_| service_rows(card)),
            reviews: review_rows(business_id, card),
            posts: post_rows(business_id, card),
            stats: vec![stats_row(business_id, date, card)],
            legacy: legacy_metrics(card),
        }
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Append a new snapshot version, inheriting rich fields from the last one.
    async fn save_new_card_version(
        &self,
        business_id: &str,
        snapshot: CardSnapshot,
    ) -> Result<(), PersistError>;

    async fn upsert_reviews(&self, rows: &[ReviewRow]) -> Result<(), PersistError>;

    async fn upsert_posts(&self, rows: &[PostRow]) -> Result<(), PersistError>;

    async fn upsert_stats(&self, rows: &[StatsRow]) -> Result<(), PersistError>;

    /// Replace the parsed service set for a business. Returns rows saved.
    async fn upsert_parsed_services(
        &self,
        business_id: &str,
        owner_id: Option<&str>,
        rows: &[ServiceRow],
    ) -> Result<usize, PersistError>;

    async fn write_legacy_metrics(
        &self,
        business_id: &str,
        metrics: &LegacyMetrics,
    ) -> Result<(), PersistError>;

    /// Write a card's version, services, reviews, posts, stats and legacy
    /// metrics in one transaction.
    async fn persist_card(&self, write: CardWrite) -> Result<(), PersistError>;

    /// Stored public map URL of a business, for jobs queued without one.
    async fn resolve_map_url(&self, business_id: &str) -> Result<Option<String>, PersistError>;
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn content_key(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Same business, author and text prefix give the same key.
pub fn review_key(business_id: &str, author: &str, text: &str) -> String {
    let normalized = normalize_text(text);
    let prefix: String = normalized.chars().take(REVIEW_PREFIX_CHARS).collect();
    content_key(&[business_id, "review", &normalize_text(author), &prefix])
}

pub fn post_key(business_id: &str, published_at: Option<&str>, text: &str) -> String {
    let normalized = normalize_text(text);
    let prefix: String = normalized.chars().take(REVIEW_PREFIX_CHARS).collect();
    content_key(&[business_id, "post", published_at.unwrap_or_default(), &prefix])
}

pub fn stats_key(business_id: &str, source: &str, date: NaiveDate) -> String {
    content_key(&[business_id, "stats", source, &date.to_string()])
}

pub fn review_rows(business_id: &str, card: &NormalizedCard) -> Vec<ReviewRow> {
    card.reviews
        .iter()
        .filter(|r| !r.text.trim().is_empty())
        .map(|r| ReviewRow {
            id: review_key(business_id, &r.author, &r.text),
            business_id: business_id.to_string(),
            source: SOURCE_YANDEX_MAPS.to_string(),
            author: r.author.clone(),
            rating: r.rating,
            text: r.text.clone(),
            response_text: r.response_text.clone(),
            published_at: r.published_at.clone(),
        })
        .collect()
}

pub fn post_rows(business_id: &str, card: &NormalizedCard) -> Vec<PostRow> {
    card.news
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| PostRow {
            id: post_key(business_id, p.published_at.as_deref(), &p.text),
            business_id: business_id.to_string(),
            source: SOURCE_YANDEX_MAPS.to_string(),
            title: p.title.clone(),
            text: p.text.clone(),
            published_at: p.published_at.clone(),
        })
        .collect()
}

pub fn stats_row(business_id: &str, date: NaiveDate, card: &NormalizedCard) -> StatsRow {
    StatsRow {
        id: stats_key(business_id, SOURCE_YANDEX_MAPS, date),
        business_id: business_id.to_string(),
        source: SOURCE_YANDEX_MAPS.to_string(),
        date,
        rating: card.rating,
        reviews_count: card.reviews_count,
        photos_count: card.photos_count,
    }
}

pub fn service_rows(card: &NormalizedCard) -> Vec<ServiceRow> {
    card.products
        .iter()
        .flatten()
        .flat_map(|category| {
            category.items.iter().map(move |item| ServiceRow {
                category: category.category.clone(),
                name: item.name.clone(),
                price_from: item.price_from,
                price_to: item.price_to,
                description: item.description.clone(),
                source: SOURCE_YANDEX_MAPS.to_string(),
            })
        })
        .collect()
}

pub fn legacy_metrics(card: &NormalizedCard) -> LegacyMetrics {
    LegacyMetrics {
        rating: card.rating,
        reviews_count: card.reviews_count,
        photos_count: card.photos_count,
        news_count: u32::try_from(card.news.len()).unwrap_or(u32::MAX),
        products_count: u32::try_from(card.product_count()).unwrap_or(u32::MAX),
    }
}
