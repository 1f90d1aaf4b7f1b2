//! DOM strategy: reads the rendered organization page.

use scraper::Html;

use super::price::normalize_price;
use super::{element_text, try_all, try_attr, try_text, Extractor, PageCapture};
use crate::models::card::{
    Competitor, ExtractionSource, NormalizedCard, Post, ProductCategory, ProductItem, Review,
    WorkingHours,
};

const TITLE: &str = "h1.orgpage-header-view__header, h1.card-title-view__title, h1";
const ADDRESS: &str = ".orgpage-header-view__address, .business-contacts-view__address-link";
const PHONE: &str = ".orgpage-phones-view__phone-number, .card-phones-view__phone-number";
const WEBSITE: &str = ".business-urls-view__text, .business-urls-view__link";
const RATING: &str = ".business-summary-rating-badge-view__rating, .business-rating-badge-view__rating-text";
const RATING_COUNT: &str = ".business-header-rating-view__text, .business-rating-amount-view";
const CATEGORY: &str = ".business-categories-view__category, .orgpage-categories-info-view__link";
const HOURS: &str = ".business-working-status-view, .business-working-intervals-view";
const PHOTO: &str = ".orgpage-header-view__photos img, .media-wrapper__media img, .business-photos-view img";
const PHOTO_COUNT: &str = ".business-tab-title__counter, .orgpage-photos-view__counter";

const REVIEW: &str = ".business-review-view";
const REVIEW_AUTHOR: &str = ".business-review-view__author-name, .business-review-view__author span";
const REVIEW_TEXT: &str = ".business-review-view__body-text, .business-review-view__body";
const REVIEW_DATE: &str = ".business-review-view__date meta";
const REVIEW_STARS: &str = ".business-rating-badge-view__star._full";
const REVIEW_REPLY: &str = ".business-review-comment-content__bubble";

const POST: &str = ".business-posts-list-post-view";
const POST_TEXT: &str = ".business-posts-list-post-view__text";
const POST_TITLE: &str = ".business-posts-list-post-view__title";
const POST_DATE: &str = ".business-posts-list-post-view__date";

const PRODUCT_CATEGORY: &str = ".business-full-items-grouped-view__category";
const PRODUCT_CATEGORY_TITLE: &str = ".business-full-items-grouped-view__title";
const PRODUCT_ITEM: &str = ".related-item-photo-view, .related-item-list-view";
const PRODUCT_NAME: &str = ".related-item-photo-view__title, .related-item-list-view__title";
const PRODUCT_PRICE: &str = ".related-item-photo-view__price, .related-item-list-view__price";
const PRODUCT_DESCRIPTION: &str = ".related-item-photo-view__description, .related-item-list-view__subtitle";

const SIMILAR: &str = ".card-similar-carousel__item, .orgpage-similar-item";
const SIMILAR_TITLE: &str = ".orgpage-similar-item__title, .search-business-snippet-view__title";
const SIMILAR_RATING: &str = ".business-rating-badge-view__rating-text";

/// Card features rendered as "services" that are not services.
const DECORATIVE_SERVICES: [&str; 10] = [
    "туалет",
    "парковка",
    "wi-fi",
    "wifi",
    "оплата картой",
    "банкомат",
    "гардероб",
    "restroom",
    "parking",
    "card payment",
];

pub struct DomExtractor;

impl Extractor for DomExtractor {
    fn source(&self) -> ExtractionSource {
        ExtractionSource::HtmlDom
    }

    fn extract(&self, page: &PageCapture) -> NormalizedCard {
        if page.html.trim().is_empty() {
            return NormalizedCard::default();
        }
        let doc = Html::parse_document(&page.html);
        let root = doc.root_element();

        let photos: Vec<String> = try_all(root, PHOTO)
            .into_iter()
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.is_empty() && !src.starts_with("data:"))
            .map(str::to_string)
            .collect();

        NormalizedCard {
            title: try_text(root, TITLE),
            address: try_text(root, ADDRESS),
            phone: try_text(root, PHONE),
            website: try_text(root, WEBSITE),
            rating: try_text(root, RATING).and_then(|t| parse_rating(&t)),
            reviews_count: try_text(root, RATING_COUNT).and_then(|t| parse_count(&t)),
            categories: try_all(root, CATEGORY)
                .into_iter()
                .map(element_text)
                .filter(|c| !c.is_empty())
                .collect(),
            hours: WorkingHours {
                raw: try_text(root, HOURS),
                structured: None,
            },
            photos_count: try_text(root, PHOTO_COUNT)
                .and_then(|t| parse_count(&t))
                .or_else(|| u32::try_from(photos.len()).ok().filter(|n| *n > 0)),
            photos,
            products: extract_products(&doc),
            reviews: extract_reviews(&doc),
            news: extract_posts(&doc),
            competitors: extract_competitors(&doc),
            ..Default::default()
        }
    }
}

/// "4,9" or "4.9" out of a rating badge. Ratings outside 0..=5 are rejected.
fn parse_rating(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let candidate: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let value: f64 = candidate
        .trim_end_matches(['.', ','])
        .replace(',', ".")
        .parse()
        .ok()?;
    (0.0..=5.0).contains(&value).then_some(value)
}

/// Leading integer of "1 234 оценки", ignoring spaces between digit groups.
fn parse_count(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || c.is_whitespace())
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn is_decorative(name: &str) -> bool {
    let lower = name.to_lowercase();
    DECORATIVE_SERVICES.iter().any(|d| lower == *d || lower.starts_with(&format!("{d} ")))
}

/// `None` when the page rendered no services section at all.
fn extract_products(doc: &Html) -> Option<Vec<ProductCategory>> {
    let blocks = try_all(doc.root_element(), PRODUCT_CATEGORY);
    if blocks.is_empty() {
        return None;
    }

    let categories = blocks
        .into_iter()
        .map(|block| {
            let items = try_all(block, PRODUCT_ITEM)
                .into_iter()
                .filter_map(|item| {
                    let name = try_text(item, PRODUCT_NAME)?;
                    if is_decorative(&name) {
                        return None;
                    }
                    let (price_from, price_to) = try_text(item, PRODUCT_PRICE)
                        .map(|p| normalize_price(&p))
                        .unwrap_or((None, None));
                    Some(ProductItem {
                        name,
                        price_from,
                        price_to,
                        description: try_text(item, PRODUCT_DESCRIPTION),
                    })
                })
                .collect();
            ProductCategory {
                category: try_text(block, PRODUCT_CATEGORY_TITLE).unwrap_or_default(),
                items,
            }
        })
        .filter(|c: &ProductCategory| !c.items.is_empty())
        .collect();
    Some(categories)
}

fn extract_reviews(doc: &Html) -> Vec<Review> {
    try_all(doc.root_element(), REVIEW)
        .into_iter()
        .filter_map(|review| {
            let text = try_text(review, REVIEW_TEXT)?;
            let stars = try_all(review, REVIEW_STARS).len();
            Some(Review {
                author: try_text(review, REVIEW_AUTHOR).unwrap_or_default(),
                rating: (stars > 0).then_some(stars as f64),
                text,
                published_at: try_attr(review, REVIEW_DATE, "content"),
                response_text: try_text(review, REVIEW_REPLY),
            })
        })
        .collect()
}

fn extract_posts(doc: &Html) -> Vec<Post> {
    try_all(doc.root_element(), POST)
        .into_iter()
        .filter_map(|post| {
            Some(Post {
                title: try_text(post, POST_TITLE),
                text: try_text(post, POST_TEXT)?,
                published_at: try_text(post, POST_DATE),
            })
        })
        .collect()
}

fn extract_competitors(doc: &Html) -> Vec<Competitor> {
    try_all(doc.root_element(), SIMILAR)
        .into_iter()
        .filter_map(|item| {
            Some(Competitor {
                name: try_text(item, SIMILAR_TITLE)?,
                rating: try_text(item, SIMILAR_RATING).and_then(|t| parse_rating(&t)),
                url: try_attr(item, "a[href]", "href"),
            })
        })
        .collect()
}
