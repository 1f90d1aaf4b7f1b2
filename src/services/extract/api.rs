//! API-interception strategy: mines intercepted JSON responses.

use serde_json::{Map, Value};
use std::collections::HashSet;

use super::price::normalize_price;
use super::{CapturedResponse, Extractor, PageCapture};
use crate::models::card::{
    Competitor, ExtractionSource, NormalizedCard, Post, ProductCategory, ProductItem, Review,
    WorkingHours,
};

/// Photo size substituted into `urlTemplate` values.
const PHOTO_SIZE: &str = "XXXL";

/// Keys under which similar organizations are listed.
const COMPETITOR_KEYS: [&str; 2] = ["similarOrganizations", "relatedPlaces"];

pub struct ApiExtractor;

impl Extractor for ApiExtractor {
    fn source(&self) -> ExtractionSource {
        ExtractionSource::ApiInterception
    }

    fn extract(&self, page: &PageCapture) -> NormalizedCard {
        let mut card = NormalizedCard::default();

        if page.responses.iter().any(|r| is_captcha_payload(&r.body)) {
            card.upstream_error = Some("captcha_detected".to_string());
        }

        if let Some(org) = find_org(&page.responses, page.org_id.as_deref()) {
            fill_org(&mut card, org);
        }

        card.reviews = collect_reviews(&page.responses);
        card.news = collect_posts(&page.responses);
        card.products = collect_products(&page.responses);
        card.competitors = collect_competitors(&page.responses, page.org_id.as_deref());
        card
    }
}

fn collect_objects<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    match value {
        Value::Object(map) => {
            out.push(map);
            for child in map.values() {
                collect_objects(child, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_objects(child, out);
            }
        }
        _ => {}
    }
}

/// Every value stored under `key` anywhere in the tree.
fn collect_keyed<'a>(value: &'a Value, key: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (k, child) in map {
                if k == key {
                    out.push(child);
                }
                collect_keyed(child, key, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_keyed(child, key, out);
            }
        }
        _ => {}
    }
}

fn keyed_arrays<'a>(responses: &'a [CapturedResponse], key: &str) -> Vec<&'a Vec<Value>> {
    let mut found = Vec::new();
    for response in responses {
        collect_keyed(&response.body, key, &mut found);
    }
    found.into_iter().filter_map(Value::as_array).collect()
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn id_matches(map: &Map<String, Value>, org_id: &str) -> bool {
    match map.get("id") {
        Some(Value::String(s)) => s == org_id,
        Some(Value::Number(n)) => n.to_string() == org_id,
        _ => false,
    }
}

fn is_captcha_payload(body: &Value) -> bool {
    let Some(map) = body.as_object() else {
        return false;
    };
    map.get("type").and_then(Value::as_str) == Some("captcha")
        || map.get("captcha").is_some_and(Value::is_object)
}

fn looks_like_org(map: &Map<String, Value>) -> bool {
    str_field(map, "title").is_some()
        && ["address", "fullAddress", "ratingData", "categories"]
            .iter()
            .any(|k| map.contains_key(*k))
}

fn find_org<'a>(responses: &'a [CapturedResponse], org_id: Option<&str>) -> Option<&'a Map<String, Value>> {
    let mut objects = Vec::new();
    for response in responses {
        collect_objects(&response.body, &mut objects);
    }
    let candidates: Vec<_> = objects.into_iter().filter(|m| looks_like_org(m)).collect();

    org_id
        .and_then(|id| candidates.iter().find(|m| id_matches(m, id)).copied())
        .or_else(|| candidates.first().copied())
}

fn fill_org(card: &mut NormalizedCard, org: &Map<String, Value>) {
    card.title = str_field(org, "title");
    card.description = str_field(org, "description");

    card.address = match org.get("address") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Object(addr)) => str_field(addr, "formatted").or_else(|| str_field(addr, "text")),
        _ => None,
    }
    .or_else(|| str_field(org, "fullAddress"));

    card.phone = org
        .get("phones")
        .and_then(Value::as_array)
        .and_then(|phones| {
            phones.iter().find_map(|p| match p {
                Value::String(s) => Some(s.clone()),
                Value::Object(m) => str_field(m, "number").or_else(|| str_field(m, "value")),
                _ => None,
            })
        });

    card.website = org
        .get("urls")
        .and_then(Value::as_array)
        .and_then(|urls| {
            urls.iter().find_map(|u| match u {
                Value::String(s) => Some(s.clone()),
                Value::Object(m) => str_field(m, "value").or_else(|| str_field(m, "url")),
                _ => None,
            })
        });

    if let Some(rating) = org.get("ratingData").and_then(Value::as_object) {
        card.rating = rating.get("ratingValue").and_then(as_f64);
        card.reviews_count = rating
            .get("reviewCount")
            .or_else(|| rating.get("ratingCount"))
            .and_then(as_u32);
    }
    if card.rating.is_none() {
        card.rating = org.get("rating").and_then(as_f64);
    }
    if card.reviews_count.is_none() {
        card.reviews_count = org.get("reviewsCount").and_then(as_u32);
    }

    card.categories = org
        .get("categories")
        .and_then(Value::as_array)
        .map(|cats| {
            cats.iter()
                .filter_map(|c| match c {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(m) => str_field(m, "name"),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    card.hours = WorkingHours {
        raw: str_field(org, "workingTimeText"),
        structured: org.get("workingTime").filter(|v| !v.is_null()).cloned(),
    };

    if let Some(photos) = org.get("photos").and_then(Value::as_object) {
        card.photos_count = photos.get("count").and_then(as_u32);
        card.photos = photos
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|item| {
                        str_field(item, "urlTemplate")
                            .map(|t| t.replace("%s", PHOTO_SIZE))
                            .or_else(|| str_field(item, "url"))
                    })
                    .collect()
            })
            .unwrap_or_default();
    }
}

fn collect_reviews(responses: &[CapturedResponse]) -> Vec<Review> {
    let mut seen = HashSet::new();
    let mut reviews = Vec::new();

    for array in keyed_arrays(responses, "reviews") {
        for review in array.iter().filter_map(Value::as_object) {
            let Some(text) = str_field(review, "text") else {
                continue;
            };
            let author = match review.get("author") {
                Some(Value::Object(a)) => str_field(a, "name"),
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            }
            .unwrap_or_default();

            if !seen.insert((author.clone(), text.clone())) {
                continue;
            }
            reviews.push(Review {
                author,
                rating: review.get("rating").and_then(as_f64),
                text,
                published_at: str_field(review, "updatedTime").or_else(|| str_field(review, "date")),
                response_text: review
                    .get("businessComment")
                    .and_then(Value::as_object)
                    .and_then(|c| str_field(c, "text")),
            });
        }
    }
    reviews
}

fn collect_posts(responses: &[CapturedResponse]) -> Vec<Post> {
    let mut posts = Vec::new();
    for array in keyed_arrays(responses, "posts") {
        for post in array.iter().filter_map(Value::as_object) {
            let Some(text) = str_field(post, "text").or_else(|| str_field(post, "content")) else {
                continue;
            };
            posts.push(Post {
                title: str_field(post, "title"),
                text,
                published_at: str_field(post, "publishedTime").or_else(|| str_field(post, "date")),
            });
        }
    }
    posts
}

fn parse_item(item: &Map<String, Value>) -> Option<ProductItem> {
    let name = str_field(item, "name").or_else(|| str_field(item, "title"))?;
    let (price_from, price_to) = match item.get("price") {
        Some(Value::Object(price)) => match price.get("text").and_then(Value::as_str) {
            Some(text) => normalize_price(text),
            None => {
                let value = price.get("value").and_then(as_f64);
                (value, value)
            }
        },
        Some(Value::String(text)) => normalize_price(text),
        Some(Value::Number(n)) => (n.as_f64(), n.as_f64()),
        _ => (None, None),
    };
    Some(ProductItem {
        name,
        price_from,
        price_to,
        description: str_field(item, "description"),
    })
}

fn is_goods_response(response: &CapturedResponse) -> bool {
    let url = response.url.to_ascii_lowercase();
    url.contains("goods") || url.contains("prices")
}

/// Services lists from goods/prices responses. `Some(vec![])` when the
/// endpoint answered with an explicit empty list.
fn collect_products(responses: &[CapturedResponse]) -> Option<Vec<ProductCategory>> {
    let goods: Vec<_> = responses.iter().filter(|r| is_goods_response(r)).cloned().collect();
    let mut found = false;
    let mut categories = Vec::new();

    for array in keyed_arrays(&goods, "categories") {
        if !array.iter().all(|c| c.get("items").is_some_and(Value::is_array)) {
            continue;
        }
        found = true;
        for category in array.iter().filter_map(Value::as_object) {
            let name = str_field(category, "name")
                .or_else(|| str_field(category, "title"))
                .unwrap_or_default();
            let items = category
                .get("items")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_object).filter_map(parse_item).collect())
                .unwrap_or_default();
            categories.push(ProductCategory { category: name, items });
        }
    }

    if !found {
        for array in keyed_arrays(&goods, "goods") {
            found = true;
            for item in array.iter().filter_map(Value::as_object) {
                let Some(parsed) = parse_item(item) else {
                    continue;
                };
                let name = str_field(item, "category").unwrap_or_default();
                match categories.iter_mut().find(|c| c.category == name) {
                    Some(existing) => existing.items.push(parsed),
                    None => categories.push(ProductCategory {
                        category: name,
                        items: vec![parsed],
                    }),
                }
            }
        }
    }

    found.then_some(categories)
}

fn collect_competitors(responses: &[CapturedResponse], org_id: Option<&str>) -> Vec<Competitor> {
    let mut seen = HashSet::new();
    let mut competitors = Vec::new();

    for key in COMPETITOR_KEYS {
        for array in keyed_arrays(responses, key) {
            for place in array.iter().filter_map(Value::as_object) {
                if org_id.is_some_and(|id| id_matches(place, id)) {
                    continue;
                }
                let Some(name) = str_field(place, "title").or_else(|| str_field(place, "name")) else {
                    continue;
                };
                if !seen.insert(name.clone()) {
                    continue;
                }
                let url = match place.get("id") {
                    Some(Value::String(id)) => Some(format!("https://yandex.ru/maps/org/{id}/")),
                    Some(Value::Number(id)) => Some(format!("https://yandex.ru/maps/org/{id}/")),
                    _ => str_field(place, "uri"),
                };
                competitors.push(Competitor {
                    name,
                    rating: place
                        .get("ratingData")
                        .and_then(|r| r.get("ratingValue"))
                        .and_then(as_f64)
                        .or_else(|| place.get("rating").and_then(as_f64)),
                    url,
                });
            }
        }
    }
    competitors
}
