//! Captured pages for the scraping scenarios.
//!
//! The JSON bodies follow the shape of the map search and business XHRs a
//! card page fires while it loads.

#![allow(dead_code)]

use serde_json::{json, Value};

use salon_card_parser::services::extract::CapturedResponse;

use crate::helpers::{PageScript, CAPTCHA_URL};

pub const ORG_ID: &str = "203293742306";
pub const BUSINESS_ID: &str = "biz-oliver";
pub const CARD_URL: &str = "https://yandex.ru/maps/org/oliver/203293742306/";

fn response(url: &str, body: Value) -> CapturedResponse {
    CapturedResponse {
        url: url.to_string(),
        status: 200,
        body,
    }
}

pub fn search_response() -> CapturedResponse {
    response(
        "https://yandex.ru/maps/api/search?text=oliver&lang=ru_RU",
        json!({
            "data": {
                "items": [{
                    "id": ORG_ID,
                    "title": "Oliver",
                    "address": "Москва, Тверская улица, 7",
                    "phones": [{"number": "+7 (495) 123-45-67"}],
                    "urls": ["https://oliver.salon"],
                    "ratingData": {"ratingValue": 4.9, "ratingCount": 512, "reviewCount": 301},
                    "categories": [{"name": "Салон красоты"}, {"name": "Барбершоп"}],
                    "workingTimeText": "ежедневно, 10:00–22:00",
                    "photos": {
                        "count": 42,
                        "items": [{"urlTemplate": "https://avatars.mds.yandex.net/get-altay/1/%s"}]
                    }
                }]
            }
        }),
    )
}

pub fn reviews_response() -> CapturedResponse {
    response(
        "https://yandex.ru/maps/api/business/fetchReviews?businessId=203293742306",
        json!({
            "data": {
                "reviews": [
                    {
                        "author": {"name": "Анна"},
                        "text": "Отличный мастер, стрижка держится месяц",
                        "rating": 5,
                        "updatedTime": "2026-09-01T10:00:00Z",
                        "businessComment": {"text": "Спасибо, ждём снова!"}
                    },
                    {
                        "author": {"name": "Пётр"},
                        "text": "Долго ждал администратора",
                        "rating": 3
                    }
                ]
            }
        }),
    )
}

pub fn goods_response() -> CapturedResponse {
    response(
        "https://yandex.ru/maps/api/business/fetchGoods?businessId=203293742306",
        json!({
            "data": {
                "categories": [{
                    "name": "Стрижки",
                    "items": [
                        {"name": "Мужская стрижка", "price": {"text": "1 500 ₽"}},
                        {"name": "Стрижка машинкой", "price": {"value": 900}}
                    ]
                }]
            }
        }),
    )
}

/// Scenario A: every critical field arrives over the API.
pub fn full_card_page() -> PageScript {
    PageScript {
        current_url: CARD_URL.to_string(),
        title: "Oliver — Яндекс Карты".to_string(),
        html: r#"<html><head><title>Oliver — Яндекс Карты</title></head>
            <body><h1 class="orgpage-header-view__header">Oliver</h1></body></html>"#
            .to_string(),
        responses: vec![search_response(), reviews_response(), goods_response()],
        ..Default::default()
    }
}

/// The same card without its reviews reply or services, as a later visit
/// might see it.
pub fn metrics_only_page() -> PageScript {
    let mut reviews = reviews_response();
    if let Some(first) = reviews.body["data"]["reviews"][0].as_object_mut() {
        first.remove("businessComment");
    }
    PageScript {
        responses: vec![search_response(), reviews],
        ..full_card_page()
    }
}

/// Scenario B: the page only renders a name.
pub fn title_only_page() -> PageScript {
    PageScript {
        current_url: CARD_URL.to_string(),
        title: "Oliver".to_string(),
        html: "<html><head><title>Oliver</title></head><body><h1>Oliver</h1></body></html>"
            .to_string(),
        ..Default::default()
    }
}

/// A card page with nothing any strategy recognizes.
pub fn blank_page() -> PageScript {
    PageScript {
        current_url: CARD_URL.to_string(),
        title: String::new(),
        html: "<html><body><div class=\"spinner\"></div></body></html>".to_string(),
        ..Default::default()
    }
}

/// Scenario C: navigation lands on the anti-bot interstitial.
pub fn captcha_page() -> PageScript {
    PageScript {
        blocked: true,
        current_url: CAPTCHA_URL.to_string(),
        title: "Ой!".to_string(),
        html: r#"<html><head><title>Ой!</title></head><body>
            <form action="/checkcaptcha" class="CheckboxCaptcha">
              <p>Подтвердите, что запросы отправляли вы, а не робот</p>
            </form></body></html>"#
            .to_string(),
        ..Default::default()
    }
}
