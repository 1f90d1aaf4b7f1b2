//! Target URL handling for organization cards.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static ORG_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/org/(?:[^/]+/)?(\d{5,})(?:/|$)").expect("valid regex"));
static SPRAV_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/sprav/(\d{5,})(?:/|$)").expect("valid regex"));
static NUMERIC_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d{6,})(?:/|$)").expect("valid regex"));

fn is_yandex_host(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| host.split('.').any(|label| label == "yandex"))
}

fn is_cabinet(url: &Url) -> bool {
    url.path().contains("/sprav/")
        || url
            .host_str()
            .is_some_and(|host| host.starts_with("business.yandex."))
}

/// Numeric organization id referenced by a map or cabinet URL.
pub fn org_id(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !is_yandex_host(&url) {
        return None;
    }
    let path = url.path();

    if let Some(caps) = ORG_PATH.captures(path) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = SPRAV_PATH.captures(path) {
        return Some(caps[1].to_string());
    }
    if is_cabinet(&url) {
        if let Some(caps) = NUMERIC_SEGMENT.captures(path) {
            return Some(caps[1].to_string());
        }
        // Cabinet links sometimes carry the id only in the query string.
        return url
            .query_pairs()
            .find(|(k, v)| {
                matches!(k.as_ref(), "permalink" | "orgId" | "org_id")
                    && v.chars().all(|c| c.is_ascii_digit())
            })
            .map(|(_, v)| v.into_owned());
    }
    None
}

/// Rewrite a URL into the public card URL the browser should open.
///
/// Personal-cabinet links become `https://yandex.ru/maps/org/<id>/`; public
/// links lose trailing tab segments and query strings. Anything without an
/// organization id is returned unchanged.
pub fn normalize_map_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    let Some(id) = org_id(trimmed) else {
        return trimmed.to_string();
    };

    if is_cabinet(&url) {
        return format!("https://yandex.ru/maps/org/{id}/");
    }

    let path = url.path().to_string();
    let Some(end) = ORG_PATH
        .captures(&path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.end())
    else {
        return trimmed.to_string();
    };
    url.set_path(&format!("{}/", &path[..end]));
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}
