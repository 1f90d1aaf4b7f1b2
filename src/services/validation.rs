use strum::{Display, EnumString};
use tracing::debug;

use crate::models::card::{ExtractionSource, NormalizedCard};
use crate::models::validation::ValidationResult;

/// Records scoring below this ratio are rejected.
const MIN_QUALITY: f64 = 0.5;

/// Where a card was scraped from; selects the critical field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DataSource {
    /// Public map card.
    YandexMaps,
    /// Personal-cabinet fallback; exposes fewer fields.
    YandexBusiness,
}

impl DataSource {
    pub fn critical_fields(self) -> &'static [&'static str] {
        match self {
            DataSource::YandexMaps => &[
                "title",
                "address",
                "phone",
                "rating",
                "reviews_count",
                "categories",
                "hours",
                "photos",
            ],
            DataSource::YandexBusiness => &["title", "address", "rating", "reviews_count", "categories"],
        }
    }

    /// Fields whose absence rejects the card regardless of score.
    pub fn hard_fields(self) -> &'static [&'static str] {
        &["title"]
    }
}

/// Score a reconciled card and decide whether it may be persisted.
///
/// Captcha and upstream error signals fail immediately without scoring.
/// Otherwise the score is the found/critical ratio, and the verdict fails
/// on any hard-missing field or a score below 0.5.
pub fn validate(card: &NormalizedCard, source: DataSource) -> ValidationResult {
    if let Some(err) = card.upstream_error.as_deref() {
        return ValidationResult::short_circuit(err);
    }

    let critical = source.critical_fields();
    let (found, missing): (Vec<&str>, Vec<&str>) =
        critical.iter().copied().partition(|field| card.has_field(field));

    let hard_missing: Vec<String> = source
        .hard_fields()
        .iter()
        .filter(|field| !card.has_field(field))
        .map(|field| field.to_string())
        .collect();

    let quality_score = if critical.is_empty() {
        0.0
    } else {
        found.len() as f64 / critical.len() as f64
    };

    let (is_successful, reason) = if !hard_missing.is_empty() {
        (false, format!("missing_in_source:{}", hard_missing.join(",")))
    } else if quality_score < MIN_QUALITY {
        (
            false,
            format!(
                "low_quality_payload:quality_score={} missing={}",
                round3(quality_score),
                missing.join(",")
            ),
        )
    } else {
        (true, "ok".to_string())
    };

    debug!(%source, quality_score, is_successful, "Validated card");

    ValidationResult {
        is_successful,
        reason,
        quality_score,
        hard_missing,
        missing_fields: missing.into_iter().map(String::from).collect(),
        found_fields: found.into_iter().map(String::from).collect(),
    }
}

/// Non-blocking notes attached to a completed job.
pub fn completion_warnings(card: &NormalizedCard, verdict: &ValidationResult) -> Vec<String> {
    let mut warnings = Vec::new();
    let soft: Vec<&str> = verdict
        .missing_fields
        .iter()
        .filter(|f| !verdict.hard_missing.contains(f))
        .map(String::as_str)
        .collect();
    if !soft.is_empty() {
        warnings.push(format!("missing_critical:{}", soft.join(",")));
    }
    for source in &card.meta.sources_used {
        if *source != ExtractionSource::ApiInterception {
            warnings.push(format!("fallback_source:{source}"));
        }
    }
    warnings
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
