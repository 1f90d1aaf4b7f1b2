//! Salon card parser
//!
//! Queue-driven scraping of Yandex Maps business cards: a worker claims parse
//! jobs from Postgres, drives a headless browser through challenge pages,
//! reconciles API, DOM and meta-tag extraction into one card, scores it and
//! persists validated snapshots.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
