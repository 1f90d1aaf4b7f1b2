pub mod api;
pub mod card;
pub mod job;
pub mod snapshot;
pub mod validation;
