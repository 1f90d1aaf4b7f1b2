pub mod browser;
pub mod debug_bundle;
pub mod driver;
pub mod extract;
pub mod gateway;
pub mod identity;
pub mod queue;
pub mod reconcile;
pub mod sessions;
pub mod urls;
pub mod validation;
pub mod worker;
