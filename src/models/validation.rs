use serde::{Deserialize, Serialize};

/// Verdict of the payload validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub is_successful: bool,
    pub reason: String,
    pub quality_score: f64,
    /// Fields whose absence invalidates the record outright.
    pub hard_missing: Vec<String>,
    /// Critical fields that were not found (advisory).
    pub missing_fields: Vec<String>,
    pub found_fields: Vec<String>,
}

impl ValidationResult {
    /// Failing verdict that never reached scoring (captcha, upstream error).
    pub fn short_circuit(reason: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            reason: reason.into(),
            quality_score: 0.0,
            hard_missing: Vec::new(),
            missing_fields: Vec::new(),
            found_fields: Vec::new(),
        }
    }
}
