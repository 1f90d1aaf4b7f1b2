//! Best-effort postmortem artifacts, one directory per parse attempt.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::extract::CapturedResponse;

#[derive(Debug, Clone)]
pub struct DebugBundles {
    root: Option<PathBuf>,
}

impl DebugBundles {
    /// An empty directory disables bundles.
    pub fn new(dir: &str) -> Self {
        let dir = dir.trim();
        Self {
            root: (!dir.is_empty()).then(|| PathBuf::from(dir)),
        }
    }

    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn open(&self) -> DebugBundle {
        let id = format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), Uuid::new_v4().simple());
        DebugBundle {
            dir: self.root.as_ref().map(|root| root.join(&id)),
            id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugBundle {
    id: String,
    dir: Option<PathBuf>,
}

impl DebugBundle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub async fn write_responses(&self, responses: &[CapturedResponse]) {
        self.write_json("api_responses.json", &responses).await;
    }

    pub async fn write_redirect_snapshot(&self, html: &str) {
        self.write("redirect_snapshot.html", html.as_bytes()).await;
    }

    pub async fn write_validation<T: Serialize + ?Sized>(&self, verdict: &T) {
        self.write_json("validation.json", verdict).await;
    }

    pub async fn write_exception(&self, text: &str) {
        self.write("exception.txt", text.as_bytes()).await;
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => self.write(name, &bytes).await,
            Err(e) => tracing::warn!(bundle = %self.id, file = name, error = %e, "Debug bundle serialization failed"),
        }
    }

    async fn write(&self, name: &str, bytes: &[u8]) {
        let Some(dir) = &self.dir else {
            return;
        };
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(name), bytes).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(bundle = %self.id, file = name, error = %e, "Debug bundle write failed");
        }
    }
}
