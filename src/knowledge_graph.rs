// src/knowledge_graph.rs
// Best-effort sync to the external knowledge-graph sidecar. Treated as an
// external collaborator per spec.md §1/§6: failures are swallowed, sync is
// advisory only.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct KnowledgeGraphClient {
    http: reqwest::Client,
    base_url: String,
    port: u16,
}

impl KnowledgeGraphClient {
    pub fn new(base_url: String, port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, base_url, port }
    }

    /// Fire-and-forget POST to `{KG_URL}/api/entity`. Any failure (network,
    /// non-2xx) is swallowed.
    pub fn sync_entity(&self, entity: Value) {
        self.post_fire_and_forget("/api/entity", entity);
    }

    /// Fire-and-forget POST to `{KG_URL}/api/memory-items`.
    pub fn sync_memory_item(&self, item: Value) {
        self.post_fire_and_forget("/api/memory-items", item);
    }

    fn post_fire_and_forget(&self, path: &str, body: Value) {
        let url = format!("{}{}", self.base_url, path);
        let host_header = format!("127.0.0.1:{}", self.port);
        let http = self.http.clone();
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .header("Host", host_header)
                .json(&body)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => debug!(status = %resp.status(), url = %url, "knowledge-graph sync non-2xx"),
                Err(e) => debug!(error = %e, url = %url, "knowledge-graph sync failed"),
            }
        });
    }

    /// Used by `/health` to report whether the sidecar looks reachable.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/entity", self.base_url);
        self.http
            .head(&url)
            .timeout(Duration::from_millis(500))
            .send()
            .await
            .is_ok()
    }
}
