use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::core::graph::WalletGraph;
use crate::core::MAX_RISK;
use crate::error::EngineError;
use crate::query::features::{summarize, FeatureMatrix};
use crate::query::get_subgraph;

/// Scores every node of a neighborhood from its features and edge list.
/// Returns one class in `0..=MAX_RISK` per node, in node order.
#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn classify(&self, features: &FeatureMatrix, edges: &[(usize, usize)]) -> Result<Vec<u8>, ClassifierError>;
}

/// Remote classifier speaking JSON over HTTP.
pub struct HttpClassifier {
    url: String,
    client: Client,
    auth: Option<String>, // base64 encoded user:pass
}

impl HttpClassifier {
    pub fn new(url: &str, user: Option<&str>, pass: Option<&str>, timeout: Duration) -> Result<Self, ClassifierError> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let auth = user.map(|u| STANDARD.encode(format!("{u}:{}", pass.unwrap_or(""))));
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
            auth,
        })
    }

    /// `None` when no classifier url is configured.
    pub fn from_config(config: &ClassifierConfig) -> Result<Option<Self>, ClassifierError> {
        let Some(url) = config.url.as_deref() else {
            return Ok(None);
        };
        Self::new(
            url,
            config.user.as_deref(),
            config.password.as_deref(),
            Duration::from_secs(config.timeout_seconds),
        )
        .map(Some)
    }
}

#[async_trait]
impl RiskClassifier for HttpClassifier {
    async fn classify(&self, features: &FeatureMatrix, edges: &[(usize, usize)]) -> Result<Vec<u8>, ClassifierError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request_body(features, edges));
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", format!("Basic {auth}"));
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ClassifierError::Status(resp.status().as_u16()));
        }
        let body: Value = resp.json().await?;
        parse_classes(&body, features.len())
    }
}

fn request_body(features: &FeatureMatrix, edges: &[(usize, usize)]) -> Value {
    json!({
        "features": features.rows(),
        "edges": edges,
    })
}

/// Expects `{"classes": [..]}` with one integer per node. Out-of-range
/// classes are clamped to `0..=MAX_RISK`.
fn parse_classes(body: &Value, expected: usize) -> Result<Vec<u8>, ClassifierError> {
    let classes = body
        .get("classes")
        .and_then(Value::as_array)
        .ok_or_else(|| ClassifierError::BadResponse("missing \"classes\" array".into()))?;
    if classes.len() != expected {
        return Err(ClassifierError::BadResponse(format!(
            "expected {expected} classes, got {}",
            classes.len()
        )));
    }
    classes
        .iter()
        .map(|c| {
            c.as_i64()
                .map(|v| v.clamp(0, MAX_RISK as i64) as u8)
                .ok_or_else(|| ClassifierError::BadResponse(format!("non-integer class {c}")))
        })
        .collect()
}

/// Risk class of `wallet` from its `hops` neighborhood.
///
/// Never fails: an unknown wallet or an unreachable classifier scores 0.
pub async fn score_wallet(graph: &WalletGraph, classifier: &dyn RiskClassifier, wallet: &str, hops: usize) -> u8 {
    let sub = match get_subgraph(graph, wallet, hops) {
        Ok(sub) => sub,
        Err(e) => {
            debug!(wallet, "{e}; scoring as 0");
            return 0;
        }
    };
    let features = summarize(&sub);
    match classifier.classify(&features, &sub.edge_list()).await {
        Ok(classes) => classes.first().copied().unwrap_or(0),
        Err(e) => {
            warn!(wallet, "classifier failed, falling back to 0: {e}");
            0
        }
    }
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classifier returned HTTP {0}")]
    Status(u16),

    #[error("bad classifier response: {0}")]
    BadResponse(String),
}

impl From<ClassifierError> for EngineError {
    fn from(e: ClassifierError) -> Self {
        EngineError::ClassifierUnavailable(e.to_string())
    }
}
