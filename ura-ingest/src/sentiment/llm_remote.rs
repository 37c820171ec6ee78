//! Remote LLM sentiment method
//!
//! Sends review text to a configurable completion endpoint and parses the
//! structured JSON verdict. Ships inactive: the method only joins the
//! registry when an endpoint and API key are configured, and the outer
//! pipeline timeout still applies on top of the client timeout here.

use super::{Analysis, ReviewInput, SentimentMethod};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ura_common::db::models::{ReviewType, Sentiment};
use ura_common::{Error, Result};

const CLIENT_TIMEOUT_SECS: u64 = 20;
const USER_AGENT: &str = concat!("ura-ingest/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = "Ты — эксперт по анализу отзывов о городской инфраструктуре. \
Определи тональность отзыва (positive/negative/neutral), тип сообщения \
(gratitude/complaint/suggestion/informational), ключевые слова и темы. \
Ответь строго JSON-объектом с полями sentiment, confidence, review_type, keywords, topics.";

/// Connection settings for the remote method
#[derive(Debug, Clone)]
pub struct LlmRemoteConfig {
    pub endpoint: String,
    pub api_key: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    system: &'a str,
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
}

/// The structured verdict the endpoint is prompted to return
#[derive(Debug, Deserialize)]
struct CompletionVerdict {
    sentiment: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    review_type: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
}

/// Sentiment via a remote completion endpoint
pub struct LlmRemoteMethod {
    http_client: reqwest::Client,
    config: LlmRemoteConfig,
}

impl LlmRemoteMethod {
    pub fn new(config: LlmRemoteConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("LLM HTTP client: {}", e)))?;

        Ok(Self { http_client, config })
    }

    fn parse_verdict(body: &str) -> Result<Analysis> {
        let verdict: CompletionVerdict = serde_json::from_str(body)
            .map_err(|e| Error::MethodFailure(format!("unparseable LLM verdict: {}", e)))?;

        let sentiment = Sentiment::parse(&verdict.sentiment).ok_or_else(|| {
            Error::MethodFailure(format!("unknown sentiment label '{}'", verdict.sentiment))
        })?;

        let review_type = verdict
            .review_type
            .as_deref()
            .and_then(ReviewType::parse)
            .unwrap_or(ReviewType::Informational);

        let confidence = verdict.confidence.unwrap_or(0.7).clamp(0.0, 1.0);

        Ok(Analysis {
            sentiment,
            confidence,
            review_type,
            keywords: verdict.keywords,
            topics: verdict.topics,
        })
    }
}

#[async_trait]
impl SentimentMethod for LlmRemoteMethod {
    fn name(&self) -> &'static str {
        "llm_remote"
    }

    async fn analyze(&self, input: &ReviewInput) -> Result<Analysis> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT,
            prompt: &input.text,
            temperature: 0.3,
            max_tokens: 500,
        };

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::MethodFailure(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::MethodFailure(format!(
                "LLM endpoint returned {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::MethodFailure(format!("LLM response read failed: {}", e)))?;

        Self::parse_verdict(&body)
    }
}
