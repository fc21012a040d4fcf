//! AI metadata enhancement.
//!
//! Defines the [`MetadataOracle`] trait and its implementations:
//! - **[`DisabledOracle`]**: always fails; used when enhancement is off.
//! - **[`ChatOracle`]**: calls an OpenAI-compatible `chat/completions`
//!   endpoint (Perplexity `sonar` by default) with retry and backoff.
//!
//! Use [`create_oracle`] to pick the implementation from configuration.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 401/403 and other 4xx → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: `backoff_base_ms · 2^(attempt-1)`, multiplier capped at 2^5
//!
//! # Reply Parsing
//!
//! Replies are parsed permissively: the chat envelope
//! (`choices[0].message.content`) or a bare JSON payload; inside free text a
//! fenced ```` ```json ```` block, else the first balanced `{…}` object,
//! else `Author:` / `Title:` / `Year:` lines. `"Unknown"` means no value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::clean::find_year;
use crate::config::EnhancementConfig;
use crate::error::{EnhanceError, Error};
use crate::models::{AiQuery, MergedRecord, RawCandidate, Source};

/// Quality hint attached to oracle answers.
pub const AI_QUALITY: f64 = 0.9;

const MAX_BACKOFF_SHIFT: u32 = 5;

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid regex"));
static AUTHOR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s*\-#]*authors?\**\s*[:：]\s*\**\s*(.+?)\s*$").expect("valid regex")
});
static TITLE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s*\-#]*title\**\s*[:：]\s*\**\s*(.+?)\s*$").expect("valid regex")
});
static YEAR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s*\-#]*(?:publication\s+)?year\**\s*[:：]\s*\**\s*(.+?)\s*$")
        .expect("valid regex")
});

/// External knowledge source for bibliographic metadata.
#[async_trait]
pub trait MetadataOracle: Send + Sync {
    /// Short identifier for logs (model name).
    fn name(&self) -> &str;

    async fn lookup(&self, query: &AiQuery) -> Result<RawCandidate, EnhanceError>;
}

/// Build the oracle for `config`. `credential` is the API key read from the
/// environment at startup; it is required when enhancement is enabled.
pub fn create_oracle(
    config: &EnhancementConfig,
    credential: Option<String>,
) -> Result<Arc<dyn MetadataOracle>, Error> {
    if !config.enabled {
        return Ok(Arc::new(DisabledOracle));
    }
    let api_key = credential
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "AI enhancement is enabled but {} is not set",
                config.api_key_env
            ))
        })?;
    if config.endpoint.contains("perplexity.ai") && !api_key.starts_with("pplx-") {
        tracing::warn!("Perplexity API keys normally start with 'pplx-'");
    }
    Ok(Arc::new(ChatOracle::new(config, api_key)?))
}

/// Prompt from the known fragments of `record` plus the original filename.
pub fn build_query(record: &MergedRecord, file_name: &str, fingerprint: String) -> AiQuery {
    let mut prompt = String::from("Identify the book or paper stored in this file.\n");
    prompt.push_str(&format!("Original filename: {}\n", file_name));
    if let Some(author) = &record.author {
        prompt.push_str(&format!("Extracted author: {}\n", author));
    }
    if let Some(title) = &record.title {
        prompt.push_str(&format!("Extracted title: {}\n", title));
    }
    if let Some(year) = record.year {
        prompt.push_str(&format!("Extracted year: {}\n", year));
    }
    prompt.push_str(
        "\nUsing reliable sources, reply with a JSON object with the keys \"author\", \
         \"title\" and \"year\". Write each author as 'LastName, FirstName' and separate \
         multiple authors with '; '. Use \"Unknown\" for any field you cannot verify.\n",
    );
    AiQuery {
        prompt,
        fingerprint,
        file_name: file_name.to_string(),
    }
}

// ============ Disabled Oracle ============

pub struct DisabledOracle;

#[async_trait]
impl MetadataOracle for DisabledOracle {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn lookup(&self, _query: &AiQuery) -> Result<RawCandidate, EnhanceError> {
        Err(EnhanceError::Communication(
            "AI enhancement is disabled".to_string(),
        ))
    }
}

// ============ Chat Oracle ============

/// OpenAI-compatible chat completion client.
pub struct ChatOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
    backoff_base_ms: u64,
    temperature: f64,
    max_tokens: u32,
}

impl ChatOracle {
    pub fn new(config: &EnhancementConfig, api_key: String) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    Duration::from_millis(base_ms.saturating_mul(1 << shift))
}

#[async_trait]
impl MetadataOracle for ChatOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn lookup(&self, query: &AiQuery) -> Result<RawCandidate, EnhanceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a precise bibliographic assistant. Answer with JSON."
                },
                { "role": "user", "content": query.prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.backoff_base_ms, attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying AI lookup");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let text = response.text().await.map_err(|e| {
                            EnhanceError::Communication(format!("reading reply failed: {}", e))
                        })?;
                        tracing::debug!(file = %query.file_name, "AI reply received");
                        return parse_reply(&text);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "transient AI service error");
                        last_err = Some(format!("AI service error {}: {}", status, body_text));
                        continue;
                    }

                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(EnhanceError::Communication(format!(
                            "AI service rejected the credential ({})",
                            status
                        )));
                    }

                    // Client error (not 429): don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EnhanceError::Communication(format!(
                        "AI service error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "AI request failed");
                    last_err = Some(if e.is_timeout() {
                        format!("AI request timed out: {}", e)
                    } else {
                        format!("AI request failed: {}", e)
                    });
                    continue;
                }
            }
        }

        Err(EnhanceError::Communication(format!(
            "{} (after {} retries)",
            last_err.unwrap_or_else(|| "AI lookup failed".to_string()),
            self.max_retries
        )))
    }
}

// ============ Reply parsing ============

/// Parse an oracle reply body into a candidate.
pub fn parse_reply(body: &str) -> Result<RawCandidate, EnhanceError> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(content) = json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            return parse_content(content);
        }
        if let Some(candidate) = from_payload(&json) {
            return Ok(candidate);
        }
    }
    parse_content(body)
}

fn parse_content(text: &str) -> Result<RawCandidate, EnhanceError> {
    let fenced = FENCED_JSON_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    for raw in fenced.into_iter().chain(extract_first_json_object(text)) {
        if let Ok(json) = serde_json::from_str::<Value>(raw) {
            if let Some(candidate) = from_payload(&json) {
                return Ok(candidate);
            }
        }
    }

    let line = |re: &Regex| re.captures(text).map(|c| c[1].to_string());
    let candidate = RawCandidate {
        source: Source::Ai,
        author: line(&AUTHOR_LINE_RE).and_then(known),
        title: line(&TITLE_LINE_RE).and_then(known),
        year: line(&YEAR_LINE_RE).as_deref().and_then(find_year),
        quality: AI_QUALITY,
    };
    if candidate.is_empty() {
        let preview: String = text.chars().take(120).collect();
        return Err(EnhanceError::Processing(format!(
            "no metadata found in AI reply: {:?}",
            preview
        )));
    }
    Ok(candidate)
}

/// First top-level `{…}` in `s`, by brace depth.
fn extract_first_json_object(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'{' {
            if depth == 0 {
                start = Some(i);
            }
            depth += 1;
        } else if b == b'}' && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(st) = start {
                    return s.get(st..=i);
                }
            }
        }
    }
    None
}

fn from_payload(json: &Value) -> Option<RawCandidate> {
    let obj = json.as_object()?;
    let field = |names: &[&str]| names.iter().find_map(|n| obj.get(*n));

    let author = field(&["author", "authors", "Author"]).and_then(|v| match v {
        Value::String(s) => known(s.clone()),
        Value::Array(items) => {
            let names: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|s| known(s.to_string()))
                .collect();
            (!names.is_empty()).then(|| names.join("; "))
        }
        _ => None,
    });
    let title = field(&["title", "Title"])
        .and_then(Value::as_str)
        .and_then(|s| known(s.to_string()));
    let year = field(&["year", "Year", "publication_year"]).and_then(|v| match v {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => find_year(s),
        _ => None,
    });

    let candidate = RawCandidate {
        source: Source::Ai,
        author,
        title,
        year,
        quality: AI_QUALITY,
    };
    (!candidate.is_empty()).then_some(candidate)
}

fn known(value: String) -> Option<String> {
    let trimmed = value.trim().trim_matches('"').trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || matches!(lower.as_str(), "unknown" | "n/a" | "none" | "null" | "not found")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}
