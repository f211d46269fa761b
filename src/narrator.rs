//! LLM narration of high-risk transactions
//!
//! A bounded sample of the alert subset is sent to a chat-completion
//! endpoint together with a fixed analytical prompt. Failures never abort
//! the run: they come back as a [`NarrationError`] the caller reports.

use crate::config::NarratorConfig;
use crate::types::alert::{AlertSample, EnrichedTransaction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Category of a narration failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationErrorKind {
    /// Credential variable unset or empty
    MissingCredential,
    /// No response within the configured timeout
    TimedOut,
    /// Service answered with an error status or error payload
    Rejected,
    /// Connection or protocol failure
    Transport,
    /// Response body lacks `choices[0].message.content`
    MalformedResponse,
}

impl fmt::Display for NarrationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NarrationErrorKind::MissingCredential => "missing credential",
            NarrationErrorKind::TimedOut => "timed out",
            NarrationErrorKind::Rejected => "rejected by service",
            NarrationErrorKind::Transport => "transport error",
            NarrationErrorKind::MalformedResponse => "malformed response",
        };
        f.write_str(name)
    }
}

/// Narration failure with its kind and a human-readable message
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct NarrationError {
    pub kind: NarrationErrorKind,
    pub message: String,
}

impl NarrationError {
    pub fn new(kind: NarrationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> NarrationErrorKind {
        self.kind
    }
}

impl From<reqwest::Error> for NarrationError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            NarrationErrorKind::TimedOut
        } else if e.is_decode() {
            NarrationErrorKind::MalformedResponse
        } else {
            NarrationErrorKind::Transport
        };
        Self::new(kind, e.to_string())
    }
}

/// Produces commentary for a set of alerts
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, alerts: &[EnrichedTransaction]) -> Result<String, NarrationError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

/// Project the first `limit` alerts onto the columns shown to the model
pub fn sample_alerts(alerts: &[EnrichedTransaction], limit: usize) -> Vec<AlertSample> {
    alerts.iter().take(limit).map(EnrichedTransaction::sample).collect()
}

/// Embed the JSON sample in the analyst prompt
pub fn build_prompt(samples: &[AlertSample]) -> serde_json::Result<String> {
    let json = serde_json::to_string_pretty(samples)?;
    Ok(format!(
        "Como experto en seguridad bancaria, analiza estas transacciones marcadas como FRAUDE con montos altos:\n\
         {json}\n\
         \n\
         Dime:\n\
         1. ¿Qué patrones de riesgo detectas en los comentarios?\n\
         2. ¿Cuál es el monto promedio de estas alertas?\n\
         3. Dame una recomendación breve para el equipo de auditoría.\n"
    ))
}

/// Extract `choices[0].message.content` from a chat-completion body
pub fn parse_completion(body: &str) -> Result<String, NarrationError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        NarrationError::new(
            NarrationErrorKind::MalformedResponse,
            format!("invalid JSON: {}", e),
        )
    })?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(NarrationError::new(NarrationErrorKind::Rejected, message));
    }

    value
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            NarrationError::new(
                NarrationErrorKind::MalformedResponse,
                "response has no choices[0].message.content",
            )
        })
}

/// Narrator backed by an OpenAI-compatible chat-completion endpoint
pub struct RiskNarrator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    sample_size: usize,
    timeout: Duration,
}

impl RiskNarrator {
    /// Create a narrator from configuration
    pub fn new(config: &NarratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            sample_size: config.sample_size,
            timeout: config.timeout(),
        })
    }

    /// Get the model identifier
    pub fn model(&self) -> &str {
        &self.model
    }

    fn api_key(&self) -> Result<String, NarrationError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(NarrationError::new(
                NarrationErrorKind::MissingCredential,
                format!("environment variable {} is not set", self.api_key_env),
            )),
        }
    }
}

#[async_trait]
impl Narrator for RiskNarrator {
    async fn narrate(&self, alerts: &[EnrichedTransaction]) -> Result<String, NarrationError> {
        let api_key = self.api_key()?;
        let samples = sample_alerts(alerts, self.sample_size);
        let prompt = build_prompt(&samples).map_err(|e| {
            NarrationError::new(NarrationErrorKind::MalformedResponse, e.to_string())
        })?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        info!(
            samples = samples.len(),
            model = %self.model,
            "Sending risk samples to narration service"
        );
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let err = NarrationError::from(e);
                if err.kind == NarrationErrorKind::TimedOut {
                    NarrationError::new(
                        NarrationErrorKind::TimedOut,
                        format!("no response within {:?}", self.timeout),
                    )
                } else {
                    err
                }
            })?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, bytes = body.len(), "Narration response received");

        if !status.is_success() {
            warn!(status = %status, "Narration service rejected the request");
            return Err(NarrationError::new(
                NarrationErrorKind::Rejected,
                format!("HTTP {}: {}", status, body),
            ));
        }

        let text = parse_completion(&body)?;
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "Narration received"
        );
        Ok(text)
    }
}
