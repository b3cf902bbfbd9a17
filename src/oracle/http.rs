use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::graph::{RelationshipCandidate, RelationshipType};
use crate::papers::Paper;

use super::{OracleError, RelationshipOracle};

const SYSTEM_PROMPT: &str = r#"You analyze pairs of research papers and classify how Paper A relates to Paper B.

Relationship types:
- extends: Paper A builds upon Paper B (reuses its method, applies it to a new domain, or addresses its limitations)
- supports: Paper A independently corroborates Paper B's findings
- contradicts: Paper A reports findings in clear, direct conflict with Paper B. Be conservative.
- none: the papers are unrelated or the relationship is too weak

Answer with JSON only:
{"relationship_type": "extends", "confidence": 0.75, "evidence": "One or two sentences citing specific findings from both papers."}"#;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

/// Answer object the model is asked to produce.
#[derive(Deserialize)]
struct OracleAnswer {
    #[serde(default)]
    relationship_type: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence: Option<String>,
}

/// Relationship oracle backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpOracle {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl HttpOracle {
    /// `endpoint` is the full chat-completions URL.
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Rejected(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            temperature,
        })
    }

    fn build_prompt(paper_a: &Paper, paper_b: &Paper) -> String {
        format!(
            "Compare these two papers and identify their relationship:\n\n{}\n\n{}\n\nAnalyze the relationship between Paper A and Paper B.",
            describe("Paper A", paper_a),
            describe("Paper B", paper_b)
        )
    }
}

fn describe(label: &str, paper: &Paper) -> String {
    let authors: Vec<&str> = paper.authors.iter().take(3).map(String::as_str).collect();
    let finding = if paper.key_finding.is_empty() {
        "Unknown"
    } else {
        paper.key_finding.as_str()
    };
    format!(
        "{}:\nTitle: {}\nAuthors: {}\nKey Finding: {}",
        label,
        paper.title,
        authors.join(", "),
        finding
    )
}

fn classify_status(status: StatusCode, body: String) -> OracleError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        OracleError::RateLimited(body)
    } else if status.is_server_error() {
        OracleError::Unavailable(format!("HTTP {}: {}", status, body))
    } else {
        OracleError::Rejected(format!("HTTP {}: {}", status, body))
    }
}

#[async_trait]
impl RelationshipOracle for HttpOracle {
    async fn propose(
        &self,
        source: &Paper,
        target: &Paper,
    ) -> Result<Option<RelationshipCandidate>, OracleError> {
        log::debug!(
            "Detecting relationship: '{}' vs '{}'",
            source.short_title(),
            target.short_title()
        );

        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::build_prompt(source, target),
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(classify_status(status, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::MalformedResponse(format!("failed to parse response: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::MalformedResponse("response has no content".to_string()))?;

        parse_oracle_response(&content)
    }
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"))
}

fn bare_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

/// Parse a model answer into a candidate.
///
/// The JSON object may be wrapped in a markdown code fence or surrounded by
/// prose. `"none"` and unknown types yield `Ok(None)`; confidence is clamped
/// to `[0, 1]`.
pub fn parse_oracle_response(text: &str) -> Result<Option<RelationshipCandidate>, OracleError> {
    let json = fenced_json()
        .captures(text)
        .and_then(|c| c.get(1))
        .or_else(|| bare_json().find(text))
        .map(|m| m.as_str())
        .ok_or_else(|| OracleError::MalformedResponse("no JSON object in response".to_string()))?;

    let answer: OracleAnswer = serde_json::from_str(json)
        .map_err(|e| OracleError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let raw_type = answer.relationship_type.unwrap_or_default();
    let relationship_type = match raw_type.trim().to_ascii_lowercase().as_str() {
        "none" | "" => return Ok(None),
        other => match other.parse::<RelationshipType>() {
            Ok(t) => t,
            Err(_) => {
                log::warn!("Invalid relationship type: {}, treating as none", raw_type);
                return Ok(None);
            }
        },
    };

    let confidence = answer.confidence.filter(|c| c.is_finite()).unwrap_or(0.0);

    Ok(Some(RelationshipCandidate {
        relationship_type,
        confidence: confidence.clamp(0.0, 1.0),
        description: answer
            .evidence
            .unwrap_or_else(|| "No evidence provided".to_string()),
    }))
}
