//! The `LlmClient` trait behind the classification/entity-extraction/relationship-inference
//! pipeline, plus a defensive JSON-extraction helper every implementation is expected to run its
//! raw completion through before parsing.
//!
//! No single file in the teacher repo calls out to an external text-completion service — this is
//! enriched from the pack's general resilient-external-call idiom (retry-free, failure leaves the
//! unit of work untouched for a later pass) rather than copied from one source file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Classification, WaypointType};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("response was not valid JSON after extraction: {0}")]
    InvalidJson(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Output of the classifier call: `{signal|noise, one-of-three-kinds or null, optional debug
/// sub-object}` per spec.md §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_signal: bool,
    pub classification: Option<Classification>,
    pub debug_signal: Option<DebugSignal>,
}

/// The sub-object the path tracker consumes: an error/success/attempt signal with a confidence
/// and an optional hint about what waypoint type it implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSignal {
    pub kind: DebugSignalKind,
    pub confidence: f64,
    pub waypoint_hint: Option<WaypointType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugSignalKind {
    Error,
    Success,
    Attempt,
}

/// One extracted entity candidate, before the quality gate runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_name: String,
    pub target_name: String,
    pub relationship: String,
    pub weight: f64,
}

/// The three external-text-completion calls the LLM enrichment processor makes, each behind its
/// own method so a test double can answer them independently.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn classify(&self, content: &str) -> LlmResult<ClassificationResult>;
    async fn extract_entities(&self, content: &str) -> LlmResult<Vec<ExtractedEntity>>;
    async fn infer_relationships(&self, entities: &[ExtractedEntity]) -> LlmResult<Vec<ExtractedRelationship>>;
    async fn summarize_kiss(&self, waypoints: &[String]) -> LlmResult<serde_json::Value>;
}

/// Strip a response down to its JSON payload: drop surrounding Markdown code fences, then locate
/// the first enclosing `{...}` or `[...]` span. Every `LlmClient` implementation that talks to a
/// real completion service is expected to run its raw text through this before calling
/// `serde_json::from_str`, per spec.md §4.5's "defensive JSON extraction (strip code fences,
/// locate first enclosing bracket/brace)".
pub fn extract_json(raw: &str) -> LlmResult<&str> {
    let trimmed = raw.trim();
    let without_fences = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_end_matches("```")
        .trim();

    let open_positions = [without_fences.find('{'), without_fences.find('[')];
    let open = open_positions.into_iter().flatten().min();
    let Some(open) = open else {
        return Err(LlmError::InvalidJson("no enclosing bracket found".into()));
    };
    let opener = without_fences.as_bytes()[open];
    let closer = if opener == b'{' { b'}' } else { b']' };
    let close = without_fences
        .as_bytes()
        .iter()
        .enumerate()
        .rev()
        .find(|(_, b)| **b == closer)
        .map(|(i, _)| i);
    let Some(close) = close else {
        return Err(LlmError::InvalidJson("no closing bracket found".into()));
    };
    if close < open {
        return Err(LlmError::InvalidJson("closing bracket precedes opening bracket".into()));
    }
    Ok(&without_fences[open..=close])
}

/// A test double that never classifies anything as signal, used wherever a `Box<dyn LlmClient>`
/// is required but no real enrichment should happen (tests, and a process run with no configured
/// endpoint — enrichment then stays permanently idle rather than erroring).
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn classify(&self, _content: &str) -> LlmResult<ClassificationResult> {
        Ok(ClassificationResult { is_signal: false, classification: Some(Classification::Noise), debug_signal: None })
    }

    async fn extract_entities(&self, _content: &str) -> LlmResult<Vec<ExtractedEntity>> {
        Ok(Vec::new())
    }

    async fn infer_relationships(&self, _entities: &[ExtractedEntity]) -> LlmResult<Vec<ExtractedRelationship>> {
        Ok(Vec::new())
    }

    async fn summarize_kiss(&self, _waypoints: &[String]) -> LlmResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

/// A `LlmClient` backed by a generic text-completion HTTP endpoint. The endpoint, model
/// identifier, and request shape are deliberately generic (an OpenAI-style
/// `{model, messages: [{role, content}]}` POST returning `{choices: [{message: {content}}]}`) —
/// spec.md §1 scopes the exact prompts and model identifiers out of this system, so this client
/// only owns getting a prompt to an endpoint and a completion back through [`extract_json`],
/// never what the prompt says.
#[cfg(feature = "llm-enrichment")]
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[cfg(feature = "llm-enrichment")]
impl HttpLlmClient {
    pub fn new(endpoint: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint, model }
    }

    async fn complete(&self, system: &str, prompt: &str) -> LlmResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Request(format!("endpoint returned {}", response.status())));
        }

        let parsed: serde_json::Value =
            response.json().await.map_err(|e| LlmError::Request(e.to_string()))?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::InvalidJson("no message content in completion response".into()))
    }
}

#[cfg(feature = "llm-enrichment")]
#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn classify(&self, content: &str) -> LlmResult<ClassificationResult> {
        let raw = self
            .complete(
                "Classify the following coding-assistant observation. Respond with JSON only.",
                content,
            )
            .await?;
        let json = extract_json(&raw)?;
        serde_json::from_str(json).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }

    async fn extract_entities(&self, content: &str) -> LlmResult<Vec<ExtractedEntity>> {
        let raw = self
            .complete(
                "Extract typed entities (files, decisions, problems, solutions) from the \
                 following text. Respond with a JSON array only.",
                content,
            )
            .await?;
        let json = extract_json(&raw)?;
        serde_json::from_str(json).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }

    async fn infer_relationships(&self, entities: &[ExtractedEntity]) -> LlmResult<Vec<ExtractedRelationship>> {
        let prompt = serde_json::to_string(entities).map_err(|e| LlmError::InvalidJson(e.to_string()))?;
        let raw = self
            .complete(
                "Given these extracted entities, infer directed relationships between them. \
                 Respond with a JSON array only.",
                &prompt,
            )
            .await?;
        let json = extract_json(&raw)?;
        serde_json::from_str(json).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }

    async fn summarize_kiss(&self, waypoints: &[String]) -> LlmResult<serde_json::Value> {
        let prompt = waypoints.join("\n");
        let raw = self
            .complete(
                "Summarize this resolved debugging path as a multi-dimension \"keep it simple\" \
                 record: what triggered it, what was tried, what worked, and what to do \
                 differently next time. Respond with a JSON object only.",
                &prompt,
            )
            .await?;
        let json = extract_json(&raw)?;
        serde_json::from_str(json).map_err(|e| LlmError::InvalidJson(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_object_from_fenced_response() {
        let raw = "```json\n{\"is_signal\": true}\n```";
        assert_eq!(extract_json(raw).unwrap(), "{\"is_signal\": true}");
    }

    #[test]
    fn extracts_json_array_ignoring_surrounding_prose() {
        let raw = "Sure, here you go:\n[{\"name\": \"auth.ts\"}]\nLet me know if you need more.";
        assert_eq!(extract_json(raw).unwrap(), "[{\"name\": \"auth.ts\"}]");
    }

    #[test]
    fn rejects_a_response_with_no_bracket() {
        assert!(extract_json("no json here").is_err());
    }

    #[tokio::test]
    async fn null_client_classifies_everything_as_noise() {
        let client = NullLlmClient;
        let result = client.classify("anything").await.unwrap();
        assert!(!result.is_signal);
        assert_eq!(result.classification, Some(Classification::Noise));
    }
}
