//! Response Validator
//!
//! Enforces the structured reply contract of the roleplay phase. The model is
//! an untrusted text generator: a reply that does not parse, or that breaks
//! the schema, is sent back with a corrective instruction. At most
//! [`MAX_ATTEMPTS`] replies are examined for a single user turn, strictly one
//! after the other.

use crate::llm_client::{CompletionRequest, LLMClient};
use crate::prompts;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::LazyLock;
use tracing::{info, warn};

/// Total number of model replies examined for one user turn.
pub const MAX_ATTEMPTS: usize = 3;

/// Characters of each rejected reply kept for diagnostics.
const EXCERPT_CHARS: usize = 200;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\s*```$").expect("code fence pattern is valid")
});

/// The coach's view of how well each DESC step was applied so far (0-5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescEvaluation {
    pub decrire: f64,
    pub exprimer: f64,
    pub specifier: f64,
    pub conclure: f64,
}

/// The JSON object the roleplay model must answer with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub thomas_response: String,
    pub coach_feedback: String,
    pub desc_evaluation: DescEvaluation,
    /// The key must be present; its value may be `null`.
    #[serde(deserialize_with = "present_but_nullable")]
    pub off_topic_warning: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

fn present_but_nullable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

/// Why a model reply was classified as invalid.
#[derive(Debug, thiserror::Error)]
pub enum ReplyViolation {
    #[error("reply is not a valid reply object: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("field '{0}' is empty")]
    EmptyField(&'static str),
}

/// A rejected reply, kept only to explain a terminal failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    pub attempt_number: usize,
    pub truncated_response: String,
    pub timestamp: DateTime<Utc>,
}

/// Errors that end a user turn without an assistant reply.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("model service unavailable: {0}")]
    Transport(#[from] anyhow::Error),
    #[error(
        "model reply stayed invalid after {} attempts:\n{}",
        .attempts.len(),
        render_attempts(.attempts)
    )]
    InvalidReply { attempts: Vec<RetryAttempt> },
}

fn render_attempts(attempts: &[RetryAttempt]) -> String {
    attempts
        .iter()
        .map(|a| {
            format!(
                "[{}] attempt {}: {}",
                a.timestamp.format("%H:%M:%S"),
                a.attempt_number,
                a.truncated_response
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedReply {
    Accepted(ModelReply),
    /// The reply is well formed but flags a language other than the expected one.
    WrongLanguage { reply: ModelReply, language: String },
}

/// Removes a surrounding Markdown code fence (with or without a language tag).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Parses and checks one raw model reply against the schema.
pub fn parse_reply(raw: &str) -> Result<ModelReply, ReplyViolation> {
    let reply: ModelReply = serde_json::from_str(strip_code_fence(raw))?;
    if reply.thomas_response.trim().is_empty() {
        return Err(ReplyViolation::EmptyField("thomas_response"));
    }
    if reply.coach_feedback.trim().is_empty() {
        return Err(ReplyViolation::EmptyField("coach_feedback"));
    }
    Ok(reply)
}

fn excerpt(raw: &str) -> String {
    let mut chars = raw.chars();
    let mut short: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        short.push('…');
    }
    short
}

/// Drives the bounded retry protocol for one roleplay turn.
pub struct ResponseValidator<'a> {
    client: &'a dyn LLMClient,
    expected_language: &'a str,
}

impl<'a> ResponseValidator<'a> {
    pub fn new(client: &'a dyn LLMClient, expected_language: &'a str) -> Self {
        Self {
            client,
            expected_language,
        }
    }

    /// Validates `raw`, asking the model again with a corrective instruction
    /// while attempts remain.
    ///
    /// `request` is the request that produced `raw`; retries reuse its system
    /// prompt, history and sampling parameters with the corrective instruction
    /// as the user turn.
    pub async fn validate(
        &self,
        raw: String,
        original_user_message: &str,
        request: &CompletionRequest,
    ) -> Result<ValidatedReply, TurnError> {
        let mut attempts: Vec<RetryAttempt> = Vec::with_capacity(MAX_ATTEMPTS);
        let mut raw = raw;

        for attempt in 0..MAX_ATTEMPTS {
            match parse_reply(&raw) {
                Ok(reply) => return Ok(self.check_language(reply)),
                Err(violation) => {
                    warn!(attempt, error = %violation, "Invalid model reply");
                    attempts.push(RetryAttempt {
                        attempt_number: attempt + 1,
                        truncated_response: excerpt(&raw),
                        timestamp: Utc::now(),
                    });
                }
            }

            if attempt + 1 < MAX_ATTEMPTS {
                let retry = request.with_user_text(prompts::corrective_instruction(original_user_message));
                info!(attempt = attempt + 1, "Asking the model to correct its reply format");
                raw = self.client.complete(retry).await?;
            }
        }

        Err(TurnError::InvalidReply { attempts })
    }

    fn check_language(&self, reply: ModelReply) -> ValidatedReply {
        match &reply.language {
            Some(language) if !language.trim().eq_ignore_ascii_case(self.expected_language) => {
                let language = language.clone();
                ValidatedReply::WrongLanguage { reply, language }
            }
            _ => ValidatedReply::Accepted(reply),
        }
    }
}
