//! Streaming Response Assembler
//!
//! Collects the incremental chunks of a streamed roleplay reply and, once the
//! stream is over, looks for the structured payload inside the full text so
//! that Thomas's line can be spoken.

use crate::llm_client::{LLMStream, LLMStreamEvent};
use futures::StreamExt;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

static FENCED_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced object pattern is valid")
});

static BARE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("bare object pattern is valid"));

/// The fields pulled out of a streamed reply's embedded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamedReply {
    pub thomas_response: String,
    pub coach_feedback: Option<String>,
    pub off_topic_warning: Option<String>,
}

/// The result of a completed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTurn {
    /// Concatenation of every well-formed chunk.
    pub text: String,
    /// Present when a structured payload with Thomas's line was found.
    pub reply: Option<StreamedReply>,
    pub skipped_chunks: usize,
}

impl AssembledTurn {
    /// What the conversation shows for this turn.
    pub fn display_text(&self) -> &str {
        match &self.reply {
            Some(reply) => &reply.thomas_response,
            None => &self.text,
        }
    }
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    buffer: String,
    skipped: usize,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one stream item. Malformed chunks are counted and dropped.
    pub fn push(&mut self, item: anyhow::Result<LLMStreamEvent>) {
        match item {
            Ok(LLMStreamEvent::TextChunk(chunk)) => self.buffer.push_str(&chunk),
            Err(e) => {
                debug!(error = %e, "Skipping malformed stream chunk");
                self.skipped += 1;
            }
        }
    }

    pub fn finish(self) -> AssembledTurn {
        let reply = extract_structured_payload(&self.buffer).and_then(|payload| {
            let thomas_response = payload
                .get("thomas_response")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())?
                .to_string();
            let text_field = |key: &str| {
                payload
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|s| !s.trim().is_empty())
            };
            Some(StreamedReply {
                thomas_response,
                coach_feedback: text_field("coach_feedback"),
                off_topic_warning: text_field("off_topic_warning"),
            })
        });
        AssembledTurn {
            text: self.buffer,
            reply,
            skipped_chunks: self.skipped,
        }
    }
}

/// Drains `stream` to completion and assembles the turn.
pub async fn assemble(mut stream: LLMStream) -> AssembledTurn {
    let mut assembler = StreamAssembler::new();
    while let Some(item) = stream.next().await {
        assembler.push(item);
    }
    assembler.finish()
}

/// Finds a JSON object embedded in free text: a fenced block first, then the
/// widest brace-delimited span.
pub fn extract_structured_payload(text: &str) -> Option<Value> {
    let fenced = FENCED_OBJECT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok());
    fenced
        .or_else(|| {
            BARE_OBJECT
                .find(text)
                .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        })
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn chunks(parts: Vec<anyhow::Result<&'static str>>) -> LLMStream {
        let items: Vec<anyhow::Result<LLMStreamEvent>> = parts
            .into_iter()
            .map(|p| p.map(|s| LLMStreamEvent::TextChunk(s.to_string())))
            .collect();
        Box::pin(tokio_stream::iter(items))
    }

    #[tokio::test]
    async fn test_assembles_fenced_payload() {
        let stream = chunks(vec![
            Ok("```json\n{\"thomas_response\": \"Bon, "),
            Ok("d'accord, je ferai attention.\", \"coach_feedback\": \"Bien.\", "),
            Ok("\"off_topic_warning\": null}\n```"),
        ]);
        let turn = assemble(stream).await;

        let reply = turn.reply.clone().expect("payload should be extracted");
        assert_eq!(reply.thomas_response, "Bon, d'accord, je ferai attention.");
        assert_eq!(reply.coach_feedback.as_deref(), Some("Bien."));
        assert!(reply.off_topic_warning.is_none());
        assert_eq!(turn.display_text(), "Bon, d'accord, je ferai attention.");
    }

    #[tokio::test]
    async fn test_malformed_chunks_are_skipped() {
        let stream = chunks(vec![
            Ok("{\"thomas_response\": "),
            Err(anyhow!("bad chunk")),
            Ok("\"Ok.\"}"),
        ]);
        let turn = assemble(stream).await;

        assert_eq!(turn.skipped_chunks, 1);
        assert_eq!(turn.text, "{\"thomas_response\": \"Ok.\"}");
        assert_eq!(turn.reply.unwrap().thomas_response, "Ok.");
    }

    #[tokio::test]
    async fn test_plain_text_has_no_reply() {
        let stream = chunks(vec![Ok("Désolé, "), Ok("je n'ai pas compris.")]);
        let turn = assemble(stream).await;

        assert!(turn.reply.is_none());
        assert_eq!(turn.display_text(), "Désolé, je n'ai pas compris.");
    }

    #[test]
    fn test_bare_object_fallback_with_surrounding_text() {
        let text = "Voici : {\"thomas_response\": \"Ah.\", \"coach_feedback\": \"\"} fin";
        let payload = extract_structured_payload(text).unwrap();
        assert_eq!(payload["thomas_response"], "Ah.");

        let mut assembler = StreamAssembler::new();
        assembler.push(Ok(LLMStreamEvent::TextChunk(text.to_string())));
        let reply = assembler.finish().reply.unwrap();
        assert!(reply.coach_feedback.is_none());
    }

    #[test]
    fn test_payload_without_thomas_line_is_not_a_reply() {
        let mut assembler = StreamAssembler::new();
        assembler.push(Ok(LLMStreamEvent::TextChunk(
            "{\"coach_feedback\": \"Bien.\"}".to_string(),
        )));
        assert!(assembler.finish().reply.is_none());
    }

    #[test]
    fn test_unparseable_braces_yield_nothing() {
        assert!(extract_structured_payload("{pas du json}").is_none());
        assert!(extract_structured_payload("aucun objet").is_none());
    }
}
