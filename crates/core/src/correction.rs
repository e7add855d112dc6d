//! Instruction correction and the correction-learning sink.
//!
//! Before an instruction is held for review, an LLM may rewrite it using the
//! corrections the user made to earlier instructions. This step is best
//! effort: any failure falls back to the raw instruction so approval is never
//! blocked on it.

use crate::approval::CorrectionRecord;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

/// Rewrites a spoken instruction into what the user most likely meant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(&self, instruction: String, history: Vec<CorrectionRecord>) -> Result<String>;
}

/// A `Corrector` backed by an OpenAI-compatible chat completion API.
pub struct LLMCorrector {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: HashMap<String, String>,
}

impl LLMCorrector {
    /// `prompts` must contain a `"correct_instruction"` template with
    /// `{instruction}` and `{corrections}` placeholders.
    pub fn new(config: OpenAIConfig, model: String, prompts: HashMap<String, String>) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }
}

fn format_corrections(history: &[CorrectionRecord]) -> String {
    if history.is_empty() {
        return "(none yet)".to_string();
    }
    history
        .iter()
        .map(|r| format!("- heard \"{}\" -> meant \"{}\"", r.original, r.edited))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Corrector for LLMCorrector {
    async fn correct(&self, instruction: String, history: Vec<CorrectionRecord>) -> Result<String> {
        let prompt_template = self
            .prompts
            .get("correct_instruction")
            .context("Missing prompt template: 'correct_instruction'")?;
        let prompt = prompt_template
            .replace("{instruction}", &instruction)
            .replace("{corrections}", &format_corrections(&history));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(
                        "You fix speech recognition mistakes in instructions for a coding agent. \
                         Reply with the corrected instruction only.",
                    )
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let answer = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?;

        Ok(answer.trim().trim_matches('"').to_string())
    }
}

/// A `Corrector` that returns the instruction unchanged.
pub struct PassthroughCorrector;

#[async_trait]
impl Corrector for PassthroughCorrector {
    async fn correct(&self, instruction: String, _history: Vec<CorrectionRecord>) -> Result<String> {
        Ok(instruction)
    }
}

/// Runs the corrector, degrading to the raw instruction on any failure or
/// blank output.
pub async fn correct_or_raw(
    corrector: &dyn Corrector,
    instruction: &str,
    history: Vec<CorrectionRecord>,
) -> String {
    match corrector.correct(instruction.to_string(), history).await {
        Ok(corrected) if !corrected.trim().is_empty() => corrected.trim().to_string(),
        Ok(_) => {
            warn!("Corrector returned an empty instruction, using the raw one");
            instruction.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Correction failed, using the raw instruction");
            instruction.to_string()
        }
    }
}

/// Sink for (original, edited) pairs, and the source of correction history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CorrectionStore: Send + Sync {
    async fn record(&self, record: CorrectionRecord) -> Result<()>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<CorrectionRecord>>;
}

#[derive(Default)]
pub struct InMemoryCorrectionStore {
    records: Mutex<Vec<CorrectionRecord>>,
}

#[async_trait]
impl CorrectionStore for InMemoryCorrectionStore {
    async fn record(&self, record: CorrectionRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<CorrectionRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

/// Fetches recent corrections and runs the corrector over an instruction.
/// A failing store only loses the history, not the correction.
pub async fn correct_with_history(
    corrector: &dyn Corrector,
    store: &dyn CorrectionStore,
    instruction: &str,
    limit: usize,
) -> String {
    let history = store.recent(limit).await.unwrap_or_else(|e| {
        warn!(error = %e, "Could not load correction history");
        Vec::new()
    });
    correct_or_raw(corrector, instruction, history).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::Utc;

    fn record(original: &str, edited: &str) -> CorrectionRecord {
        CorrectionRecord {
            original: original.to_string(),
            edited: edited.to_string(),
            audio: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_correct_or_raw_uses_corrector_output() {
        let mut corrector = MockCorrector::new();
        corrector
            .expect_correct()
            .withf(|instruction, history| instruction == "list fails" && history.len() == 1)
            .times(1)
            .returning(|_, _| Ok("  list files ".to_string()));

        let out = correct_or_raw(&corrector, "list fails", vec![record("a", "b")]).await;
        assert_eq!(out, "list files");
    }

    #[tokio::test]
    async fn test_correct_or_raw_degrades_on_error_and_blank() {
        let mut failing = MockCorrector::new();
        failing
            .expect_correct()
            .returning(|_, _| Err(anyhow!("timeout")));
        assert_eq!(correct_or_raw(&failing, "run tests", vec![]).await, "run tests");

        let mut blank = MockCorrector::new();
        blank.expect_correct().returning(|_, _| Ok("   ".to_string()));
        assert_eq!(correct_or_raw(&blank, "run tests", vec![]).await, "run tests");
    }

    #[tokio::test]
    async fn test_history_failure_still_corrects() {
        let mut store = MockCorrectionStore::new();
        store
            .expect_recent()
            .returning(|_| Err(anyhow!("db down")));
        let mut corrector = MockCorrector::new();
        corrector
            .expect_correct()
            .withf(|_, history| history.is_empty())
            .returning(|i, _| Ok(i.to_uppercase()));

        let out = correct_with_history(&corrector, &store, "ls", 10).await;
        assert_eq!(out, "LS");
    }

    #[tokio::test]
    async fn test_in_memory_store_returns_newest_first() {
        let store = InMemoryCorrectionStore::default();
        for (o, e) in [("a", "A"), ("b", "B"), ("c", "C")] {
            store.record(record(o, e)).await.unwrap();
        }
        let recent = store.recent(2).await.unwrap();
        let originals: Vec<_> = recent.iter().map(|r| r.original.as_str()).collect();
        assert_eq!(originals, vec!["c", "b"]);
    }

    #[test]
    fn test_format_corrections() {
        assert_eq!(format_corrections(&[]), "(none yet)");
        assert_eq!(
            format_corrections(&[record("get status", "git status")]),
            "- heard \"get status\" -> meant \"git status\""
        );
    }

    #[tokio::test]
    async fn test_passthrough() {
        let out = PassthroughCorrector
            .correct("keep me".to_string(), Vec::new())
            .await
            .unwrap();
        assert_eq!(out, "keep me");
    }
}
