//! Extract: source text to parent requirement items

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::parse::parse_json;
use super::{CallLedger, StageContext, StageError, StageExecutor, StageFailure};
use crate::domain::{RequirementItem, RunState, Stage, StagePatch};
use crate::model_call::OutputError;
use crate::skills;

#[derive(Debug, Deserialize)]
struct ExtractionOutput {
    #[serde(default)]
    requirements: Vec<RequirementItem>,
}

fn parse_extraction(text: &str) -> Result<Vec<RequirementItem>, OutputError> {
    let output: ExtractionOutput = parse_json(text)?;
    let mut seen = HashSet::new();
    for item in &output.requirements {
        if item.id.trim().is_empty() {
            return Err(OutputError::Schema("requirement with empty id".to_string()));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(OutputError::Schema(format!("duplicate requirement id '{}'", item.id)));
        }
    }
    Ok(output
        .requirements
        .into_iter()
        .map(|mut item| {
            item.parent_id = None;
            item.strategy_version = None;
            item
        })
        .collect())
}

/// Produces the parent item list from the source text
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStage;

#[async_trait]
impl StageExecutor for ExtractStage {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn execute(
        &self,
        state: &RunState,
        ctx: &StageContext,
    ) -> Result<StagePatch, StageFailure> {
        if state.input.source_text.trim().is_empty() {
            return Err(StageError::Precondition("source text is empty".to_string()).into());
        }

        let mut ledger = CallLedger::new();
        let spec = ctx
            .spec(Stage::Extract, "extract", skills::EXTRACTION)
            .await?;
        let items = ctx
            .call(&mut ledger, &spec, &state.input.source_text, parse_extraction)
            .await?;

        info!(run_id = %state.run_id, count = items.len(), "Extracted requirements");
        Ok(ledger.finish(StagePatch::new().extracted(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunInput;
    use crate::stages::test_support::{Replay, context};

    fn state(text: &str) -> RunState {
        RunState::new(RunInput::new("doc.txt", text, "Navigation"))
    }

    #[tokio::test]
    async fn test_extracts_items() {
        let client = Replay::new(vec![
            r#"{"requirements": [{"id": "SYS-1", "text": "The system shall navigate", "type": "functional"}]}"#,
        ]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(client, dir.path().to_path_buf());
        let patch = ExtractStage
            .execute(&state("The system shall navigate."), &ctx)
            .await
            .unwrap();
        let items = patch.extracted.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "SYS-1");
    }

    #[tokio::test]
    async fn test_zero_items_is_valid() {
        let client = Replay::new(vec![r#"{"requirements": []}"#]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(client, dir.path().to_path_buf());
        let patch = ExtractStage.execute(&state("Nothing here."), &ctx).await.unwrap();
        assert_eq!(patch.extracted, Some(vec![]));
    }

    #[tokio::test]
    async fn test_empty_source_is_precondition_failure() {
        let client = Replay::new(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(client.clone(), dir.path().to_path_buf());
        let failure = ExtractStage.execute(&state("   "), &ctx).await.unwrap_err();
        assert!(matches!(failure.error, StageError::Precondition(_)));
        assert!(client.payloads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_schema_errors() {
        let text = r#"{"requirements": [
            {"id": "A", "text": "x", "type": "other"},
            {"id": "A", "text": "y", "type": "other"}
        ]}"#;
        assert!(matches!(parse_extraction(text), Err(OutputError::Schema(_))));
    }
}
