//! Exercise, step and block shapes.
//!
//! Step content is stored as a loosely-typed JSON document and several
//! historical layouts coexist in the database. [`StepContent`] deserializes
//! from any of them through [`StepDocument`] and always serializes in the
//! canonical `{ blocks, resultPrompt? }` form.

use serde::{Deserialize, Serialize};

use crate::error::{NobleError, Result};

/// An authored sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buddhism_concept: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExerciseMetadata>,
    /// Ordered by `order`, ascending
    #[serde(default)]
    pub steps: Vec<ExerciseStep>,
}

impl Exercise {
    /// Check the authoring invariants: a name, unique step ids and orders,
    /// and valid content on every step.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(NobleError::InvalidContent(
                "an exercise needs an id and a name".to_string(),
            ));
        }
        let mut orders = std::collections::HashSet::new();
        let mut ids = std::collections::HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(NobleError::InvalidContent(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            if !orders.insert(step.order) {
                return Err(NobleError::InvalidContent(format!(
                    "duplicate step order {} in exercise '{}'",
                    step.order, self.id
                )));
            }
            step.content.validate().map_err(|e| match e {
                NobleError::InvalidContent(msg) => {
                    NobleError::InvalidContent(format!("step '{}': {}", step.id, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Attach inline steps to this exercise and sort them by `order`.
    pub fn normalize(&mut self) {
        for step in &mut self.steps {
            step.exercise_id = self.id.clone();
        }
        self.steps.sort_by_key(|s| s.order);
    }

    pub fn step(&self, id: &str) -> Option<&ExerciseStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExerciseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerequisites: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcomes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseStep {
    pub id: String,
    /// Filled from the parent when authored inline
    #[serde(default)]
    pub exercise_id: String,
    /// Unique per exercise; gaps are allowed
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: StepContent,
}

impl ExerciseStep {
    /// The step's result-capture prompt, if it defines a non-empty one.
    pub fn result_prompt(&self) -> Option<&str> {
        self.content.effective_result_prompt()
    }
}

/// Canonical step content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "StepDocument", rename_all = "camelCase")]
pub struct StepContent {
    pub blocks: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_prompt: Option<String>,
}

impl StepContent {
    /// Step-level result prompt, falling back to the first block that still
    /// carries one.
    pub fn effective_result_prompt(&self) -> Option<&str> {
        non_blank(self.result_prompt.as_deref()).or_else(|| {
            self.blocks
                .iter()
                .find_map(|b| non_blank(b.result_prompt.as_deref()))
        })
    }

    /// The first conversation starter in the step, if any.
    pub fn ai(&self) -> Option<&AiBlock> {
        self.blocks.iter().find_map(|b| b.ai.as_ref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(NobleError::InvalidContent(
                "a step needs at least one block".to_string(),
            ));
        }
        let block_prompts = self
            .blocks
            .iter()
            .filter(|b| non_blank(b.result_prompt.as_deref()).is_some())
            .count();
        if block_prompts > 1 {
            return Err(NobleError::InvalidContent(
                "a step may define at most one result prompt".to_string(),
            ));
        }
        Ok(())
    }
}

/// One content unit within a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Rich text (HTML) shown to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiBlock>,
    /// Legacy per-block result prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Static,
    Conversation,
    ResultCapture,
    Empty,
}

impl Block {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> BlockKind {
        if self.ai.is_some() {
            BlockKind::Conversation
        } else if non_blank(self.result_prompt.as_deref()).is_some() {
            BlockKind::ResultCapture
        } else if non_blank(self.content.as_deref()).is_some() {
            BlockKind::Static
        } else {
            BlockKind::Empty
        }
    }
}

/// Starts a guided conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiBlock {
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_user_prompt: Option<String>,
}

// =============================================================================
// Stored document layouts
// =============================================================================

/// Every historical layout of a step content document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StepDocument {
    blocks: Option<Vec<BlockDocument>>,
    result_prompt: Option<String>,
    // Flat single-block layout
    content: Option<String>,
    system_prompt: Option<String>,
    initial_user_prompt: Option<String>,
    // Worksheet-era layout
    description: Option<String>,
    instruction_sections: Option<Vec<InstructionSection>>,
    conversation_config: Option<ConversationConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BlockDocument {
    content: Option<String>,
    ai: Option<AiDocument>,
    system_prompt: Option<String>,
    initial_user_prompt: Option<String>,
    result_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AiDocument {
    system_prompt: Option<String>,
    initial_user_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InstructionSection {
    title: String,
    content: String,
    order: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConversationConfig {
    initial_prompt: String,
}

impl From<BlockDocument> for Block {
    fn from(doc: BlockDocument) -> Self {
        let ai = match doc.ai {
            Some(ai) => Some(AiBlock {
                system_prompt: ai.system_prompt.unwrap_or_default(),
                initial_user_prompt: non_blank_owned(ai.initial_user_prompt),
            }),
            None => ai_block(doc.system_prompt, doc.initial_user_prompt),
        };
        Block {
            content: non_blank_owned(doc.content),
            ai,
            result_prompt: non_blank_owned(doc.result_prompt),
        }
    }
}

impl From<StepDocument> for StepContent {
    fn from(doc: StepDocument) -> Self {
        let mut blocks: Vec<Block> = match doc.blocks {
            Some(blocks) => blocks.into_iter().map(Block::from).collect(),
            None => legacy_blocks(
                doc.content,
                doc.system_prompt,
                doc.initial_user_prompt,
                doc.description,
                doc.instruction_sections,
                doc.conversation_config,
            ),
        };

        let mut result_prompt = non_blank_owned(doc.result_prompt);
        if result_prompt.is_none() {
            result_prompt = blocks
                .iter_mut()
                .find(|b| b.result_prompt.is_some())
                .and_then(|b| b.result_prompt.take());
        }

        StepContent {
            blocks,
            result_prompt,
        }
    }
}

fn legacy_blocks(
    content: Option<String>,
    system_prompt: Option<String>,
    initial_user_prompt: Option<String>,
    description: Option<String>,
    sections: Option<Vec<InstructionSection>>,
    conversation: Option<ConversationConfig>,
) -> Vec<Block> {
    let mut blocks = Vec::new();

    // A flat document is a single block whose fields sit at the top level
    let flat_ai = ai_block(system_prompt, initial_user_prompt);
    let flat_content = non_blank_owned(content);
    if flat_content.is_some() || flat_ai.is_some() {
        blocks.push(Block {
            content: flat_content,
            ai: flat_ai,
            result_prompt: None,
        });
    }

    if let Some(description) = non_blank_owned(description) {
        blocks.push(Block::text(description));
    }

    if let Some(mut sections) = sections {
        sections.sort_by_key(|s| s.order);
        for section in sections {
            let html = if section.title.trim().is_empty() {
                section.content
            } else {
                format!("<h3>{}</h3>{}", section.title, section.content)
            };
            blocks.push(Block::text(html));
        }
    }

    if let Some(config) = conversation {
        if !config.initial_prompt.trim().is_empty() {
            blocks.push(Block {
                ai: Some(AiBlock {
                    system_prompt: String::new(),
                    initial_user_prompt: Some(config.initial_prompt),
                }),
                ..Default::default()
            });
        }
    }

    blocks
}

fn ai_block(system_prompt: Option<String>, initial_user_prompt: Option<String>) -> Option<AiBlock> {
    let system_prompt = non_blank_owned(system_prompt);
    let initial_user_prompt = non_blank_owned(initial_user_prompt);
    if system_prompt.is_none() && initial_user_prompt.is_none() {
        return None;
    }
    Some(AiBlock {
        system_prompt: system_prompt.unwrap_or_default(),
        initial_user_prompt,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_blank_owned(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> StepContent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn exercise_validation_and_normalisation() {
        let mut exercise: Exercise = serde_json::from_value(json!({
            "id": "ex-1",
            "name": "Values",
            "steps": [
                {"id": "b", "order": 20, "content": {"blocks": [{"content": "Two"}]}},
                {"id": "a", "order": 10, "content": {"blocks": [{"content": "One"}]}}
            ]
        }))
        .unwrap();
        exercise.validate().unwrap();
        exercise.normalize();
        assert_eq!(exercise.steps[0].id, "a");
        assert!(exercise.steps.iter().all(|s| s.exercise_id == "ex-1"));

        exercise.steps[1].order = 10;
        assert!(exercise.validate().is_err());

        exercise.steps[1].order = 30;
        exercise.steps[1].content.blocks.clear();
        let err = exercise.validate().unwrap_err().to_string();
        assert!(err.contains("step 'b'"));
    }

    #[test]
    fn canonical_document_reads_unchanged() {
        let content = parse(json!({
            "blocks": [
                {"content": "<p>Sit quietly.</p>"},
                {"ai": {"systemPrompt": "You are a guide.", "initialUserPrompt": "Hello"}}
            ],
            "resultPrompt": "What did you notice?"
        }));

        assert_eq!(content.blocks.len(), 2);
        assert_eq!(content.blocks[0].kind(), BlockKind::Static);
        assert_eq!(content.blocks[1].kind(), BlockKind::Conversation);
        assert_eq!(content.effective_result_prompt(), Some("What did you notice?"));
        assert_eq!(content.ai().unwrap().initial_user_prompt.as_deref(), Some("Hello"));
    }

    #[test]
    fn flat_block_prompts_move_into_ai() {
        let content = parse(json!({
            "blocks": [{"systemPrompt": "Guide", "initialUserPrompt": "Start"}]
        }));
        let ai = content.blocks[0].ai.as_ref().unwrap();
        assert_eq!(ai.system_prompt, "Guide");
        assert_eq!(ai.initial_user_prompt.as_deref(), Some("Start"));
    }

    #[test]
    fn per_block_result_prompt_is_hoisted() {
        let content = parse(json!({
            "blocks": [
                {"content": "Intro"},
                {"resultPrompt": "Write your statement"}
            ]
        }));
        assert_eq!(content.result_prompt.as_deref(), Some("Write your statement"));
        assert!(content.blocks[1].result_prompt.is_none());
    }

    #[test]
    fn step_level_prompt_wins_over_block_prompt() {
        let content = parse(json!({
            "blocks": [{"content": "x", "resultPrompt": "block"}],
            "resultPrompt": "step"
        }));
        assert_eq!(content.effective_result_prompt(), Some("step"));
        assert_eq!(content.blocks[0].result_prompt.as_deref(), Some("block"));
    }

    #[test]
    fn worksheet_layout_becomes_blocks() {
        let content = parse(json!({
            "description": "<p>Reflect on desire.</p>",
            "instructionSections": [
                {"id": "b", "title": "Second", "content": "<p>2</p>", "order": 2},
                {"id": "a", "title": "First", "content": "<p>1</p>", "order": 1}
            ],
            "conversationConfig": {"initialPrompt": "Help me reflect"}
        }));

        assert_eq!(content.blocks.len(), 4);
        assert_eq!(content.blocks[0].content.as_deref(), Some("<p>Reflect on desire.</p>"));
        assert_eq!(content.blocks[1].content.as_deref(), Some("<h3>First</h3><p>1</p>"));
        assert_eq!(
            content.blocks[3].ai.as_ref().unwrap().initial_user_prompt.as_deref(),
            Some("Help me reflect")
        );
    }

    #[test]
    fn blank_result_prompt_is_no_requirement() {
        let content = parse(json!({"blocks": [{"content": "x"}], "resultPrompt": "   "}));
        assert_eq!(content.effective_result_prompt(), None);
    }

    #[test]
    fn serializes_canonical_shape() {
        let content = parse(json!({"blocks": [{"systemPrompt": "Guide"}]}));
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value, json!({"blocks": [{"ai": {"systemPrompt": "Guide"}}]}));
    }

    #[test]
    fn validate_rejects_empty_steps() {
        let content = parse(json!({}));
        assert!(matches!(content.validate(), Err(NobleError::InvalidContent(_))));
    }

    #[test]
    fn validate_rejects_two_result_prompts() {
        let content = parse(json!({
            "blocks": [{"resultPrompt": "a"}, {"resultPrompt": "b"}],
            "resultPrompt": "step"
        }));
        assert!(content.validate().is_err());
    }
}
