//! Conversation Domain Model
//!
//! Information Hiding:
//! - Status transition rules enforced inside ConversationData
//! - Turn ordering invariant checked on append, never by callers
//! - Completion guard owned by ProductInfo

use super::timestamp;
use crate::error::{PersistenceError, PersistenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    AiQuestion,
    UserResponse,
}

/// A single question or answer in the guided conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: String,
    #[serde(rename = "type")]
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            audio_url: None,
            timestamp: timestamp::now(),
            language: language.into(),
            processing_time_ms: None,
        }
    }

    pub fn ai_question(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self::new(TurnRole::AiQuestion, content, language)
    }

    pub fn user_response(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self::new(TurnRole::UserResponse, content, language)
    }

    pub fn with_audio(mut self, audio_url: impl Into<String>) -> Self {
        self.audio_url = Some(audio_url.into());
        self
    }

    pub fn with_processing_time(mut self, millis: u64) -> Self {
        self.processing_time_ms = Some(millis);
        self
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub factors: Vec<String>,
}

/// Product fields extracted from the conversation, filled in turn by turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductInfo {
    pub product_type: String,
    pub materials: BTreeSet<String>,
    pub colors: BTreeSet<String>,
    pub crafting_process: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cultural_significance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
    pub unique_features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub care_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customization_options: Option<Vec<String>>,
}

impl ProductInfo {
    /// Names of the fields that must be filled before a conversation can complete
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.product_type.trim().is_empty() {
            missing.push("productType");
        }
        if self.materials.iter().all(|m| m.trim().is_empty()) {
            missing.push("materials");
        }
        if self.colors.iter().all(|c| c.trim().is_empty()) {
            missing.push("colors");
        }
        if self.crafting_process.trim().is_empty() {
            missing.push("craftingProcess");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required_fields().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversationStatus::InProgress => "in_progress",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Abandoned => "abandoned",
        };
        f.write_str(label)
    }
}

/// Business data of one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationData {
    pub id: String,
    pub user_id: String,
    pub language: String,
    turns: Vec<ConversationTurn>,
    extracted_info: ProductInfo,
    status: ConversationStatus,
    #[serde(with = "timestamp")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    summary: String,
}

impl ConversationData {
    pub fn new(user_id: impl Into<String>, language: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), user_id, language)
    }

    pub fn with_id(
        id: impl Into<String>,
        user_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            language: language.into(),
            turns: Vec::new(),
            extracted_info: ProductInfo::default(),
            status: ConversationStatus::InProgress,
            started_at: timestamp::now(),
            completed_at: None,
            summary: String::new(),
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn extracted_info(&self) -> &ProductInfo {
        &self.extracted_info
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn is_finalized(&self) -> bool {
        self.status != ConversationStatus::InProgress
    }

    /// Timestamp of the latest turn, or the start time for an empty conversation
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.turns
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(self.started_at)
    }

    pub fn add_turn(&mut self, turn: ConversationTurn) -> PersistenceResult<()> {
        self.ensure_mutable()?;

        if let Some(previous) = self.turns.last() {
            if turn.timestamp < previous.timestamp {
                return Err(PersistenceError::NonMonotonicTimestamp {
                    previous: timestamp::format(&previous.timestamp),
                    turn: timestamp::format(&turn.timestamp),
                });
            }
        }

        self.turns.push(turn);
        Ok(())
    }

    pub fn update_extracted_info(&mut self, info: ProductInfo) -> PersistenceResult<()> {
        self.ensure_mutable()?;
        self.extracted_info = info;
        Ok(())
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> PersistenceResult<()> {
        self.ensure_mutable()?;
        self.summary = summary.into();
        Ok(())
    }

    /// Finalize as completed; rejected while any required product field is empty
    pub fn mark_completed(&mut self) -> PersistenceResult<()> {
        let missing = self.extracted_info.missing_required_fields();
        if !missing.is_empty() {
            return Err(PersistenceError::IncompleteConversation { missing });
        }
        self.transition(ConversationStatus::Completed)?;
        self.completed_at = Some(timestamp::now());
        Ok(())
    }

    pub fn abandon(&mut self) -> PersistenceResult<()> {
        self.transition(ConversationStatus::Abandoned)
    }

    fn transition(&mut self, to: ConversationStatus) -> PersistenceResult<()> {
        if self.status != ConversationStatus::InProgress {
            return Err(PersistenceError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn ensure_mutable(&self) -> PersistenceResult<()> {
        if self.is_finalized() {
            return Err(PersistenceError::ConversationFinalized(self.id.clone()));
        }
        Ok(())
    }
}

/// Transient UI state captured alongside the business data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationState {
    pub is_listening: bool,
    pub is_speaking: bool,
    pub is_processing: bool,
    pub current_stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            is_listening: false,
            is_speaking: false,
            is_processing: false,
            current_stage: "greeting".to_string(),
            current_question: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn complete_info() -> ProductInfo {
        ProductInfo {
            product_type: "Block-printed scarf".to_string(),
            materials: ["cotton".to_string()].into_iter().collect(),
            colors: ["indigo".to_string(), "white".to_string()].into_iter().collect(),
            crafting_process: "Hand block printing with natural dyes".to_string(),
            ..ProductInfo::default()
        }
    }

    #[test]
    fn test_new_conversation_is_in_progress() {
        let data = ConversationData::with_id("c1", "artisan-1", "hi");
        assert_eq!(data.id, "c1");
        assert_eq!(data.status(), ConversationStatus::InProgress);
        assert!(data.turns().is_empty());
        assert!(data.completed_at().is_none());
    }

    #[test]
    fn test_add_turn_rejects_out_of_order_timestamps() {
        let mut data = ConversationData::with_id("c1", "artisan-1", "en");
        let first = ConversationTurn::ai_question("What do you make?", "en");
        let earlier = first.timestamp - Duration::seconds(5);
        data.add_turn(first).unwrap();

        let result = data.add_turn(ConversationTurn::user_response("Scarves", "en").at(earlier));
        assert!(matches!(
            result,
            Err(PersistenceError::NonMonotonicTimestamp { .. })
        ));
        assert_eq!(data.turns().len(), 1);
    }

    #[test]
    fn test_equal_timestamps_are_allowed() {
        let mut data = ConversationData::with_id("c1", "artisan-1", "en");
        let question = ConversationTurn::ai_question("What do you make?", "en");
        let ts = question.timestamp;
        data.add_turn(question).unwrap();
        data.add_turn(ConversationTurn::user_response("Pottery", "en").at(ts))
            .unwrap();
        assert_eq!(data.turns().len(), 2);
    }

    #[test]
    fn test_completion_guard_rejects_empty_info() {
        let mut data = ConversationData::with_id("c1", "artisan-1", "en");
        let err = data.mark_completed().unwrap_err();
        match err {
            PersistenceError::IncompleteConversation { missing } => {
                assert_eq!(
                    missing,
                    vec!["productType", "materials", "colors", "craftingProcess"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(data.status(), ConversationStatus::InProgress);
    }

    #[test]
    fn test_whitespace_only_fields_count_as_missing() {
        let mut info = complete_info();
        info.product_type = "   ".to_string();
        info.colors = ["".to_string()].into_iter().collect();
        assert_eq!(info.missing_required_fields(), vec!["productType", "colors"]);
    }

    #[test]
    fn test_complete_conversation_is_immutable() {
        let mut data = ConversationData::with_id("c1", "artisan-1", "en");
        data.update_extracted_info(complete_info()).unwrap();
        data.mark_completed().unwrap();

        assert_eq!(data.status(), ConversationStatus::Completed);
        assert!(data.completed_at().is_some());
        assert!(matches!(
            data.add_turn(ConversationTurn::user_response("late", "en")),
            Err(PersistenceError::ConversationFinalized(_))
        ));
        assert!(matches!(
            data.abandon(),
            Err(PersistenceError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_abandoned_cannot_complete() {
        let mut data = ConversationData::with_id("c1", "artisan-1", "en");
        data.update_extracted_info(complete_info()).unwrap();
        data.abandon().unwrap();

        let err = data.mark_completed().unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::InvalidTransition {
                from: ConversationStatus::Abandoned,
                to: ConversationStatus::Completed
            }
        ));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ConversationStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let role = serde_json::to_string(&TurnRole::AiQuestion).unwrap();
        assert_eq!(role, "\"ai_question\"");
    }
}
