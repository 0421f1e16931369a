// Follow-up conversation about a diagnosis: history files in, one reply out

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::advice::{AdviceProvider, ChatMessage, Role};
use crate::errors::{DiagnosisError, Result};
use crate::output::DiagnosisOutcome;

/// System message used when a conversation arrives without one
pub const CHAT_SYSTEM_PROMPT: &str = "You are an expert coffee plant agronomist assistant. \
Help users with coffee plant diseases, care, and cultivation advice. \
Be more human and friendly in a way that the user feels as if they are talking to someone \
that is empathetic and also well educated in the field.";

/// `{"response": ..., "success": true}` or `{"error": ..., "success": false}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub success: bool,
}

impl ChatReply {
    pub fn ok(response: String) -> Self {
        Self { response: Some(response), error: None, success: true }
    }

    pub fn failed(error: String) -> Self {
        Self { response: None, error: Some(error), success: false }
    }
}

/// Read a JSON array of `{role, content}` messages
pub fn load_history<P: AsRef<Path>>(path: P) -> Result<Vec<ChatMessage>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(DiagnosisError::InvalidPath(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)?;
    let history: Vec<ChatMessage> = serde_json::from_str(&content)?;
    log::info!("Loaded {} messages from {}", history.len(), path.display());

    Ok(history)
}

/// Keep at most `limit` messages: the leading system message (if any) plus the newest rest.
/// A limit of 0 keeps everything; any other limit is raised to 2 so one turn survives.
pub fn trim_history(mut history: Vec<ChatMessage>, limit: usize) -> Vec<ChatMessage> {
    if limit == 0 {
        return history;
    }
    let limit = limit.max(2);
    if history.len() <= limit {
        return history;
    }

    let keep_system = history.first().map_or(false, |m| m.role == Role::System);
    if keep_system {
        let tail = history.split_off(history.len() - (limit - 1));
        history.truncate(1);
        history.extend(tail);
        history
    } else {
        history.split_off(history.len() - limit)
    }
}

/// Prepare a loaded conversation for the model
pub fn prepare_history(mut history: Vec<ChatMessage>, limit: usize) -> Result<Vec<ChatMessage>> {
    if !history.iter().any(|m| m.role == Role::User) {
        return Err(DiagnosisError::Config(
            "conversation history contains no user message".to_string(),
        ));
    }

    if history.first().map_or(true, |m| m.role != Role::System) {
        history.insert(0, ChatMessage::system(CHAT_SYSTEM_PROMPT));
    }

    Ok(trim_history(history, limit))
}

/// Answer the conversation stored at `path`. Failures are reported in the reply, not raised.
pub fn run_chat<P: AsRef<Path>>(provider: &dyn AdviceProvider, path: P, limit: usize) -> ChatReply {
    let result = load_history(path)
        .and_then(|history| prepare_history(history, limit))
        .and_then(|history| provider.complete(&history));

    match result {
        Ok(response) => ChatReply::ok(response),
        Err(e) => {
            log::warn!("Chat failed: {}", e);
            ChatReply::failed(e.to_string())
        }
    }
}

/// Opening system message for a follow-up chat about this diagnosis.
/// None when no class was predicted.
pub fn seed_history(outcome: &DiagnosisOutcome) -> Option<Vec<ChatMessage>> {
    let label = outcome.predicted_class.as_deref()?;
    let previous = outcome.llm_response.as_deref().unwrap_or(&outcome.advice);

    Some(vec![ChatMessage::system(format!(
        "You are an expert coffee plant agronomist. The user just received a diagnosis: {} \
         with {:.2}% confidence. Previous advice: {}. Continue helping the user with follow-up \
         questions about this diagnosis or coffee plant care in general.",
        label,
        outcome.confidence * 100.0,
        previous
    ))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::StaticAdvisor;

    fn conversation(turns: usize) -> Vec<ChatMessage> {
        let mut history = vec![ChatMessage::system("context")];
        for i in 0..turns {
            history.push(ChatMessage::user(format!("question {}", i)));
            history.push(ChatMessage::assistant(format!("answer {}", i)));
        }
        history
    }

    #[test]
    fn trimming_keeps_system_message_and_newest_turns() {
        let trimmed = trim_history(conversation(15), 20);

        assert_eq!(trimmed.len(), 20);
        assert_eq!(trimmed[0], ChatMessage::system("context"));
        assert_eq!(trimmed[19], ChatMessage::assistant("answer 14"));
        assert_eq!(trimmed[1], ChatMessage::assistant("answer 5"));
    }

    #[test]
    fn short_history_is_untouched() {
        let history = conversation(3);
        assert_eq!(trim_history(history.clone(), 20), history);
    }

    #[test]
    fn tiny_limit_still_keeps_latest_turn() {
        let trimmed = trim_history(conversation(4), 1);

        assert_eq!(trimmed, vec![ChatMessage::system("context"), ChatMessage::assistant("answer 3")]);

        let mut asked = conversation(2);
        asked.push(ChatMessage::user("and now?"));
        assert_eq!(trim_history(asked, 1)[1], ChatMessage::user("and now?"));
    }

    #[test]
    fn trimming_without_system_message_keeps_tail() {
        let history: Vec<ChatMessage> = (0..5).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        let trimmed = trim_history(history, 2);
        assert_eq!(trimmed, vec![ChatMessage::user("m3"), ChatMessage::user("m4")]);
    }

    #[test]
    fn missing_system_prompt_is_added() {
        let prepared = prepare_history(vec![ChatMessage::user("Why are my leaves yellow?")], 20).unwrap();
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].content, CHAT_SYSTEM_PROMPT);

        assert!(prepare_history(vec![ChatMessage::system("only")], 20).is_err());
    }

    #[test]
    fn chat_reply_from_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"[{"role":"user","content":"How often should I spray?"}]"#).unwrap();

        let reply = run_chat(&StaticAdvisor::replying("Every two weeks."), &path, 20);
        assert_eq!(reply, ChatReply::ok("Every two weeks.".to_string()));

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json, serde_json::json!({"response": "Every two weeks.", "success": true}));
    }

    #[test]
    fn seed_carries_diagnosis() {
        use crate::classifier::PredictionResult;
        use crate::validator::{SubScores, ValidationScore};

        let classes: Vec<String> = ["miner", "nodisease", "phoma", "rust"].iter().map(|s| s.to_string()).collect();
        let prediction = PredictionResult::from_scores(&classes, &[0.0, 0.0, 0.125, 0.875]).unwrap();
        let validation = ValidationScore {
            scores: SubScores::default(),
            confidence: 0.7,
            is_valid: true,
            reason: None,
        };
        let mut outcome = DiagnosisOutcome::success(&validation, &prediction, true);
        outcome.llm_response = Some("Remove infected leaves.".to_string());

        let seed = seed_history(&outcome).unwrap();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed[0].role, Role::System);
        assert!(seed[0].content.contains("diagnosis: rust with 87.50% confidence"));
        assert!(seed[0].content.contains("Previous advice: Remove infected leaves."));

        outcome.predicted_class = None;
        assert!(seed_history(&outcome).is_none());
    }

    #[test]
    fn chat_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();

        let missing = run_chat(&StaticAdvisor::replying("x"), dir.path().join("none.json"), 20);
        assert!(!missing.success);

        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        let malformed = run_chat(&StaticAdvisor::replying("x"), &path, 20);
        assert!(!malformed.success);

        fs::write(&path, r#"[{"role":"user","content":"hi"}]"#).unwrap();
        let offline = run_chat(&StaticAdvisor::failing("quota exceeded"), &path, 20);
        assert!(offline.error.unwrap().contains("quota exceeded"));
    }
}
