//! Bridges session callbacks to the tool registry and a conversation record.

use aria_realtime::{SessionObserver, ToolRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Mutex;
use tracing::{debug, info};

/// One completed utterance in the conversation.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

/// Receives session callbacks: accumulates the assistant's streamed
/// transcript into turns, keeps the conversation history, and routes
/// function calls to the registry.
pub struct Orchestrator {
    registry: ToolRegistry,
    history: Mutex<Vec<TranscriptEntry>>,
    current_turn: Mutex<String>,
}

impl Orchestrator {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            history: Mutex::new(Vec::new()),
            current_turn: Mutex::new(String::new()),
        }
    }

    /// A snapshot of the completed turns so far.
    pub fn history(&self) -> Vec<TranscriptEntry> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionObserver for Orchestrator {
    async fn on_transcript(&self, fragment: &str) {
        if let Ok(mut turn) = self.current_turn.lock() {
            turn.push_str(fragment);
        }
    }

    async fn on_function_call(&self, name: &str, args: serde_json::Value) -> String {
        self.registry.invoke(name, args).await
    }

    async fn on_response_done(&self) {
        let content = match self.current_turn.lock() {
            Ok(mut turn) => std::mem::take(&mut *turn),
            Err(_) => return,
        };
        if content.is_empty() {
            debug!("response finished without transcript output");
            return;
        }
        info!(assistant = %content, "turn complete");
        if let Ok(mut history) = self.history.lock() {
            history.push(TranscriptEntry {
                role: "assistant".to_string(),
                content,
                timestamp: Local::now(),
            });
        }
    }
}
