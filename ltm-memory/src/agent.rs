//! Chat agent with a memory tool
//!
//! The model sees the user's stored memory in its system prompt and decides
//! by itself when to call `update_memory`. Tool calls go through
//! [`MemoryUpdater`], so a failed merge never touches stored memory; the
//! failure is reported back to the model and the conversation continues.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ContentBlock, Role, StopReason, ToolSpec};
use crate::prompts::{format_agent_system_prompt, UPDATE_MEMORY_TOOL};
use crate::reconcile::MemoryUpdater;
use crate::store::MemoryStore;

/// Upper bound on model calls per user message
const MAX_STEPS: usize = 8;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct UpdateMemoryInput {
    new_information: String,
}

/// Definition of the `update_memory` tool
pub fn update_memory_tool() -> ToolSpec {
    ToolSpec {
        name: UPDATE_MEMORY_TOOL.to_string(),
        description: "Update the user's long-term memory with new information. Use this when \
                      the user shares personal information, preferences, or stable facts that \
                      should be remembered for future conversations."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "new_information": {
                    "type": "string",
                    "description": "Information to add or update in the user's memory, or instructions for how to change it"
                }
            },
            "required": ["new_information"]
        }),
    }
}

/// A conversation with one user
pub struct MemoryAgent {
    user_id: String,
    session_id: Uuid,
    store: Arc<MemoryStore>,
    updater: Arc<MemoryUpdater>,
    model: Arc<dyn ChatModel>,
    history: Vec<ChatMessage>,
    memory_updated: bool,
}

impl MemoryAgent {
    pub fn new(
        user_id: impl Into<String>,
        updater: Arc<MemoryUpdater>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4(),
            store: updater.store().clone(),
            updater,
            model,
            history: Vec::new(),
            memory_updated: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Whether the last `chat` call changed stored memory
    pub fn memory_updated(&self) -> bool {
        self.memory_updated
    }

    /// Forget the conversation; long-term memory is kept
    pub fn clear_conversation(&mut self) {
        self.history.clear();
        self.memory_updated = false;
    }

    /// Send a user message and return the assistant's final reply
    #[instrument(skip(self, message), fields(user_id = %self.user_id, session = %self.session_id))]
    pub async fn chat(&mut self, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::invalid_input("message must not be blank"));
        }

        self.memory_updated = false;
        let checkpoint = self.history.len();
        self.history.push(ChatMessage::user(message));

        match self.run_loop().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // Leave history as it was before this turn
                self.history.truncate(checkpoint);
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<String> {
        for _ in 0..MAX_STEPS {
            // Re-read so the prompt reflects updates made earlier in this turn
            let memory = self.store.read(&self.user_id)?;
            let request = ChatRequest {
                system: Some(format_agent_system_prompt(&memory)),
                messages: self.history.clone(),
                tools: vec![update_memory_tool()],
            };

            let response = self.model.chat(request).await?;
            self.history.push(ChatMessage {
                role: Role::Assistant,
                content: response.content.clone(),
            });

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .tool_uses()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            // Every tool_use in history needs a matching tool_result, whatever the stop reason
            if tool_uses.is_empty() {
                return Ok(response.text());
            }
            if response.stop_reason != StopReason::ToolUse {
                debug!(stop_reason = ?response.stop_reason, "running tool calls from a cut-off reply");
            }

            let mut results = Vec::with_capacity(tool_uses.len());
            for (id, name, input) in tool_uses {
                let (content, is_error) = self.run_tool(&name, input).await;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content,
                    is_error,
                });
            }
            self.history.push(ChatMessage {
                role: Role::User,
                content: results,
            });
        }

        Err(Error::completion(format!(
            "agent did not finish within {} model calls",
            MAX_STEPS
        )))
    }

    async fn run_tool(&mut self, name: &str, input: serde_json::Value) -> (String, bool) {
        if name != UPDATE_MEMORY_TOOL {
            warn!(tool = name, "model called unknown tool");
            return (format!("Unknown tool: {}", name), true);
        }

        let input: UpdateMemoryInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return (format!("Invalid input for {}: {}", name, e), true),
        };

        match self.updater.update(&self.user_id, &input.new_information).await {
            Ok(memory) => {
                self.memory_updated = true;
                info!("memory updated from conversation");
                (
                    format!(
                        "Memory updated successfully. Current memory: {}",
                        preview(&memory)
                    ),
                    false,
                )
            }
            Err(e) => {
                warn!("memory update failed, keeping previous memory: {}", e);
                (format!("Memory update failed: {}", e), true)
            }
        }
    }
}

/// First `PREVIEW_CHARS` characters, with `...` when cut
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
