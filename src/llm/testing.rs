//! Scripted LLM providers shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use crate::error::LlmError;

/// One scripted reply.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail(String),
}

/// Mock provider that replays scripted replies in order, then repeats a default.
pub(crate) struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    default: Reply,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub(crate) fn new(replies: Vec<Reply>, default: Reply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            default,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(text: impl Into<String>) -> Self {
        Self::new(Vec::new(), Reply::Text(text.into()))
    }

    pub(crate) fn failing(message: impl Into<String>) -> Self {
        Self::new(Vec::new(), Reply::Fail(message.into()))
    }

    pub(crate) fn sequence(replies: Vec<Reply>) -> Self {
        Self::new(replies, Reply::Fail("script exhausted".to_string()))
    }

    /// Prompts received so far, in order.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().expect("lock not poisoned").push(prompt);

        let reply = self
            .replies
            .lock()
            .expect("lock not poisoned")
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        match reply {
            Reply::Text(content) => Ok(GenerationResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                },
            }),
            Reply::Fail(message) => Err(LlmError::RequestFailed(message)),
        }
    }
}
