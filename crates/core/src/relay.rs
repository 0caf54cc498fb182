use crate::context_store::ContextStore;
use crate::error::{ConsultError, Result};
use crate::openai::ChatCompletion;
use crate::prompts::Prompts;
use async_trait::async_trait;
use chrono::Utc;
use consult_types::{ChatMessage, MessageRole};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Anything that turns a conversation into a streamed assistant reply.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_reply(
        &self,
        history: Vec<ChatMessage>,
        session_id: Option<String>,
    ) -> Result<mpsc::Receiver<String>>;
}

/// Prepends the persona preamble (with vision context) and forwards to the
/// chat-completion service.
pub struct ChatRelay {
    completion: Arc<dyn ChatCompletion>,
    prompts: Arc<Prompts>,
    context: Arc<ContextStore>,
}

impl ChatRelay {
    pub fn new(
        completion: Arc<dyn ChatCompletion>,
        prompts: Arc<Prompts>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            completion,
            prompts,
            context,
        }
    }

    pub async fn build_messages(
        &self,
        history: Vec<ChatMessage>,
        session_id: Option<&str>,
    ) -> Result<Vec<ChatMessage>> {
        if history.is_empty() {
            return Err(ConsultError::validation("messages must not be empty"));
        }
        // Clients do not get to inject their own system prompt.
        let history: Vec<ChatMessage> = history
            .into_iter()
            .filter(|m| m.role() != MessageRole::System)
            .collect();

        let vision = self.context.usable(session_id, Utc::now()).await;
        let preamble = self.prompts.preamble(vision.as_ref(), history.len());

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(&preamble));
        messages.extend(history);
        Ok(messages)
    }
}

#[async_trait]
impl ChatBackend for ChatRelay {
    async fn stream_reply(
        &self,
        history: Vec<ChatMessage>,
        session_id: Option<String>,
    ) -> Result<mpsc::Receiver<String>> {
        let messages = self.build_messages(history, session_id.as_deref()).await?;
        tracing::info!(
            messages = messages.len() - 1,
            session_id = session_id.as_deref().unwrap_or("-"),
            "relaying chat turn"
        );
        self.completion.stream_chat(messages).await
    }
}

/// Re-slices streamed deltas into whole words, each followed by the space
/// that ended it. The last word of a reply carries no trailing space.
#[derive(Debug, Default)]
pub struct WordChunker {
    pending: String,
}

impl WordChunker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.pending.push_str(delta);
        let mut words = Vec::new();
        while let Some(idx) = self.pending.find(' ') {
            let rest = self.pending.split_off(idx + 1);
            let word = std::mem::replace(&mut self.pending, rest);
            if !word.trim().is_empty() {
                words.push(word);
            }
        }
        words
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        (!rest.trim().is_empty()).then_some(rest)
    }
}

/// Pipes a delta stream through a [`WordChunker`].
pub fn words(mut deltas: mpsc::Receiver<String>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut chunker = WordChunker::new();
        while let Some(delta) = deltas.recv().await {
            for word in chunker.push(&delta) {
                if tx.send(word).await.is_err() {
                    return;
                }
            }
        }
        if let Some(word) = chunker.finish() {
            let _ = tx.send(word).await;
        }
    });
    rx
}
