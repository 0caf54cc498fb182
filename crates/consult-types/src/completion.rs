use crate::content::message::ChatMessage;

/// Body of a `POST /chat/completions` call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    /// Ask for server-sent event deltas instead of a single body.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl ChatCompletionRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if the model produced one.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_stream_request_omits_stream_flag() {
        let request = ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")])
            .with_max_tokens(150)
            .with_temperature(0.7);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stream").is_none());
        assert_eq!(json["max_tokens"], 150);
    }

    #[test]
    fn chunk_without_content_has_no_delta() {
        let role_only: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(role_only.delta(), None);

        let text: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(text.delta(), Some("Hel"));
    }
}
