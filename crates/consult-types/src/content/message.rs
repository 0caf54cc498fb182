use crate::content::parts::ContentPart;

/// One entry of a chat-completion conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message sender: "user", "assistant", "system"
    role: MessageRole,

    /// Plain text for ordinary turns, a part list for multimodal (vision) turns
    content: MessageContent,
}

impl ChatMessage {
    pub fn builder() -> ChatMessageBuilder {
        ChatMessageBuilder::new()
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.to_string()),
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(text.to_string()),
        }
    }

    pub fn system(text: &str) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text(text.to_string()),
        }
    }

    pub fn role(&self) -> MessageRole {
        self.role.clone()
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    /// Concatenated text of the message, ignoring image parts.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text(t) => Some(t.text()),
                    ContentPart::ImageUrl(_) => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

pub struct ChatMessageBuilder {
    role: MessageRole,
    parts: Vec<ContentPart>,
}

impl Default for ChatMessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatMessageBuilder {
    pub fn new() -> Self {
        Self {
            role: MessageRole::User,
            parts: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.parts.push(ContentPart::text(text));
        self
    }

    pub fn with_image_url(mut self, url: &str) -> Self {
        self.parts.push(ContentPart::image_url(url));
        self
    }

    pub fn build(self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: MessageContent::Parts(self.parts),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_serializes_as_string_content() {
        let json = serde_json::to_value(ChatMessage::user("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn vision_message_serializes_as_parts() {
        let message = ChatMessage::builder()
            .with_text("What is in this room?")
            .with_image_url("data:image/jpeg;base64,AAAA")
            .build();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
        assert_eq!(message.text(), "What is in this room?");
    }

    #[test]
    fn client_history_deserializes() {
        let history: Vec<ChatMessage> = serde_json::from_str(
            r#"[{"role":"user","content":"hi"},{"role":"assistant","content":"hello there"}]"#,
        )
        .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role(), MessageRole::Assistant);
        assert_eq!(history[1].text(), "hello there");
    }
}
