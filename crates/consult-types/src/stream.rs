use crate::content::message::ChatMessage;

/// `POST /api/chat-stream` body: the whole conversation so far.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatStreamRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One line of the `/api/chat-stream` newline-delimited JSON body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ReplyChunk {
    content: String,
}

impl ReplyChunk {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Serialized form including the trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }

    /// Parses one line; blank or malformed lines yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}
