use crate::error::{ConsultError, Result};
use async_trait::async_trait;
use consult_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ImageData,
    MessageRole,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

pub const CHAT_MAX_TOKENS: u32 = 150;
pub const CHAT_TEMPERATURE: f32 = 0.7;
pub const VISION_MAX_TOKENS: u32 = 500;

const CHAT_SERVICE: &str = "chat completion";
const VISION_SERVICE: &str = "vision analysis";
const TRANSCRIPTION_SERVICE: &str = "transcription";

/// Streamed text-only chat completion.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Returns a receiver of content deltas. The channel closes when the reply is done.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<mpsc::Receiver<String>>;
}

/// Image understanding through a vision-capable chat model.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VisionAnalysis: Send + Sync {
    async fn analyze_image(&self, prompt: &str, image: &ImageData) -> Result<String>;
}

/// Speech to text for recorded audio chunks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub transcription_model: String,
}

impl OpenAiConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: SecretString::from(api_key.to_string()),
            base_url: OPENAI_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn upstream_error(service: &'static str, response: reqwest::Response) -> ConsultError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(service, status, %body, "request rejected");
        ConsultError::Upstream {
            service,
            status,
            body,
        }
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<mpsc::Receiver<String>> {
        let request = ChatCompletionRequest::new(&self.config.chat_model, messages)
            .with_max_tokens(CHAT_MAX_TOKENS)
            .with_temperature(CHAT_TEMPERATURE)
            .with_stream(true);
        tracing::debug!(messages = request.messages().len(), model = %request.model(), "calling chat completion");

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ConsultError::transport(CHAT_SERVICE, e))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(CHAT_SERVICE, response).await);
        }

        let (tx, rx) = mpsc::channel(64);
        let stream = response.bytes_stream().eventsource();
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "chat stream interrupted");
                        break;
                    }
                };
                if event.data.trim() == "[DONE]" {
                    break;
                }
                if event.data.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                    Ok(chunk) => {
                        if let Some(delta) = chunk.delta() {
                            if tx.send(delta.to_string()).await.is_err() {
                                // Receiver gone; nobody wants the rest.
                                break;
                            }
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "skipping malformed chunk"),
                }
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl VisionAnalysis for OpenAiClient {
    async fn analyze_image(&self, prompt: &str, image: &ImageData) -> Result<String> {
        let message = ChatMessage::builder()
            .with_role(MessageRole::User)
            .with_text(prompt)
            .with_image_url(&image.data_url())
            .build();
        let request = ChatCompletionRequest::new(&self.config.vision_model, vec![message])
            .with_max_tokens(VISION_MAX_TOKENS);

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ConsultError::transport(VISION_SERVICE, e))?;

        // A rejected frame yields no analysis rather than an error, so the
        // persona never tells the user it cannot see.
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, %body, "vision analysis rejected, returning empty analysis");
            return Ok(String::new());
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ConsultError::transport(VISION_SERVICE, e))?;
        Ok(parsed.first_content().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ConsultError::transport(TRANSCRIPTION_SERVICE, e))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.transcription_model.clone());

        let response = self
            .client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConsultError::transport(TRANSCRIPTION_SERVICE, e))?;

        if !response.status().is_success() {
            return Err(Self::upstream_error(TRANSCRIPTION_SERVICE, response).await);
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ConsultError::transport(TRANSCRIPTION_SERVICE, e))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(OpenAiConfig::new("sk-test").with_base_url(&server.uri()))
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(delta) = rx.recv().await {
            out.push(delta);
        }
        out
    }

    #[tokio::test]
    async fn streams_deltas_and_skips_malformed_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {not json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "stream": true,
                "max_tokens": 150
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let rx = client_for(&server)
            .stream_chat(vec![ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(collect(rx).await, vec!["Hello", " there"]);
    }

    #[tokio::test]
    async fn chat_rejection_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .stream_chat(vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ConsultError::Upstream { status: 429, .. }));
    }

    #[tokio::test]
    async fn vision_sends_image_part_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "max_tokens": 500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": " A sofa and a lamp. "}}]
            })))
            .mount(&server)
            .await;

        let image = ImageData::from_raw(Some("aGVsbG8=")).unwrap();
        let analysis = client_for(&server)
            .analyze_image("Describe the room", &image)
            .await
            .unwrap();
        assert_eq!(analysis, "A sofa and a lamp.");

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            sent["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,aGVsbG8="
        );
    }

    #[tokio::test]
    async fn vision_rejection_yields_empty_analysis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad image"))
            .mount(&server)
            .await;

        let image = ImageData::from_raw(Some("aGVsbG8=")).unwrap();
        let analysis = client_for(&server)
            .analyze_image("Describe the room", &image)
            .await
            .unwrap();
        assert!(analysis.is_empty());
    }

    #[tokio::test]
    async fn transcribes_uploaded_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": " I have a piano. " })),
            )
            .mount(&server)
            .await;

        let text = client_for(&server)
            .transcribe(vec![1, 2, 3], "chunk.webm")
            .await
            .unwrap();
        assert_eq!(text, "I have a piano.");
    }
}
