use async_trait::async_trait;
use consult_core::relay::ChatBackend;
use consult_core::vision::VisionSubmitter;
use consult_core::{ConsultError, Result};
use consult_types::session::{EndReason, EndSessionRequest, EndSessionResponse, SessionTokenResponse};
use consult_types::vision::{PassiveVisionRequest, PassiveVisionResponse};
use consult_types::{ChatMessage, ChatStreamRequest, ImageData, ReplyChunk};
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;

const SERVICE: &str = "consultation api";

/// Talks to the consultation API on behalf of one console session.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ConsultError::Transport {
                service: SERVICE,
                message: e.to_string(),
            })?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(path, status, %body, "api request rejected");
        Err(ConsultError::Upstream {
            service: SERVICE,
            status,
            body,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response.json::<T>().await.map_err(|e| ConsultError::Transport {
            service: SERVICE,
            message: e.to_string(),
        })
    }

    pub async fn request_session(&self) -> Result<SessionTokenResponse> {
        let response = self.post("/api/session-token", &json!({})).await?;
        Self::decode(response).await
    }

    pub async fn end_session(&self, session_id: &str, reason: EndReason) -> Result<EndSessionResponse> {
        let request = EndSessionRequest {
            session_id: Some(session_id.to_string()),
            reason: Some(reason),
        };
        let body = serde_json::to_value(&request).map_err(|e| ConsultError::validation(e.to_string()))?;
        let response = self.post("/api/end-session", &body).await?;
        Self::decode(response).await
    }
}

/// Takes every complete line out of `buffer`. A trailing partial line stays
/// put, so a character split across network chunks is decoded whole.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = buffer.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = buffer.drain(..=last).collect();
    complete
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn stream_reply(
        &self,
        history: Vec<ChatMessage>,
        session_id: Option<String>,
    ) -> Result<mpsc::Receiver<String>> {
        let request = ChatStreamRequest {
            messages: history,
            session_id,
        };
        let body = serde_json::to_value(&request).map_err(|e| ConsultError::validation(e.to_string()))?;
        let response = self.post("/api/chat-stream", &body).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(error = %e, "chat stream interrupted");
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);
                for line in drain_lines(&mut buffer) {
                    if let Some(reply) = ReplyChunk::parse_line(&line) {
                        if tx.send(reply.content().to_string()).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if let Some(reply) = ReplyChunk::parse_line(&String::from_utf8_lossy(&buffer)) {
                let _ = tx.send(reply.content().to_string()).await;
            }
        });
        Ok(rx)
    }
}

#[async_trait]
impl VisionSubmitter for ApiClient {
    async fn submit(&self, image: ImageData, session_id: Option<String>) -> Result<String> {
        let request = PassiveVisionRequest {
            image_data: Some(image.data_url()),
            session_id,
        };
        let body = serde_json::to_value(&request).map_err(|e| ConsultError::validation(e.to_string()))?;
        let response = self.post("/api/passive-vision", &body).await?;
        let analysis: PassiveVisionResponse = Self::decode(response).await?;
        Ok(analysis.analysis)
    }
}
