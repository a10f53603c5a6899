//! OpenAI-compatible chat completions backend
//!
//! Serves both OpenAI and OpenCode Zen, which differ only in base URL,
//! model and key.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::client::{status_error, ChatClient};
use super::context::ChatMessage;
use super::provider::{ProviderDescriptor, ProviderKind};
use super::sse::{DeltaDecoder, StreamItem};

/// Sampling temperature for every request
pub const TEMPERATURE: f32 = 0.7;

/// Completion length cap for every request
pub const MAX_TOKENS: u32 = 2000;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `POST {base}/chat/completions`
pub struct OpenAiClient {
    http: reqwest::Client,
    kind: ProviderKind,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, descriptor: &ProviderDescriptor) -> Self {
        info!(
            provider = %descriptor.kind,
            base_url = %descriptor.base_url,
            model = %descriptor.model,
            "chat client configured"
        );
        Self {
            http,
            kind: descriptor.kind,
            api_key: descriptor.credentials.api_key.clone(),
            base_url: descriptor.base_url.trim_end_matches('/').to_string(),
            model: descriptor.model.clone(),
        }
    }

    async fn post(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} request failed: {e}", self.kind)))?;

        if !response.status().is_success() {
            return Err(status_error(self.kind.as_str(), response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.post(messages, false).await?;
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("{} response malformed: {e}", self.kind)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::Transport(format!("empty response from {}", self.kind)))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<()> {
        let response = self.post(messages, true).await?;
        let mut body = response.bytes_stream();
        let mut decoder = DeltaDecoder::new();
        let mut deltas = 0usize;

        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::Transport(format!("{} stream read failed: {e}", self.kind)))?;

            for item in decoder.push(&chunk) {
                match item {
                    StreamItem::Delta(text) => {
                        deltas += 1;
                        on_chunk(&text);
                    }
                    StreamItem::Done => {
                        debug!(provider = %self.kind, deltas, "stream complete");
                        return Ok(());
                    }
                }
            }
        }

        for item in decoder.finish() {
            if let StreamItem::Delta(text) = item {
                deltas += 1;
                on_chunk(&text);
            }
        }

        debug!(provider = %self.kind, deltas, "stream closed by server");
        Ok(())
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::provider::Credentials;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> OpenAiClient {
        let descriptor = ProviderDescriptor::new(
            ProviderKind::OpenAi,
            Credentials {
                api_key: "test-key".into(),
                agent_id: None,
            },
            format!("{base_url}/v1/"),
            "gpt-4",
        );
        OpenAiClient::new(reqwest::Client::new(), &descriptor)
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: "user".into(),
            content: "what's the weather".into(),
        }]
    }

    #[tokio::test]
    async fn test_send_request_format_and_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4",
                "temperature": 0.7,
                "max_tokens": 2000,
                "stream": false,
                "messages": [{"role": "user", "content": "what's the weather"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "It's sunny."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server.uri()).send(&messages()).await.unwrap();
        assert_eq!(reply, "It's sunny.");
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "invalid api key"}
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri()).send(&messages()).await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_empty_content_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client(&server.uri()).send(&messages()).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_streamed_deltas_match_whole_response() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"It's \"}}]}\n\n",
            "data: not-json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"sunny.\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "It's sunny."}}]
            })))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let mut streamed = String::new();
        let mut chunks = 0;
        client
            .stream(&messages(), &mut |chunk: &str| {
                chunks += 1;
                streamed.push_str(chunk);
            })
            .await
            .unwrap();
        let whole = client.send(&messages()).await.unwrap();

        assert_eq!(chunks, 2);
        assert_eq!(streamed.as_bytes(), whole.as_bytes());
    }

    #[tokio::test]
    async fn test_stream_ends_on_connection_close() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}",
            ))
            .mount(&server)
            .await;

        let mut streamed = String::new();
        client(&server.uri())
            .stream(&messages(), &mut |chunk: &str| streamed.push_str(chunk))
            .await
            .unwrap();
        assert_eq!(streamed, "partial");
    }
}
