//! Letta agent backend
//!
//! Letta keeps its own memory per agent, so only the current user message
//! is sent. It has no incremental protocol: streamed dispatch delivers the
//! whole reply as a single chunk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

use super::client::{status_error, ChatClient};
use super::context::ChatMessage;
use super::provider::{ProviderDescriptor, ProviderKind};

#[derive(Serialize)]
struct AgentRequest<'a> {
    message: &'a str,
    agent_id: &'a str,
}

#[derive(Deserialize)]
struct AgentResponse {
    #[serde(default)]
    messages: Vec<AgentMessage>,
}

#[derive(Deserialize)]
struct AgentMessage {
    #[serde(default)]
    text: Option<String>,
}

/// Client for `POST {base}/v1/agents/{agent_id}/messages`
pub struct LettaClient {
    http: reqwest::Client,
    api_key: String,
    agent_id: String,
    base_url: String,
}

impl LettaClient {
    pub fn new(http: reqwest::Client, descriptor: &ProviderDescriptor) -> Self {
        info!(base_url = %descriptor.base_url, "letta client configured");
        Self {
            http,
            api_key: descriptor.credentials.api_key.clone(),
            agent_id: descriptor.credentials.agent_id.clone().unwrap_or_default(),
            base_url: descriptor.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatClient for LettaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Letta
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<String> {
        let message = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .ok_or_else(|| Error::Transport("no user message to send".into()))?;

        let response = self
            .http
            .post(format!("{}/v1/agents/{}/messages", self.base_url, self.agent_id))
            .bearer_auth(&self.api_key)
            .json(&AgentRequest {
                message,
                agent_id: &self.agent_id,
            })
            .send()
            .await
            .map_err(|e| Error::Transport(format!("letta request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(status_error("letta", response).await);
        }

        let reply: AgentResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("letta response malformed: {e}")))?;

        reply
            .messages
            .into_iter()
            .next()
            .and_then(|m| m.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::Transport("empty response from letta".into()))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<()> {
        let reply = self.send(messages).await?;
        on_chunk(&reply);
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.agent_id.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::provider::Credentials;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_sends_latest_user_message_to_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/agents/agent-7/messages"))
            .and(body_json(json!({"message": "second", "agent_id": "agent-7"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"text": "Noted.", "role": "assistant"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor = ProviderDescriptor::new(
            ProviderKind::Letta,
            Credentials {
                api_key: "k".into(),
                agent_id: Some("agent-7".into()),
            },
            server.uri(),
            "",
        );
        let client = LettaClient::new(reqwest::Client::new(), &descriptor);
        let messages = vec![
            ChatMessage { role: "system".into(), content: "persona".into() },
            ChatMessage { role: "user".into(), content: "first".into() },
            ChatMessage { role: "assistant".into(), content: "ok".into() },
            ChatMessage { role: "user".into(), content: "second".into() },
        ];

        let mut chunks = Vec::new();
        client
            .stream(&messages, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(chunks, vec!["Noted.".to_string()]);
        assert!(!client.supports_streaming());
    }
}
