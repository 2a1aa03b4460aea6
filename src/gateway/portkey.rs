//! Portkey gateway client.
//!
//! Sends OpenAI-compatible chat completions to Portkey, which forwards them
//! to the provider named in the `x-portkey-provider` header.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{Gateway, GatewayError, GatewayModel, GatewayRequest, GatewayResponse};
use crate::config::GatewayConfig;

const API_KEY_HEADER: &str = "x-portkey-api-key";
const PROVIDER_HEADER: &str = "x-portkey-provider";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct ModelsListResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiChoice {
    #[serde(default)]
    message: Option<OaiMessage>,
    /// Legacy completion-style choices carry the text directly.
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    cost: Option<f64>,
}

// ---------------------------------------------------------------------------
// PortkeyGateway
// ---------------------------------------------------------------------------

pub struct PortkeyGateway {
    base_url: String,
    api_key: Option<SecretString>,
    client: Client,
}

impl PortkeyGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::NotConfigured("gateway.api_key is not set".into()))
    }

    fn build_request_body(request: &GatewayRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.prompt },
            ],
            "max_tokens": request.max_tokens,
        });
        if let Some(ref user) = request.user {
            body["user"] = serde_json::json!(user);
        }
        body
    }

    fn convert_response(oai: OaiResponse) -> GatewayResponse {
        let text = oai
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.and_then(|m| m.content).or(c.text))
            .filter(|t| !t.trim().is_empty());
        let usage = oai.usage;

        GatewayResponse {
            text,
            model: oai.model,
            prompt_tokens: usage.as_ref().map_or(0, |u| u.prompt_tokens),
            completion_tokens: usage.as_ref().map_or(0, |u| u.completion_tokens),
            cost: usage.and_then(|u| u.cost).filter(|c| c.is_finite() && *c >= 0.0),
        }
    }

    async fn error_from(resp: reqwest::Response) -> GatewayError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        GatewayError::Api { status, message }
    }
}

impl Gateway for PortkeyGateway {
    fn chat(
        &self,
        request: &GatewayRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayResponse, GatewayError>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!("{}/chat/completions", self.base_url);
            let body = Self::build_request_body(&request);

            let resp = self
                .client
                .post(&url)
                .header(API_KEY_HEADER, key)
                .header(PROVIDER_HEADER, &request.provider)
                .json(&body)
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(Self::error_from(resp).await);
            }

            let oai: OaiResponse = resp
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))?;
            debug!(model = %request.model, provider = %request.provider, "Gateway chat completed");

            Ok(Self::convert_response(oai))
        })
    }

    fn list_models(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GatewayModel>, GatewayError>> + Send + '_>> {
        Box::pin(async move {
            let key = self.api_key()?;
            let url = format!("{}/models", self.base_url);

            let resp = self.client.get(&url).header(API_KEY_HEADER, key).send().await?;
            if !resp.status().is_success() {
                return Err(Self::error_from(resp).await);
            }

            let body: ModelsListResponse = resp
                .json()
                .await
                .map_err(|e| GatewayError::Decode(e.to_string()))?;

            Ok(body
                .data
                .into_iter()
                .map(|m| GatewayModel {
                    name: m.name.unwrap_or_else(|| m.id.clone()),
                    id: m.id,
                })
                .collect())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
