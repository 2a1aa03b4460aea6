//! Upstream LLM gateway.
//!
//! The chat handler talks to models only through the [`Gateway`] trait.
//! [`PortkeyGateway`] is the production implementation; tests substitute
//! their own.

pub mod catalog;
pub mod portkey;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

pub use self::catalog::{ModelCatalog, ModelInfo};
pub use self::portkey::PortkeyGateway;

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Errors from a gateway call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed gateway response: {0}")]
    Decode(String),

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A single-turn chat request: one system prompt, one user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub model: String,
    /// Provider the gateway should route to.
    pub provider: String,
    pub system_prompt: String,
    pub prompt: String,
    pub max_tokens: u32,
    /// End-user identifier forwarded for the gateway's own logs.
    pub user: Option<String>,
}

/// What came back from the gateway for a successful call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayResponse {
    /// Assistant text of the first choice; `None` when the model returned no
    /// content.
    pub text: Option<String>,
    /// Model name as reported by the gateway.
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Cost in USD, when the gateway reports one.
    pub cost: Option<f64>,
}

/// A model advertised by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayModel {
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// An OpenAI-compatible chat gateway.
///
/// Async methods return boxed futures so the trait is dyn-compatible (can be
/// used as `Arc<dyn Gateway>`).
pub trait Gateway: Send + Sync {
    /// Non-streaming chat completion.
    fn chat(
        &self,
        request: &GatewayRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayResponse, GatewayError>> + Send + '_>>;

    /// Models the gateway currently offers.
    fn list_models(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GatewayModel>, GatewayError>> + Send + '_>>;
}
