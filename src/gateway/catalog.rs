use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use super::Gateway;
use crate::config::GatewayConfig;

/// A model offered to chat callers, with the provider it routes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
}

/// Model -> provider mapping plus model discovery.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    providers: BTreeMap<String, String>,
    default_provider: String,
    discover: bool,
}

impl ModelCatalog {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            providers: config.models.clone(),
            default_provider: config.default_provider.clone(),
            discover: config.discover_models,
        }
    }

    /// Provider for `model`, or the configured default when unmapped.
    pub fn provider_for(&self, model: &str) -> &str {
        self.providers
            .get(model)
            .map(String::as_str)
            .unwrap_or(&self.default_provider)
    }

    /// Statically configured models, in name order.
    pub fn configured(&self) -> Vec<ModelInfo> {
        self.providers
            .iter()
            .map(|(model, provider)| ModelInfo {
                id: model.clone(),
                name: model.clone(),
                provider: provider.clone(),
            })
            .collect()
    }

    /// Models the gateway reports, falling back to the configured list when
    /// discovery is disabled, fails, or returns nothing.
    pub async fn available(&self, gateway: &dyn Gateway) -> Vec<ModelInfo> {
        if !self.discover {
            return self.configured();
        }

        match gateway.list_models().await {
            Ok(models) if !models.is_empty() => models
                .into_iter()
                .map(|m| ModelInfo {
                    provider: self.provider_for(&m.id).to_string(),
                    id: m.id,
                    name: m.name,
                })
                .collect(),
            Ok(_) => self.configured(),
            Err(e) => {
                warn!(error = %e, "Model discovery failed, using configured models");
                self.configured()
            }
        }
    }
}
