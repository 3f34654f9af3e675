//! Storage account network rule operations
//!
//! This module reads and writes the `networkAcls` property of storage
//! accounts through Azure Resource Manager. The rule set is always written
//! as a whole object.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::models::{
    format_bypass_list, parse_bypass_list, Bypass, DefaultAction, IpRule, NetworkRuleSet,
    ResourceAccessRule, StorageAccountId, VirtualNetworkRule,
};
use crate::auth::provider::{AzureAuthProvider, MANAGEMENT_SCOPE};
use crate::error::{Result, StornetError};
use crate::utils::network::{classify_network_error, create_http_client, NetworkConfig};
use crate::utils::retry::{retry_with_backoff, AccountCall, RetryOptions};

const STORAGE_API_VERSION: &str = "2023-01-01";

/// Remote reader and writer of storage account network rules
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageAccountOperations: Send + Sync {
    /// Read the current rule set; `None` when the account does not exist
    async fn get_network_rule_set(
        &self,
        account: &StorageAccountId,
    ) -> Result<Option<NetworkRuleSet>>;

    /// Replace the whole rule set of the account
    async fn update_network_rule_set(
        &self,
        account: &StorageAccountId,
        rules: &NetworkRuleSet,
    ) -> Result<NetworkRuleSet>;
}

/// `networkAcls` as exchanged with the management API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAclsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<String>,
    #[serde(default)]
    pub ip_rules: Option<Vec<IpRulePayload>>,
    #[serde(default)]
    pub virtual_network_rules: Option<Vec<VirtualNetworkRulePayload>>,
    #[serde(default)]
    pub resource_access_rules: Option<Vec<ResourceAccessRulePayload>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpRulePayload {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualNetworkRulePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccessRulePayload {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl From<&NetworkRuleSet> for NetworkAclsPayload {
    fn from(rules: &NetworkRuleSet) -> Self {
        Self {
            bypass: Some(format_bypass_list(&rules.bypass)),
            default_action: Some(rules.default_action.to_string()),
            ip_rules: Some(
                rules
                    .ip_rules
                    .iter()
                    .map(|rule| IpRulePayload {
                        value: Some(rule.ip_address_or_range.clone()),
                        action: Some("Allow".to_string()),
                    })
                    .collect(),
            ),
            virtual_network_rules: Some(
                rules
                    .virtual_network_rules
                    .iter()
                    .map(|rule| VirtualNetworkRulePayload {
                        id: Some(rule.virtual_network_resource_id.clone()),
                        action: Some("Allow".to_string()),
                        state: None,
                    })
                    .collect(),
            ),
            resource_access_rules: Some(
                rules
                    .resource_access_rules
                    .iter()
                    .map(|rule| ResourceAccessRulePayload {
                        tenant_id: Some(rule.tenant_id.clone()),
                        resource_id: Some(rule.resource_id.clone()),
                    })
                    .collect(),
            ),
        }
    }
}

impl TryFrom<NetworkAclsPayload> for NetworkRuleSet {
    type Error = StornetError;

    fn try_from(payload: NetworkAclsPayload) -> Result<Self> {
        let default_action = match payload.default_action.as_deref() {
            Some(action) => action.parse()?,
            None => DefaultAction::Allow,
        };

        let bypass = match payload.bypass.as_deref() {
            Some(bypass) => parse_bypass_list(bypass)?,
            None => [Bypass::AzureServices].into_iter().collect(),
        };

        // Entries without their key field carry nothing to match on.
        let ip_rules = payload
            .ip_rules
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| rule.value.map(IpRule::new))
            .collect();

        let virtual_network_rules = payload
            .virtual_network_rules
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| rule.id.map(VirtualNetworkRule::new))
            .collect();

        let resource_access_rules = payload
            .resource_access_rules
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rule| {
                rule.resource_id.map(|resource_id| {
                    ResourceAccessRule::new(resource_id, rule.tenant_id.unwrap_or_default())
                })
            })
            .collect();

        Ok(NetworkRuleSet {
            default_action,
            bypass,
            ip_rules,
            virtual_network_rules,
            resource_access_rules,
        })
    }
}

/// Extract the rule set from a storage account resource document
pub fn parse_account_network_rules(account: &Value) -> Result<NetworkRuleSet> {
    let properties = account
        .get("properties")
        .ok_or_else(|| StornetError::serialization("Missing properties in storage account response"))?;

    match properties.get("networkAcls") {
        Some(acls) if !acls.is_null() => {
            let payload: NetworkAclsPayload = serde_json::from_value(acls.clone()).map_err(|e| {
                StornetError::serialization(format!("Failed to parse networkAcls: {}", e))
            })?;
            NetworkRuleSet::try_from(payload)
        }
        _ => Ok(NetworkRuleSet::default()),
    }
}

/// PATCH body replacing the whole rule set
pub fn network_rules_update_body(rules: &NetworkRuleSet) -> Value {
    json!({
        "properties": {
            "networkAcls": NetworkAclsPayload::from(rules)
        }
    })
}

/// Azure Resource Manager implementation
pub struct AzureStorageAccountOperations {
    auth_provider: Arc<dyn AzureAuthProvider>,
    http_client: Client,
    retry_options: RetryOptions,
}

impl AzureStorageAccountOperations {
    /// Create a new instance using the default network settings
    pub fn new(auth_provider: Arc<dyn AzureAuthProvider>, retry_options: RetryOptions) -> Result<Self> {
        let http_client = create_http_client(&NetworkConfig::default())?;

        Ok(Self {
            auth_provider,
            http_client,
            retry_options,
        })
    }

    /// Create authorized headers for Azure REST API
    async fn create_headers(&self) -> Result<HeaderMap> {
        let token = self.auth_provider.get_token(&[MANAGEMENT_SCOPE]).await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {}", token.token.secret())
                .parse()
                .map_err(|e| StornetError::authentication(format!("Invalid token format: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn build_account_url(&self, account: &StorageAccountId) -> String {
        format!(
            "https://management.azure.com{}?api-version={}",
            account.resource_id(),
            STORAGE_API_VERSION
        )
    }

    /// Parse Azure error response
    fn parse_azure_error(&self, status: u16, body: &str) -> StornetError {
        if let Ok(error_json) = serde_json::from_str::<Value>(body) {
            if let Some(error) = error_json.get("error") {
                let code = error.get("code").and_then(|c| c.as_str());
                if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
                    return match code {
                        Some(code) => {
                            StornetError::azure_api(format!("HTTP {}: {} ({})", status, message, code))
                        }
                        None => StornetError::azure_api(format!("HTTP {}: {}", status, message)),
                    };
                }
            }
        }
        StornetError::azure_api(format!("HTTP {}: {}", status, body))
    }
}

#[async_trait]
impl StorageAccountOperations for AzureStorageAccountOperations {
    #[instrument(skip_all, fields(account = %account.account_name))]
    async fn get_network_rule_set(
        &self,
        account: &StorageAccountId,
    ) -> Result<Option<NetworkRuleSet>> {
        let operation = || async {
            let headers = self.create_headers().await?;
            let url = self.build_account_url(account);

            let response = self
                .http_client
                .get(&url)
                .headers(headers)
                .send()
                .await
                .map_err(|e| classify_network_error(&e, &account.account_name))?;

            if response.status() == StatusCode::NOT_FOUND {
                debug!("Storage account does not exist");
                return Ok(None);
            }

            if !response.status().is_success() {
                let status_code = response.status().as_u16();
                let error_body = response.text().await.unwrap_or_default();
                return Err(self.parse_azure_error(status_code, &error_body));
            }

            let account_data: Value = response.json().await.map_err(|e| {
                StornetError::serialization(format!("Failed to parse storage account response: {}", e))
            })?;

            parse_account_network_rules(&account_data).map(Some)
        };

        retry_with_backoff(
            &account.account_name,
            AccountCall::FetchRules,
            &self.retry_options,
            operation,
        )
        .await
    }

    #[instrument(skip_all, fields(account = %account.account_name))]
    async fn update_network_rule_set(
        &self,
        account: &StorageAccountId,
        rules: &NetworkRuleSet,
    ) -> Result<NetworkRuleSet> {
        let body = network_rules_update_body(rules);

        let operation = || async {
            let headers = self.create_headers().await?;
            let url = self.build_account_url(account);

            let response = self
                .http_client
                .patch(&url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(|e| classify_network_error(&e, &account.account_name))?;

            if response.status() == StatusCode::NOT_FOUND {
                return Err(StornetError::account_not_found(&account.account_name));
            }

            if !response.status().is_success() {
                let status_code = response.status().as_u16();
                let error_body = response.text().await.unwrap_or_default();
                return Err(self.parse_azure_error(status_code, &error_body));
            }

            // An accepted asynchronous update comes back without a body.
            let text = response.text().await.unwrap_or_default();
            if text.trim().is_empty() {
                return Ok(rules.clone());
            }

            let account_data: Value = serde_json::from_str(&text).map_err(|e| {
                StornetError::serialization(format!("Failed to parse storage account response: {}", e))
            })?;

            parse_account_network_rules(&account_data)
        };

        retry_with_backoff(
            &account.account_name,
            AccountCall::UpdateRules,
            &self.retry_options,
            operation,
        )
        .await
    }
}
