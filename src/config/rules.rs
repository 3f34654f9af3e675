//! Declarative network rules files
//!
//! A rules file carries one `[network_rules]` table describing the desired
//! network ACL of a storage account. Conversion into a [`NetworkRuleSet`] is
//! where user input gets validated.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, StornetError};
use crate::network_rules::reconciler::apply_rule;
use crate::network_rules::{
    Bypass, DefaultAction, IpRule, NetworkRule, NetworkRuleSet, ResourceAccessRule,
    VirtualNetworkRule,
};

const ARM_RESOURCE_ID_PATTERN: &str =
    r"(?i)^/subscriptions/[^/]+/resourceGroups/[^/]+/providers/[^/]+/[^/]+/[^/]+(/[^/]+/[^/]+)*$";

/// Desired network ACL as written by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRulesConfig {
    pub default_action: String,
    /// Absent means `AzureServices` only
    #[serde(default)]
    pub bypass: Option<Vec<String>>,
    #[serde(default)]
    pub ip_rules: Vec<String>,
    #[serde(default)]
    pub virtual_network_subnet_ids: Vec<String>,
    #[serde(default)]
    pub private_link_access: Vec<PrivateLinkAccessConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateLinkAccessConfig {
    pub endpoint_resource_id: String,
    #[serde(default)]
    pub endpoint_tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    network_rules: NetworkRulesConfig,
}

impl NetworkRulesConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: RulesFile = toml::from_str(contents)?;
        Ok(file.network_rules)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            StornetError::config(format!(
                "Failed to read rules file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate and convert into a rule set.
    ///
    /// Private link entries without a tenant get `default_tenant`.
    pub fn into_rule_set(self, default_tenant: Option<&str>) -> Result<NetworkRuleSet> {
        let default_action: DefaultAction = self.default_action.parse()?;

        let bypass = match self.bypass {
            None => BTreeSet::from([Bypass::AzureServices]),
            Some(values) => parse_bypass_values(&values)?,
        };

        let arm_id = Regex::new(ARM_RESOURCE_ID_PATTERN)?;

        let mut rules = NetworkRuleSet {
            default_action,
            bypass,
            ip_rules: Vec::new(),
            virtual_network_rules: Vec::new(),
            resource_access_rules: Vec::new(),
        };

        for ip in self.ip_rules {
            let ip = ip.trim();
            validate_ip_rule(ip)?;
            rules = apply_rule(&rules, &NetworkRule::Ip(IpRule::new(ip)));
        }

        for subnet_id in self.virtual_network_subnet_ids {
            validate_resource_id(&arm_id, &subnet_id)?;
            rules = apply_rule(
                &rules,
                &NetworkRule::VirtualNetwork(VirtualNetworkRule::new(subnet_id)),
            );
        }

        for access in self.private_link_access {
            validate_resource_id(&arm_id, &access.endpoint_resource_id)?;
            let tenant_id = access
                .endpoint_tenant_id
                .filter(|t| !t.is_empty())
                .or_else(|| default_tenant.map(str::to_string))
                .ok_or_else(|| {
                    StornetError::invalid_rule(format!(
                        "No tenant for private link access to '{}'; set endpoint_tenant_id or AZURE_TENANT_ID",
                        access.endpoint_resource_id
                    ))
                })?;
            validate_tenant_id(&tenant_id)?;
            rules = apply_rule(
                &rules,
                &NetworkRule::ResourceAccess(ResourceAccessRule::new(
                    access.endpoint_resource_id,
                    tenant_id,
                )),
            );
        }

        debug!(
            ip_rules = rules.ip_rules.len(),
            virtual_network_rules = rules.virtual_network_rules.len(),
            resource_access_rules = rules.resource_access_rules.len(),
            "Parsed network rules file"
        );
        Ok(rules)
    }
}

/// `None` clears the list and cannot be combined with other values
fn parse_bypass_values(values: &[String]) -> Result<BTreeSet<Bypass>> {
    let mut bypass = values
        .iter()
        .map(|value| value.parse::<Bypass>())
        .collect::<Result<BTreeSet<_>>>()?;

    if bypass.remove(&Bypass::None) && !bypass.is_empty() {
        return Err(StornetError::invalid_rule(
            "bypass 'None' cannot be combined with other values",
        ));
    }
    Ok(bypass)
}

/// IPv4 address or CIDR range accepted by the storage firewall.
///
/// The service refuses /31 and /32 ranges; single addresses must be given bare.
pub fn validate_ip_rule(value: &str) -> Result<()> {
    let (address, prefix) = match value.split_once('/') {
        Some((address, prefix)) => (address, Some(prefix)),
        None => (value, None),
    };

    address.parse::<Ipv4Addr>().map_err(|_| {
        StornetError::invalid_rule(format!("'{}' is not an IPv4 address or CIDR range", value))
    })?;

    if let Some(prefix) = prefix {
        let bits: u8 = prefix.parse().map_err(|_| {
            StornetError::invalid_rule(format!("'{}' has an invalid prefix length", value))
        })?;
        if bits > 30 {
            return Err(StornetError::invalid_rule(format!(
                "'{}': prefixes /31 and /32 are not supported, use the bare address",
                value
            )));
        }
    }

    Ok(())
}

fn validate_resource_id(pattern: &Regex, value: &str) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(StornetError::invalid_resource_id(
            value,
            "expected /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}",
        ))
    }
}

/// Whether `value` is a full ARM resource ID
pub fn is_resource_id(value: &str) -> Result<bool> {
    Ok(Regex::new(ARM_RESOURCE_ID_PATTERN)?.is_match(value))
}

pub fn validate_tenant_id(value: &str) -> Result<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| StornetError::invalid_rule(format!("Tenant ID '{}' is not a valid UUID", value)))
}
