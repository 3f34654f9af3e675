//! Network rule data models and types
//!
//! This module defines the data structures describing the network ACL of a
//! storage account: default action, bypass flags, IP rules, virtual network
//! rules and private link (resource access) rules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

use crate::error::{Result, StornetError};

/// Action taken when no rule matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultAction {
    #[default]
    Allow,
    Deny,
}

impl fmt::Display for DefaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultAction::Allow => write!(f, "Allow"),
            DefaultAction::Deny => write!(f, "Deny"),
        }
    }
}

impl FromStr for DefaultAction {
    type Err = StornetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(DefaultAction::Allow),
            "deny" => Ok(DefaultAction::Deny),
            other => Err(StornetError::invalid_rule(format!(
                "unknown default action '{other}', expected Allow or Deny"
            ))),
        }
    }
}

/// Trusted traffic categories allowed to skip the rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bypass {
    None,
    Logging,
    Metrics,
    AzureServices,
}

impl Bypass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bypass::None => "None",
            Bypass::Logging => "Logging",
            Bypass::Metrics => "Metrics",
            Bypass::AzureServices => "AzureServices",
        }
    }
}

impl fmt::Display for Bypass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bypass {
    type Err = StornetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Bypass::None),
            "logging" => Ok(Bypass::Logging),
            "metrics" => Ok(Bypass::Metrics),
            "azureservices" => Ok(Bypass::AzureServices),
            other => Err(StornetError::invalid_rule(format!(
                "unknown bypass value '{other}', expected one of None, Logging, Metrics, AzureServices"
            ))),
        }
    }
}

/// Parse the comma separated bypass list used by the management API.
///
/// `None` stands for the empty set and is never kept as a member.
pub fn parse_bypass_list(input: &str) -> Result<BTreeSet<Bypass>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(Bypass::from_str)
        .filter(|value| !matches!(value, Ok(Bypass::None)))
        .collect()
}

/// Render a bypass set the way the management API expects it
pub fn format_bypass_list(bypass: &BTreeSet<Bypass>) -> String {
    let values: Vec<&str> = bypass
        .iter()
        .filter(|value| **value != Bypass::None)
        .map(Bypass::as_str)
        .collect();

    if values.is_empty() {
        Bypass::None.as_str().to_string()
    } else {
        values.join(", ")
    }
}

/// Rule action. The API models a Deny action that is never accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleAction {
    #[default]
    Allow,
}

/// IP address or CIDR range allowed through the firewall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRule {
    pub ip_address_or_range: String,
    #[serde(default)]
    pub action: RuleAction,
}

impl IpRule {
    pub fn new<S: Into<String>>(ip_address_or_range: S) -> Self {
        Self {
            ip_address_or_range: ip_address_or_range.into(),
            action: RuleAction::Allow,
        }
    }
}

/// Subnet allowed through the firewall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetworkRule {
    pub virtual_network_resource_id: String,
    #[serde(default)]
    pub action: RuleAction,
}

impl VirtualNetworkRule {
    pub fn new<S: Into<String>>(subnet_id: S) -> Self {
        Self {
            virtual_network_resource_id: subnet_id.into(),
            action: RuleAction::Allow,
        }
    }
}

/// Private link access granted to another Azure resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAccessRule {
    pub resource_id: String,
    pub tenant_id: String,
}

impl ResourceAccessRule {
    pub fn new<S: Into<String>, T: Into<String>>(resource_id: S, tenant_id: T) -> Self {
        Self {
            resource_id: resource_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

/// The complete network ACL of one storage account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRuleSet {
    pub default_action: DefaultAction,
    pub bypass: BTreeSet<Bypass>,
    #[serde(default)]
    pub ip_rules: Vec<IpRule>,
    #[serde(default)]
    pub virtual_network_rules: Vec<VirtualNetworkRule>,
    #[serde(default)]
    pub resource_access_rules: Vec<ResourceAccessRule>,
}

impl Default for NetworkRuleSet {
    /// The state a freshly created account reports, and what a reset returns to
    fn default() -> Self {
        Self {
            default_action: DefaultAction::Allow,
            bypass: BTreeSet::from([Bypass::AzureServices]),
            ip_rules: Vec::new(),
            virtual_network_rules: Vec::new(),
            resource_access_rules: Vec::new(),
        }
    }
}

impl NetworkRuleSet {
    /// Table rows for display
    pub fn to_rows(&self) -> Vec<RuleRow> {
        let mut rows = Vec::with_capacity(
            self.ip_rules.len() + self.virtual_network_rules.len() + self.resource_access_rules.len(),
        );

        rows.extend(self.ip_rules.iter().map(|rule| RuleRow {
            kind: RuleKind::IpRule.to_string(),
            value: rule.ip_address_or_range.clone(),
            tenant: None,
        }));
        rows.extend(self.virtual_network_rules.iter().map(|rule| RuleRow {
            kind: RuleKind::VirtualNetworkRule.to_string(),
            value: rule.virtual_network_resource_id.clone(),
            tenant: None,
        }));
        rows.extend(self.resource_access_rules.iter().map(|rule| RuleRow {
            kind: RuleKind::ResourceAccessRule.to_string(),
            value: rule.resource_id.clone(),
            tenant: Some(rule.tenant_id.clone()),
        }));

        rows
    }
}

/// Which list of a rule set a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    IpRule,
    VirtualNetworkRule,
    ResourceAccessRule,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::IpRule => write!(f, "IP"),
            RuleKind::VirtualNetworkRule => write!(f, "Subnet"),
            RuleKind::ResourceAccessRule => write!(f, "Private Link"),
        }
    }
}

/// A single rule of any kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRule {
    Ip(IpRule),
    VirtualNetwork(VirtualNetworkRule),
    ResourceAccess(ResourceAccessRule),
}

impl NetworkRule {
    pub fn kind(&self) -> RuleKind {
        match self {
            NetworkRule::Ip(_) => RuleKind::IpRule,
            NetworkRule::VirtualNetwork(_) => RuleKind::VirtualNetworkRule,
            NetworkRule::ResourceAccess(_) => RuleKind::ResourceAccessRule,
        }
    }
}

impl fmt::Display for NetworkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkRule::Ip(rule) => write!(f, "IP rule '{}'", rule.ip_address_or_range),
            NetworkRule::VirtualNetwork(rule) => {
                write!(f, "subnet rule '{}'", rule.virtual_network_resource_id)
            }
            NetworkRule::ResourceAccess(rule) => write!(
                f,
                "private link rule '{}' (tenant {})",
                rule.resource_id, rule.tenant_id
            ),
        }
    }
}

fn display_option(opt: &Option<String>) -> String {
    match opt {
        Some(value) => value.clone(),
        None => "-".to_string(),
    }
}

/// One rule rendered for table output
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct RuleRow {
    #[tabled(rename = "Type")]
    pub kind: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Tenant", display_with = "display_option")]
    pub tenant: Option<String>,
}

/// Identifies a storage account in Azure Resource Manager
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageAccountId {
    pub subscription_id: String,
    pub resource_group: String,
    pub account_name: String,
}

impl StorageAccountId {
    pub fn new<S: Into<String>, R: Into<String>, A: Into<String>>(
        subscription_id: S,
        resource_group: R,
        account_name: A,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            account_name: account_name.into(),
        }
    }

    /// Parse a full ARM resource ID of a storage account
    pub fn parse(id: &str) -> Result<Self> {
        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();
        if segments.len() != 8 {
            return Err(StornetError::invalid_resource_id(
                id,
                "expected /subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Storage/storageAccounts/{name}",
            ));
        }

        let expected = [
            (0, "subscriptions"),
            (2, "resourceGroups"),
            (4, "providers"),
            (5, "Microsoft.Storage"),
            (6, "storageAccounts"),
        ];
        for (index, name) in expected {
            if !segments[index].eq_ignore_ascii_case(name) {
                return Err(StornetError::invalid_resource_id(
                    id,
                    format!("expected segment '{name}' but found '{}'", segments[index]),
                ));
            }
        }

        if segments[1].is_empty() || segments[3].is_empty() || segments[7].is_empty() {
            return Err(StornetError::invalid_resource_id(id, "empty segment"));
        }

        Ok(Self::new(segments[1], segments[3], segments[7]))
    }

    /// ARM resource ID of the account
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}",
            self.subscription_id, self.resource_group, self.account_name
        )
    }

    /// Name under which modifications of this account are serialized
    pub fn lock_key(&self) -> &str {
        &self.account_name
    }
}

impl fmt::Display for StorageAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (resource group {})", self.account_name, self.resource_group)
    }
}
