//! Network rules management facade
//!
//! This module provides the high-level lifecycle operations used by the CLI.
//! Two ownership models are supported: one owner for the whole rule set of an
//! account, and independent owners of single rules sharing an account.

use std::sync::Arc;
use tracing::info;

use super::lock::NamedLocks;
use super::models::{format_bypass_list, NetworkRule, NetworkRuleSet, StorageAccountId};
use super::operations::StorageAccountOperations;
use super::reconciler::{contains_rule, ensure_default_state, NetworkRuleReconciler};
use crate::error::Result;
use crate::utils::format::{format_json, DisplayUtils, OutputFormat, TableFormatter};

/// High-level network rules manager
pub struct NetworkRulesManager {
    reconciler: NetworkRuleReconciler,
    display_utils: DisplayUtils,
    no_color: bool,
}

impl NetworkRulesManager {
    /// Create a new manager over the given remote and lock provider
    pub fn new(
        operations: Arc<dyn StorageAccountOperations>,
        locks: Arc<dyn NamedLocks>,
        no_color: bool,
    ) -> Self {
        Self {
            reconciler: NetworkRuleReconciler::new(operations, locks),
            display_utils: DisplayUtils::new(no_color),
            no_color,
        }
    }

    /// Take ownership of the whole rule set.
    ///
    /// Fails with `AlreadyExists` when the account already carries custom rules.
    pub async fn create_rule_set(
        &self,
        account: &StorageAccountId,
        desired: NetworkRuleSet,
    ) -> Result<NetworkRuleSet> {
        let written = self
            .reconciler
            .reconcile(account, |current| {
                ensure_default_state(&current, account)?;
                Ok(desired)
            })
            .await?;

        info!(account = %account.account_name, "Created network rule set");
        Ok(written)
    }

    /// Replace the whole rule set
    pub async fn update_rule_set(
        &self,
        account: &StorageAccountId,
        desired: NetworkRuleSet,
    ) -> Result<NetworkRuleSet> {
        let written = self
            .reconciler
            .reconcile(account, |_| Ok(desired))
            .await?;

        info!(account = %account.account_name, "Replaced network rule set");
        Ok(written)
    }

    /// Current rule set of the account
    pub async fn read_rule_set(&self, account: &StorageAccountId) -> Result<NetworkRuleSet> {
        self.reconciler.read(account).await
    }

    /// Reset the rule set to the state of a new account
    pub async fn delete_rule_set(&self, account: &StorageAccountId) -> Result<NetworkRuleSet> {
        let written = self
            .reconciler
            .reconcile(account, |_| Ok(NetworkRuleSet::default()))
            .await?;

        info!(account = %account.account_name, "Reset network rule set to defaults");
        Ok(written)
    }

    /// Add a single rule; returns false when it was already applied
    pub async fn add_rule(&self, account: &StorageAccountId, rule: &NetworkRule) -> Result<bool> {
        let added = self.reconciler.add_rule(account, rule).await?;
        info!(account = %account.account_name, %rule, added, "Added rule");
        Ok(added)
    }

    /// Remove a single rule; returns whether it was present
    pub async fn remove_rule(&self, account: &StorageAccountId, rule: &NetworkRule) -> Result<bool> {
        let removed = self.reconciler.remove_rule(account, rule).await?;
        info!(account = %account.account_name, %rule, removed, "Removed rule");
        Ok(removed)
    }

    /// Whether a single rule is currently applied
    pub async fn rule_exists(&self, account: &StorageAccountId, rule: &NetworkRule) -> Result<bool> {
        let current = self.reconciler.read(account).await?;
        Ok(contains_rule(&current, rule))
    }

    /// Print a rule set in the requested format
    pub fn display_rule_set(
        &self,
        account: &StorageAccountId,
        rules: &NetworkRuleSet,
        output_format: OutputFormat,
    ) -> Result<()> {
        if output_format == OutputFormat::Json {
            println!("{}", format_json(rules)?);
            return Ok(());
        }

        self.display_utils
            .print_header(&format!("Network rules: {}", account.account_name));

        let default_action = rules.default_action.to_string();
        let bypass = format_bypass_list(&rules.bypass);
        let details = vec![
            ("Resource Group", account.resource_group.as_str()),
            ("Default Action", default_action.as_str()),
            ("Bypass", bypass.as_str()),
        ];
        println!("{}", self.display_utils.format_key_value_pairs(&details));

        let rows = rules.to_rows();
        if rows.is_empty() {
            self.display_utils.print_info("No rules configured.");
            return Ok(());
        }

        let formatter = TableFormatter::new(OutputFormat::Table, self.no_color);
        println!("{}", formatter.format_table(&rows)?);
        Ok(())
    }

    /// Print the outcome of a single-rule operation
    pub fn report_rule_change(&self, rule: &NetworkRule, changed: bool, verb: &str, unchanged: &str) {
        if changed {
            self.display_utils
                .print_success(&format!("{} {}", capitalize(verb), rule));
        } else {
            self.display_utils
                .print_warning(&format!("Nothing to do: {} was already {}", rule, unchanged));
        }
    }

    /// Print an informational line
    pub fn print_info(&self, message: &str) {
        self.display_utils.print_info(message);
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StornetError;
    use crate::network_rules::lock::AccountLocks;
    use crate::network_rules::models::{DefaultAction, IpRule, ResourceAccessRule};
    use crate::network_rules::operations::MockStorageAccountOperations;

    fn account() -> StorageAccountId {
        StorageAccountId::new("sub", "rg1", "acct1")
    }

    fn manager(ops: MockStorageAccountOperations) -> NetworkRulesManager {
        NetworkRulesManager::new(Arc::new(ops), Arc::new(AccountLocks::new()), true)
    }

    #[tokio::test]
    async fn test_create_refuses_customised_rule_set() {
        let mut ops = MockStorageAccountOperations::new();
        ops.expect_get_network_rule_set().returning(|_| {
            let mut rules = NetworkRuleSet::default();
            rules.ip_rules.push(IpRule::new("127.0.0.1"));
            Ok(Some(rules))
        });
        ops.expect_update_network_rule_set().never();

        let err = manager(ops)
            .create_rule_set(&account(), NetworkRuleSet::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StornetError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_create_on_default_state_writes_desired() {
        let mut ops = MockStorageAccountOperations::new();
        ops.expect_get_network_rule_set()
            .returning(|_| Ok(Some(NetworkRuleSet::default())));
        ops.expect_update_network_rule_set()
            .withf(|_, rules| rules.default_action == DefaultAction::Deny)
            .times(1)
            .returning(|_, rules| Ok(rules.clone()));

        let mut desired = NetworkRuleSet::default();
        desired.default_action = DefaultAction::Deny;

        let written = manager(ops)
            .create_rule_set(&account(), desired.clone())
            .await
            .unwrap();
        assert_eq!(written, desired);
    }

    #[tokio::test]
    async fn test_delete_resets_everything() {
        let mut ops = MockStorageAccountOperations::new();
        ops.expect_get_network_rule_set().returning(|_| {
            let mut rules = NetworkRuleSet::default();
            rules.default_action = DefaultAction::Deny;
            rules.ip_rules.push(IpRule::new("10.0.0.0/24"));
            rules
                .resource_access_rules
                .push(ResourceAccessRule::new("/subscriptions/sub/search1", "tenant-a"));
            Ok(Some(rules))
        });
        ops.expect_update_network_rule_set()
            .withf(|_, rules| *rules == NetworkRuleSet::default())
            .times(1)
            .returning(|_, rules| Ok(rules.clone()));

        let written = manager(ops).delete_rule_set(&account()).await.unwrap();
        assert_eq!(written, NetworkRuleSet::default());
    }

    #[tokio::test]
    async fn test_rule_exists_reads_without_writing() {
        let mut ops = MockStorageAccountOperations::new();
        ops.expect_get_network_rule_set().returning(|_| {
            let mut rules = NetworkRuleSet::default();
            rules.ip_rules.push(IpRule::new("127.0.0.1"));
            Ok(Some(rules))
        });
        ops.expect_update_network_rule_set().never();

        let manager = manager(ops);
        assert!(manager
            .rule_exists(&account(), &NetworkRule::Ip(IpRule::new("127.0.0.1")))
            .await
            .unwrap());
        assert!(!manager
            .rule_exists(&account(), &NetworkRule::Ip(IpRule::new("127.0.0.2")))
            .await
            .unwrap());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("added"), "Added");
        assert_eq!(capitalize(""), "");
    }
}
