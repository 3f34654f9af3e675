//! Network rule set reconciliation
//!
//! Lookup and mutation primitives over a [`NetworkRuleSet`], and the locked
//! read-modify-write cycle that applies a mutation to a remote storage
//! account.
//!
//! Rules are matched by value and case-insensitively. Adding a rule that is
//! already present leaves the set unchanged, and removing a rule that is
//! absent is a successful no-op, so every mutation can be retried safely.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::lock::NamedLocks;
use super::models::{
    Bypass, DefaultAction, IpRule, NetworkRule, NetworkRuleSet, ResourceAccessRule,
    StorageAccountId, VirtualNetworkRule,
};
use super::operations::StorageAccountOperations;
use crate::error::{Result, StornetError};

fn equal_fold(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// First IP rule with the same address or range
pub fn find_ip_rule<'a>(
    rules: &'a NetworkRuleSet,
    candidate: &IpRule,
) -> Option<(usize, &'a IpRule)> {
    if candidate.ip_address_or_range.is_empty() {
        return None;
    }

    rules.ip_rules.iter().enumerate().find(|(_, rule)| {
        equal_fold(&rule.ip_address_or_range, &candidate.ip_address_or_range)
    })
}

/// First virtual network rule for the same subnet
pub fn find_virtual_network_rule<'a>(
    rules: &'a NetworkRuleSet,
    candidate: &VirtualNetworkRule,
) -> Option<(usize, &'a VirtualNetworkRule)> {
    if candidate.virtual_network_resource_id.is_empty() {
        return None;
    }

    rules.virtual_network_rules.iter().enumerate().find(|(_, rule)| {
        equal_fold(
            &rule.virtual_network_resource_id,
            &candidate.virtual_network_resource_id,
        )
    })
}

/// First resource access rule matching both resource and tenant
pub fn find_resource_access_rule<'a>(
    rules: &'a NetworkRuleSet,
    candidate: &ResourceAccessRule,
) -> Option<(usize, &'a ResourceAccessRule)> {
    if candidate.resource_id.is_empty() {
        return None;
    }

    rules.resource_access_rules.iter().enumerate().find(|(_, rule)| {
        equal_fold(&rule.resource_id, &candidate.resource_id)
            && equal_fold(&rule.tenant_id, &candidate.tenant_id)
    })
}

/// Index of `rule` within its list, if present
pub fn find_rule(rules: &NetworkRuleSet, rule: &NetworkRule) -> Option<usize> {
    match rule {
        NetworkRule::Ip(candidate) => find_ip_rule(rules, candidate).map(|(index, _)| index),
        NetworkRule::VirtualNetwork(candidate) => {
            find_virtual_network_rule(rules, candidate).map(|(index, _)| index)
        }
        NetworkRule::ResourceAccess(candidate) => {
            find_resource_access_rule(rules, candidate).map(|(index, _)| index)
        }
    }
}

/// Whether `rule` is already part of the set
pub fn contains_rule(rules: &NetworkRuleSet, rule: &NetworkRule) -> bool {
    find_rule(rules, rule).is_some()
}

/// Copy of `rules` with `rule` appended to its list.
///
/// The set is returned unchanged when an equal rule is already present.
pub fn apply_rule(rules: &NetworkRuleSet, rule: &NetworkRule) -> NetworkRuleSet {
    let mut updated = rules.clone();
    if contains_rule(rules, rule) {
        return updated;
    }

    match rule {
        NetworkRule::Ip(rule) => updated.ip_rules.push(rule.clone()),
        NetworkRule::VirtualNetwork(rule) => updated.virtual_network_rules.push(rule.clone()),
        NetworkRule::ResourceAccess(rule) => updated.resource_access_rules.push(rule.clone()),
    }

    updated
}

/// Copy of `rules` without `rule`, and whether anything was removed.
///
/// The order of the remaining rules is preserved.
pub fn remove_rule(rules: &NetworkRuleSet, rule: &NetworkRule) -> (NetworkRuleSet, bool) {
    let mut updated = rules.clone();
    let Some(index) = find_rule(rules, rule) else {
        return (updated, false);
    };

    match rule {
        NetworkRule::Ip(_) => {
            updated.ip_rules.remove(index);
        }
        NetworkRule::VirtualNetwork(_) => {
            updated.virtual_network_rules.remove(index);
        }
        NetworkRule::ResourceAccess(_) => {
            updated.resource_access_rules.remove(index);
        }
    }

    (updated, true)
}

/// True when nobody has customised the rule set yet.
///
/// Resource access rules do not take part in the check.
pub fn is_default_state(rules: &NetworkRuleSet) -> bool {
    rules.ip_rules.is_empty()
        && rules.virtual_network_rules.is_empty()
        && rules.bypass == BTreeSet::from([Bypass::AzureServices])
        && rules.default_action == DefaultAction::Allow
}

/// Refuse to take ownership of a rule set someone else already configured
pub fn ensure_default_state(rules: &NetworkRuleSet, account: &StorageAccountId) -> Result<()> {
    if is_default_state(rules) {
        Ok(())
    } else {
        Err(StornetError::already_exists(account.resource_id()))
    }
}

/// Applies mutations to remote rule sets, one account at a time
#[derive(Clone)]
pub struct NetworkRuleReconciler {
    operations: Arc<dyn StorageAccountOperations>,
    locks: Arc<dyn NamedLocks>,
}

impl NetworkRuleReconciler {
    pub fn new(operations: Arc<dyn StorageAccountOperations>, locks: Arc<dyn NamedLocks>) -> Self {
        Self { operations, locks }
    }

    /// Fetch the current rule set without taking the account lock
    pub async fn read(&self, account: &StorageAccountId) -> Result<NetworkRuleSet> {
        match self.operations.get_network_rule_set(account).await {
            Ok(Some(rules)) => Ok(rules),
            Ok(None) | Err(StornetError::AccountNotFound { .. }) => {
                Err(StornetError::account_not_found(&account.account_name))
            }
            Err(e) => Err(StornetError::remote_fetch(&account.account_name, e)),
        }
    }

    /// Run one read-modify-write cycle under the account lock.
    ///
    /// The lock is held from before the read until the write has finished or
    /// failed. Returns the rule set as reported after the write.
    pub async fn reconcile<F>(&self, account: &StorageAccountId, mutation: F) -> Result<NetworkRuleSet>
    where
        F: FnOnce(NetworkRuleSet) -> Result<NetworkRuleSet> + Send,
    {
        let guard = self.locks.acquire(account.lock_key()).await?;
        debug!(account = %account.account_name, "Lock acquired");

        let current = self.read(account).await?;
        debug!(account = %account.account_name, ?current, "Fetched rule set");

        let desired = mutation(current)?;
        debug!(account = %account.account_name, ?desired, "Computed rule set");

        let written = self
            .operations
            .update_network_rule_set(account, &desired)
            .await
            .map_err(|e| match e {
                StornetError::AccountNotFound { .. } => {
                    StornetError::account_not_found(&account.account_name)
                }
                other => StornetError::remote_update(&account.account_name, other),
            })?;
        info!(account = %account.account_name, "Network rules updated");

        guard.release();
        Ok(written)
    }

    /// Add `rule` unless an equal rule already exists; returns whether it was added
    pub async fn add_rule(&self, account: &StorageAccountId, rule: &NetworkRule) -> Result<bool> {
        let mut added = false;
        self.reconcile(account, |current| {
            added = !contains_rule(&current, rule);
            Ok(apply_rule(&current, rule))
        })
        .await?;

        if !added {
            debug!(account = %account.account_name, %rule, "Rule was already present");
        }
        Ok(added)
    }

    /// Remove `rule` if present; returns whether it was there
    pub async fn remove_rule(
        &self,
        account: &StorageAccountId,
        rule: &NetworkRule,
    ) -> Result<bool> {
        let mut removed = false;
        self.reconcile(account, |current| {
            let (updated, was_present) = remove_rule(&current, rule);
            removed = was_present;
            Ok(updated)
        })
        .await?;

        if !removed {
            debug!(account = %account.account_name, %rule, "Rule was already absent");
        }
        Ok(removed)
    }
}
