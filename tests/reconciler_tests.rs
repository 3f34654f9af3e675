//! Integration tests for network rule reconciliation
//!
//! These tests run the reconciler and manager against an in-memory storage
//! account backend that yields between its read and write steps, so missing
//! serialization shows up as lost updates.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stornet::error::{Result, StornetError};
use stornet::network_rules::{
    find_resource_access_rule, is_default_state, AccountLocks, Bypass, DefaultAction, IpRule,
    NetworkRule, NetworkRuleReconciler, NetworkRuleSet, NetworkRulesManager, ResourceAccessRule,
    StorageAccountId, StorageAccountOperations,
};

/// Storage accounts kept in memory
#[derive(Default)]
struct InMemoryAccounts {
    accounts: Mutex<HashMap<String, NetworkRuleSet>>,
    writes: AtomicUsize,
    fail_reads: bool,
    fail_writes: bool,
}

impl InMemoryAccounts {
    fn with_account(name: &str, rules: NetworkRuleSet) -> Self {
        let fake = Self::default();
        fake.accounts
            .lock()
            .unwrap()
            .insert(name.to_string(), rules);
        fake
    }

    fn rules(&self, name: &str) -> NetworkRuleSet {
        self.accounts.lock().unwrap()[name].clone()
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageAccountOperations for InMemoryAccounts {
    async fn get_network_rule_set(
        &self,
        account: &StorageAccountId,
    ) -> Result<Option<NetworkRuleSet>> {
        if self.fail_reads {
            return Err(StornetError::network("connection reset"));
        }
        let rules = self
            .accounts
            .lock()
            .unwrap()
            .get(&account.account_name)
            .cloned();
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(rules)
    }

    async fn update_network_rule_set(
        &self,
        account: &StorageAccountId,
        rules: &NetworkRuleSet,
    ) -> Result<NetworkRuleSet> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.fail_writes {
            return Err(StornetError::azure_api("HTTP 409: Conflict"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .insert(account.account_name.clone(), rules.clone());
        Ok(rules.clone())
    }
}

fn account(name: &str) -> StorageAccountId {
    StorageAccountId::new("00000000-0000-0000-0000-000000000001", "rg1", name)
}

fn ip(address: &str) -> NetworkRule {
    NetworkRule::Ip(IpRule::new(address))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_are_not_lost() {
    let remote = Arc::new(InMemoryAccounts::with_account(
        "acct1",
        NetworkRuleSet::default(),
    ));
    let locks = Arc::new(AccountLocks::new());
    let reconciler = NetworkRuleReconciler::new(remote.clone(), locks.clone());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                reconciler
                    .add_rule(&account("acct1"), &ip(&format!("10.0.{i}.0/24")))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().unwrap());
    }

    let rules = remote.rules("acct1");
    assert_eq!(rules.ip_rules.len(), 20);
    for i in 0..20 {
        let expected = format!("10.0.{i}.0/24");
        assert!(rules
            .ip_rules
            .iter()
            .any(|rule| rule.ip_address_or_range == expected));
    }
    assert_eq!(locks.active_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_and_removes_converge() {
    let mut initial = NetworkRuleSet::default();
    for i in 0..10 {
        initial.ip_rules.push(IpRule::new(format!("192.168.{i}.1")));
    }
    let remote = Arc::new(InMemoryAccounts::with_account("acct1", initial));
    let reconciler = NetworkRuleReconciler::new(remote.clone(), Arc::new(AccountLocks::new()));

    let removals = (0..10).map(|i| {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .remove_rule(&account("acct1"), &ip(&format!("192.168.{i}.1")))
                .await
        })
    });
    let additions = (0..10).map(|i| {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .add_rule(&account("acct1"), &ip(&format!("172.16.{i}.1")))
                .await
        })
    });

    let results = futures::future::join_all(removals.chain(additions)).await;
    assert!(results.into_iter().all(|r| matches!(r, Ok(Ok(true)))));

    let rules = remote.rules("acct1");
    assert_eq!(rules.ip_rules.len(), 10);
    assert!(rules
        .ip_rules
        .iter()
        .all(|rule| rule.ip_address_or_range.starts_with("172.16.")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_accounts_reconcile_independently() {
    let remote = Arc::new(InMemoryAccounts::default());
    {
        let mut accounts = remote.accounts.lock().unwrap();
        accounts.insert("acct1".to_string(), NetworkRuleSet::default());
        accounts.insert("acct2".to_string(), NetworkRuleSet::default());
    }
    let reconciler = NetworkRuleReconciler::new(remote.clone(), Arc::new(AccountLocks::new()));

    let (acct1, ip1) = (account("acct1"), ip("1.1.1.1"));
    let (acct2, ip2) = (account("acct2"), ip("2.2.2.2"));
    let (first, second) = tokio::join!(
        reconciler.add_rule(&acct1, &ip1),
        reconciler.add_rule(&acct2, &ip2),
    );
    assert!(first.unwrap());
    assert!(second.unwrap());

    assert_eq!(remote.rules("acct1").ip_rules, vec![IpRule::new("1.1.1.1")]);
    assert_eq!(remote.rules("acct2").ip_rules, vec![IpRule::new("2.2.2.2")]);
}

#[tokio::test]
async fn test_ip_rule_lifecycle() {
    let remote = Arc::new(InMemoryAccounts::with_account(
        "acct1",
        NetworkRuleSet::default(),
    ));
    let manager = NetworkRulesManager::new(remote.clone(), Arc::new(AccountLocks::new()), true);
    let rule = ip("127.0.0.1");

    assert!(manager.add_rule(&account("acct1"), &rule).await.unwrap());
    let rules = remote.rules("acct1");
    assert_eq!(rules.ip_rules, vec![IpRule::new("127.0.0.1")]);
    assert_eq!(rules.default_action, DefaultAction::Allow);
    assert!(manager.rule_exists(&account("acct1"), &rule).await.unwrap());

    // Reapplying is a no-op on the rule list
    assert!(!manager.add_rule(&account("acct1"), &rule).await.unwrap());
    assert_eq!(remote.rules("acct1").ip_rules.len(), 1);

    assert!(manager.remove_rule(&account("acct1"), &rule).await.unwrap());
    assert!(remote.rules("acct1").ip_rules.is_empty());
    assert!(is_default_state(&remote.rules("acct1")));

    // Removing an absent rule succeeds
    assert!(!manager.remove_rule(&account("acct1"), &rule).await.unwrap());
}

#[tokio::test]
async fn test_resource_access_rule_requires_matching_tenant() {
    let search = "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Search/searchServices/search1";
    let mut initial = NetworkRuleSet::default();
    initial
        .resource_access_rules
        .push(ResourceAccessRule::new(search, "tenant-A"));

    assert!(find_resource_access_rule(&initial, &ResourceAccessRule::new(search, "tenant-B")).is_none());
    assert!(find_resource_access_rule(&initial, &ResourceAccessRule::new(search, "TENANT-a")).is_some());

    let remote = Arc::new(InMemoryAccounts::with_account("acct1", initial));
    let manager = NetworkRulesManager::new(remote.clone(), Arc::new(AccountLocks::new()), true);

    let other_tenant = NetworkRule::ResourceAccess(ResourceAccessRule::new(search, "tenant-B"));
    assert!(!manager
        .remove_rule(&account("acct1"), &other_tenant)
        .await
        .unwrap());
    assert_eq!(remote.rules("acct1").resource_access_rules.len(), 1);

    assert!(manager.add_rule(&account("acct1"), &other_tenant).await.unwrap());
    assert_eq!(remote.rules("acct1").resource_access_rules.len(), 2);
}

#[tokio::test]
async fn test_import_guard_refuses_customised_account() {
    let mut initial = NetworkRuleSet::default();
    initial.ip_rules.push(IpRule::new("8.8.8.8"));
    let remote = Arc::new(InMemoryAccounts::with_account("acct1", initial.clone()));
    let manager = NetworkRulesManager::new(remote.clone(), Arc::new(AccountLocks::new()), true);

    let mut desired = NetworkRuleSet::default();
    desired.default_action = DefaultAction::Deny;

    let err = manager
        .create_rule_set(&account("acct1"), desired.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StornetError::AlreadyExists { .. }));
    assert_eq!(remote.rules("acct1"), initial);
    assert_eq!(remote.writes(), 0);

    // Updating takes over regardless
    manager
        .update_rule_set(&account("acct1"), desired.clone())
        .await
        .unwrap();
    assert_eq!(remote.rules("acct1"), desired);
}

#[tokio::test]
async fn test_reset_returns_to_default_state() {
    let initial = NetworkRuleSet {
        default_action: DefaultAction::Deny,
        bypass: BTreeSet::from([Bypass::Logging, Bypass::Metrics]),
        ip_rules: vec![IpRule::new("10.0.0.0/16")],
        virtual_network_rules: Vec::new(),
        resource_access_rules: vec![ResourceAccessRule::new(
            "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Search/searchServices/search1",
            "tenant-A",
        )],
    };
    let remote = Arc::new(InMemoryAccounts::with_account("acct1", initial));
    let manager = NetworkRulesManager::new(remote.clone(), Arc::new(AccountLocks::new()), true);

    manager.delete_rule_set(&account("acct1")).await.unwrap();
    assert_eq!(remote.rules("acct1"), NetworkRuleSet::default());

    // A reset account can be claimed again
    manager
        .create_rule_set(&account("acct1"), NetworkRuleSet::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remote_failures_release_the_lock() {
    let locks = Arc::new(AccountLocks::new());

    let missing = Arc::new(InMemoryAccounts::default());
    let reconciler = NetworkRuleReconciler::new(missing, locks.clone());
    let err = reconciler
        .add_rule(&account("gone"), &ip("1.2.3.4"))
        .await
        .unwrap_err();
    assert!(matches!(err, StornetError::AccountNotFound { .. }));
    assert_eq!(locks.active_locks(), 0);

    let failing_read = Arc::new(InMemoryAccounts {
        fail_reads: true,
        ..InMemoryAccounts::default()
    });
    let reconciler = NetworkRuleReconciler::new(failing_read, locks.clone());
    let err = reconciler
        .add_rule(&account("acct1"), &ip("1.2.3.4"))
        .await
        .unwrap_err();
    assert!(matches!(err, StornetError::RemoteFetch { .. }));
    assert_eq!(locks.active_locks(), 0);

    let failing_write = Arc::new(InMemoryAccounts {
        fail_writes: true,
        ..InMemoryAccounts::with_account("acct1", NetworkRuleSet::default())
    });
    let reconciler = NetworkRuleReconciler::new(failing_write.clone(), locks.clone());
    let err = reconciler
        .add_rule(&account("acct1"), &ip("1.2.3.4"))
        .await
        .unwrap_err();
    assert!(matches!(err, StornetError::RemoteUpdate { .. }));
    assert_eq!(failing_write.rules("acct1"), NetworkRuleSet::default());
    assert_eq!(locks.active_locks(), 0);

    // The same account is usable right after a failure
    let healthy = Arc::new(InMemoryAccounts::with_account(
        "acct1",
        NetworkRuleSet::default(),
    ));
    let reconciler = NetworkRuleReconciler::new(healthy.clone(), locks.clone());
    assert!(reconciler
        .add_rule(&account("acct1"), &ip("1.2.3.4"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_lock_timeout_surfaces_while_account_is_busy() {
    use stornet::network_rules::NamedLocks;

    let remote = Arc::new(InMemoryAccounts::with_account(
        "acct1",
        NetworkRuleSet::default(),
    ));
    let locks = Arc::new(AccountLocks::with_timeout(Duration::from_millis(20)));
    let reconciler = NetworkRuleReconciler::new(remote.clone(), locks.clone());

    let held = locks.acquire("acct1").await.unwrap();
    let err = reconciler
        .add_rule(&account("acct1"), &ip("1.2.3.4"))
        .await
        .unwrap_err();
    assert!(matches!(err, StornetError::LockTimeout { .. }));
    assert_eq!(remote.writes(), 0);

    held.release();
    assert!(reconciler
        .add_rule(&account("acct1"), &ip("1.2.3.4"))
        .await
        .unwrap());
}
