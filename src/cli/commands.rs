//! CLI commands and argument parsing
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, subcommands, and their arguments.

use crate::auth::provider::{AzureAuthProvider, DefaultAzureCredentialProvider};
use crate::config::{
    init_default_config, is_resource_id, validate_ip_rule, validate_tenant_id, Config,
    NetworkRulesConfig,
};
use crate::error::{Result, StornetError};
use crate::network_rules::{
    AccountLocks, AzureStorageAccountOperations, IpRule, NetworkRule, NetworkRulesManager,
    ResourceAccessRule, StorageAccountId, VirtualNetworkRule,
};
use crate::utils::format::{format_json, DisplayUtils, OutputFormat, TableFormatter};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "stornet")]
#[command(about = "Manage Azure Storage account network rules without lost updates")]
#[command(version, author)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Output format (defaults to json when output_json is configured)
    #[arg(long, global = true, value_enum)]
    pub format: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Selects the storage account a command works on
#[derive(Args, Debug, Clone)]
pub struct AccountArgs {
    /// Storage account name
    #[arg(short, long, conflicts_with = "id")]
    pub account: Option<String>,

    /// Resource group of the storage account
    #[arg(short = 'g', long, conflicts_with = "id")]
    pub resource_group: Option<String>,

    /// Full resource ID of the storage account
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the network rules of a storage account
    Show {
        #[command(flatten)]
        target: AccountArgs,
    },
    /// Replace the network rules with the contents of a rules file
    Apply {
        #[command(flatten)]
        target: AccountArgs,
        /// TOML file with a [network_rules] table
        #[arg(short, long)]
        file: PathBuf,
        /// Refuse to overwrite rules that were configured elsewhere
        #[arg(long)]
        create: bool,
    },
    /// Reset the network rules to the defaults of a new account
    Reset {
        #[command(flatten)]
        target: AccountArgs,
    },
    /// Manage single IP rules
    Ip {
        #[command(subcommand)]
        command: IpCommands,
    },
    /// Manage single virtual network subnet rules
    Subnet {
        #[command(subcommand)]
        command: SubnetCommands,
    },
    /// Manage single private link (resource access) rules
    PrivateLink {
        #[command(subcommand)]
        command: PrivateLinkCommands,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct IpArgs {
    /// IPv4 address or CIDR range
    pub address: String,
    #[command(flatten)]
    pub target: AccountArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SubnetArgs {
    /// Resource ID of the subnet
    pub subnet_id: String,
    #[command(flatten)]
    pub target: AccountArgs,
}

#[derive(Args, Debug, Clone)]
pub struct PrivateLinkArgs {
    /// Resource ID of the resource granted access
    pub resource_id: String,
    /// Tenant of the resource (defaults to the configured tenant)
    #[arg(long)]
    pub tenant_id: Option<String>,
    #[command(flatten)]
    pub target: AccountArgs,
}

#[derive(Subcommand)]
pub enum IpCommands {
    /// Allow an address or range
    Add(IpArgs),
    /// Remove an address or range
    Remove(IpArgs),
    /// Check whether an address or range is allowed
    Check(IpArgs),
}

#[derive(Subcommand)]
pub enum SubnetCommands {
    /// Allow a subnet
    Add(SubnetArgs),
    /// Remove a subnet
    Remove(SubnetArgs),
    /// Check whether a subnet is allowed
    Check(SubnetArgs),
}

#[derive(Subcommand)]
pub enum PrivateLinkCommands {
    /// Grant a resource access
    Add(PrivateLinkArgs),
    /// Revoke access of a resource
    Remove(PrivateLinkArgs),
    /// Check whether a resource has access
    Check(PrivateLinkArgs),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Write a default configuration file
    Init,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleOperation {
    Add,
    Remove,
    Check,
}

impl Cli {
    pub async fn execute(self, mut config: Config) -> Result<()> {
        if self.no_color {
            config.no_color = true;
        }
        let format = self.format.unwrap_or(if config.output_json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        });

        match self.command {
            Commands::Show { target } => execute_show(&target, format, &config).await,
            Commands::Apply {
                target,
                file,
                create,
            } => execute_apply(&target, &file, create, format, &config).await,
            Commands::Reset { target } => execute_reset(&target, format, &config).await,
            Commands::Ip { command } => {
                let (operation, args) = match command {
                    IpCommands::Add(args) => (RuleOperation::Add, args),
                    IpCommands::Remove(args) => (RuleOperation::Remove, args),
                    IpCommands::Check(args) => (RuleOperation::Check, args),
                };
                let rule = ip_rule_from_args(&args)?;
                execute_rule_operation(operation, &args.target, rule, format, &config).await
            }
            Commands::Subnet { command } => {
                let (operation, args) = match command {
                    SubnetCommands::Add(args) => (RuleOperation::Add, args),
                    SubnetCommands::Remove(args) => (RuleOperation::Remove, args),
                    SubnetCommands::Check(args) => (RuleOperation::Check, args),
                };
                let rule = subnet_rule_from_args(&args)?;
                execute_rule_operation(operation, &args.target, rule, format, &config).await
            }
            Commands::PrivateLink { command } => {
                let (operation, args) = match command {
                    PrivateLinkCommands::Add(args) => (RuleOperation::Add, args),
                    PrivateLinkCommands::Remove(args) => (RuleOperation::Remove, args),
                    PrivateLinkCommands::Check(args) => (RuleOperation::Check, args),
                };
                let rule = private_link_rule_from_args(&args, config.default_tenant())?;
                execute_rule_operation(operation, &args.target, rule, format, &config).await
            }
            Commands::Config { command } => execute_config_command(command, format, &config).await,
        }
    }
}

fn ip_rule_from_args(args: &IpArgs) -> Result<NetworkRule> {
    let address = args.address.trim();
    validate_ip_rule(address)?;
    Ok(NetworkRule::Ip(IpRule::new(address)))
}

fn subnet_rule_from_args(args: &SubnetArgs) -> Result<NetworkRule> {
    if !is_resource_id(&args.subnet_id)? {
        return Err(StornetError::invalid_resource_id(
            &args.subnet_id,
            "expected a subnet resource ID",
        ));
    }
    Ok(NetworkRule::VirtualNetwork(VirtualNetworkRule::new(
        args.subnet_id.clone(),
    )))
}

fn private_link_rule_from_args(
    args: &PrivateLinkArgs,
    default_tenant: Option<&str>,
) -> Result<NetworkRule> {
    if !is_resource_id(&args.resource_id)? {
        return Err(StornetError::invalid_resource_id(
            &args.resource_id,
            "expected a resource ID",
        ));
    }

    let tenant_id = args
        .tenant_id
        .as_deref()
        .or(default_tenant)
        .ok_or_else(|| {
            StornetError::invalid_argument("No tenant given. Use --tenant-id or set AZURE_TENANT_ID")
        })?;
    validate_tenant_id(tenant_id)?;

    Ok(NetworkRule::ResourceAccess(ResourceAccessRule::new(
        args.resource_id.clone(),
        tenant_id,
    )))
}

fn resolve_account(target: &AccountArgs, config: &Config) -> Result<StorageAccountId> {
    config.resolve_account(
        target.account.as_deref(),
        target.resource_group.as_deref(),
        target.id.as_deref(),
    )
}

fn create_manager(config: &Config) -> Result<NetworkRulesManager> {
    let auth_provider: Arc<dyn AzureAuthProvider> =
        Arc::new(DefaultAzureCredentialProvider::new().map_err(|e| {
            StornetError::authentication(format!("Failed to create auth provider: {e}"))
        })?);

    let operations = Arc::new(AzureStorageAccountOperations::new(
        auth_provider,
        config.retry_options(),
    )?);

    let locks = Arc::new(match config.lock_timeout() {
        Some(timeout) => AccountLocks::with_timeout(timeout),
        None => AccountLocks::new(),
    });

    Ok(NetworkRulesManager::new(operations, locks, config.no_color))
}

async fn execute_show(target: &AccountArgs, format: OutputFormat, config: &Config) -> Result<()> {
    let account = resolve_account(target, config)?;
    let manager = create_manager(config)?;

    let rules = manager.read_rule_set(&account).await?;
    manager.display_rule_set(&account, &rules, format)
}

async fn execute_apply(
    target: &AccountArgs,
    file: &Path,
    create: bool,
    format: OutputFormat,
    config: &Config,
) -> Result<()> {
    let account = resolve_account(target, config)?;
    let desired = NetworkRulesConfig::load(file)
        .await?
        .into_rule_set(config.default_tenant())?;
    debug!(file = %file.display(), create, "Applying rules file");

    let manager = create_manager(config)?;
    let written = if create {
        manager.create_rule_set(&account, desired).await?
    } else {
        manager.update_rule_set(&account, desired).await?
    };

    manager.display_rule_set(&account, &written, format)
}

async fn execute_reset(target: &AccountArgs, format: OutputFormat, config: &Config) -> Result<()> {
    let account = resolve_account(target, config)?;
    let manager = create_manager(config)?;

    let written = manager.delete_rule_set(&account).await?;
    if format == OutputFormat::Json {
        println!("{}", format_json(&written)?);
    } else {
        manager.print_info(&format!("Network rules of {} reset to defaults", account));
    }
    Ok(())
}

async fn execute_rule_operation(
    operation: RuleOperation,
    target: &AccountArgs,
    rule: NetworkRule,
    format: OutputFormat,
    config: &Config,
) -> Result<()> {
    let account = resolve_account(target, config)?;
    let manager = create_manager(config)?;

    let (changed, present) = match operation {
        RuleOperation::Add => {
            let added = manager.add_rule(&account, &rule).await?;
            manager.report_rule_change(&rule, added, "added", "present");
            (added, true)
        }
        RuleOperation::Remove => {
            let removed = manager.remove_rule(&account, &rule).await?;
            manager.report_rule_change(&rule, removed, "removed", "absent");
            (removed, false)
        }
        RuleOperation::Check => {
            let present = manager.rule_exists(&account, &rule).await?;
            if format == OutputFormat::Table {
                let state = if present { "present" } else { "absent" };
                manager.print_info(&format!("{} is {} on {}", rule, state, account));
            }
            (false, present)
        }
    };

    if format == OutputFormat::Json && operation == RuleOperation::Check {
        println!(
            "{}",
            format_json(&serde_json::json!({
                "account": account.resource_id(),
                "rule": rule.to_string(),
                "kind": rule.kind().to_string(),
                "present": present,
            }))?
        );
    } else if format == OutputFormat::Json {
        println!(
            "{}",
            format_json(&serde_json::json!({
                "account": account.resource_id(),
                "rule": rule.to_string(),
                "changed": changed,
            }))?
        );
    }

    Ok(())
}

async fn execute_config_command(
    command: ConfigCommands,
    format: OutputFormat,
    config: &Config,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let formatter = TableFormatter::new(format, config.no_color);
            println!("{}", formatter.format_table(std::slice::from_ref(config))?);
        }
        ConfigCommands::Init => {
            let display = DisplayUtils::new(config.no_color);
            let path = Config::get_config_path()?;
            if init_default_config().await? {
                display.print_success(&format!("Created {}", path.display()));
            } else {
                display.print_warning(&format!("{} already exists", path.display()));
            }
        }
        ConfigCommands::Path => {
            println!("{}", Config::get_config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const TENANT: &str = "72f988bf-86f1-41af-91ab-2d7cd011db47";

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ip_add() {
        let cli = Cli::parse_from(["stornet", "ip", "add", "10.0.0.0/24", "-a", "acct1", "-g", "rg1"]);
        match cli.command {
            Commands::Ip {
                command: IpCommands::Add(args),
            } => {
                assert_eq!(args.address, "10.0.0.0/24");
                assert_eq!(args.target.account.as_deref(), Some("acct1"));
                assert_eq!(args.target.resource_group.as_deref(), Some("rg1"));
                assert!(matches!(ip_rule_from_args(&args), Ok(NetworkRule::Ip(_))));
            }
            _ => panic!("expected ip add"),
        }
    }

    #[test]
    fn test_account_and_id_conflict() {
        let result = Cli::try_parse_from([
            "stornet",
            "show",
            "--account",
            "acct1",
            "--id",
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/a",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_format_flag() {
        let cli = Cli::parse_from(["stornet", "--format", "json", "config", "show"]);
        assert_eq!(cli.format, Some(OutputFormat::Json));
    }

    #[test]
    fn test_invalid_ip_rejected_before_any_remote_call() {
        let args = IpArgs {
            address: "10.0.0.1/32".to_string(),
            target: AccountArgs {
                account: None,
                resource_group: None,
                id: None,
            },
        };
        assert!(matches!(
            ip_rule_from_args(&args),
            Err(StornetError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_private_link_tenant_resolution() {
        let args = PrivateLinkArgs {
            resource_id: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Search/searchServices/search1".to_string(),
            tenant_id: None,
            target: AccountArgs {
                account: Some("acct1".to_string()),
                resource_group: None,
                id: None,
            },
        };

        assert!(private_link_rule_from_args(&args, None).is_err());

        match private_link_rule_from_args(&args, Some(TENANT)).unwrap() {
            NetworkRule::ResourceAccess(rule) => assert_eq!(rule.tenant_id, TENANT),
            other => panic!("unexpected rule {other}"),
        }
    }

    #[test]
    fn test_subnet_requires_resource_id() {
        let args = SubnetArgs {
            subnet_id: "default".to_string(),
            target: AccountArgs {
                account: Some("acct1".to_string()),
                resource_group: None,
                id: None,
            },
        };
        assert!(subnet_rule_from_args(&args).is_err());
    }
}
