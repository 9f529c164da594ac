//! Alias management commands
//!
//! Aliases are named references to S3-compatible storage endpoints,
//! including connection details and credentials.

use blobq_core::{Alias, AliasManager};
use clap::Subcommand;
use serde::Serialize;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Alias subcommands for managing storage service connections
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List all configured aliases
    List(ListArgs),

    /// Remove an alias
    Remove(RemoveArgs),
}

/// Arguments for the `alias set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Alias name (e.g., "local", "s3")
    pub name: String,

    /// S3 endpoint URL (e.g., "http://localhost:9000", "https://s3.amazonaws.com")
    pub endpoint: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Bucket lookup style: auto, path, or dns
    #[arg(long, default_value = "auto")]
    pub bucket_lookup: String,
}

/// Arguments for the `alias list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show full details including region and lookup style
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `alias remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the alias to remove
    pub name: String,
}

#[derive(Serialize)]
struct AliasListOutput {
    aliases: Vec<AliasInfo>,
}

/// Alias information for JSON output (without credentials)
#[derive(Serialize)]
struct AliasInfo {
    name: String,
    endpoint: String,
    region: String,
    bucket_lookup: String,
}

impl From<&Alias> for AliasInfo {
    fn from(alias: &Alias) -> Self {
        Self {
            name: alias.name.clone(),
            endpoint: alias.endpoint.clone(),
            region: alias.region.clone(),
            bucket_lookup: alias.bucket_lookup.clone(),
        }
    }
}

#[derive(Serialize)]
struct AliasOperationOutput {
    success: bool,
    alias: String,
    message: String,
}

/// Execute an alias subcommand
pub fn execute(cmd: AliasCommands, ctx: &Context) -> ExitCode {
    let manager = AliasManager::with_config_manager(ctx.config_manager.clone());
    run(cmd, &manager, &ctx.formatter)
}

fn run(cmd: AliasCommands, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    match cmd {
        AliasCommands::Set(args) => execute_set(args, manager, formatter),
        AliasCommands::List(args) => execute_list(args, manager, formatter),
        AliasCommands::Remove(args) => execute_remove(args, manager, formatter),
    }
}

fn report(formatter: &Formatter, alias: &str, message: String) {
    if formatter.is_json() {
        formatter.json(&AliasOperationOutput {
            success: true,
            alias: alias.to_string(),
            message,
        });
    } else {
        formatter.success(&message);
    }
}

fn execute_set(args: SetArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    if args.endpoint.is_empty() {
        formatter.error("Endpoint URL cannot be empty");
        return ExitCode::UsageError;
    }

    let mut alias = Alias::new(
        &args.name,
        &args.endpoint,
        &args.access_key,
        &args.secret_key,
    );
    alias.region = args.region;
    alias.bucket_lookup = args.bucket_lookup;

    match manager.set(alias) {
        Ok(()) => {
            report(
                formatter,
                &args.name,
                format!("Alias '{}' configured successfully", args.name),
            );
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            match ExitCode::from(&e) {
                ExitCode::GeneralError => ExitCode::UsageError,
                code => code,
            }
        }
    }
}

fn execute_list(args: ListArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    let aliases = match manager.list() {
        Ok(aliases) => aliases,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    if formatter.is_json() {
        formatter.json(&AliasListOutput {
            aliases: aliases.iter().map(AliasInfo::from).collect(),
        });
    } else if aliases.is_empty() {
        formatter.println("No aliases configured.");
    } else {
        for alias in &aliases {
            if args.long {
                formatter.println(&format!(
                    "{:<12} {} (region: {}, lookup: {})",
                    alias.name, alias.endpoint, alias.region, alias.bucket_lookup
                ));
            } else {
                formatter.println(&format!("{:<12} {}", alias.name, alias.endpoint));
            }
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    match manager.remove(&args.name) {
        Ok(()) => {
            report(
                formatter,
                &args.name,
                format!("Alias '{}' removed successfully", args.name),
            );
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use blobq_core::ConfigManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, AliasManager, Formatter) {
        let dir = TempDir::new().unwrap();
        let manager =
            AliasManager::with_config_manager(ConfigManager::with_path(dir.path().join("config.toml")));
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        (dir, manager, formatter)
    }

    fn set_args(name: &str, endpoint: &str, lookup: &str) -> SetArgs {
        SetArgs {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            access_key: "accesskey".to_string(),
            secret_key: "secretkey".to_string(),
            region: "eu-west-1".to_string(),
            bucket_lookup: lookup.to_string(),
        }
    }

    #[test]
    fn test_set_then_remove() {
        let (_dir, manager, formatter) = setup();

        let code = run(
            AliasCommands::Set(set_args("local", "http://localhost:9000", "path")),
            &manager,
            &formatter,
        );
        assert_eq!(code, ExitCode::Success);
        let alias = manager.get("local").unwrap();
        assert_eq!(alias.region, "eu-west-1");
        assert_eq!(alias.bucket_lookup, "path");

        let remove = || {
            run(
                AliasCommands::Remove(RemoveArgs {
                    name: "local".to_string(),
                }),
                &manager,
                &formatter,
            )
        };
        assert_eq!(remove(), ExitCode::Success);
        assert_eq!(remove(), ExitCode::NotFound);
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let (_dir, manager, formatter) = setup();

        for args in [
            set_args("local", "", "auto"),
            set_args("local", "not a url", "auto"),
            set_args("local", "http://localhost:9000", "sideways"),
            set_args("a/b", "http://localhost:9000", "auto"),
        ] {
            assert_eq!(
                run(AliasCommands::Set(args), &manager, &formatter),
                ExitCode::UsageError
            );
        }
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_alias_info_hides_credentials() {
        let alias = Alias::new("test", "http://localhost:9000", "key", "secret");
        let json = serde_json::to_string(&AliasInfo::from(&alias)).unwrap();
        assert!(json.contains("http://localhost:9000"));
        assert!(!json.contains("secret"));
    }
}
