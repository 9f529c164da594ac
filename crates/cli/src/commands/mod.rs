//! CLI command definitions and execution
//!
//! Every command runs synchronously: transfers are handed to the bucket
//! queues and the command blocks until their completion listeners fire.

use blobq_core::{Alias, AliasManager, ConfigManager, Defaults};
use clap::{Parser, Subcommand};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use crate::session::{Session, ThreadCounts};

mod alias;
mod completions;
mod get;
mod ls;
mod put;
mod transfer;

/// blobq - queued transfers for S3-compatible object storage
///
/// Uploads and downloads run on per-bucket worker threads; several files
/// given to one command move concurrently.
#[derive(Parser, Debug)]
#[command(name = "blobq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    /// Upload worker threads per bucket (default from config, else 3)
    #[arg(long, global = true, value_parser = parse_thread_count)]
    pub upload_threads: Option<usize>,

    /// Download worker threads per bucket (default from config, else 3)
    #[arg(long, global = true, value_parser = parse_thread_count)]
    pub download_threads: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage service aliases
    #[command(subcommand)]
    Alias(alias::AliasCommands),

    /// Upload local files
    Put(put::PutArgs),

    /// Download blobs to local files
    Get(get::GetArgs),

    /// List blobs in a bucket
    Ls(ls::LsArgs),

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

fn parse_thread_count(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("thread count must be at least 1".to_string()),
        Ok(count) => Ok(count),
        Err(e) => Err(e.to_string()),
    }
}

/// Settings shared by every command of one invocation
#[derive(Debug)]
pub struct Context {
    pub config_manager: ConfigManager,
    pub formatter: Formatter,
    pub threads: ThreadCounts,
}

impl Context {
    /// Load the configuration file and apply its defaults under the
    /// command-line flags
    fn load(
        mut output: OutputConfig,
        upload_threads: Option<usize>,
        download_threads: Option<usize>,
    ) -> Result<Self, ExitCode> {
        let early = Formatter::new(output.clone());
        let loaded = ConfigManager::new().and_then(|manager| {
            let config = manager.load()?;
            Ok((manager, config))
        });
        let (config_manager, config) = loaded.map_err(|e| {
            early.error(&format!("Failed to load configuration: {e}"));
            ExitCode::from(&e)
        })?;

        let defaults: &Defaults = &config.defaults;
        output.json |= defaults.output == "json";
        Ok(Self {
            config_manager,
            formatter: Formatter::new(output),
            threads: ThreadCounts::resolve(upload_threads, download_threads, defaults),
        })
    }

    /// Look up `name` and connect to its endpoint
    ///
    /// Failures are reported through the formatter; the caller only
    /// forwards the exit code.
    pub fn open_session(&self, name: &str) -> Result<Session, ExitCode> {
        let alias = self.alias(name)?;
        Session::open(&alias, self.threads).map_err(|e| {
            self.formatter
                .error(&format!("Failed to connect to '{name}': {e}"));
            ExitCode::from(&e)
        })
    }

    fn alias(&self, name: &str) -> Result<Alias, ExitCode> {
        AliasManager::with_config_manager(self.config_manager.clone())
            .get(name)
            .map_err(|e| {
                self.formatter.error(&e.to_string());
                ExitCode::from(&e)
            })
    }
}

/// Execute the CLI command and return an exit code
pub fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Completions(args) => completions::execute(args),
        command => match Context::load(output_config, cli.upload_threads, cli.download_threads) {
            Ok(ctx) => dispatch(command, &ctx),
            Err(code) => code,
        },
    }
}

fn dispatch(command: Commands, ctx: &Context) -> ExitCode {
    match command {
        Commands::Alias(cmd) => alias::execute(cmd, ctx),
        Commands::Put(args) => put::execute(args, ctx),
        Commands::Get(args) => get::execute(args, ctx),
        Commands::Ls(args) => ls::execute(args, ctx),
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Thread counts used by command tests
#[cfg(test)]
pub(crate) fn test_threads() -> ThreadCounts {
    ThreadCounts::resolve(Some(2), Some(2), &blobq_core::Defaults::default())
}
