//! ls command - List blobs
//!
//! Lists the blob paths of a bucket, optionally under a prefix.

use blobq_core::{RemotePath, parse_path};
use clap::Args;
use serde::Serialize;

use super::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;
use crate::session::Session;

/// List blobs in a bucket
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote path (alias/bucket[/prefix])
    pub path: String,

    /// Print only the number of matching blobs
    #[arg(long)]
    pub summarize: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<String>,
    total: usize,
}

/// Execute the ls command
pub fn execute(args: LsArgs, ctx: &Context) -> ExitCode {
    let path = match parse_path(&args.path) {
        Ok(p) => p,
        Err(e) => {
            ctx.formatter.error(&format!("Invalid path: {e}"));
            return ExitCode::UsageError;
        }
    };

    let session = match ctx.open_session(&path.alias) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let code = list(&path, args.summarize, &session, &ctx.formatter);
    session.shutdown();
    code
}

fn list(path: &RemotePath, summarize: bool, session: &Session, formatter: &Formatter) -> ExitCode {
    let items = match session.bucket_for_listing(&path.bucket).list_blobs(&path.key) {
        Ok(items) => items,
        Err(e) => {
            formatter.error(&format!("Failed to list {path}: {e}"));
            return ExitCode::from(&e);
        }
    };

    if formatter.is_json() {
        formatter.json(&LsOutput {
            total: items.len(),
            items,
        });
    } else {
        if !summarize {
            for item in &items {
                formatter.println(item);
            }
        }
        if summarize || items.is_empty() {
            formatter.println(&format!("Total: {} blobs", items.len()));
        }
    }

    ExitCode::Success
}
