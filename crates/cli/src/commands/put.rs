//! put command - Upload local files
//!
//! Each file becomes one upload transaction on the target bucket's queue;
//! the command returns once every transaction has completed.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use blobq_core::{BlobWriter, ListenerResult, RemotePath, TargetOption, parse_path};
use clap::Args;
use serde::Serialize;

use super::Context;
use super::transfer::{self, Tracker};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, ProgressBar};
use crate::session::Session;

const CHUNK_SIZE: usize = 64 * 1024;

/// Upload local files
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local files to upload
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Destination: alias/bucket/key, or alias/bucket/prefix/ for several files
    pub target: String,

    /// Content type for every file (guessed from the extension by default)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Fail instead of overwriting an existing blob
    #[arg(long)]
    pub if_not_exists: bool,

    /// Storage class for the stored blobs
    #[arg(long)]
    pub storage_class: Option<String>,

    /// User metadata, repeatable
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
    pub metadata: Vec<(String, String)>,
}

fn parse_meta(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{value}'")),
    }
}

impl PutArgs {
    fn target_options(&self) -> Vec<TargetOption> {
        let mut options = Vec::new();
        if self.if_not_exists {
            options.push(TargetOption::DoesNotExist);
        }
        if let Some(class) = &self.storage_class {
            options.push(TargetOption::StorageClass(class.clone()));
        }
        options.extend(
            self.metadata
                .iter()
                .map(|(key, value)| TargetOption::Metadata {
                    key: key.clone(),
                    value: value.clone(),
                }),
        );
        options
    }
}

/// One file and where it goes
#[derive(Debug, Clone, PartialEq)]
struct PlannedUpload {
    source: PathBuf,
    key: String,
    content_type: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    status: &'static str,
    source: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the put command
pub fn execute(args: PutArgs, ctx: &Context) -> ExitCode {
    let formatter = &ctx.formatter;

    let target = match parse_path(&args.target) {
        Ok(p) => p,
        Err(e) => {
            formatter.error(&format!("Invalid target path: {e}"));
            return ExitCode::UsageError;
        }
    };
    let plan = match plan_uploads(&args, &target) {
        Ok(plan) => plan,
        Err((code, message)) => {
            formatter.error(&message);
            return code;
        }
    };

    let session = match ctx.open_session(&target.alias) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let code = upload(&plan, &args, &target, &session, formatter);
    session.shutdown();
    code
}

/// Resolve every file to its key; nothing is submitted unless all resolve
fn plan_uploads(
    args: &PutArgs,
    target: &RemotePath,
) -> Result<Vec<PlannedUpload>, (ExitCode, String)> {
    if args.files.len() > 1 && !target.is_prefix() {
        return Err((
            ExitCode::UsageError,
            format!("Target '{target}' must end with '/' when uploading several files"),
        ));
    }

    args.files
        .iter()
        .map(|source| {
            let metadata = std::fs::metadata(source).map_err(|e| {
                (
                    ExitCode::NotFound,
                    format!("Cannot read {}: {e}", source.display()),
                )
            })?;
            if !metadata.is_file() {
                return Err((
                    ExitCode::UsageError,
                    format!("{} is not a regular file", source.display()),
                ));
            }

            let key = if target.is_prefix() {
                let name = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| {
                        (
                            ExitCode::UsageError,
                            format!("{} has no usable file name", source.display()),
                        )
                    })?;
                target.join(name).key
            } else {
                target.key.clone()
            };

            let content_type = args.content_type.clone().unwrap_or_else(|| {
                mime_guess::from_path(source)
                    .first_or_octet_stream()
                    .to_string()
            });

            Ok(PlannedUpload {
                source: source.clone(),
                key,
                content_type,
                size: metadata.len(),
            })
        })
        .collect()
}

/// Submit one upload per planned file and wait for all of them
fn upload(
    plan: &[PlannedUpload],
    args: &PutArgs,
    target: &RemotePath,
    session: &Session,
    formatter: &Formatter,
) -> ExitCode {
    let bucket = match session.upload_bucket(&target.bucket) {
        Ok(b) => b,
        Err(e) => {
            formatter.error(&format!("Failed to start upload queue: {e}"));
            return ExitCode::from(&e);
        }
    };

    let options = args.target_options();
    let progress = ProgressBar::new(formatter.config(), plan.iter().map(|p| p.size).sum());
    let mut tracker = Tracker::new(plan.len());

    for (index, item) in plan.iter().enumerate() {
        let source = item.source.clone();
        let sink = tracker.failure_sink(index);
        let bar = progress.clone();

        let result = bucket
            .create_upload_transaction(&item.key)
            .content_type(&item.content_type)
            .target_options(options.iter().cloned())
            .on_complete(tracker.on_complete(index))
            .execute(move |stream| sink.report(send_file(stream, &source, &bar)));
        tracker.submitted(index, result);
    }

    let results = tracker.wait();
    progress.finish_and_clear();

    let outputs: Vec<PutOutput> = plan
        .iter()
        .zip(&results)
        .map(|(item, result)| {
            let target = RemotePath::new(&target.alias, &target.bucket, &item.key).to_string();
            let source = item.source.display().to_string();
            match result {
                Ok(()) => PutOutput {
                    status: "success",
                    source,
                    target,
                    size_bytes: Some(item.size),
                    size_human: Some(humansize::format_size(item.size, humansize::BINARY)),
                    error: None,
                },
                Err(failure) => PutOutput {
                    status: "error",
                    source,
                    target,
                    size_bytes: None,
                    size_human: None,
                    error: Some(failure.message.clone()),
                },
            }
        })
        .collect();

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "uploads": outputs }));
    } else {
        for output in &outputs {
            match &output.error {
                None => formatter.success(&format!(
                    "{} -> {} ({})",
                    output.source,
                    output.target,
                    output.size_human.as_deref().unwrap_or_default()
                )),
                Some(error) => formatter.error(&format!(
                    "Failed to upload {} to {}: {error}",
                    output.source, output.target
                )),
            }
        }
    }

    transfer::exit_code(&results)
}

/// Result listener body: stream `source` into the blob writer
fn send_file(
    stream: blobq_core::Result<&mut dyn BlobWriter>,
    source: &Path,
    progress: &ProgressBar,
) -> ListenerResult {
    let writer = stream?;
    let mut file =
        File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        progress.inc(n as u64);
    }
    Ok(())
}
