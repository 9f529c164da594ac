//! get command - Download blobs
//!
//! Each source blob becomes one download transaction; the listener streams
//! it into a local file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use blobq_core::{BlobReader, ListenerResult, RemotePath, parse_path};
use clap::Args;
use serde::Serialize;

use super::Context;
use super::transfer::{self, Tracker};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, ProgressBar};
use crate::session::Session;

const CHUNK_SIZE: usize = 64 * 1024;

/// Download blobs to local files
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Blobs to download (alias/bucket/key), all on the same alias
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Local file, or directory when downloading several blobs
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedDownload {
    source: RemotePath,
    dest: PathBuf,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    status: &'static str,
    source: String,
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the get command
pub fn execute(args: GetArgs, ctx: &Context) -> ExitCode {
    let formatter = &ctx.formatter;

    let plan = match plan_downloads(&args) {
        Ok(plan) => plan,
        Err((code, message)) => {
            formatter.error(&message);
            return code;
        }
    };

    // plan_downloads guarantees a single alias
    let alias = plan[0].source.alias.clone();
    let session = match ctx.open_session(&alias) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let code = download(&plan, &session, formatter);
    session.shutdown();
    code
}

fn plan_downloads(args: &GetArgs) -> Result<Vec<PlannedDownload>, (ExitCode, String)> {
    let sources = args
        .sources
        .iter()
        .map(|s| {
            let path = parse_path(s)
                .map_err(|e| (ExitCode::UsageError, format!("Invalid source path: {e}")))?;
            if path.is_prefix() {
                return Err((
                    ExitCode::UsageError,
                    format!("Source '{path}' names a prefix, not a blob"),
                ));
            }
            Ok(path)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(other) = sources.iter().find(|p| p.alias != sources[0].alias) {
        return Err((
            ExitCode::UsageError,
            format!(
                "All sources must use the same alias ('{}' and '{}')",
                sources[0].alias, other.alias
            ),
        ));
    }

    let into_dir = sources.len() > 1
        || args.target.is_dir()
        || args.target.as_os_str().to_string_lossy().ends_with('/');
    if into_dir {
        std::fs::create_dir_all(&args.target).map_err(|e| {
            (
                ExitCode::GeneralError,
                format!("Cannot create {}: {e}", args.target.display()),
            )
        })?;
    }

    let plan: Vec<PlannedDownload> = sources
        .into_iter()
        .map(|source| {
            let dest = if into_dir {
                // is_prefix() was rejected above, so a file name exists
                args.target.join(source.file_name().unwrap_or(source.key.as_str()))
            } else {
                args.target.clone()
            };
            PlannedDownload { source, dest }
        })
        .collect();

    // Two workers must never write the same local file
    let mut claimed: HashMap<&Path, &RemotePath> = HashMap::new();
    for item in &plan {
        if let Some(first) = claimed.insert(&item.dest, &item.source) {
            return Err((
                ExitCode::UsageError,
                format!(
                    "'{}' and '{}' would both be written to {}",
                    first,
                    item.source,
                    item.dest.display()
                ),
            ));
        }
    }

    Ok(plan)
}

fn download(plan: &[PlannedDownload], session: &Session, formatter: &Formatter) -> ExitCode {
    let progress = ProgressBar::new(formatter.config(), 0);
    let mut tracker = Tracker::new(plan.len());

    for (index, item) in plan.iter().enumerate() {
        let bucket = match session.download_bucket(&item.source.bucket) {
            Ok(b) => b,
            Err(e) => {
                tracker.submitted(index, Err(e));
                continue;
            }
        };

        let dest = item.dest.clone();
        let sink = tracker.failure_sink(index);
        let bar = progress.clone();

        let result = bucket
            .create_download_transaction(&item.source.key)
            .on_complete(tracker.on_complete(index))
            .execute(move |stream| {
                let reader = match stream {
                    Ok(reader) => reader,
                    Err(e) => return sink.report(Err(e.into())),
                };
                let result = receive_file(reader, &dest, &bar);
                if result.is_err() {
                    let _ = std::fs::remove_file(&dest);
                }
                sink.report(result)
            });
        tracker.submitted(index, result);
    }

    let results = tracker.wait();
    progress.finish_and_clear();

    let outputs: Vec<GetOutput> = plan
        .iter()
        .zip(&results)
        .map(|(item, result)| GetOutput {
            status: if result.is_ok() { "success" } else { "error" },
            source: item.source.to_string(),
            target: item.dest.display().to_string(),
            error: result.as_ref().err().map(|f| f.message.clone()),
        })
        .collect();

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "downloads": outputs }));
    } else {
        for output in &outputs {
            match &output.error {
                None => formatter.success(&format!("{} -> {}", output.source, output.target)),
                Some(error) => formatter.error(&format!(
                    "Failed to download {}: {error}",
                    output.source
                )),
            }
        }
    }

    transfer::exit_code(&results)
}

/// Result listener body: copy the blob into `dest`
fn receive_file(reader: &mut dyn BlobReader, dest: &Path, progress: &ProgressBar) -> ListenerResult {
    progress.inc_length(reader.info().size_bytes);
    let mut file =
        File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        progress.inc(n as u64);
    }
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands, test_threads};
    use crate::output::OutputConfig;
    use blobq_core::{Credentials, MemoryConnector, MemoryStore};
    use clap::Parser;
    use tempfile::TempDir;

    fn get_args(argv: &[&str]) -> GetArgs {
        let mut full = vec!["blobq", "get"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Get(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn run(args: &GetArgs, store: &MemoryStore) -> ExitCode {
        let plan = plan_downloads(args).unwrap();
        let session = Session::with_connector(
            MemoryConnector::with_store(store.clone()),
            Credentials::new("ak", "sk"),
            test_threads(),
        )
        .unwrap();
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let code = download(&plan, &session, &formatter);
        session.shutdown();
        code
    }

    #[test]
    fn test_plan_single_file_target() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("copy.bin");
        let args = get_args(&["local/bucket/data/blob.bin", dest.to_str().unwrap()]);

        let plan = plan_downloads(&args).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].dest, dest);
        assert_eq!(plan[0].source.key, "data/blob.bin");
    }

    #[test]
    fn test_plan_rejects_prefix_and_mixed_aliases() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().to_str().unwrap();

        let args = get_args(&["local/bucket/dir/", target]);
        assert_eq!(plan_downloads(&args).unwrap_err().0, ExitCode::UsageError);

        let args = get_args(&["local/bucket/a", "other/bucket/b", target]);
        assert_eq!(plan_downloads(&args).unwrap_err().0, ExitCode::UsageError);
    }

    #[test]
    fn test_plan_rejects_colliding_file_names() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let args = get_args(&[
            "local/bucket/a/x.txt",
            "local/bucket/b/x.txt",
            out.to_str().unwrap(),
        ]);

        let (code, message) = plan_downloads(&args).unwrap_err();
        assert_eq!(code, ExitCode::UsageError);
        assert!(message.contains("local/bucket/a/x.txt"), "{message}");
        assert!(message.contains("local/bucket/b/x.txt"), "{message}");

        // The same blob twice collides too
        let args = get_args(&[
            "local/bucket/a/x.txt",
            "local/bucket/a/x.txt",
            out.to_str().unwrap(),
        ]);
        assert_eq!(plan_downloads(&args).unwrap_err().0, ExitCode::UsageError);
        assert!(std::fs::read_dir(&out).unwrap().next().is_none());
    }

    #[test]
    fn test_download_several_into_directory() {
        let store = MemoryStore::new();
        store.insert("bucket", "a/one.txt", "first", Some("text/plain"));
        store.insert("bucket", "b/two.txt", vec![7u8; 200_000], None);

        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let args = get_args(&[
            "local/bucket/a/one.txt",
            "local/bucket/b/two.txt",
            out.to_str().unwrap(),
        ]);

        assert_eq!(run(&args, &store), ExitCode::Success);
        assert_eq!(std::fs::read(out.join("one.txt")).unwrap(), b"first");
        assert_eq!(std::fs::read(out.join("two.txt")).unwrap().len(), 200_000);
    }

    #[test]
    fn test_missing_blob_reports_not_found() {
        let store = MemoryStore::new();
        store.insert("bucket", "present", "x", None);

        let dir = TempDir::new().unwrap();
        let args = get_args(&[
            "local/bucket/present",
            "local/bucket/absent",
            dir.path().to_str().unwrap(),
        ]);

        assert_eq!(run(&args, &store), ExitCode::NotFound);
        assert!(dir.path().join("present").exists());
        assert!(!dir.path().join("absent").exists());
    }
}
