//! Remote path parsing
//!
//! Remote locations are written `alias/bucket[/key]`. A key ending in `/`
//! (or an empty key) names a prefix rather than a single blob.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub alias: String,
    pub bucket: String,
    /// Blob path within the bucket; empty for the bucket root
    pub key: String,
}

impl RemotePath {
    pub fn new(alias: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether the key names a prefix
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Path of `name` under this prefix
    pub fn join(&self, name: &str) -> Self {
        let base = self.key.trim_end_matches('/');
        let key = if base.is_empty() {
            name.to_string()
        } else {
            format!("{base}/{name}")
        };
        Self::new(&self.alias, &self.bucket, key)
    }

    /// Last segment of the key
    pub fn file_name(&self) -> Option<&str> {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}/{}", self.alias, self.bucket)
        } else {
            write!(f, "{}/{}/{}", self.alias, self.bucket, self.key)
        }
    }
}

/// Parse `alias/bucket[/key]`
pub fn parse_path(path: &str) -> Result<RemotePath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }
    if path.starts_with('/') || path.starts_with("./") || path.starts_with("../") {
        return Err(Error::InvalidPath(format!(
            "'{path}' is a local path, expected alias/bucket[/key]"
        )));
    }

    let mut parts = path.splitn(3, '/');
    let alias = parts.next().unwrap_or_default();
    let bucket = parts.next().unwrap_or_default();
    let key = parts.next().unwrap_or_default();

    if alias.is_empty() || bucket.is_empty() {
        return Err(Error::InvalidPath(format!(
            "'{path}' is missing a bucket, expected alias/bucket[/key]"
        )));
    }
    validate_bucket(bucket)?;

    Ok(RemotePath::new(alias, bucket, key))
}

/// S3 bucket naming: 3-63 characters of lowercase letters, digits, dots and
/// hyphens, starting and ending alphanumeric
fn validate_bucket(bucket: &str) -> Result<()> {
    let valid_chars = bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-');
    let valid_ends = bucket
        .bytes()
        .next()
        .zip(bucket.bytes().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if (3..=63).contains(&bucket.len()) && valid_chars && valid_ends {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("Invalid bucket name '{bucket}'")))
    }
}
