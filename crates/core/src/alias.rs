//! Named endpoints
//!
//! An alias binds a short name to an endpoint and the credentials used to
//! reach it, so remote paths can be written as `alias/bucket/key`.

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};
use crate::traits::Credentials;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,

    /// Endpoint URL
    pub endpoint: String,

    pub access_key: String,

    pub secret_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket lookup style: "auto", "path", or "dns"
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Alias {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            bucket_lookup: default_bucket_lookup(),
        }
    }

    /// Credentials for connecting a registry to this endpoint
    ///
    /// "auto" picks path-style addressing, which every S3-compatible server
    /// accepts; only "dns" selects virtual-hosted buckets.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.access_key, &self.secret_key)
            .endpoint(&self.endpoint)
            .region(&self.region)
            .path_style(self.bucket_lookup != "dns")
    }
}

/// Alias operations backed by the configuration file
#[derive(Debug)]
pub struct AliasManager {
    config_manager: ConfigManager,
}

impl AliasManager {
    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    pub fn new() -> Result<Self> {
        Ok(Self {
            config_manager: ConfigManager::new()?,
        })
    }

    pub fn list(&self) -> Result<Vec<Alias>> {
        Ok(self.config_manager.load()?.aliases)
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        self.config_manager
            .load()?
            .aliases
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// Add an alias, replacing one with the same name
    pub fn set(&self, alias: Alias) -> Result<()> {
        if alias.name.is_empty() || alias.name.contains('/') {
            return Err(Error::Config(format!("Invalid alias name '{}'", alias.name)));
        }
        url::Url::parse(&alias.endpoint)?;
        if !matches!(alias.bucket_lookup.as_str(), "auto" | "path" | "dns") {
            return Err(Error::Config(format!(
                "Invalid bucket lookup '{}', expected auto, path or dns",
                alias.bucket_lookup
            )));
        }

        let mut config = self.config_manager.load()?;
        config.aliases.retain(|a| a.name != alias.name);
        config.aliases.push(alias);
        self.config_manager.save(&config)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let before = config.aliases.len();
        config.aliases.retain(|a| a.name != name);
        if config.aliases.len() == before {
            return Err(Error::AliasNotFound(name.to_string()));
        }
        self.config_manager.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_alias_manager() -> (AliasManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_manager = ConfigManager::with_path(temp_dir.path().join("config.toml"));
        (AliasManager::with_config_manager(config_manager), temp_dir)
    }

    #[test]
    fn test_alias_credentials() {
        let mut alias = Alias::new("local", "http://localhost:9000", "ak", "sk");
        let creds = alias.credentials();
        assert_eq!(creds.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(creds.access_key, "ak");
        assert_eq!(creds.region, "us-east-1");
        assert!(creds.path_style);

        alias.bucket_lookup = "dns".into();
        assert!(!alias.credentials().path_style);
    }

    #[test]
    fn test_set_get_remove() {
        let (manager, _temp_dir) = temp_alias_manager();

        manager
            .set(Alias::new("minio", "http://localhost:9000", "a", "b"))
            .unwrap();
        manager
            .set(Alias::new("minio", "http://other:9000", "c", "d"))
            .unwrap();

        let aliases = manager.list().unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(manager.get("minio").unwrap().endpoint, "http://other:9000");

        manager.remove("minio").unwrap();
        assert!(matches!(manager.get("minio"), Err(Error::AliasNotFound(_))));
        assert!(matches!(
            manager.remove("minio"),
            Err(Error::AliasNotFound(_))
        ));
    }

    #[test]
    fn test_set_rejects_bad_aliases() {
        let (manager, _temp_dir) = temp_alias_manager();

        assert!(matches!(
            manager.set(Alias::new("a/b", "http://localhost:9000", "a", "b")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            manager.set(Alias::new("a", "not a url", "a", "b")),
            Err(Error::InvalidUrl(_))
        ));

        let mut alias = Alias::new("a", "http://localhost:9000", "a", "b");
        alias.bucket_lookup = "sideways".into();
        assert!(matches!(manager.set(alias), Err(Error::Config(_))));
        assert!(manager.list().unwrap().is_empty());
    }
}
