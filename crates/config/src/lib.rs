//! Layered configuration.
//!
//! Sources are merged in increasing priority:
//!
//! 1. built-in defaults,
//! 2. `config.{toml,yaml,json}` in the platform configuration directory,
//! 3. an explicit configuration file,
//! 4. `ISOLATE_*` environment variables (nested keys separated by `__`, so
//!    `ISOLATE_HELPER__PROGRAM` sets `helper.program`),
//! 5. command-line overrides.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment variables read as configuration.
pub const ENV_PREFIX: &str = "ISOLATE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store to upload to: `file://<dir>` or an absolute directory.
    pub server: Option<String>,
    pub namespace: String,
    pub helper: HelperConfig,
    /// Files hashed concurrently within one tree.
    pub hash_concurrency: usize,
    /// Items each tree may queue ahead of the uploader.
    pub fan_in_buffer: usize,
    /// Pushes in flight at once.
    pub upload_concurrency: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            namespace: "default-gzip".to_string(),
            helper: HelperConfig::default(),
            hash_concurrency: 16,
            fan_in_buffer: 10,
            upload_concurrency: 8,
        }
    }
}

/// External program that expands `.isolate` manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}
impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python"),
            args: vec!["python_helper.py".to_string()],
        }
    }
}

/// Values given on the command line; unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Config {
    /// Loads the configuration from every source.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let user_dir = ProjectDirs::from("", "", "isolate").map(|dirs| dirs.config_dir().to_path_buf());
        Self::from_figment(Self::figment(user_dir.as_deref(), file, overrides, Some(ENV_PREFIX))?)
    }

    /// Builds the layered provider without extracting it.
    ///
    /// `user_dir` is searched for `config.{toml,yaml,json}` (missing files are
    /// skipped); `file`, when given, must exist. Environment variables are
    /// only read when `env_prefix` is set.
    pub fn figment(
        user_dir: Option<&Path>,
        file: Option<&Path>,
        overrides: &Overrides,
        env_prefix: Option<&str>,
    ) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dir) = user_dir {
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        if let Some(file) = file {
            if !file.is_file() {
                exn::bail!(ErrorKind::NotFound(file.to_path_buf()));
            }
            figment = match file.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        if let Some(prefix) = env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }
        Ok(figment.merge(Serialized::defaults(overrides)))
    }

    /// Extracts and validates a configuration.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(|e| ErrorKind::Invalid(e.to_string()))?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("hash_concurrency", self.hash_concurrency),
            ("fan_in_buffer", self.fan_in_buffer),
            ("upload_concurrency", self.upload_concurrency),
        ] {
            if value == 0 {
                exn::bail!(ErrorKind::Zero(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn load(user_dir: Option<&Path>, file: Option<&Path>, overrides: &Overrides) -> Result<Config> {
        Config::from_figment(Config::figment(user_dir, file, overrides, None)?)
    }

    #[test]
    fn test_defaults() {
        let config = load(None, None, &Overrides::default()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.namespace, "default-gzip");
        assert_eq!(config.helper.program, Path::new("python"));
        assert!(config.server.is_none());
    }

    #[test]
    fn test_layering() {
        let user_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            user_dir.path().join("config.toml"),
            "server = \"file:///srv/user\"\nnamespace = \"user\"\nhash_concurrency = 4\n[helper]\nprogram = \"python3\"\n",
        )
        .unwrap();
        let explicit_dir = tempfile::tempdir().unwrap();
        let explicit = explicit_dir.path().join("isolate.json");
        std::fs::write(&explicit, r#"{"namespace": "explicit", "upload_concurrency": 2}"#).unwrap();
        let overrides = Overrides {
            server: Some("file:///srv/cli".into()),
            namespace: None,
        };
        let config = load(Some(user_dir.path()), Some(&explicit), &overrides).unwrap();
        assert_eq!(config.server.as_deref(), Some("file:///srv/cli"));
        assert_eq!(config.namespace, "explicit");
        assert_eq!(config.hash_concurrency, 4);
        assert_eq!(config.upload_concurrency, 2);
        assert_eq!(config.fan_in_buffer, 10);
        assert_eq!(config.helper.program, Path::new("python3"));
        // Nested tables merge per key.
        assert_eq!(config.helper.args, vec!["python_helper.py".to_string()]);
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("isolate.yml");
        std::fs::write(&file, "fan_in_buffer: 3\nhelper:\n  args: [\"-m\", \"helper\"]\n").unwrap();
        let config = load(None, Some(&file), &Overrides::default()).unwrap();
        assert_eq!(config.fan_in_buffer, 3);
        assert_eq!(config.helper.args, vec!["-m".to_string(), "helper".to_string()]);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(None, Some(&dir.path().join("nope.toml")), &Overrides::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.ini");
        std::fs::write(&file, "namespace = x").unwrap();
        let err = load(None, Some(&file), &Overrides::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_wrong_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "hash_concurrency = \"lots\"").unwrap();
        let err = load(None, Some(&file), &Overrides::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[rstest]
    #[case("hash_concurrency")]
    #[case("fan_in_buffer")]
    #[case("upload_concurrency")]
    fn test_zero_rejected(#[case] key: &'static str) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, format!("{key} = 0")).unwrap();
        let err = load(None, Some(&file), &Overrides::default()).unwrap_err();
        assert_eq!(*err, ErrorKind::Zero(key));
    }
}
