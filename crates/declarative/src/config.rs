//! Run configuration
//!
//! Configuration is a flat map of namespaced keys such as `gcp:region` or
//! `wp:networkName`. It is loaded from a per-stack TOML file whose top-level
//! tables are the namespaces, and is passed explicitly to the program that
//! builds the resource graph.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Namespaced key-value configuration for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a stack configuration file. A missing file yields empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            Error::ConfigParse { message, .. } => Error::ConfigParse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        log::debug!(
            "Loaded {} config values from {}",
            config.values.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse TOML where each top-level table is a namespace.
    ///
    /// Nested tables are flattened with dots: `[wp.disk] size = 20` becomes
    /// `wp:disk.size`.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content).map_err(|e| Error::ConfigParse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;

        let mut config = Self::default();
        for (namespace, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(Error::InvalidConfig {
                    key: namespace,
                    message: "top-level keys must be namespace tables".into(),
                });
            };
            flatten(&namespace, None, entries, &mut config.values);
        }
        Ok(config)
    }

    /// Set a fully qualified key (`namespace:key`).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Apply a `namespace:key=value` override.
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| Error::InvalidConfig {
                key: assignment.to_string(),
                message: "expected namespace:key=value".into(),
            })?;
        let key = key.trim();
        match key.split_once(':') {
            Some((ns, k)) if !ns.is_empty() && !k.is_empty() => {
                self.set(key, value);
                Ok(())
            }
            _ => Err(Error::InvalidConfig {
                key: key.to_string(),
                message: "keys must be namespaced, e.g. gcp:region".into(),
            }),
        }
    }

    /// Look up a fully qualified key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Scoped view onto one namespace.
    pub fn namespace<'a>(&'a self, name: &str) -> Namespace<'a> {
        Namespace {
            config: self,
            name: name.to_string(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn flatten(
    namespace: &str,
    prefix: Option<&str>,
    entries: toml::Table,
    out: &mut BTreeMap<String, String>,
) {
    for (key, value) in entries {
        let path = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key,
        };
        let text = match value {
            toml::Value::Table(nested) => {
                flatten(namespace, Some(&path), nested, out);
                continue;
            }
            toml::Value::String(s) => s,
            toml::Value::Array(items) => serde_json::to_string(&items).unwrap_or_default(),
            other => other.to_string(),
        };
        out.insert(format!("{namespace}:{path}"), text);
    }
}

/// Keys within one configuration namespace.
#[derive(Debug, Clone)]
pub struct Namespace<'a> {
    config: &'a Config,
    name: String,
}

impl<'a> Namespace<'a> {
    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.config.get(&self.full_key(key))
    }

    /// A value that must be present.
    pub fn require(&self, key: &str) -> Result<&'a str> {
        self.get(key).ok_or_else(|| Error::MissingConfig {
            key: self.full_key(key),
        })
    }

    /// A value that must be present and parse as `T`.
    pub fn require_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.require(key)?;
        raw.parse().map_err(|e: T::Err| Error::InvalidConfig {
            key: self.full_key(key),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STACK: &str = r#"
[gcp]
region = "europe-west1"
zone = "europe-west1-b"

[wp]
networkName = "default"
bootDiskSize = 20

[wp.labels]
env = "dev"
"#;

    #[test]
    fn test_namespaced_lookup() {
        let config = Config::from_toml_str(STACK).unwrap();
        let gcp = config.namespace("gcp");
        assert_eq!(gcp.require("region").unwrap(), "europe-west1");
        assert_eq!(config.get("wp:networkName"), Some("default"));
        assert_eq!(config.get("wp:labels.env"), Some("dev"));
        assert_eq!(
            config.namespace("wp").require_parsed::<u32>("bootDiskSize").unwrap(),
            20
        );
    }

    #[test]
    fn test_missing_key_names_full_key() {
        let config = Config::from_toml_str(STACK).unwrap();
        let err = config.namespace("wp").require("machineType").unwrap_err();
        assert!(matches!(err, Error::MissingConfig { ref key } if key == "wp:machineType"));
    }

    #[test]
    fn test_invalid_parse() {
        let config = Config::from_toml_str(STACK).unwrap();
        let err = config
            .namespace("gcp")
            .require_parsed::<u32>("region")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_top_level_scalar_rejected() {
        assert!(matches!(
            Config::from_toml_str("region = \"x\""),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::new();
        config.apply_override("wp:machineType=e2-small").unwrap();
        assert_eq!(config.get("wp:machineType"), Some("e2-small"));
        assert!(config.apply_override("machineType=e2-small").is_err());
        assert!(config.apply_override("wp:machineType").is_err());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(&tmp.path().join("Stack.dev.toml")).unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Stack.dev.toml");
        fs::write(&path, "[gcp\nregion=").unwrap();
        match Config::load(&path).unwrap_err() {
            Error::ConfigParse { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
