use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Collector settings: where to report, how to authenticate, who we are.
///
/// The agent only ever reads this; editing it is the job of whatever wrote
/// the file (settings UI, hand edit, provisioning).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub device_id: u32,
}

impl AgentConfig {
    /// Names of the fields still unset. A report can only happen when this
    /// is empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.endpoint_url.trim().is_empty() {
            missing.push("endpoint_url");
        }
        if self.secret.is_empty() {
            missing.push("secret");
        }
        if self.device_id == 0 {
            missing.push("device_id");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Prefix bare `host[:port]/path` endpoints with `https://`, matching what
/// the settings layer does before saving. Explicit `http://` is left alone so
/// a local collector can still be tested in the clear.
pub fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the config file. A missing file is not an error: it yields the
    /// default (incomplete) config so the agent can keep running and surface
    /// the missing fields on every tick instead of crashing at startup.
    pub fn load(&self) -> Result<AgentConfig> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AgentConfig::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read config file {}", self.path.display())
                });
            }
        };

        let mut config: AgentConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", self.path.display()))?;
        config.endpoint_url = normalize_endpoint(&config.endpoint_url);
        Ok(config)
    }
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => {
            let path = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("presence-agent");
            let _ = std::fs::create_dir_all(&path);
            path
        }
        None => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentConfig, ConfigStore, normalize_endpoint};
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_incomplete_default() {
        let temp = tempdir().expect("tempdir");
        let store = ConfigStore::new(temp.path().join("config.toml"));
        let config = store.load().expect("load succeeds");
        assert_eq!(config, AgentConfig::default());
        assert!(!config.is_complete());
    }

    #[test]
    fn loads_and_normalizes_endpoint() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "endpoint_url = \"collector.example.com/report\"\nsecret = \"s3cret\"\ndevice_id = 7\n",
        )
        .expect("write config");

        let config = ConfigStore::new(&path).load().expect("load succeeds");
        assert_eq!(config.endpoint_url, "https://collector.example.com/report");
        assert_eq!(config.secret, "s3cret");
        assert_eq!(config.device_id, 7);
        assert!(config.is_complete());
    }

    #[test]
    fn explicit_schemes_are_left_alone() {
        assert_eq!(
            normalize_endpoint("http://127.0.0.1:9000/report"),
            "http://127.0.0.1:9000/report"
        );
        assert_eq!(
            normalize_endpoint("https://collector.example.com"),
            "https://collector.example.com"
        );
    }

    #[test]
    fn partial_config_reports_missing_fields() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "endpoint_url = \"https://x.example\"\n").expect("write config");

        let config = ConfigStore::new(&path).load().expect("load succeeds");
        assert_eq!(config.missing_fields(), vec!["secret", "device_id"]);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "endpoint_url = [not toml").expect("write config");
        assert!(ConfigStore::new(&path).load().is_err());
    }
}
